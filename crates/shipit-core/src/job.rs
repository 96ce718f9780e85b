//! Job records and the queue taxonomy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::JobId;
use crate::error::Error;
use crate::stage::Stage;

/// The fixed set of job queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueName {
    Generation,
    Build,
    Deployment,
    Cleanup,
}

impl QueueName {
    pub const ALL: [QueueName; 4] = [
        QueueName::Generation,
        QueueName::Build,
        QueueName::Deployment,
        QueueName::Cleanup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Generation => "generation",
            QueueName::Build => "build",
            QueueName::Deployment => "deployment",
            QueueName::Cleanup => "cleanup",
        }
    }

    /// Cleanup operations are not assumed idempotent and must never re-run.
    pub fn allows_retry(&self) -> bool {
        !matches!(self, QueueName::Cleanup)
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QueueName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generation" => Ok(QueueName::Generation),
            "build" => Ok(QueueName::Build),
            "deployment" => Ok(QueueName::Deployment),
            "cleanup" => Ok(QueueName::Cleanup),
            other => Err(Error::UnknownQueue(other.to_string())),
        }
    }
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
    Stalled,
    Removed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Removed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Delayed => "delayed",
            JobStatus::Stalled => "stalled",
            JobStatus::Removed => "removed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live progress of the current attempt.
///
/// `percentage` is monotonically non-decreasing within one attempt and resets
/// to zero only when a new attempt begins. `updated_at` doubles as the
/// heartbeat used for stalled-job detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub stage: Stage,
    pub percentage: u8,
    pub message: String,
    pub updated_at: DateTime<Utc>,
}

impl JobProgress {
    pub fn initial(message: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            stage: Stage::Initializing,
            percentage: 0,
            message: message.into(),
            updated_at: now,
        }
    }
}

/// Why a job ended in `Failed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureInfo {
    /// Stage at which the final attempt failed.
    pub stage: Stage,
    pub reason: String,
    pub attempts_made: u32,
}

/// Options accepted at submission time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOptions {
    /// Idempotency key. Submitting an existing, non-terminal id returns the
    /// existing record unchanged.
    pub job_id: Option<JobId>,
    /// Higher priority claims first; equal priorities claim oldest-first.
    #[serde(default)]
    pub priority: i32,
    /// Initial eligibility delay.
    pub delay_ms: Option<u64>,
    /// Per-job override of the queue's default. Ignored on the cleanup queue.
    pub max_attempts: Option<u32>,
}

/// One unit of submitted work, tracked through the state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub queue: QueueName,
    /// Opaque structured data interpreted by the queue's processor.
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub progress: JobProgress,
    pub priority: i32,
    /// Incremented on every (re)claim. Never exceeds `max_attempts`.
    pub attempts_made: u32,
    pub max_attempts: u32,
    /// Present only when status is `Completed`.
    pub result: Option<serde_json::Value>,
    /// Present only when status is `Failed`.
    pub failure: Option<FailureInfo>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Earliest instant a delayed job becomes eligible for claim.
    pub not_before: Option<DateTime<Utc>>,
}

impl Job {
    /// Whether the job may currently be claimed by a worker.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            JobStatus::Waiting => true,
            JobStatus::Delayed => self.not_before.is_none_or(|t| t <= now),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_names_round_trip() {
        for name in QueueName::ALL {
            assert_eq!(name.as_str().parse::<QueueName>().unwrap(), name);
        }
        assert!("reports".parse::<QueueName>().is_err());
    }

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Removed.is_terminal());
        assert!(!JobStatus::Waiting.is_terminal());
        assert!(!JobStatus::Active.is_terminal());
        assert!(!JobStatus::Delayed.is_terminal());
        assert!(!JobStatus::Stalled.is_terminal());
    }

    #[test]
    fn delayed_job_eligibility_follows_not_before() {
        let now = Utc::now();
        let mut job = Job {
            id: JobId::generate(),
            queue: QueueName::Generation,
            payload: serde_json::Value::Null,
            status: JobStatus::Delayed,
            progress: JobProgress::initial("queued", now),
            priority: 0,
            attempts_made: 0,
            max_attempts: 3,
            result: None,
            failure: None,
            created_at: now,
            processed_at: None,
            finished_at: None,
            not_before: Some(now + chrono::Duration::seconds(30)),
        };
        assert!(!job.is_eligible(now));
        assert!(job.is_eligible(now + chrono::Duration::seconds(31)));
        job.status = JobStatus::Active;
        assert!(!job.is_eligible(now + chrono::Duration::seconds(31)));
    }
}
