//! Job lifecycle events.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::JobId;
use crate::job::QueueName;
use crate::stage::Stage;

/// Notification emitted on every observable job transition.
///
/// Delivery is at-least-once; consumers must tolerate duplicates and missed
/// events and fall back to polling the job record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub queue: QueueName,
    pub job_id: JobId,
    #[serde(flatten)]
    pub kind: JobEventKind,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum JobEventKind {
    Waiting,
    Active {
        attempt: u32,
    },
    Progress {
        stage: Stage,
        percentage: u8,
        message: String,
    },
    Completed,
    Failed {
        stage: Stage,
        reason: String,
    },
    Stalled,
}

impl JobEvent {
    pub fn new(queue: QueueName, job_id: JobId, kind: JobEventKind) -> Self {
        Self {
            queue,
            job_id,
            kind,
            timestamp: Utc::now(),
        }
    }

    /// Whether this event marks the end of the job's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            JobEventKind::Completed | JobEventKind::Failed { .. }
        )
    }
}
