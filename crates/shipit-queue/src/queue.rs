//! In-memory durable job queue with atomic claim and retry-requeue.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{Duration, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use shipit_config::QueueConfig;
use shipit_core::event::{JobEvent, JobEventKind};
use shipit_core::job::{FailureInfo, Job, JobOptions, JobProgress, JobStatus, QueueName};
use shipit_core::stage::Stage;
use shipit_core::{Error, JobId, Result};

/// Buffered events per queue before lagging subscribers start dropping.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Per-status counts for one queue.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub delayed: usize,
    /// Waiting jobs that can no longer be claimed because the queue is
    /// draining or closed.
    pub paused: usize,
}

struct QueueState {
    jobs: HashMap<JobId, Job>,
    /// Insertion order, tie-breaker for equal-priority claims.
    seq: HashMap<JobId, u64>,
    next_seq: u64,
    /// Per-job subscriptions, torn down when the job reaches a terminal state.
    watchers: HashMap<JobId, Vec<mpsc::UnboundedSender<JobEvent>>>,
    accepting: bool,
}

/// A named, ordered collection of jobs with its own retry/backoff policy.
///
/// All transitions go through the methods below; job records are never
/// mutated by direct field writes from outside this module.
pub struct JobQueue {
    name: QueueName,
    config: QueueConfig,
    state: Mutex<QueueState>,
    events: broadcast::Sender<JobEvent>,
}

impl JobQueue {
    pub fn new(mut config: QueueConfig) -> Self {
        // Cleanup jobs must never re-run, whatever the config says.
        if !config.name.allows_retry() {
            config.max_attempts = 1;
        }
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            name: config.name,
            config,
            state: Mutex::new(QueueState {
                jobs: HashMap::new(),
                seq: HashMap::new(),
                next_seq: 0,
                watchers: HashMap::new(),
                accepting: true,
            }),
            events,
        }
    }

    pub fn name(&self) -> QueueName {
        self.name
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Subscribe to all events on this queue.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Subscribe to the events of a single job. The channel closes when the
    /// job reaches a terminal state.
    pub fn watch_job(&self, id: &JobId) -> Result<mpsc::UnboundedReceiver<JobEvent>> {
        let mut state = self.state.lock().unwrap();
        let job = state
            .jobs
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("job {}", id)))?;
        let (tx, rx) = mpsc::unbounded_channel();
        if !job.status.is_terminal() {
            state.watchers.entry(id.clone()).or_default().push(tx);
        }
        Ok(rx)
    }

    /// Create a job record, or return the existing one when the id is an
    /// idempotency hit on a live job.
    pub fn enqueue(&self, payload: serde_json::Value, options: JobOptions) -> Result<Job> {
        let now = Utc::now();
        let mut state = self.state.lock().unwrap();
        if !state.accepting {
            return Err(Error::QueueClosed);
        }

        let id = options.job_id.clone().unwrap_or_else(JobId::generate);
        if let Some(existing) = state.jobs.get(&id) {
            if !existing.status.is_terminal() {
                return Ok(existing.clone());
            }
            // A terminal record's lifetime is over; the resubmission replaces it.
            info!(queue = %self.name, job_id = %id, "replacing terminal job record");
        }

        let max_attempts = if self.name.allows_retry() {
            options.max_attempts.unwrap_or(self.config.max_attempts).max(1)
        } else {
            if options.max_attempts.is_some_and(|n| n != 1) {
                warn!(queue = %self.name, job_id = %id, "max_attempts override ignored on no-retry queue");
            }
            1
        };

        let (status, not_before) = match options.delay_ms {
            Some(ms) if ms > 0 => (
                JobStatus::Delayed,
                Some(now + Duration::milliseconds(ms as i64)),
            ),
            _ => (JobStatus::Waiting, None),
        };

        let job = Job {
            id: id.clone(),
            queue: self.name,
            payload,
            status,
            progress: JobProgress::initial("queued", now),
            priority: options.priority,
            attempts_made: 0,
            max_attempts,
            result: None,
            failure: None,
            created_at: now,
            processed_at: None,
            finished_at: None,
            not_before,
        };

        let seq = state.next_seq;
        state.next_seq += 1;
        state.seq.insert(id.clone(), seq);
        state.jobs.insert(id.clone(), job.clone());
        drop(state);

        info!(queue = %self.name, job_id = %id, status = %job.status, "job enqueued");
        if job.status == JobStatus::Waiting {
            self.emit(JobEvent::new(self.name, id, JobEventKind::Waiting));
        }
        Ok(job)
    }

    /// Atomically claim the oldest eligible job, transitioning it to Active.
    ///
    /// Eligible jobs are Waiting, or Delayed with an elapsed delay; claim
    /// order is priority descending, then created_at ascending. Safe under
    /// concurrent callers: the state lock guarantees no two callers receive
    /// the same job.
    pub fn claim_next(&self) -> Option<Job> {
        let now = Utc::now();
        let mut state = self.state.lock().unwrap();
        if !state.accepting {
            return None;
        }

        let id = state
            .jobs
            .values()
            .filter(|j| j.is_eligible(now))
            .min_by_key(|j| {
                (
                    -(j.priority as i64),
                    j.created_at,
                    state.seq.get(&j.id).copied().unwrap_or(u64::MAX),
                )
            })
            .map(|j| j.id.clone())?;

        let job = state.jobs.get_mut(&id).expect("job present under lock");
        job.status = JobStatus::Active;
        job.attempts_made += 1;
        job.processed_at = Some(now);
        job.not_before = None;
        job.progress = JobProgress::initial(format!("attempt {} started", job.attempts_made), now);
        let claimed = job.clone();
        drop(state);

        info!(
            queue = %self.name,
            job_id = %claimed.id,
            attempt = claimed.attempts_made,
            max_attempts = claimed.max_attempts,
            "job claimed"
        );
        self.emit(JobEvent::new(
            self.name,
            claimed.id.clone(),
            JobEventKind::Active {
                attempt: claimed.attempts_made,
            },
        ));
        Some(claimed)
    }

    /// Persist stage progress for an Active job.
    ///
    /// Percentage is clamped to be non-decreasing within the attempt. The
    /// update also refreshes the heartbeat consulted by the stalled sweep.
    pub fn report_progress(
        &self,
        id: &JobId,
        stage: Stage,
        percentage: u8,
        message: &str,
    ) -> Result<()> {
        let now = Utc::now();
        let mut state = self.state.lock().unwrap();
        let job = get_job_mut(&mut state, id)?;
        if job.status != JobStatus::Active {
            return Err(Error::InvalidState {
                operation: "report_progress",
                status: job.status,
            });
        }

        job.progress = JobProgress {
            stage,
            percentage: percentage.min(100).max(job.progress.percentage),
            message: message.to_string(),
            updated_at: now,
        };
        let event = JobEvent::new(
            self.name,
            id.clone(),
            JobEventKind::Progress {
                stage,
                percentage: job.progress.percentage,
                message: message.to_string(),
            },
        );
        drop(state);

        self.emit(event);
        Ok(())
    }

    /// Transition an Active job to Completed, storing its result.
    pub fn ack(&self, id: &JobId, result: serde_json::Value) -> Result<Job> {
        let now = Utc::now();
        let mut state = self.state.lock().unwrap();
        let job = get_job_mut(&mut state, id)?;
        if job.status != JobStatus::Active {
            return Err(Error::InvalidState {
                operation: "ack",
                status: job.status,
            });
        }

        job.status = JobStatus::Completed;
        job.result = Some(result);
        job.finished_at = Some(now);
        job.progress = JobProgress {
            stage: Stage::Completed,
            percentage: 100,
            message: "completed".to_string(),
            updated_at: now,
        };
        let completed = job.clone();
        drop(state);

        info!(queue = %self.name, job_id = %id, attempts = completed.attempts_made, "job completed");
        self.emit(JobEvent::new(self.name, id.clone(), JobEventKind::Completed));
        Ok(completed)
    }

    /// Record a failed attempt.
    ///
    /// With attempts remaining the job is re-scheduled as Delayed using the
    /// queue's exponential backoff; otherwise it fails permanently.
    pub fn fail(&self, id: &JobId, stage: Stage, reason: &str) -> Result<Job> {
        let now = Utc::now();
        let mut state = self.state.lock().unwrap();
        let job = get_job_mut(&mut state, id)?;
        if job.status != JobStatus::Active {
            return Err(Error::InvalidState {
                operation: "fail",
                status: job.status,
            });
        }

        if job.attempts_made < job.max_attempts {
            let backoff = backoff_delay(&self.config, job.attempts_made);
            job.status = JobStatus::Delayed;
            job.not_before = Some(now + backoff);
            let job = job.clone();
            drop(state);

            warn!(
                queue = %self.name,
                job_id = %id,
                stage = %stage,
                attempt = job.attempts_made,
                max_attempts = job.max_attempts,
                backoff_ms = backoff.num_milliseconds(),
                reason,
                "attempt failed, retry scheduled"
            );
            return Ok(job);
        }

        job.status = JobStatus::Failed;
        job.failure = Some(FailureInfo {
            stage,
            reason: reason.to_string(),
            attempts_made: job.attempts_made,
        });
        job.finished_at = Some(now);
        let failed = job.clone();
        drop(state);

        warn!(
            queue = %self.name,
            job_id = %id,
            stage = %stage,
            attempts = failed.attempts_made,
            reason,
            "job failed permanently"
        );
        self.emit(JobEvent::new(
            self.name,
            id.clone(),
            JobEventKind::Failed {
                stage,
                reason: reason.to_string(),
            },
        ));
        Ok(failed)
    }

    /// Cancel a job that has not started. Valid only while Waiting or Delayed.
    pub fn remove(&self, id: &JobId) -> Result<Job> {
        let now = Utc::now();
        let mut state = self.state.lock().unwrap();
        let job = get_job_mut(&mut state, id)?;
        if !matches!(job.status, JobStatus::Waiting | JobStatus::Delayed) {
            return Err(Error::InvalidState {
                operation: "remove",
                status: job.status,
            });
        }

        job.status = JobStatus::Removed;
        job.finished_at = Some(now);
        let removed = job.clone();
        teardown_watchers(&mut state, id);
        drop(state);

        info!(queue = %self.name, job_id = %id, "job removed");
        Ok(removed)
    }

    /// Re-enqueue a Failed job as a fresh submission: attempts reset to zero,
    /// result and failure cleared.
    pub fn retry(&self, id: &JobId) -> Result<Job> {
        let now = Utc::now();
        let mut state = self.state.lock().unwrap();
        let job = get_job_mut(&mut state, id)?;
        if job.status != JobStatus::Failed {
            return Err(Error::InvalidState {
                operation: "retry",
                status: job.status,
            });
        }

        job.status = JobStatus::Waiting;
        job.attempts_made = 0;
        job.result = None;
        job.failure = None;
        job.processed_at = None;
        job.finished_at = None;
        job.not_before = None;
        job.created_at = now;
        job.progress = JobProgress::initial("queued", now);
        let retried = job.clone();

        // Back of the queue relative to its peers.
        let seq = state.next_seq;
        state.next_seq += 1;
        state.seq.insert(id.clone(), seq);
        drop(state);

        info!(queue = %self.name, job_id = %id, "failed job re-enqueued");
        self.emit(JobEvent::new(self.name, id.clone(), JobEventKind::Waiting));
        Ok(retried)
    }

    pub fn get_job(&self, id: &JobId) -> Result<Job> {
        let state = self.state.lock().unwrap();
        state
            .jobs
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("job {}", id)))
    }

    /// All jobs, optionally filtered by status, newest first.
    pub fn list_jobs(&self, filter: Option<JobStatus>) -> Vec<Job> {
        let state = self.state.lock().unwrap();
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|j| filter.is_none_or(|f| j.status == f))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock().unwrap();
        let mut stats = QueueStats::default();
        for job in state.jobs.values() {
            match job.status {
                JobStatus::Waiting => stats.waiting += 1,
                JobStatus::Active => stats.active += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Delayed | JobStatus::Stalled => stats.delayed += 1,
                JobStatus::Removed => {}
            }
        }
        if !state.accepting {
            stats.paused = stats.waiting;
            stats.waiting = 0;
        }
        stats
    }

    pub fn active_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Active)
            .count()
    }

    /// Detect jobs whose worker stopped heartbeating and recover them.
    ///
    /// A job Active longer than the heartbeat timeout with no progress update
    /// is marked Stalled, then returned to Waiting (attempts remaining) or
    /// Failed (exhausted). Returns the ids of recovered jobs.
    pub fn sweep_stalled(&self) -> Vec<JobId> {
        let now = Utc::now();
        let timeout = Duration::milliseconds(self.config.heartbeat_timeout_ms as i64);
        let mut events = Vec::new();
        let mut swept = Vec::new();

        let mut state = self.state.lock().unwrap();
        let stalled: Vec<JobId> = state
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Active && now - j.progress.updated_at > timeout)
            .map(|j| j.id.clone())
            .collect();

        for id in stalled {
            let job = state.jobs.get_mut(&id).expect("job present under lock");
            job.status = JobStatus::Stalled;
            events.push(JobEvent::new(self.name, id.clone(), JobEventKind::Stalled));

            if job.attempts_made < job.max_attempts {
                job.status = JobStatus::Waiting;
                job.not_before = None;
                job.progress.message = "stalled, returned to queue".to_string();
                warn!(queue = %self.name, job_id = %id, attempt = job.attempts_made, "stalled job requeued");
                events.push(JobEvent::new(self.name, id.clone(), JobEventKind::Waiting));
            } else {
                let stage = job.progress.stage;
                job.status = JobStatus::Failed;
                job.failure = Some(FailureInfo {
                    stage,
                    reason: "stalled: no progress within heartbeat timeout".to_string(),
                    attempts_made: job.attempts_made,
                });
                job.finished_at = Some(now);
                warn!(queue = %self.name, job_id = %id, "stalled job failed, attempts exhausted");
                events.push(JobEvent::new(
                    self.name,
                    id.clone(),
                    JobEventKind::Failed {
                        stage,
                        reason: "stalled: no progress within heartbeat timeout".to_string(),
                    },
                ));
            }
            swept.push(id);
        }
        drop(state);

        for event in events {
            self.emit(event);
        }
        swept
    }

    /// Stop handing out jobs and accepting new ones. Idempotent.
    pub fn stop_accepting(&self) {
        let mut state = self.state.lock().unwrap();
        if state.accepting {
            state.accepting = false;
            info!(queue = %self.name, "queue stopped accepting work");
        }
    }

    fn emit(&self, event: JobEvent) {
        let terminal = event.is_terminal();
        let job_id = event.job_id.clone();

        // Broadcast delivery is lossy for lagging subscribers; consumers poll
        // as the fallback.
        let _ = self.events.send(event.clone());

        let mut state = self.state.lock().unwrap();
        if let Some(watchers) = state.watchers.get_mut(&job_id) {
            watchers.retain(|tx| tx.send(event.clone()).is_ok());
        }
        if terminal {
            teardown_watchers(&mut state, &job_id);
        }
    }
}

fn get_job_mut<'a>(state: &'a mut QueueState, id: &JobId) -> Result<&'a mut Job> {
    state
        .jobs
        .get_mut(id)
        .ok_or_else(|| Error::NotFound(format!("job {}", id)))
}

fn teardown_watchers(state: &mut QueueState, id: &JobId) {
    state.watchers.remove(id);
}

/// Exponential backoff before a failed attempt becomes eligible again:
/// `base * 2^(attempts-1)`, capped.
fn backoff_delay(config: &QueueConfig, attempts_made: u32) -> Duration {
    let factor = 1u64 << (attempts_made.saturating_sub(1)).min(32);
    let ms = config
        .backoff_base_ms
        .saturating_mul(factor)
        .min(config.backoff_cap_ms);
    Duration::milliseconds(ms as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_config(name: QueueName) -> QueueConfig {
        QueueConfig {
            backoff_base_ms: 100,
            backoff_cap_ms: 1_000,
            ..QueueConfig::defaults_for(name)
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = test_config(QueueName::Generation);
        assert_eq!(backoff_delay(&config, 1).num_milliseconds(), 100);
        assert_eq!(backoff_delay(&config, 2).num_milliseconds(), 200);
        assert_eq!(backoff_delay(&config, 3).num_milliseconds(), 400);
        assert_eq!(backoff_delay(&config, 10).num_milliseconds(), 1_000);
    }

    #[test]
    fn test_claim_order_priority_then_age() {
        let queue = JobQueue::new(test_config(QueueName::Generation));
        let low = queue.enqueue(json!({}), JobOptions::default()).unwrap();
        let high = queue
            .enqueue(
                json!({}),
                JobOptions {
                    priority: 10,
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(queue.claim_next().unwrap().id, high.id);
        assert_eq!(queue.claim_next().unwrap().id, low.id);
        assert!(queue.claim_next().is_none());
    }

    #[test]
    fn test_claim_resets_progress_per_attempt() {
        let queue = JobQueue::new(test_config(QueueName::Generation));
        let job = queue.enqueue(json!({}), JobOptions::default()).unwrap();

        let claimed = queue.claim_next().unwrap();
        assert_eq!(claimed.attempts_made, 1);
        queue
            .report_progress(&job.id, Stage::GeneratingCode, 30, "generating")
            .unwrap();

        // Progress may not go backwards within the attempt.
        queue
            .report_progress(&job.id, Stage::GeneratingCode, 10, "late update")
            .unwrap();
        assert_eq!(queue.get_job(&job.id).unwrap().progress.percentage, 30);

        queue.fail(&job.id, Stage::GeneratingCode, "boom").unwrap();
        let delayed = queue.get_job(&job.id).unwrap();
        assert_eq!(delayed.status, JobStatus::Delayed);
        // Progress is untouched until the next attempt begins.
        assert_eq!(delayed.progress.percentage, 30);

        // Fast-forward the delay.
        {
            let mut state = queue.state.lock().unwrap();
            state.jobs.get_mut(&job.id).unwrap().not_before = Some(Utc::now());
        }
        let reclaimed = queue.claim_next().unwrap();
        assert_eq!(reclaimed.attempts_made, 2);
        assert_eq!(reclaimed.progress.percentage, 0);
    }

    #[test]
    fn test_progress_rejected_unless_active() {
        let queue = JobQueue::new(test_config(QueueName::Generation));
        let job = queue.enqueue(json!({}), JobOptions::default()).unwrap();

        let err = queue
            .report_progress(&job.id, Stage::Initializing, 5, "early")
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
    }

    #[test]
    fn test_ack_requires_active() {
        let queue = JobQueue::new(test_config(QueueName::Generation));
        let job = queue.enqueue(json!({}), JobOptions::default()).unwrap();
        assert!(matches!(
            queue.ack(&job.id, json!({})).unwrap_err(),
            Error::InvalidState { .. }
        ));

        queue.claim_next().unwrap();
        let done = queue.ack(&job.id, json!({"ok": true})).unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress.percentage, 100);
        assert!(done.finished_at.is_some());

        // No transition is defined out of a terminal state.
        assert!(matches!(
            queue.ack(&job.id, json!({})).unwrap_err(),
            Error::InvalidState { .. }
        ));
    }

    #[test]
    fn test_stalled_sweep_requeues_then_fails() {
        let mut config = test_config(QueueName::Generation);
        config.heartbeat_timeout_ms = 0;
        config.max_attempts = 2;
        let queue = JobQueue::new(config);
        let job = queue.enqueue(json!({}), JobOptions::default()).unwrap();

        queue.claim_next().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let swept = queue.sweep_stalled();
        assert_eq!(swept, vec![job.id.clone()]);
        assert_eq!(queue.get_job(&job.id).unwrap().status, JobStatus::Waiting);

        queue.claim_next().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        queue.sweep_stalled();
        let failed = queue.get_job(&job.id).unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed.failure.unwrap().reason.contains("stalled"));
    }

    #[test]
    fn test_stats_counts_and_paused() {
        let queue = JobQueue::new(test_config(QueueName::Generation));
        queue.enqueue(json!({}), JobOptions::default()).unwrap();
        queue.enqueue(json!({}), JobOptions::default()).unwrap();
        queue
            .enqueue(
                json!({}),
                JobOptions {
                    delay_ms: Some(60_000),
                    ..Default::default()
                },
            )
            .unwrap();
        queue.claim_next().unwrap();

        let stats = queue.stats();
        assert_eq!(stats.waiting, 1);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.delayed, 1);
        assert_eq!(stats.paused, 0);

        queue.stop_accepting();
        let stats = queue.stats();
        assert_eq!(stats.waiting, 0);
        assert_eq!(stats.paused, 1);
        assert!(queue.claim_next().is_none());
    }

    #[test]
    fn test_watchers_torn_down_at_terminal() {
        let queue = JobQueue::new(test_config(QueueName::Generation));
        let job = queue.enqueue(json!({}), JobOptions::default()).unwrap();
        let mut rx = queue.watch_job(&job.id).unwrap();

        queue.claim_next().unwrap();
        queue.ack(&job.id, json!({})).unwrap();

        // Drain what was delivered, then observe the closed channel.
        let mut saw_completed = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event.kind, JobEventKind::Completed) {
                saw_completed = true;
            }
        }
        assert!(saw_completed);
        assert!(queue.state.lock().unwrap().watchers.is_empty());
    }
}
