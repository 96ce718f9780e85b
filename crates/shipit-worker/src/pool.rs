//! Worker pool: N slot loops per queue plus a stalled-job sweeper.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{info, warn};

use shipit_core::job::Job;
use shipit_core::processor::{Processor, ProgressReporter};
use shipit_queue::JobQueue;

/// A pool of worker slots for one queue.
///
/// Each slot runs an independent claim → process → ack/fail loop, so the
/// configured concurrency bounds the number of simultaneously active jobs.
/// Slots stop after finishing their current job once the shutdown signal
/// flips.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    sweeper: JoinHandle<()>,
}

impl WorkerPool {
    pub fn spawn(
        queue: Arc<JobQueue>,
        processor: Arc<dyn Processor>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let concurrency = queue.config().concurrency;
        info!(queue = %queue.name(), concurrency, "starting worker pool");

        let handles = (0..concurrency)
            .map(|slot| {
                tokio::spawn(worker_loop(
                    slot,
                    queue.clone(),
                    processor.clone(),
                    shutdown.clone(),
                ))
            })
            .collect();

        let sweeper = tokio::spawn(sweep_loop(queue, shutdown));

        Self { handles, sweeper }
    }

    /// Wait for every slot to finish its current job and exit.
    pub async fn join(self) {
        futures::future::join_all(self.handles).await;
        self.sweeper.abort();
        let _ = self.sweeper.await;
    }
}

async fn worker_loop(
    slot: usize,
    queue: Arc<JobQueue>,
    processor: Arc<dyn Processor>,
    mut shutdown: watch::Receiver<bool>,
) {
    let poll_interval = Duration::from_millis(queue.config().poll_interval_ms.max(1));
    info!(queue = %queue.name(), slot, "worker started");

    loop {
        if *shutdown.borrow() {
            break;
        }
        match queue.claim_next() {
            Some(job) => run_job(&queue, processor.as_ref(), job).await,
            None => {
                // No jobs available, wait before polling again.
                tokio::select! {
                    _ = shutdown.changed() => {}
                    _ = sleep(poll_interval) => {}
                }
            }
        }
    }

    info!(queue = %queue.name(), slot, "worker stopped");
}

async fn run_job(queue: &Arc<JobQueue>, processor: &dyn Processor, job: Job) {
    let reporter: ProgressReporter = {
        let queue = queue.clone();
        let id = job.id.clone();
        Arc::new(move |stage, percentage, message| {
            if let Err(e) = queue.report_progress(&id, stage, percentage, message) {
                // The record may have been recovered by the stalled sweep;
                // this worker no longer owns it.
                warn!(job_id = %id, error = %e, "progress update rejected");
            }
        })
    };

    match processor.process(&job, reporter).await {
        Ok(result) => {
            if let Err(e) = queue.ack(&job.id, result) {
                warn!(queue = %queue.name(), job_id = %job.id, error = %e, "failed to ack job");
            }
        }
        Err(stage_error) => {
            if let Err(e) = queue.fail(&job.id, stage_error.stage, &stage_error.message) {
                warn!(queue = %queue.name(), job_id = %job.id, error = %e, "failed to record job failure");
            }
        }
    }
}

/// Periodically recover jobs whose worker stopped heartbeating.
async fn sweep_loop(queue: Arc<JobQueue>, mut shutdown: watch::Receiver<bool>) {
    let interval = Duration::from_millis((queue.config().heartbeat_timeout_ms / 2).max(250));
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            _ = sleep(interval) => {
                let swept = queue.sweep_stalled();
                if !swept.is_empty() {
                    warn!(queue = %queue.name(), count = swept.len(), "recovered stalled jobs");
                }
            }
        }
    }
}
