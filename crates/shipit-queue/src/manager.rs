//! Control plane over the queue registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tracing::{info, warn};

use shipit_config::SystemConfig;
use shipit_core::event::JobEvent;
use shipit_core::job::{Job, JobOptions, JobStatus, QueueName};
use shipit_core::{Error, JobId, Result};

use crate::queue::{JobQueue, QueueStats};

/// Explicit registry of all queues, constructed once at process start and
/// passed by reference to every component. Owns graceful shutdown.
pub struct QueueManager {
    queues: HashMap<QueueName, Arc<JobQueue>>,
    shutdown: watch::Sender<bool>,
}

impl QueueManager {
    pub fn from_config(config: &SystemConfig) -> Self {
        let queues = QueueName::ALL
            .into_iter()
            .map(|name| (name, Arc::new(JobQueue::new(config.queue(name)))))
            .collect();
        let (shutdown, _) = watch::channel(false);
        Self { queues, shutdown }
    }

    pub fn queue(&self, name: QueueName) -> Result<&Arc<JobQueue>> {
        self.queues
            .get(&name)
            .ok_or_else(|| Error::UnknownQueue(name.to_string()))
    }

    /// Submit a job. Returns the created record immediately, or the existing
    /// record when the id is an idempotency hit; does not wait for execution.
    pub fn submit(
        &self,
        queue: QueueName,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> Result<Job> {
        self.queue(queue)?.enqueue(payload, options)
    }

    /// Full job record including live progress.
    pub fn get_status(&self, queue: QueueName, id: &JobId) -> Result<Job> {
        self.queue(queue)?.get_job(id)
    }

    /// Cancel a job that has not yet gone active.
    pub fn cancel(&self, queue: QueueName, id: &JobId) -> Result<Job> {
        self.queue(queue)?.remove(id)
    }

    /// Re-enqueue a failed job with attempts reset to zero.
    pub fn retry(&self, queue: QueueName, id: &JobId) -> Result<Job> {
        self.queue(queue)?.retry(id)
    }

    pub fn list_jobs(&self, queue: QueueName, filter: Option<JobStatus>) -> Result<Vec<Job>> {
        Ok(self.queue(queue)?.list_jobs(filter))
    }

    pub fn stats(&self, queue: QueueName) -> Result<QueueStats> {
        Ok(self.queue(queue)?.stats())
    }

    pub fn stats_all(&self) -> HashMap<QueueName, QueueStats> {
        self.queues
            .iter()
            .map(|(name, queue)| (*name, queue.stats()))
            .collect()
    }

    pub fn subscribe(&self, queue: QueueName) -> Result<broadcast::Receiver<JobEvent>> {
        Ok(self.queue(queue)?.subscribe())
    }

    pub fn watch_job(
        &self,
        queue: QueueName,
        id: &JobId,
    ) -> Result<mpsc::UnboundedReceiver<JobEvent>> {
        self.queue(queue)?.watch_job(id)
    }

    /// Signal observed by worker pools; flips to true when draining begins.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Stop accepting new work and claims, wait up to `timeout` for active
    /// jobs to finish, then force-close. Idempotent.
    pub async fn drain_and_close(&self, timeout: Duration) {
        info!("draining queues");
        for queue in self.queues.values() {
            queue.stop_accepting();
        }
        let _ = self.shutdown.send(true);

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let active: usize = self.queues.values().map(|q| q.active_count()).sum();
            if active == 0 {
                info!("all queues drained");
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(active, "drain timeout reached, force-closing with active jobs");
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}
