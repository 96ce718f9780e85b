//! Processor seam between the worker pool and domain pipelines.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::job::{Job, QueueName};
use crate::stage::Stage;

/// Callback used by processors to persist stage progress.
///
/// Backed by the owning queue so a concurrent status query observes live
/// progress. Calls are synchronous and cheap.
pub type ProgressReporter = Arc<dyn Fn(Stage, u8, &str) + Send + Sync>;

/// Fatal failure of a pipeline stage.
///
/// Aborts the current attempt with the stage recorded; the queue decides
/// whether the job is retried with backoff or permanently failed.
#[derive(Debug, Error)]
#[error("{stage} failed: {message}")]
pub struct StageError {
    pub stage: Stage,
    pub message: String,
}

impl StageError {
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

/// Domain logic executed for jobs of one queue.
///
/// The dispatcher does not interpret stage semantics; processors report
/// progress through the callback and return the structured job result.
#[async_trait]
pub trait Processor: Send + Sync {
    /// The queue this processor serves.
    fn queue(&self) -> QueueName;

    /// Execute one job attempt.
    ///
    /// Returning `Err` fails the attempt; tooling-class problems are folded
    /// into the returned result instead of failing the job.
    async fn process(
        &self,
        job: &Job,
        progress: ProgressReporter,
    ) -> Result<serde_json::Value, StageError>;
}
