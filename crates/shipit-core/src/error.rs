//! Error types for shipit.

use thiserror::Error;

use crate::job::JobStatus;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unknown queue: {0}")]
    UnknownQueue(String),

    /// The caller attempted an operation that is not valid for the job's
    /// current state. No state mutation occurred.
    #[error("{operation} not valid while job is {status}")]
    InvalidState {
        operation: &'static str,
        status: JobStatus,
    },

    #[error("retries exhausted after {attempts} attempts")]
    ExhaustedRetries { attempts: u32 },

    #[error("queue is closed")]
    QueueClosed,

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
