//! Job identifiers.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unique identifier for a job.
///
/// Callers may supply their own id as an idempotency key; generated ids use
/// UUIDv7 for time-ordered, sortable values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct JobId(String);

impl JobId {
    /// Generate a new unique JobId using UUIDv7.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::str::FromStr for JobId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}
