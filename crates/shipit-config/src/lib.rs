//! KDL configuration parsing for shipit.
//!
//! This crate handles parsing of:
//! - Queue definitions (concurrency, retry policy, heartbeat)
//! - Workspace and template store locations
//! - Shell and drain timeouts

pub mod error;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use system::{QueueConfig, SystemConfig, load_system_config, parse_system_config};
