//! Durable, named job queues and the control plane over them.
//!
//! Each queue owns its job records, enforces the status state machine, and
//! fans out lifecycle events. The [`QueueManager`] is the single entry point
//! for external callers: submit, query, cancel, retry, stats, shutdown.

pub mod manager;
pub mod queue;

pub use manager::QueueManager;
pub use queue::{JobQueue, QueueStats};
