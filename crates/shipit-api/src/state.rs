//! Application state.

use std::sync::Arc;

use shipit_queue::QueueManager;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<QueueManager>,
}

impl AppState {
    pub fn new(manager: Arc<QueueManager>) -> Self {
        Self { manager }
    }
}
