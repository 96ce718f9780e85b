//! API routes.

pub mod jobs;
pub mod stats;

use axum::Router;
use axum::routing::get;

use crate::AppState;
use crate::ws::events_handler;

/// Build the main API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api", api_router())
        .with_state(state)
}

fn api_router() -> Router<AppState> {
    Router::new()
        .merge(jobs::router())
        .merge(stats::router())
        .route("/queues/{queue}/events", get(events_handler))
}
