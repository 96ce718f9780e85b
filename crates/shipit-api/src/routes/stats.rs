//! Queue statistics routes.

use std::collections::HashMap;

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};

use shipit_core::job::QueueName;
use shipit_queue::QueueStats;

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/stats", get(stats_all))
        .route("/queues/{queue}/stats", get(queue_stats))
}

async fn queue_stats(
    State(state): State<AppState>,
    Path(queue): Path<String>,
) -> Result<Json<QueueStats>, ApiError> {
    let queue: QueueName = queue.parse().map_err(ApiError::from)?;
    Ok(Json(state.manager.stats(queue)?))
}

async fn stats_all(State(state): State<AppState>) -> Json<HashMap<String, QueueStats>> {
    let all = state
        .manager
        .stats_all()
        .into_iter()
        .map(|(name, stats)| (name.to_string(), stats))
        .collect();
    Json(all)
}
