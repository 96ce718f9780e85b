//! Job submission and lifecycle routes.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use serde::Deserialize;

use shipit_core::job::{Job, JobOptions, JobStatus, QueueName};
use shipit_core::{Error, JobId};

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/queues/{queue}/jobs", post(submit_job).get(list_jobs))
        .route(
            "/queues/{queue}/jobs/{id}",
            get(get_job).delete(cancel_job),
        )
        .route("/queues/{queue}/jobs/{id}/retry", post(retry_job))
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobRequest {
    pub job_id: Option<String>,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub priority: i32,
    pub delay_ms: Option<u64>,
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

fn parse_queue(queue: &str) -> Result<QueueName, ApiError> {
    queue.parse::<QueueName>().map_err(ApiError::from)
}

async fn submit_job(
    State(state): State<AppState>,
    Path(queue): Path<String>,
    Json(request): Json<SubmitJobRequest>,
) -> Result<Json<Job>, ApiError> {
    let queue = parse_queue(&queue)?;
    let options = JobOptions {
        job_id: request.job_id.map(JobId::from),
        priority: request.priority,
        delay_ms: request.delay_ms,
        max_attempts: request.max_attempts,
    };
    let job = state.manager.submit(queue, request.payload, options)?;
    Ok(Json(job))
}

async fn get_job(
    State(state): State<AppState>,
    Path((queue, id)): Path<(String, String)>,
) -> Result<Json<Job>, ApiError> {
    let queue = parse_queue(&queue)?;
    let job = state.manager.get_status(queue, &JobId::from(id))?;
    Ok(Json(job))
}

async fn list_jobs(
    State(state): State<AppState>,
    Path(queue): Path<String>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Vec<Job>>, ApiError> {
    let queue = parse_queue(&queue)?;
    let filter = match query.status.as_deref() {
        None => None,
        Some(raw) => Some(parse_status(raw)?),
    };
    let jobs = state.manager.list_jobs(queue, filter)?;
    Ok(Json(jobs))
}

async fn cancel_job(
    State(state): State<AppState>,
    Path((queue, id)): Path<(String, String)>,
) -> Result<Json<Job>, ApiError> {
    let queue = parse_queue(&queue)?;
    let job = state
        .manager
        .cancel(queue, &JobId::from(id))
        .map_err(|e| match e {
            Error::InvalidState { status, .. } => {
                ApiError::Conflict(format!("not cancellable in state {status}"))
            }
            other => ApiError::from(other),
        })?;
    Ok(Json(job))
}

async fn retry_job(
    State(state): State<AppState>,
    Path((queue, id)): Path<(String, String)>,
) -> Result<Json<Job>, ApiError> {
    let queue = parse_queue(&queue)?;
    let job = state.manager.retry(queue, &JobId::from(id))?;
    Ok(Json(job))
}

fn parse_status(raw: &str) -> Result<JobStatus, ApiError> {
    match raw {
        "waiting" => Ok(JobStatus::Waiting),
        "active" => Ok(JobStatus::Active),
        "completed" => Ok(JobStatus::Completed),
        "failed" => Ok(JobStatus::Failed),
        "delayed" => Ok(JobStatus::Delayed),
        "stalled" => Ok(JobStatus::Stalled),
        "removed" => Ok(JobStatus::Removed),
        other => Err(ApiError::BadRequest(format!("unknown status: {other}"))),
    }
}
