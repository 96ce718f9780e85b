//! WebSocket event stream for job lifecycle updates.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use shipit_core::event::JobEvent;
use shipit_core::job::QueueName;

use crate::AppState;
use crate::error::ApiError;

/// Upgrade handler for `/api/queues/{queue}/events`.
///
/// Streams every event on the queue as JSON. Delivery is at-least-once and
/// lossy under lag; clients fall back to polling the job record.
pub async fn events_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(queue): Path<String>,
) -> Response {
    let queue: QueueName = match queue.parse() {
        Ok(queue) => queue,
        Err(e) => return ApiError::from(e).into_response(),
    };
    let receiver = match state.manager.subscribe(queue) {
        Ok(receiver) => receiver,
        Err(e) => return ApiError::from(e).into_response(),
    };
    ws.on_upgrade(move |socket| stream_events(socket, queue, receiver))
}

async fn stream_events(
    mut socket: WebSocket,
    queue: QueueName,
    mut receiver: broadcast::Receiver<JobEvent>,
) {
    info!(queue = %queue, "event stream connected");

    loop {
        match receiver.recv().await {
            Ok(event) => {
                let Ok(json) = serde_json::to_string(&event) else {
                    continue;
                };
                if socket.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                // Clients tolerate missed events by contract.
                debug!(queue = %queue, missed, "event stream lagging");
            }
            Err(broadcast::error::RecvError::Closed) => {
                warn!(queue = %queue, "event channel closed");
                break;
            }
        }
    }

    info!(queue = %queue, "event stream disconnected");
}
