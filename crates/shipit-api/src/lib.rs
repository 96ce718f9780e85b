//! API server for shipit.
//!
//! Thin HTTP and WebSocket glue over the queue manager; all orchestration
//! semantics live in the layers below.

pub mod error;
pub mod routes;
pub mod state;
pub mod ws;

pub use state::AppState;
