//! Web server module.
//!
//! This module provides the HTTP surface of the service:
//! - `POST /webhook` for signed message ingestion
//! - `GET /messages` and `GET /stats` over the message log
//! - `GET /metrics` plaintext counters
//! - `GET /health/live` and `GET /health/ready`

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod router;

pub use error::{ApiError, ErrorBody};
pub use handlers::{
    list_messages, live, metrics, ready, stats, webhook, AppState, HealthResponse,
    MessagesParams, MessagesResponse, WebhookResponse, REQUEST_ID_HEADER,
};
pub use router::build_router;
