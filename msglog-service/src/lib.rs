//! msglog - Signed webhook ingestion with an idempotent message log.
//!
//! This library provides the modules behind the `msglog-web` binary:
//! - `ingest`: signature verification, payload validation, orchestration
//! - `store`: SQLite message log with duplicate detection, queries and stats
//! - `metrics`: outcome counters and plaintext exposition
//! - `web`: axum handlers and router
//!
//! ## Architecture
//!
//! ```text
//! POST /webhook → verify signature → validate → store.insert → count + log → 200/400/401
//! GET /messages, /stats → store.query / store.stats
//! ```

pub mod config;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod store;
pub mod web;

// Re-export commonly used types
pub use config::Config;
pub use error::ValidationError;
pub use ingest::{IngestOutcome, IngestReport, Ingestor};
pub use metrics::{Metrics, WebhookResult};
pub use store::{InsertOutcome, Message, MessageFilter, MessageStore, Page, Stats, StoreError};
pub use web::{build_router, AppState};
