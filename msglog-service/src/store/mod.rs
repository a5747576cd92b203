//! Message store module.
//!
//! This module provides:
//! - Record and query types for the message log
//! - A SQLite-backed store with idempotent inserts
//!
//! ## Schema
//!
//! ```text
//! messages(message_id PRIMARY KEY, from_msisdn, to_msisdn, ts, text, created_at)
//! ```

pub mod sqlite;
pub mod types;

use std::path::PathBuf;

use thiserror::Error;

pub use sqlite::MessageStore;
pub use types::{
    InsertOutcome, Message, MessageFilter, MessagePage, Page, SenderCount, Stats, DEFAULT_LIMIT,
    MAX_LIMIT,
};

/// Storage failures. Uniqueness violations never surface here; they are
/// reported as `InsertOutcome::Duplicate`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to prepare database directory {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt row {key}: {reason}")]
    CorruptRow { key: String, reason: String },
}
