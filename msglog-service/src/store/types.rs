//! Record and query types for the message log.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::ValidationError;

/// Default page size for message listings.
pub const DEFAULT_LIMIT: i64 = 50;

/// Largest page size a caller may request.
pub const MAX_LIMIT: i64 = 100;

/// Number of senders reported in `Stats::messages_per_sender`.
pub const TOP_SENDERS: i64 = 10;

/// A validated message, as admitted by the webhook and returned by queries.
///
/// `created_at` is assigned by the store and never leaves it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    /// Caller-supplied idempotency key
    pub message_id: String,
    /// Sender MSISDN
    #[serde(rename = "from")]
    pub from_msisdn: String,
    /// Recipient MSISDN
    #[serde(rename = "to")]
    pub to_msisdn: String,
    /// Event time, always UTC
    pub ts: DateTime<Utc>,
    /// Optional body, at most 4096 characters
    pub text: Option<String>,
}

/// Result of an insert attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The message was stored for the first time.
    Created,
    /// A message with the same id already exists; nothing was written.
    Duplicate,
}

/// Optional filters for `MessageStore::query`. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageFilter {
    /// Exact sender match
    pub from: Option<String>,
    /// Inclusive lower bound on `ts`
    pub since: Option<DateTime<Utc>>,
    /// Substring of `text`, used verbatim. Case folding is SQLite's
    /// `lower()`, which only folds ASCII letters.
    pub q: Option<String>,
}

/// Pagination window, already bounds-checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    limit: i64,
    offset: i64,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

impl Page {
    /// Build a page from optional caller input.
    ///
    /// `limit` must be within 1..=100 and `offset` must not be negative.
    pub fn new(limit: Option<i64>, offset: Option<i64>) -> Result<Self, ValidationError> {
        let limit = limit.unwrap_or(DEFAULT_LIMIT);
        if !(1..=MAX_LIMIT).contains(&limit) {
            return Err(ValidationError::new(
                "limit",
                format!("must be between 1 and {}", MAX_LIMIT),
            ));
        }

        let offset = offset.unwrap_or(0);
        if offset < 0 {
            return Err(ValidationError::new("offset", "must be >= 0"));
        }

        Ok(Self { limit, offset })
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }
}

/// One page of query results plus the filtered total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePage {
    pub data: Vec<Message>,
    pub total: i64,
}

/// Message count for a single sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SenderCount {
    #[serde(rename = "from")]
    pub from_msisdn: String,
    pub count: i64,
}

/// Aggregate statistics over the whole log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub total_messages: i64,
    pub senders_count: i64,
    pub messages_per_sender: Vec<SenderCount>,
    pub first_message_ts: Option<DateTime<Utc>>,
    pub last_message_ts: Option<DateTime<Utc>>,
}

impl Stats {
    /// Stats for a store with no messages.
    pub fn empty() -> Self {
        Self {
            total_messages: 0,
            senders_count: 0,
            messages_per_sender: Vec::new(),
            first_message_ts: None,
            last_message_ts: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_page_defaults() {
        let page = Page::new(None, None).unwrap();
        assert_eq!(page.limit(), 50);
        assert_eq!(page.offset(), 0);
        assert_eq!(page, Page::default());
    }

    #[test]
    fn test_page_bounds() {
        assert!(Page::new(Some(1), Some(0)).is_ok());
        assert!(Page::new(Some(100), Some(10_000)).is_ok());

        assert_eq!(Page::new(Some(0), None).unwrap_err().field, "limit");
        assert_eq!(Page::new(Some(101), None).unwrap_err().field, "limit");
        assert_eq!(Page::new(None, Some(-1)).unwrap_err().field, "offset");
    }

    #[test]
    fn test_message_serializes_wire_names() {
        let message = Message {
            message_id: "m1".to_string(),
            from_msisdn: "+15550000001".to_string(),
            to_msisdn: "+15550000002".to_string(),
            ts: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            text: None,
        };

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["from"], "+15550000001");
        assert_eq!(json["to"], "+15550000002");
        assert_eq!(json["ts"], "2024-01-01T00:00:00Z");
        assert!(json["text"].is_null());
    }

    #[test]
    fn test_empty_stats_shape() {
        let json = serde_json::to_value(Stats::empty()).unwrap();
        assert_eq!(json["total_messages"], 0);
        assert_eq!(json["senders_count"], 0);
        assert_eq!(json["messages_per_sender"], serde_json::json!([]));
        assert!(json["first_message_ts"].is_null());
        assert!(json["last_message_ts"].is_null());
    }
}
