//! Webhook ingestion pipeline.
//!
//! Each request moves through:
//!
//! ```text
//! received → signature checked → validated → persisted → responded
//!               │ invalid            │ rejected   │ created | duplicate
//!               ▼                    ▼            ▼
//!              401                  400          200
//! ```
//!
//! The `Ingestor` is independent of the HTTP layer: it takes the signature
//! header value and the raw body and returns an `IngestReport` that handlers
//! turn into a response.

pub mod signature;
pub mod validate;

use std::sync::Arc;
use std::time::Instant;

use axum::http::StatusCode;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::metrics::{Metrics, WebhookResult};
use crate::store::{InsertOutcome, MessageStore, StoreError};

pub use signature::{sign, verify_signature, SIGNATURE_HEADER};
pub use validate::{is_msisdn, parse_utc_timestamp, validate_payload, MAX_TEXT_CHARS};

/// Route the ingestion endpoint is mounted on; used as the log `path` field.
pub const WEBHOOK_PATH: &str = "/webhook";

/// Terminal state of one webhook request.
#[derive(Debug)]
pub enum IngestOutcome {
    Created { message_id: String },
    Duplicate { message_id: String },
    InvalidSignature,
    Rejected(ValidationError),
    StorageFailed(StoreError),
}

impl IngestOutcome {
    pub fn status(&self) -> StatusCode {
        match self {
            IngestOutcome::Created { .. } | IngestOutcome::Duplicate { .. } => StatusCode::OK,
            IngestOutcome::InvalidSignature => StatusCode::UNAUTHORIZED,
            IngestOutcome::Rejected(_) => StatusCode::BAD_REQUEST,
            IngestOutcome::StorageFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Label used in the request log.
    pub fn result(&self) -> &'static str {
        match self {
            IngestOutcome::Rejected(_) => "validation_error",
            other => other
                .webhook_result()
                .map(|r| r.as_str())
                .unwrap_or("unknown"),
        }
    }

    /// Counter bucket for this outcome.
    ///
    /// Validation failures are not counted as webhook outcomes;
    /// they only show up in the per-path HTTP counters.
    pub fn webhook_result(&self) -> Option<WebhookResult> {
        match self {
            IngestOutcome::Created { .. } => Some(WebhookResult::Created),
            IngestOutcome::Duplicate { .. } => Some(WebhookResult::Duplicate),
            IngestOutcome::InvalidSignature => Some(WebhookResult::InvalidSignature),
            IngestOutcome::StorageFailed(_) => Some(WebhookResult::Error),
            IngestOutcome::Rejected(_) => None,
        }
    }
}

/// What happened to a request, plus the identifiers needed to correlate it.
#[derive(Debug)]
pub struct IngestReport {
    pub request_id: String,
    pub outcome: IngestOutcome,
    pub latency_ms: u64,
}

/// Sequences signature check, validation and persistence for one request.
#[derive(Clone)]
pub struct Ingestor {
    store: MessageStore,
    metrics: Arc<Metrics>,
    secret: Option<Arc<str>>,
}

impl Ingestor {
    pub fn new(store: MessageStore, metrics: Arc<Metrics>, secret: Option<String>) -> Self {
        Self {
            store,
            metrics,
            secret: secret.map(Arc::from),
        }
    }

    /// Run one webhook request through the pipeline.
    ///
    /// Counts the outcome and emits exactly one `webhook_request` event.
    pub async fn ingest(&self, signature: Option<&str>, body: &[u8]) -> IngestReport {
        let start = Instant::now();
        let request_id = Uuid::new_v4().to_string();

        let outcome = self.run(signature, body).await;

        if let Some(result) = outcome.webhook_result() {
            self.metrics.record_webhook(result);
        }

        let report = IngestReport {
            request_id,
            outcome,
            latency_ms: start.elapsed().as_millis() as u64,
        };
        log_report(&report);
        report
    }

    async fn run(&self, signature: Option<&str>, body: &[u8]) -> IngestOutcome {
        if !verify_signature(self.secret.as_deref(), body, signature) {
            return IngestOutcome::InvalidSignature;
        }

        let message = match validate_payload(body) {
            Ok(message) => message,
            Err(e) => return IngestOutcome::Rejected(e),
        };

        match self.store.insert(&message).await {
            Ok(InsertOutcome::Created) => IngestOutcome::Created {
                message_id: message.message_id,
            },
            Ok(InsertOutcome::Duplicate) => IngestOutcome::Duplicate {
                message_id: message.message_id,
            },
            Err(e) => IngestOutcome::StorageFailed(e),
        }
    }
}

fn log_report(report: &IngestReport) {
    let status = report.outcome.status().as_u16();
    let result = report.outcome.result();

    match &report.outcome {
        IngestOutcome::Created { message_id } | IngestOutcome::Duplicate { message_id } => {
            info!(
                request_id = %report.request_id,
                path = WEBHOOK_PATH,
                status,
                message_id = %message_id,
                dup = matches!(report.outcome, IngestOutcome::Duplicate { .. }),
                result,
                latency_ms = report.latency_ms,
                "webhook_request"
            );
        }
        IngestOutcome::InvalidSignature => {
            error!(
                request_id = %report.request_id,
                path = WEBHOOK_PATH,
                status,
                result,
                latency_ms = report.latency_ms,
                "webhook_request"
            );
        }
        IngestOutcome::Rejected(e) => {
            warn!(
                request_id = %report.request_id,
                path = WEBHOOK_PATH,
                status,
                result,
                field = e.field,
                reason = %e.reason,
                latency_ms = report.latency_ms,
                "webhook_request"
            );
        }
        IngestOutcome::StorageFailed(e) => {
            error!(
                request_id = %report.request_id,
                path = WEBHOOK_PATH,
                status,
                result,
                error = %e,
                latency_ms = report.latency_ms,
                "webhook_request"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "ingest-secret";
    const BODY: &[u8] = br#"{"message_id":"m1","from":"+15550000001","to":"+15550000002","ts":"2024-01-01T00:00:00Z","text":"hi"}"#;

    async fn setup(secret: Option<&str>) -> (Ingestor, MessageStore, Arc<Metrics>) {
        let store = MessageStore::connect("sqlite::memory:").await.unwrap();
        let metrics = Arc::new(Metrics::new());
        let ingestor = Ingestor::new(store.clone(), metrics.clone(), secret.map(str::to_string));
        (ingestor, store, metrics)
    }

    #[tokio::test]
    async fn test_created_then_duplicate() {
        let (ingestor, store, metrics) = setup(Some(SECRET)).await;
        let signature = sign(SECRET, BODY).unwrap();

        let first = ingestor.ingest(Some(signature.as_str()), BODY).await;
        assert!(matches!(first.outcome, IngestOutcome::Created { ref message_id } if message_id == "m1"));
        assert_eq!(first.outcome.status(), StatusCode::OK);

        let second = ingestor.ingest(Some(signature.as_str()), BODY).await;
        assert!(matches!(second.outcome, IngestOutcome::Duplicate { .. }));
        assert_eq!(second.outcome.status(), StatusCode::OK);
        assert_ne!(first.request_id, second.request_id);

        assert_eq!(metrics.webhook_count(WebhookResult::Created), 1);
        assert_eq!(metrics.webhook_count(WebhookResult::Duplicate), 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_signature_is_counted_and_not_stored() {
        let (ingestor, store, metrics) = setup(Some(SECRET)).await;

        let report = ingestor.ingest(None, BODY).await;
        assert!(matches!(report.outcome, IngestOutcome::InvalidSignature));
        assert_eq!(report.outcome.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(report.outcome.result(), "invalid_signature");

        assert_eq!(metrics.webhook_count(WebhookResult::InvalidSignature), 1);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_no_secret_configured_fails_closed() {
        let (ingestor, store, _) = setup(None).await;
        let signature = sign(SECRET, BODY).unwrap();

        let report = ingestor.ingest(Some(signature.as_str()), BODY).await;
        assert!(matches!(report.outcome, IngestOutcome::InvalidSignature));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_signature_checked_before_validation() {
        let (ingestor, _, metrics) = setup(Some(SECRET)).await;

        let report = ingestor.ingest(Some("deadbeef"), b"{not json").await;
        assert!(matches!(report.outcome, IngestOutcome::InvalidSignature));
        assert_eq!(metrics.webhook_count(WebhookResult::InvalidSignature), 1);
    }

    #[tokio::test]
    async fn test_validation_failure_not_counted() {
        let (ingestor, store, metrics) = setup(Some(SECRET)).await;
        let body = br#"{"message_id":"m1","from":"5550000001","to":"+15550000002","ts":"2024-01-01T00:00:00Z"}"#;
        let signature = sign(SECRET, body).unwrap();

        let report = ingestor.ingest(Some(signature.as_str()), body).await;
        match &report.outcome {
            IngestOutcome::Rejected(e) => assert_eq!(e.field, "from"),
            other => panic!("Expected Rejected, got {:?}", other),
        }
        assert_eq!(report.outcome.status(), StatusCode::BAD_REQUEST);
        assert_eq!(report.outcome.result(), "validation_error");

        for result in WebhookResult::ALL {
            assert_eq!(metrics.webhook_count(result), 0);
        }
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_storage_failure_surfaces() {
        let (ingestor, store, metrics) = setup(Some(SECRET)).await;
        store.close().await;
        let signature = sign(SECRET, BODY).unwrap();

        let report = ingestor.ingest(Some(signature.as_str()), BODY).await;
        assert!(matches!(report.outcome, IngestOutcome::StorageFailed(_)));
        assert_eq!(report.outcome.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(metrics.webhook_count(WebhookResult::Error), 1);
    }
}
