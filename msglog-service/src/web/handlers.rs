//! HTTP endpoint handlers.
//!
//! The webhook handler only extracts the signature header and raw body and
//! hands them to the `Ingestor`. Read endpoints go straight to the store.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ValidationError;
use crate::ingest::{IngestOutcome, Ingestor, SIGNATURE_HEADER};
use crate::metrics::{Metrics, EXPOSITION_CONTENT_TYPE};
use crate::store::{Message, MessageFilter, MessageStore, Page, Stats};
use crate::web::error::{ApiError, ErrorBody};
use crate::Config;

/// Response header echoing the webhook request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: MessageStore,
    pub metrics: Arc<Metrics>,
    pub ingestor: Ingestor,
}

impl AppState {
    pub fn new(config: Config, store: MessageStore) -> Self {
        let metrics = Arc::new(Metrics::new());
        let ingestor = Ingestor::new(store.clone(), metrics.clone(), config.webhook_secret.clone());

        Self {
            config: Arc::new(config),
            store,
            metrics,
            ingestor,
        }
    }
}

// =============================================================================
// Health Checks
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Liveness: the process is up.
pub async fn live() -> Json<HealthResponse> {
    Json(HealthResponse { status: "alive" })
}

/// Readiness: a secret is configured and the database answers.
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let not_ready = (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(HealthResponse { status: "not_ready" }),
    );

    if !state.config.has_webhook_secret() {
        debug!("readiness_no_webhook_secret");
        return not_ready;
    }

    if let Err(e) = state.store.ping().await {
        warn!(error = %e, "readiness_store_unreachable");
        return not_ready;
    }

    (StatusCode::OK, Json(HealthResponse { status: "ready" }))
}

// =============================================================================
// Webhook
// =============================================================================

/// Webhook acknowledgement body.
#[derive(Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
}

/// Webhook endpoint.
///
/// The body is taken as raw bytes so the signature is checked against exactly
/// what the sender signed.
pub async fn webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let report = state.ingestor.ingest(signature, &body).await;
    let status = report.outcome.status();

    let mut response = match report.outcome {
        IngestOutcome::Created { .. } | IngestOutcome::Duplicate { .. } => {
            (status, Json(WebhookResponse { status: "ok" })).into_response()
        }
        IngestOutcome::InvalidSignature => {
            (status, Json(ErrorBody::new("invalid signature"))).into_response()
        }
        IngestOutcome::Rejected(e) => ApiError::from(e).into_response(),
        // Already logged by the ingestor
        IngestOutcome::StorageFailed(_) => {
            (status, Json(ErrorBody::new("internal error"))).into_response()
        }
    };

    if let Ok(value) = HeaderValue::from_str(&report.request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}

// =============================================================================
// Messages
// =============================================================================

/// Query string for `GET /messages`.
///
/// Everything arrives as text so malformed numbers produce a JSON 400 naming
/// the parameter.
#[derive(Debug, Default, Deserialize)]
pub struct MessagesParams {
    pub limit: Option<String>,
    pub offset: Option<String>,
    pub from: Option<String>,
    pub since: Option<String>,
    pub q: Option<String>,
}

impl MessagesParams {
    /// Validate the raw parameters into a filter and a page window.
    ///
    /// Empty parameters are treated as absent. `q` is used verbatim; the
    /// other parameters are trimmed first.
    pub fn parse(&self) -> Result<(MessageFilter, Page), ValidationError> {
        let limit = parse_int("limit", non_empty(&self.limit))?;
        let offset = parse_int("offset", non_empty(&self.offset))?;
        let page = Page::new(limit, offset)?;

        let filter = MessageFilter {
            from: non_empty(&self.from).map(restore_plus),
            since: non_empty(&self.since).map(parse_since).transpose()?,
            // Whitespace is part of the needle
            q: self.q.clone().filter(|v| !v.is_empty()),
        };

        Ok((filter, page))
    }
}

/// One page of messages.
#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub data: Vec<Message>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// List stored messages ordered by `(ts, message_id)`.
pub async fn list_messages(
    State(state): State<AppState>,
    Query(params): Query<MessagesParams>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let (filter, page) = params.parse()?;
    let result = state.store.query(&filter, page).await?;

    Ok(Json(MessagesResponse {
        data: result.data,
        total: result.total,
        limit: page.limit(),
        offset: page.offset(),
    }))
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_int(field: &'static str, raw: Option<&str>) -> Result<Option<i64>, ValidationError> {
    raw.map(|v| {
        v.parse::<i64>()
            .map_err(|_| ValidationError::new(field, "must be an integer"))
    })
    .transpose()
}

/// An unencoded `+` in a query string decodes to a space, so `from=+1555`
/// arrives as ` 1555` (already trimmed to `1555` here).
fn restore_plus(value: &str) -> String {
    if value.bytes().all(|b| b.is_ascii_digit()) {
        format!("+{}", value)
    } else {
        value.to_string()
    }
}

/// Parse the `since` bound. Any offset is converted to UTC; a timestamp
/// without an offset is taken as UTC.
fn parse_since(raw: &str) -> Result<DateTime<Utc>, ValidationError> {
    let repaired = raw.replace(' ', "+");

    for candidate in [raw, repaired.as_str()] {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(candidate) {
            return Ok(parsed.with_timezone(&Utc));
        }
    }

    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(naive.and_utc());
        }
    }

    Err(ValidationError::new("since", "not an RFC 3339 timestamp"))
}

// =============================================================================
// Stats & Metrics
// =============================================================================

/// Aggregate statistics over the message log.
pub async fn stats(State(state): State<AppState>) -> Result<Json<Stats>, ApiError> {
    Ok(Json(state.store.stats().await?))
}

/// Plaintext counter exposition.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)],
        state.metrics.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn params(pairs: &[(&str, &str)]) -> MessagesParams {
        let mut p = MessagesParams::default();
        for (k, v) in pairs {
            let v = Some(v.to_string());
            match *k {
                "limit" => p.limit = v,
                "offset" => p.offset = v,
                "from" => p.from = v,
                "since" => p.since = v,
                "q" => p.q = v,
                _ => panic!("unknown param {}", k),
            }
        }
        p
    }

    #[test]
    fn test_params_defaults() {
        let (filter, page) = MessagesParams::default().parse().unwrap();
        assert_eq!(filter, MessageFilter::default());
        assert_eq!(page, Page::default());
    }

    #[test]
    fn test_params_empty_values_ignored() {
        let (filter, page) = params(&[("from", ""), ("q", ""), ("limit", "")]).parse().unwrap();
        assert_eq!(filter, MessageFilter::default());
        assert_eq!(page.limit(), 50);
    }

    #[test]
    fn test_params_q_keeps_whitespace() {
        let (filter, _) = params(&[("q", " world")]).parse().unwrap();
        assert_eq!(filter.q.as_deref(), Some(" world"));

        let (filter, _) = params(&[("q", "  ")]).parse().unwrap();
        assert_eq!(filter.q.as_deref(), Some("  "));
    }

    #[test]
    fn test_params_bad_numbers() {
        assert_eq!(params(&[("limit", "ten")]).parse().unwrap_err().field, "limit");
        assert_eq!(params(&[("limit", "0")]).parse().unwrap_err().field, "limit");
        assert_eq!(params(&[("limit", "101")]).parse().unwrap_err().field, "limit");
        assert_eq!(params(&[("offset", "-1")]).parse().unwrap_err().field, "offset");
    }

    #[test]
    fn test_params_from_restores_plus() {
        let (filter, _) = params(&[("from", " 15551234567")]).parse().unwrap();
        assert_eq!(filter.from.as_deref(), Some("+15551234567"));

        let (filter, _) = params(&[("from", "+15551234567")]).parse().unwrap();
        assert_eq!(filter.from.as_deref(), Some("+15551234567"));
    }

    #[test]
    fn test_parse_since_variants() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        assert_eq!(parse_since("2024-01-01T00:00:00Z").unwrap(), expected);
        assert_eq!(parse_since("2024-01-01T00:00:00+00:00").unwrap(), expected);
        assert_eq!(parse_since("2024-01-01T00:00:00 00:00").unwrap(), expected);
        assert_eq!(parse_since("2024-01-01T02:00:00+02:00").unwrap(), expected);
        assert_eq!(parse_since("2024-01-01T00:00:00").unwrap(), expected);
        assert_eq!(parse_since("soon").unwrap_err().field, "since");
    }
}
