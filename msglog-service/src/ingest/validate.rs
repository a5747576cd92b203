//! Webhook payload validation.
//!
//! Turns a raw JSON body into a `Message`, reporting the first offending
//! field. Unknown fields are ignored.

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error::ValidationError;
use crate::store::Message;

/// Longest accepted `text`, in characters.
pub const MAX_TEXT_CHARS: usize = 4096;

/// String fields of the payload, in the order they are reported.
const STRING_FIELDS: [&str; 4] = ["message_id", "from", "to", "ts"];

/// Inbound webhook body.
///
/// Every field is optional at the serde level so a missing field is reported
/// by name instead of as a parse failure.
#[derive(Debug, Deserialize)]
struct WebhookPayload {
    message_id: Option<String>,
    from: Option<String>,
    to: Option<String>,
    ts: Option<String>,
    text: Option<String>,
}

/// Parse and validate a webhook body.
///
/// Expected shape:
///
/// ```json
/// {"message_id": "m1", "from": "+15550000001", "to": "+15550000002",
///  "ts": "2024-01-01T00:00:00Z", "text": "hi"}
/// ```
pub fn validate_payload(body: &[u8]) -> Result<Message, ValidationError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| ValidationError::new("body", format!("malformed JSON: {}", e)))?;
    if !value.is_object() {
        return Err(ValidationError::new("body", "expected a JSON object"));
    }

    let payload: WebhookPayload =
        serde_json::from_value(value.clone()).map_err(|e| type_error(&value, e))?;

    let message_id = required("message_id", payload.message_id)?;
    if message_id.is_empty() {
        return Err(ValidationError::new("message_id", "must not be empty"));
    }

    let from_msisdn = msisdn("from", payload.from)?;
    let to_msisdn = msisdn("to", payload.to)?;
    let ts = parse_utc_timestamp("ts", &required("ts", payload.ts)?)?;

    if let Some(text) = &payload.text {
        let chars = text.chars().count();
        if chars > MAX_TEXT_CHARS {
            return Err(ValidationError::new(
                "text",
                format!("{} characters exceeds the limit of {}", chars, MAX_TEXT_CHARS),
            ));
        }
    }

    Ok(Message {
        message_id,
        from_msisdn,
        to_msisdn,
        ts,
        text: payload.text,
    })
}

/// `+` followed by one or more ASCII digits, nothing else.
pub fn is_msisdn(value: &str) -> bool {
    match value.strip_prefix('+') {
        Some(digits) => !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

/// Parse an RFC 3339 timestamp whose offset is exactly UTC (`Z` or `+00:00`).
///
/// Sub-microsecond precision is truncated so stored and parsed values agree.
pub fn parse_utc_timestamp(field: &'static str, raw: &str) -> Result<DateTime<Utc>, ValidationError> {
    let parsed = match DateTime::parse_from_rfc3339(raw) {
        Ok(parsed) => parsed,
        Err(_) if is_naive_timestamp(raw) => {
            return Err(ValidationError::new(field, "missing UTC offset"));
        }
        Err(e) => {
            return Err(ValidationError::new(
                field,
                format!("not an RFC 3339 timestamp: {}", e),
            ));
        }
    };

    if parsed.offset().local_minus_utc() != 0 {
        return Err(ValidationError::new(
            field,
            format!("offset {} is not UTC", parsed.offset()),
        ));
    }

    Ok(parsed.with_timezone(&Utc).trunc_subsecs(6))
}

fn is_naive_timestamp(raw: &str) -> bool {
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .any(|fmt| NaiveDateTime::parse_from_str(raw, fmt).is_ok())
}

/// Attribute a failed typed parse to the first field with the wrong JSON type.
fn type_error(value: &Value, err: serde_json::Error) -> ValidationError {
    let wrong_type = |name: &str| matches!(value.get(name), Some(v) if !v.is_string() && !v.is_null());

    if let Some(name) = STRING_FIELDS.into_iter().find(|name| wrong_type(*name)) {
        return ValidationError::new(name, "must be a string");
    }
    if wrong_type("text") {
        return ValidationError::new("text", "must be a string or null");
    }

    ValidationError::new("body", format!("malformed payload: {}", err))
}

fn required(name: &'static str, value: Option<String>) -> Result<String, ValidationError> {
    value.ok_or_else(|| ValidationError::new(name, "field required"))
}

fn msisdn(name: &'static str, value: Option<String>) -> Result<String, ValidationError> {
    let value = required(name, value)?;
    if !is_msisdn(&value) {
        return Err(ValidationError::new(
            name,
            "must match ^\\+\\d+$ ('+' followed by digits)",
        ));
    }
    Ok(value)
}
