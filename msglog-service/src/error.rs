//! Error types shared by the ingestion pipeline and the read endpoints.

use thiserror::Error;

/// A request field failed validation.
///
/// `field` names the offending input (`message_id`, `from`, `limit`, ...) or
/// `body` when the payload could not be parsed at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_field() {
        let err = ValidationError::new("from", "must start with '+'");
        assert_eq!(err.to_string(), "invalid from: must start with '+'");
    }
}
