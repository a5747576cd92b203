//! Webhook body signature verification.
//!
//! Senders sign the exact request body with HMAC-SHA256 keyed by the shared
//! secret and send the lowercase hex digest in the `X-Signature` header.

use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex-encoded body signature.
pub const SIGNATURE_HEADER: &str = "X-Signature";

/// Verify a webhook body signature.
///
/// # Arguments
///
/// * `secret` - The configured shared secret, if any
/// * `body` - The raw request body, exactly as received
/// * `signature` - The `X-Signature` header value, if present
///
/// # Returns
///
/// `true` only if a secret is configured, a signature was supplied, and it
/// matches the HMAC of `body`. The digest comparison is constant-time.
pub fn verify_signature(secret: Option<&str>, body: &[u8], signature: Option<&str>) -> bool {
    let secret = secret.filter(|s| !s.trim().is_empty());
    let signature = signature.map(str::trim).filter(|s| !s.is_empty());

    let (secret, signature) = match (secret, signature) {
        (Some(secret), Some(signature)) => (secret, signature),
        (secret, signature) => {
            warn!(
                has_secret = secret.is_some(),
                has_signature = signature.is_some(),
                "webhook_signature_missing"
            );
            return false;
        }
    };

    let provided = match hex::decode(signature) {
        Ok(bytes) => bytes,
        Err(_) => {
            warn!(signature_length = signature.len(), "webhook_signature_not_hex");
            return false;
        }
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => {
            warn!("webhook_signature_invalid_key");
            return false;
        }
    };
    mac.update(body);

    let valid = mac.verify_slice(&provided).is_ok();

    if !valid {
        warn!(
            body_length = body.len(),
            signature_length = signature.len(),
            "webhook_signature_mismatch"
        );
    }

    valid
}

/// Hex HMAC-SHA256 of `body` keyed by `secret`, as a sender would compute it.
pub fn sign(secret: &str, body: &[u8]) -> Result<String, InvalidLength> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}
