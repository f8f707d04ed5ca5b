//! HMAC-SHA256 request signing
//!
//! Signatures are the lowercase-hex HMAC-SHA256 of `UTF8(message)` under
//! `UTF8(key)`. Request signatures bind a timestamp into the message so a
//! captured request expires; verification tolerates ±5 minutes of clock
//! skew and compares in constant time.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::resilience::Clock;

type HmacSha256 = Hmac<Sha256>;

/// Default maximum accepted age of a signed request, in milliseconds.
pub const DEFAULT_MAX_AGE_MS: i64 = 300_000;

/// Tolerated future skew, in milliseconds.
pub const MAX_CLOCK_SKEW_MS: i64 = 300_000;

/// Signature material attached to a signed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSignature {
    /// Lowercase-hex HMAC-SHA256 of `timestamp + "." + body`.
    pub signature: String,
    /// Milliseconds since epoch at signing time.
    pub timestamp: i64,
    /// First 8 characters of the signing key; non-sensitive.
    pub key_id: String,
}

/// Compute the lowercase-hex HMAC-SHA256 of `message` under `key`.
pub fn sign(message: &str, key: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Build the signature triple for an outgoing request body.
pub fn create_request_signature(body: &str, key: &str, clock: &impl Clock) -> RequestSignature {
    let timestamp = clock.epoch_millis();
    let message = format!("{timestamp}.{body}");
    RequestSignature {
        signature: sign(&message, key),
        timestamp,
        key_id: key.chars().take(8).collect(),
    }
}

/// Verify a request signature within the age window.
///
/// Fails when the request is older than `max_age_ms`, more than
/// [`MAX_CLOCK_SKEW_MS`] in the future, or when the recomputed MAC does not
/// match. The comparison is constant-time; this never returns `true` under a
/// signature mismatch.
pub fn verify_request_signature(
    body: &str,
    signature: &str,
    timestamp: i64,
    key: &str,
    max_age_ms: i64,
    clock: &impl Clock,
) -> bool {
    let age = clock.epoch_millis() - timestamp;
    if age > max_age_ms || age < -MAX_CLOCK_SKEW_MS {
        return false;
    }

    let Ok(expected) = hex::decode(signature) else {
        return false;
    };

    let message = format!("{timestamp}.{body}");
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(message.as_bytes());
    mac.verify_slice(&expected).is_ok()
}
