//! Bootstrap verification
//!
//! A signed bootstrap is an HMAC over `timestamp + "." + canonicalize(flags)`.
//! Verification enforces an optional age bound with a 5-minute future-skew
//! tolerance and compares the signature in constant time. What happens on a
//! failed check is the consumer's choice: surface the typed error, warn and
//! continue, or continue silently.

use flagkit_common::crypto::canonicalize_map;
#[cfg(test)]
use flagkit_common::crypto::sign;
use flagkit_common::resilience::Clock;
use flagkit_domain::{
    BootstrapConfig, BootstrapVerification, FlagKitError, Result, VerifyFailurePolicy,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

/// Tolerated future skew for bootstrap timestamps, in milliseconds.
const MAX_FUTURE_SKEW_MS: i64 = 300_000;

/// Verify a bootstrap payload.
///
/// Returns `Ok(true)` when the payload is trustworthy (or verification is
/// disabled / the payload is legacy-unsigned), `Ok(false)` when a check
/// failed under the `Warn`/`Ignore` policies, and the typed security error
/// under the `Error` policy.
pub fn verify_bootstrap<C: Clock>(
    bootstrap: &BootstrapConfig,
    key: &str,
    config: &BootstrapVerification,
    clock: &C,
) -> Result<bool> {
    // Legacy path: nothing to check.
    if !config.enabled || !bootstrap.is_signed() {
        return Ok(true);
    }

    if bootstrap.timestamp > 0 {
        if let Some(max_age) = config.max_age {
            let age = clock.epoch_millis() - bootstrap.timestamp;
            if age > max_age.as_millis() as i64 {
                return dispatch(
                    config.on_failure,
                    FlagKitError::BootstrapExpired(format!(
                        "payload is {age}ms old, max {}ms",
                        max_age.as_millis()
                    )),
                );
            }
            if age < -MAX_FUTURE_SKEW_MS {
                return dispatch(
                    config.on_failure,
                    FlagKitError::BootstrapInvalid(
                        "timestamp is too far in the future".to_string(),
                    ),
                );
            }
        }
    }

    let message = format!("{}.{}", bootstrap.timestamp, canonicalize_map(&bootstrap.flags));
    let provided = bootstrap.signature.as_deref().unwrap_or_default();
    if !verify_constant_time(&message, provided, key) {
        return dispatch(
            config.on_failure,
            FlagKitError::SignatureInvalid("bootstrap signature mismatch".to_string()),
        );
    }

    Ok(true)
}

fn verify_constant_time(message: &str, signature_hex: &str, key: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(key.as_bytes()) else {
        return false;
    };
    mac.update(message.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

fn dispatch(policy: VerifyFailurePolicy, fault: FlagKitError) -> Result<bool> {
    match policy {
        VerifyFailurePolicy::Error => Err(fault),
        VerifyFailurePolicy::Warn => {
            warn!(error = %fault, "bootstrap verification failed, continuing without seed");
            Ok(false)
        }
        VerifyFailurePolicy::Ignore => Ok(false),
    }
}
