//! SDK-wide error taxonomy
//!
//! A single error type spans the SDK; each kind carries a retryability that
//! drives the transport retry loop and the circuit breaker. The evaluator
//! never surfaces these — lookup failures are encoded as result reasons.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::flag::FlagType;

/// Result type alias for FlagKit operations.
pub type Result<T> = std::result::Result<T, FlagKitError>;

/// Main error type for the FlagKit SDK.
#[derive(Debug, Clone, Error)]
pub enum FlagKitError {
    // -- initialization ------------------------------------------------------
    #[error("Initialization failed: {0}")]
    InitFailed(String),

    // -- authentication ------------------------------------------------------
    #[error("Authentication rejected: {0}")]
    AuthInvalid(String),

    #[error("Credential expired: {0}")]
    AuthExpired(String),

    #[error("No API key configured")]
    AuthMissing,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    // -- network -------------------------------------------------------------
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Retries exhausted after {attempts} attempts")]
    RetryLimit { attempts: u32 },

    #[error("Rate limited by the service")]
    RateLimited,

    #[error("Server error (status {status})")]
    ServerStatus { status: u16 },

    #[error("HTTP error (status {status}): {message}")]
    HttpStatus { status: u16, message: String },

    #[error("Circuit breaker is open")]
    CircuitOpen,

    // -- evaluation ----------------------------------------------------------
    #[error("Flag not found: {0}")]
    FlagNotFound(String),

    #[error("Type mismatch for '{key}': expected {expected}, stored {actual}")]
    TypeMismatch { key: String, expected: FlagType, actual: FlagType },

    // -- cache ---------------------------------------------------------------
    #[error("Cache entry expired: {0}")]
    CacheExpired(String),

    #[error("Serving stale cache for: {0}")]
    StaleCache(String),

    // -- events --------------------------------------------------------------
    #[error("Event delivery failed: {0}")]
    EventSend(String),

    // -- configuration -------------------------------------------------------
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    // -- security ------------------------------------------------------------
    #[error("Signature verification failed: {0}")]
    SignatureInvalid(String),

    #[error("Encryption failure: {0}")]
    EncryptionFailed(String),

    #[error("Bootstrap payload rejected: {0}")]
    BootstrapInvalid(String),

    #[error("Bootstrap payload expired: {0}")]
    BootstrapExpired(String),

    // -- streaming -----------------------------------------------------------
    #[error("Stream token rejected by the service")]
    StreamTokenInvalid,

    #[error("Stream token expired")]
    StreamTokenExpired,

    #[error("Subscription suspended: {0}")]
    SubscriptionSuspended(String),

    #[error("Streaming connection limit reached")]
    ConnectionLimit,

    #[error("Streaming unavailable")]
    StreamingUnavailable,

    #[error("Stream error: {0}")]
    Stream(String),

    // -- internal ------------------------------------------------------------
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FlagKitError {
    /// Wrap an I/O-level transport failure as a recoverable network error.
    pub fn network(err: impl fmt::Display) -> Self {
        FlagKitError::Network(err.to_string())
    }
}

/// Error classification for retry and monitoring decisions.
pub trait ErrorClassification {
    /// Whether retrying with backoff is a sensible response.
    fn is_retryable(&self) -> bool;

    /// Severity for logging and alerting.
    fn severity(&self) -> ErrorSeverity;
}

/// Severity levels for monitoring and alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Informational, typically for debugging
    Info,
    /// Warning, should be monitored but not critical
    Warning,
    /// Error, requires attention and action
    Error,
    /// Critical, immediate action required
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl ErrorClassification for FlagKitError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            FlagKitError::Network(_)
                | FlagKitError::Timeout(_)
                | FlagKitError::RetryLimit { .. }
                | FlagKitError::RateLimited
                | FlagKitError::ServerStatus { .. }
                | FlagKitError::CircuitOpen
                | FlagKitError::CacheExpired(_)
                | FlagKitError::StaleCache(_)
                | FlagKitError::EventSend(_)
                | FlagKitError::StreamTokenInvalid
                | FlagKitError::StreamTokenExpired
                | FlagKitError::ConnectionLimit
                | FlagKitError::StreamingUnavailable
                | FlagKitError::Stream(_)
        )
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            FlagKitError::FlagNotFound(_) | FlagKitError::StaleCache(_) => ErrorSeverity::Info,
            FlagKitError::Network(_)
            | FlagKitError::Timeout(_)
            | FlagKitError::RateLimited
            | FlagKitError::CircuitOpen
            | FlagKitError::CacheExpired(_)
            | FlagKitError::EventSend(_)
            | FlagKitError::StreamTokenInvalid
            | FlagKitError::StreamTokenExpired
            | FlagKitError::ConnectionLimit
            | FlagKitError::StreamingUnavailable
            | FlagKitError::Stream(_) => ErrorSeverity::Warning,
            FlagKitError::InitFailed(_)
            | FlagKitError::AuthInvalid(_)
            | FlagKitError::AuthExpired(_)
            | FlagKitError::AuthMissing
            | FlagKitError::Forbidden(_)
            | FlagKitError::RetryLimit { .. }
            | FlagKitError::ServerStatus { .. }
            | FlagKitError::HttpStatus { .. }
            | FlagKitError::TypeMismatch { .. }
            | FlagKitError::ConfigInvalid(_)
            | FlagKitError::SubscriptionSuspended(_)
            | FlagKitError::BootstrapExpired(_) => ErrorSeverity::Error,
            FlagKitError::SignatureInvalid(_)
            | FlagKitError::EncryptionFailed(_)
            | FlagKitError::BootstrapInvalid(_)
            | FlagKitError::Internal(_) => ErrorSeverity::Critical,
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the error taxonomy.
    //!
    //! Tests cover retryability classes, severity mapping, and display
    //! formatting.

    use super::*;

    /// Validates `ErrorClassification::is_retryable` for the recoverable and
    /// non-recoverable kinds.
    ///
    /// Assertions:
    /// - Ensures network, timeout, rate-limit, 5xx, circuit-open and stream
    ///   token kinds are retryable.
    /// - Ensures auth, forbidden, config and bootstrap kinds are not.
    #[test]
    fn test_retryable_classes() {
        assert!(FlagKitError::Network("refused".into()).is_retryable());
        assert!(FlagKitError::Timeout(Duration::from_secs(5)).is_retryable());
        assert!(FlagKitError::RateLimited.is_retryable());
        assert!(FlagKitError::ServerStatus { status: 503 }.is_retryable());
        assert!(FlagKitError::CircuitOpen.is_retryable());
        assert!(FlagKitError::StreamTokenExpired.is_retryable());
        assert!(FlagKitError::EventSend("batch".into()).is_retryable());

        assert!(!FlagKitError::AuthInvalid("401".into()).is_retryable());
        assert!(!FlagKitError::Forbidden("403".into()).is_retryable());
        assert!(!FlagKitError::FlagNotFound("k".into()).is_retryable());
        assert!(!FlagKitError::ConfigInvalid("bad".into()).is_retryable());
        assert!(!FlagKitError::BootstrapInvalid("sig".into()).is_retryable());
        assert!(!FlagKitError::EncryptionFailed("aead".into()).is_retryable());
        assert!(
            !FlagKitError::HttpStatus { status: 418, message: "teapot".into() }.is_retryable()
        );
    }

    /// Validates `ErrorClassification::severity` behavior for the severity
    /// mapping scenario.
    ///
    /// Assertions:
    /// - Confirms security faults are `Critical`.
    /// - Confirms transient network faults are `Warning`.
    /// - Confirms lookup misses are `Info`.
    #[test]
    fn test_severity_mapping() {
        assert_eq!(
            FlagKitError::SignatureInvalid("mismatch".into()).severity(),
            ErrorSeverity::Critical
        );
        assert_eq!(FlagKitError::Network("reset".into()).severity(), ErrorSeverity::Warning);
        assert_eq!(FlagKitError::FlagNotFound("k".into()).severity(), ErrorSeverity::Info);
        assert_eq!(FlagKitError::AuthInvalid("nope".into()).severity(), ErrorSeverity::Error);
    }

    /// Validates display formatting for a sample of variants.
    #[test]
    fn test_display() {
        assert_eq!(FlagKitError::CircuitOpen.to_string(), "Circuit breaker is open");
        let err = FlagKitError::TypeMismatch {
            key: "limit".into(),
            expected: FlagType::Number,
            actual: FlagType::String,
        };
        assert_eq!(err.to_string(), "Type mismatch for 'limit': expected number, stored string");
        assert!(ErrorSeverity::Critical > ErrorSeverity::Error);
    }
}
