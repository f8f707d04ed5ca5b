//! Evaluation results
//!
//! Every lookup resolves to an [`EvaluationResult`]; failure modes are
//! encoded in the [`EvaluationReason`], never thrown.

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::flag::FlagValue;

/// Why an evaluation produced its value. Fixed vocabulary, stable on the
/// wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluationReason {
    /// Fresh cache hit.
    Cached,
    /// Served from an expired cache entry.
    StaleCache,
    /// Served from the bootstrap seed.
    Bootstrap,
    /// Applied directly from a synchronous server response.
    Server,
    /// The supplied default was returned.
    Default,
    /// The key is unknown everywhere; the default was returned.
    FlagNotFound,
    /// The stored type differs from the expected type; the default was
    /// returned.
    TypeMismatch,
    /// The flag exists but is switched off.
    Disabled,
    /// Served while the client is in offline mode.
    Offline,
    /// Invalid input (e.g. an empty key); the default was returned.
    Error,
}

impl fmt::Display for EvaluationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EvaluationReason::Cached => "CACHED",
            EvaluationReason::StaleCache => "STALE_CACHE",
            EvaluationReason::Bootstrap => "BOOTSTRAP",
            EvaluationReason::Server => "SERVER",
            EvaluationReason::Default => "DEFAULT",
            EvaluationReason::FlagNotFound => "FLAG_NOT_FOUND",
            EvaluationReason::TypeMismatch => "TYPE_MISMATCH",
            EvaluationReason::Disabled => "DISABLED",
            EvaluationReason::Offline => "OFFLINE",
            EvaluationReason::Error => "ERROR",
        };
        write!(f, "{name}")
    }
}

/// Immutable outcome of one lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub flag_key: String,
    pub value: FlagValue,
    pub enabled: bool,
    pub reason: EvaluationReason,
    pub version: u64,
    /// Milliseconds since epoch at evaluation time.
    pub timestamp: i64,
}

impl EvaluationResult {
    pub fn new(
        flag_key: impl Into<String>,
        value: FlagValue,
        enabled: bool,
        reason: EvaluationReason,
        version: u64,
    ) -> Self {
        Self {
            flag_key: flag_key.into(),
            value,
            enabled,
            reason,
            version,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Default-shaped result: the supplied fallback with `enabled = false`
    /// and version `0`.
    pub fn fallback(flag_key: impl Into<String>, value: FlagValue, reason: EvaluationReason) -> Self {
        Self::new(flag_key, value, false, reason, 0)
    }
}
