//! Synchronous flag evaluation
//!
//! Resolves a key to a typed result from cache, bootstrap and default, in
//! that order. The evaluator performs no network I/O and never fails for an
//! ordinary lookup; every failure mode is encoded in the result's reason.

use std::collections::HashMap;
use std::sync::Arc;

use flagkit_domain::{
    EvaluationContext, EvaluationJitter, EvaluationReason, EvaluationResult, FlagType, FlagValue,
};
use parking_lot::RwLock;
use rand::Rng;
use tracing::trace;

use flagkit_common::resilience::{Clock, SystemClock};

use crate::store::FlagStore;

/// Synchronous evaluation surface over the flag store.
pub struct Evaluator<C: Clock = SystemClock> {
    store: Arc<FlagStore<C>>,
    bootstrap: RwLock<HashMap<String, FlagValue>>,
    jitter: EvaluationJitter,
}

impl<C: Clock> Evaluator<C> {
    pub fn new(store: Arc<FlagStore<C>>, jitter: EvaluationJitter) -> Self {
        Self { store, bootstrap: RwLock::new(HashMap::new()), jitter }
    }

    /// Install the bootstrap mapping consulted when a key is not cached.
    pub fn seed_bootstrap(&self, flags: HashMap<String, FlagValue>) {
        *self.bootstrap.write() = flags;
    }

    pub fn bootstrap_len(&self) -> usize {
        self.bootstrap.read().len()
    }

    /// Resolve `key` to a result.
    ///
    /// Order: fresh cache (with type check) → stale cache → bootstrap →
    /// default. The optional jitter sleep applies unconditionally, hit or
    /// miss, so lookup timing does not reveal cache state.
    pub fn evaluate(
        &self,
        key: &str,
        default: FlagValue,
        expected_type: Option<FlagType>,
        _context: Option<&EvaluationContext>,
    ) -> EvaluationResult {
        self.apply_jitter();

        if key.is_empty() {
            return EvaluationResult::fallback(key, default, EvaluationReason::Error);
        }

        if let Some(flag) = self.store.get(key) {
            if let Some(expected) = expected_type {
                if flag.flag_type() != expected {
                    trace!(key, %expected, actual = %flag.flag_type(), "type mismatch");
                    return EvaluationResult::fallback(key, default, EvaluationReason::TypeMismatch);
                }
            }
            return EvaluationResult::new(
                key,
                flag.value.clone(),
                flag.enabled,
                EvaluationReason::Cached,
                flag.version,
            );
        }

        // Stale takes precedence over bootstrap and default; the type check
        // is not repeated here.
        if let Some(flag) = self.store.get_stale(key) {
            return EvaluationResult::new(
                key,
                flag.value.clone(),
                flag.enabled,
                EvaluationReason::StaleCache,
                flag.version,
            );
        }

        if let Some(value) = self.bootstrap.read().get(key) {
            return EvaluationResult::new(
                key,
                value.clone(),
                true,
                EvaluationReason::Bootstrap,
                0,
            );
        }

        EvaluationResult::fallback(key, default, EvaluationReason::FlagNotFound)
    }

    fn apply_jitter(&self) {
        if !self.jitter.enabled {
            return;
        }
        let (min, max) = (self.jitter.min, self.jitter.max);
        let delay = if min >= max { min } else { rand::thread_rng().gen_range(min..=max) };
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the evaluation pipeline.
    //!
    //! Tests follow the resolution order: fresh, stale, bootstrap, default,
    //! plus the type-check and invalid-key paths.

    use std::time::{Duration, Instant};

    use flagkit_common::resilience::MockClock;
    use flagkit_domain::FlagState;

    use super::*;

    const TTL: Duration = Duration::from_secs(10);

    fn evaluator() -> (Evaluator<MockClock>, Arc<FlagStore<MockClock>>, MockClock) {
        let clock = MockClock::new();
        let store = Arc::new(FlagStore::with_clock(100, clock.clone()));
        (Evaluator::new(Arc::clone(&store), EvaluationJitter::default()), store, clock)
    }

    /// Validates the fresh-cache path.
    ///
    /// Assertions:
    /// - Confirms the cached value with reason `Cached`.
    /// - Confirms version and enabled flow through.
    #[test]
    fn test_fresh_cache_hit() {
        let (eval, store, _clock) = evaluator();
        store.set(FlagState::new("f", true, true).with_version(7), TTL);

        let result = eval.evaluate("f", FlagValue::Bool(false), None, None);
        assert_eq!(result.value, FlagValue::Bool(true));
        assert_eq!(result.reason, EvaluationReason::Cached);
        assert_eq!(result.version, 7);
        assert!(result.enabled);
    }

    /// Validates the type-check on the fresh path.
    ///
    /// Assertions:
    /// - Confirms a mismatched expected type returns the default with reason
    ///   `TypeMismatch`.
    /// - Confirms a matching expected type passes through.
    #[test]
    fn test_type_mismatch_returns_default() {
        let (eval, store, _clock) = evaluator();
        store.set(FlagState::new("limit", 42.0, true), TTL);

        let result =
            eval.evaluate("limit", FlagValue::String("x".into()), Some(FlagType::String), None);
        assert_eq!(result.reason, EvaluationReason::TypeMismatch);
        assert_eq!(result.value, FlagValue::String("x".into()));

        let result = eval.evaluate("limit", FlagValue::Number(0.0), Some(FlagType::Number), None);
        assert_eq!(result.reason, EvaluationReason::Cached);
    }

    /// Validates the stale path after TTL expiry.
    ///
    /// Assertions:
    /// - Confirms the stale value wins over bootstrap and default.
    /// - Confirms the stale path skips the type check.
    #[test]
    fn test_stale_over_bootstrap_and_default() {
        let (eval, store, clock) = evaluator();
        store.set(FlagState::new("f", 1.0, true).with_version(2), TTL);
        eval.seed_bootstrap(HashMap::from([("f".to_string(), FlagValue::Number(9.0))]));

        clock.advance(Duration::from_secs(11));

        let result = eval.evaluate("f", FlagValue::Number(0.0), Some(FlagType::String), None);
        assert_eq!(result.reason, EvaluationReason::StaleCache);
        assert_eq!(result.value, FlagValue::Number(1.0));
        assert_eq!(result.version, 2);
    }

    /// Validates the bootstrap path for uncached keys.
    #[test]
    fn test_bootstrap_fallback() {
        let (eval, _store, _clock) = evaluator();
        eval.seed_bootstrap(HashMap::from([
            ("dark-mode".to_string(), FlagValue::Bool(true)),
            ("limit".to_string(), FlagValue::Number(42.0)),
        ]));

        let result = eval.evaluate("dark-mode", FlagValue::Bool(false), None, None);
        assert_eq!(result.reason, EvaluationReason::Bootstrap);
        assert_eq!(result.value, FlagValue::Bool(true));

        let result = eval.evaluate("limit", FlagValue::Number(0.0), None, None);
        assert_eq!(result.value, FlagValue::Number(42.0));
    }

    /// Validates the not-found default path.
    #[test]
    fn test_flag_not_found() {
        let (eval, _store, _clock) = evaluator();
        let result = eval.evaluate("missing", FlagValue::String("x".into()), None, None);
        assert_eq!(result.reason, EvaluationReason::FlagNotFound);
        assert_eq!(result.value, FlagValue::String("x".into()));
        assert!(!result.enabled);
    }

    /// Validates the empty-key error path.
    #[test]
    fn test_empty_key_is_error() {
        let (eval, _store, _clock) = evaluator();
        let result = eval.evaluate("", FlagValue::Bool(true), None, None);
        assert_eq!(result.reason, EvaluationReason::Error);
        assert_eq!(result.value, FlagValue::Bool(true));
    }

    /// Validates the jitter sleep: enabled jitter delays every call by at
    /// least `min`, regardless of hit or miss.
    #[test]
    fn test_jitter_applies_unconditionally() {
        let clock = MockClock::new();
        let store = Arc::new(FlagStore::with_clock(100, clock.clone()));
        store.set(FlagState::new("f", true, true), TTL);
        let jitter =
            EvaluationJitter::new(Duration::from_millis(15), Duration::from_millis(20));
        let eval = Evaluator::new(Arc::clone(&store), jitter);

        for key in ["f", "missing"] {
            let started = Instant::now();
            let _ = eval.evaluate(key, FlagValue::Bool(false), None, None);
            assert!(started.elapsed() >= Duration::from_millis(15), "jitter must delay {key}");
        }
    }
}
