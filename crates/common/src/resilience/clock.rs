//! Time source abstraction
//!
//! The SDK measures time two ways: monotonic instants drive cache expiry,
//! breaker timeouts and heartbeat staleness, while wall-clock epoch
//! milliseconds go on the wire in signatures and access stamps. [`Clock`]
//! exposes exactly those two readings so any component holding one can be
//! tested against a hand-driven [`MockClock`] instead of real delays.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Source of the two time readings the SDK consumes.
pub trait Clock: Send + Sync + 'static {
    /// Monotonic reading for expiry and timeout arithmetic.
    fn now(&self) -> Instant;

    /// Wall-clock milliseconds since the UNIX epoch, for values that leave
    /// the process (signature timestamps, access stamps).
    fn epoch_millis(&self) -> i64;
}

/// Production clock backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn epoch_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|since| since.as_millis() as i64)
            .unwrap_or_default()
    }
}

/// Hand-driven clock for deterministic tests.
///
/// Time only moves when a test advances it; both readings move together.
/// Granularity is one millisecond, which is also the resolution of every
/// wire-facing timestamp. Clones share the same offset, so the test can keep
/// one handle while the component under test owns another.
#[derive(Debug, Clone)]
pub struct MockClock {
    origin: Instant,
    epoch_base_ms: i64,
    offset_ms: Arc<AtomicU64>,
}

impl MockClock {
    /// A clock starting at epoch millisecond zero.
    pub fn new() -> Self {
        Self::at_epoch(0)
    }

    /// A clock whose wall reading starts at `epoch_millis`. Useful when a
    /// test pins a literal signing timestamp.
    pub fn at_epoch(epoch_millis: i64) -> Self {
        Self {
            origin: Instant::now(),
            epoch_base_ms: epoch_millis,
            offset_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Move both readings forward, rounded down to whole milliseconds.
    pub fn advance(&self, duration: Duration) {
        self.offset_ms.fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn advance_millis(&self, millis: u64) {
        self.offset_ms.fetch_add(millis, Ordering::Relaxed);
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.origin + Duration::from_millis(self.offset_ms.load(Ordering::Relaxed))
    }

    fn epoch_millis(&self) -> i64 {
        self.epoch_base_ms + self.offset_ms.load(Ordering::Relaxed) as i64
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the time sources.

    use super::*;

    /// Validates `SystemClock` readings: monotonic and epoch-anchored.
    #[test]
    fn test_system_clock_readings() {
        let clock = SystemClock;
        let first = clock.now();
        assert!(clock.now() >= first);
        assert!(clock.epoch_millis() > 0);
    }

    /// Validates `MockClock::advance` behavior for the coupled readings
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms `now()` and `epoch_millis()` move together.
    /// - Confirms clones observe the same advance.
    #[test]
    fn test_mock_clock_advance_moves_both_readings() {
        let clock = MockClock::new();
        let start = clock.now();

        clock.advance(Duration::from_secs(5));
        assert_eq!(clock.now().duration_since(start), Duration::from_secs(5));
        assert_eq!(clock.epoch_millis(), 5000);

        let shared = clock.clone();
        shared.advance_millis(500);
        assert_eq!(clock.epoch_millis(), 5500);
    }

    /// Validates `MockClock::at_epoch` behavior for the pinned timestamp
    /// scenario.
    #[test]
    fn test_mock_clock_pinned_epoch() {
        let clock = MockClock::at_epoch(1_700_000_000_000);
        assert_eq!(clock.epoch_millis(), 1_700_000_000_000);

        clock.advance_millis(250);
        assert_eq!(clock.epoch_millis(), 1_700_000_000_250);
    }
}
