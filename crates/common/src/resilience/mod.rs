//! Resilience primitives
//!
//! A three-state circuit breaker gating outbound calls, plus the clock
//! abstraction that makes every timeout-based behavior in the SDK testable
//! without real delays.

mod circuit_breaker;
mod clock;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerStats,
    CircuitState, ConfigError,
};
pub use clock::{Clock, MockClock, SystemClock};
