// Allow unwrap/expect in tests - tests should panic on unexpected errors
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Circuit Guard - Per-Service Circuit Breakers
//!
//! Failure-monitoring state machine that stops callers from hammering a
//! degraded dependency, and a pluggable fallback layer that serves substitute
//! responses while the dependency is unhealthy.
//!
//! # Modules
//!
//! - `resilience`: circuit state machine, per-service registry, fallbacks
//! - `observability`: `tracing` transition logs and Prometheus metrics
//! - `config`: YAML configuration with environment interpolation
//! - `clock`: injectable time source
//! - `error`: error taxonomy
//!
//! # Caller Protocol
//!
//! 1. `is_open(service)` before each outbound call
//! 2. closed: make the call, then `record_success` or `record_failure`
//! 3. open: `execute_with_fallback(service, request)` instead

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

pub mod clock;
pub mod config;
pub mod error;
pub mod observability;
pub mod resilience;

pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use error::CircuitBreakerError;
pub use resilience::{
    CacheFallback, CircuitBreaker, CircuitBreakerBuilder, CircuitBreakerConfig,
    CircuitBreakerMetrics, CircuitState, DefaultValueFallback, FallbackChain, FallbackContext,
    FallbackError, FallbackResponse, FallbackSource, FallbackStrategy, TransitionEvent,
    TransitionObserver,
};
