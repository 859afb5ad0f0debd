//! Resilience patterns: per-service circuit breakers and fallback strategies.
//!
//! # Circuit Breaker States
//!
//! ```text
//!        failure_count >= threshold
//!   CLOSED ─────────────────────────▶ OPEN
//!     ▲                                │
//!     │ success                        │ timeout elapsed (on is_open)
//!     │                                ▼
//!     └─────────────────────────── HALF_OPEN
//!                                      │
//!                 OPEN ◀───────────────┘ failure
//! ```

pub mod circuit_breaker;
pub mod fallback;
pub mod registry;
pub mod state;
pub mod strategies;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerBuilder, CircuitBreakerConfig, CircuitBreakerMetrics,
    TransitionEvent, TransitionObserver,
};
pub use fallback::{
    FallbackContext, FallbackError, FallbackRegistry, FallbackResponse, FallbackSource,
    FallbackStrategy,
};
pub use registry::CircuitRegistry;
pub use state::{Admission, CircuitState, CircuitStateEntry, Transition};
pub use strategies::{CacheFallback, DefaultValueFallback, FallbackChain};
