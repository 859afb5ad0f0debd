//! Error taxonomy for the circuit breaker.
//!
//! | Variant | Raised by | Recoverable |
//! |---------|-----------|-------------|
//! | `InvalidConfig` | construction | no |
//! | `CircuitOpen` | `CircuitBreaker::guard` (caller fail-fast) | yes, after timeout |
//! | `NoFallbackRegistered` | `execute_with_fallback` | register a strategy |
//! | `FallbackFailed` | `execute_with_fallback` | depends on the strategy |
//!
//! `is_open`, `record_success` and `record_failure` never fail.

use thiserror::Error;

use crate::resilience::FallbackError;

/// Errors surfaced by the circuit breaker.
#[derive(Debug, Error)]
pub enum CircuitBreakerError {
    /// Construction parameters were rejected.
    #[error("invalid circuit breaker configuration: {0}")]
    InvalidConfig(String),

    /// The caller chose to fail fast because the circuit is open.
    #[error("circuit open for service '{service}'")]
    CircuitOpen {
        /// Service whose circuit is open.
        service: String,
    },

    /// No fallback strategy is registered for the service.
    #[error("no fallback registered for service '{service}'")]
    NoFallbackRegistered {
        /// Service that was looked up.
        service: String,
    },

    /// The registered strategy ran and failed.
    #[error("fallback for service '{service}' failed: {source}")]
    FallbackFailed {
        /// Service the fallback ran for.
        service: String,
        /// The strategy's own error, unmodified.
        #[source]
        source: FallbackError,
    },
}

impl CircuitBreakerError {
    /// The strategy error behind a `FallbackFailed`.
    #[must_use]
    pub const fn fallback_error(&self) -> Option<&FallbackError> {
        match self {
            Self::FallbackFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}
