//! Structured logging.
//!
//! Transition severities:
//!
//! | Transition | Level |
//! |------------|-------|
//! | `CLOSED → OPEN` | `error` |
//! | `HALF_OPEN → OPEN` | `warn` |
//! | `OPEN → HALF_OPEN` | `info` |
//! | `HALF_OPEN → CLOSED` | `info` |

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::resilience::{CircuitState, TransitionEvent, TransitionObserver};

/// Output format of the `fmt` layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, human readable.
    #[default]
    Pretty,
    /// Single line per event.
    Compact,
    /// Newline-delimited JSON.
    Json,
}

/// Error type for logging setup.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// A global subscriber is already installed.
    #[error("failed to initialize tracing subscriber: {0}")]
    Subscriber(String),
}

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence; otherwise `circuit_guard` logs at
/// `config.level` and everything else at `warn`.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,circuit_guard={}", config.level)));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match config.format {
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    result.map_err(|e| LoggingError::Subscriber(e.to_string()))
}

/// Log one state transition at its severity.
pub fn log_transition(service: &str, from: CircuitState, to: CircuitState, failure_count: u32) {
    match (from, to) {
        (CircuitState::Closed, CircuitState::Open) => tracing::error!(
            service = %service,
            from = %from,
            to = %to,
            failure_count,
            "Circuit breaker opened"
        ),
        (CircuitState::HalfOpen, CircuitState::Open) => tracing::warn!(
            service = %service,
            from = %from,
            to = %to,
            failure_count,
            "Circuit breaker probe failed, reopening"
        ),
        (CircuitState::Open, CircuitState::HalfOpen) => tracing::info!(
            service = %service,
            from = %from,
            to = %to,
            failure_count,
            "Circuit breaker timeout elapsed, admitting probes"
        ),
        (CircuitState::HalfOpen, CircuitState::Closed) => tracing::info!(
            service = %service,
            from = %from,
            to = %to,
            failure_count,
            "Circuit breaker closed"
        ),
        _ => tracing::warn!(
            service = %service,
            from = %from,
            to = %to,
            failure_count,
            "Unexpected circuit breaker transition"
        ),
    }
}

/// Observer that logs every transition.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransitionLogger;

impl TransitionObserver for TransitionLogger {
    fn on_transition(&self, event: &TransitionEvent) {
        log_transition(&event.service, event.from, event.to, event.failure_count);
    }
}
