//! Observability for the circuit breaker: structured logging and Prometheus
//! metrics.
//!
//! Both are optional for library callers. A breaker built with the defaults
//! logs transitions through `tracing`; metrics are recorded through the
//! `metrics` facade and are no-ops until [`init_metrics`] installs a recorder.

mod logging;
mod metrics;

pub use self::logging::{LogFormat, LoggingError, TransitionLogger, init_tracing, log_transition};
pub use self::metrics::{
    FALLBACK_LATENCY_BUCKETS, MetricsError, MetricsSink, PrometheusMetricsSink,
    circuit_breaker_state, init_metrics, record_circuit_breaker_failure,
    record_circuit_breaker_rejected, record_circuit_breaker_snapshot,
    record_circuit_breaker_state, record_circuit_breaker_success,
    record_circuit_breaker_transition, record_fallback_duration, record_fallback_execution,
};
