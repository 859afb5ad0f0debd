//! Prometheus metrics for circuit breakers and fallbacks.
//!
//! All series carry a `service` label.
//!
//! # Example
//!
//! ```ignore
//! use circuit_guard::observability::init_metrics;
//!
//! init_metrics("0.0.0.0:9090".parse()?)?;
//! record_circuit_breaker_failure("linkedin_api");
//! ```

use std::net::SocketAddr;

use dashmap::DashMap;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::{CircuitBreakerMetrics, CircuitState};

/// Histogram buckets for fallback latency, 100us to 5s.
pub const FALLBACK_LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

/// Initialize the Prometheus metrics exporter.
///
/// Starts an HTTP listener exposing `/metrics` on `listen_addr`.
pub fn init_metrics(listen_addr: SocketAddr) -> Result<(), MetricsError> {
    PrometheusBuilder::new()
        .with_http_listener(listen_addr)
        .set_buckets(FALLBACK_LATENCY_BUCKETS)
        .map_err(|e| MetricsError::Configuration(e.to_string()))?
        .install()
        .map_err(|e| MetricsError::Installation(e.to_string()))?;

    tracing::info!(addr = %listen_addr, "Prometheus metrics exporter started");

    Ok(())
}

/// Error type for metrics operations.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Failed to configure metrics exporter.
    #[error("metrics configuration error: {0}")]
    Configuration(String),
    /// Failed to install metrics exporter.
    #[error("metrics installation error: {0}")]
    Installation(String),
}

/// Destination for circuit snapshots.
///
/// Called outside any circuit lock; implementations may be slow or call back
/// into the breaker. Pushes for one service can arrive out of order; compare
/// `CircuitBreakerMetrics::sequence` to discard stale ones.
pub trait MetricsSink: Send + Sync {
    /// Publish one snapshot.
    fn publish(&self, metrics: &CircuitBreakerMetrics);
}

/// Sink that writes snapshots to the installed `metrics` recorder.
///
/// Remembers the highest sequence written per service and ignores older
/// snapshots, so a delayed push cannot roll a gauge back.
#[derive(Debug, Default)]
pub struct PrometheusMetricsSink {
    latest: DashMap<String, u64>,
}

impl PrometheusMetricsSink {
    /// Create a sink with no history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `metrics` unless a newer snapshot was already written.
    /// Returns whether it was written.
    fn write_if_current(&self, metrics: &CircuitBreakerMetrics) -> bool {
        // The shard guard is held across the write so two pushes cannot
        // interleave between the check and the gauge update.
        let mut latest = self.latest.entry(metrics.service.clone()).or_insert(0);
        if metrics.sequence < *latest {
            return false;
        }
        *latest = metrics.sequence;
        record_circuit_breaker_snapshot(metrics);
        true
    }
}

impl MetricsSink for PrometheusMetricsSink {
    fn publish(&self, metrics: &CircuitBreakerMetrics) {
        if !self.write_if_current(metrics) {
            tracing::debug!(
                service = %metrics.service,
                sequence = metrics.sequence,
                "Discarded stale circuit breaker snapshot"
            );
        }
    }
}

// ============================================================================
// Circuit Breaker Metrics
// ============================================================================

/// Circuit breaker state values for the gauge.
pub mod circuit_breaker_state {
    /// Circuit is closed (healthy).
    pub const CLOSED: f64 = 0.0;
    /// Circuit is open (failing).
    pub const OPEN: f64 = 1.0;
    /// Circuit is half-open (testing).
    pub const HALF_OPEN: f64 = 2.0;
}

/// Update circuit breaker state gauge.
///
/// # Arguments
///
/// * `service` - Service name (e.g., "linkedin_api")
/// * `state` - Numeric state (0=closed, 1=open, 2=`half_open`)
pub fn record_circuit_breaker_state(service: &str, state: f64) {
    gauge!(
        "circuit_breaker_state",
        "service" => service.to_string()
    )
    .set(state);
}

/// Write every gauge derived from a snapshot.
pub fn record_circuit_breaker_snapshot(metrics: &CircuitBreakerMetrics) {
    record_circuit_breaker_state(&metrics.service, metrics.state.gauge_value());

    gauge!(
        "circuit_breaker_failure_count",
        "service" => metrics.service.clone()
    )
    .set(f64::from(metrics.failure_count));

    gauge!(
        "circuit_breaker_timeout_remaining_seconds",
        "service" => metrics.service.clone()
    )
    .set(metrics.timeout_remaining.map_or(0.0, |d| d.as_secs_f64()));
}

/// Record a state transition.
pub fn record_circuit_breaker_transition(service: &str, from: CircuitState, to: CircuitState) {
    counter!(
        "circuit_breaker_transitions_total",
        "service" => service.to_string(),
        "from" => from.as_label(),
        "to" => to.as_label()
    )
    .increment(1);
}

/// Record a failed call reported by the caller.
pub fn record_circuit_breaker_failure(service: &str) {
    counter!(
        "circuit_breaker_failures_total",
        "service" => service.to_string()
    )
    .increment(1);
}

/// Record a successful call reported by the caller.
pub fn record_circuit_breaker_success(service: &str) {
    counter!(
        "circuit_breaker_success_total",
        "service" => service.to_string()
    )
    .increment(1);
}

/// Record a rejection (`is_open` returned `true`).
pub fn record_circuit_breaker_rejected(service: &str) {
    counter!(
        "circuit_breaker_rejected_total",
        "service" => service.to_string()
    )
    .increment(1);
}

// ============================================================================
// Fallback Metrics
// ============================================================================

/// Record a fallback execution.
///
/// # Arguments
///
/// * `service` - Service name
/// * `outcome` - Response source label, `"failed"` or `"missing"`
pub fn record_fallback_execution(service: &str, outcome: &str) {
    counter!(
        "circuit_breaker_fallback_total",
        "service" => service.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record how long a fallback strategy took.
pub fn record_fallback_duration(service: &str, duration_seconds: f64) {
    histogram!(
        "circuit_breaker_fallback_duration_seconds",
        "service" => service.to_string()
    )
    .record(duration_seconds);
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use super::*;

    #[test]
    fn test_state_constants_match_gauge_values() {
        assert!((circuit_breaker_state::CLOSED - CircuitState::Closed.gauge_value()).abs() < f64::EPSILON);
        assert!((circuit_breaker_state::OPEN - CircuitState::Open.gauge_value()).abs() < f64::EPSILON);
        assert!(
            (circuit_breaker_state::HALF_OPEN - CircuitState::HalfOpen.gauge_value()).abs()
                < f64::EPSILON
        );
    }

    #[test]
    fn test_latency_buckets_are_sorted() {
        assert!(FALLBACK_LATENCY_BUCKETS.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_recording_without_recorder() {
        // No recorder installed; these must not panic.
        record_circuit_breaker_state("svc", circuit_breaker_state::OPEN);
        record_circuit_breaker_transition("svc", CircuitState::Closed, CircuitState::Open);
        record_circuit_breaker_failure("svc");
        record_circuit_breaker_success("svc");
        record_circuit_breaker_rejected("svc");
        record_fallback_execution("svc", "cache");
        record_fallback_duration("svc", 0.002);
    }

    fn snapshot(service: &str, state: CircuitState, sequence: u64) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            service: service.to_string(),
            state,
            failure_count: 3,
            opened_at: Some(Utc::now()),
            timeout_remaining: Some(Duration::from_secs(42)),
            last_transition: Utc::now(),
            sequence,
        }
    }

    #[test]
    fn test_prometheus_sink_publishes_snapshot() {
        PrometheusMetricsSink::new().publish(&snapshot("svc", CircuitState::Open, 1));
    }

    #[test]
    fn test_prometheus_sink_discards_stale_snapshot() {
        let sink = PrometheusMetricsSink::new();

        assert!(sink.write_if_current(&snapshot("svc", CircuitState::Closed, 6)));
        assert!(!sink.write_if_current(&snapshot("svc", CircuitState::Open, 3)));
        assert!(sink.write_if_current(&snapshot("svc", CircuitState::Closed, 6)));
        assert!(sink.write_if_current(&snapshot("other", CircuitState::Open, 1)));
    }
}
