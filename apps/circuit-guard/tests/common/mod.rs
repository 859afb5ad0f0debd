//! Shared fixtures for circuit-guard integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use circuit_guard::observability::MetricsSink;
use circuit_guard::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState, ManualClock,
    TransitionEvent, TransitionObserver,
};

/// Captures every transition event.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<TransitionEvent>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<TransitionEvent> {
        self.events.lock().clone()
    }

    pub fn transitions(&self) -> Vec<(CircuitState, CircuitState)> {
        self.events.lock().iter().map(|e| (e.from, e.to)).collect()
    }

    pub fn count(&self, from: CircuitState, to: CircuitState) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.from == from && e.to == to)
            .count()
    }
}

impl TransitionObserver for RecordingObserver {
    fn on_transition(&self, event: &TransitionEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Captures every published snapshot.
#[derive(Default)]
pub struct RecordingSink {
    published: Mutex<Vec<CircuitBreakerMetrics>>,
}

impl RecordingSink {
    pub fn published(&self) -> Vec<CircuitBreakerMetrics> {
        self.published.lock().clone()
    }
}

impl MetricsSink for RecordingSink {
    fn publish(&self, metrics: &CircuitBreakerMetrics) {
        self.published.lock().push(metrics.clone());
    }
}

/// A breaker on a manual clock with recording collaborators.
pub struct Fixture {
    pub clock: Arc<ManualClock>,
    pub observer: Arc<RecordingObserver>,
    pub sink: Arc<RecordingSink>,
    pub breaker: Arc<CircuitBreaker>,
}

pub fn fixture(config: CircuitBreakerConfig) -> Fixture {
    let clock = Arc::new(ManualClock::new());
    let observer = Arc::new(RecordingObserver::default());
    let sink = Arc::new(RecordingSink::default());
    let breaker = CircuitBreaker::builder(config)
        .clock(clock.clone())
        .observer(observer.clone())
        .metrics_sink(sink.clone())
        .without_default_logger()
        .build()
        .unwrap();

    Fixture {
        clock,
        observer,
        sink,
        breaker: Arc::new(breaker),
    }
}

/// `threshold=3, timeout=60s`.
pub fn standard() -> Fixture {
    fixture(CircuitBreakerConfig::new(3, Duration::from_secs(60)))
}

pub fn trip(breaker: &CircuitBreaker, service: &str, failures: u32) {
    for _ in 0..failures {
        breaker.record_failure(service);
    }
}
