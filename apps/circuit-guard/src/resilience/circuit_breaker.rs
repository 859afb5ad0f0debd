//! Per-service circuit breaker facade.
//!
//! Protects callers from a degraded dependency by tracking consecutive
//! failures per service and failing fast once a threshold is crossed, then
//! letting probe calls through after a timeout.
//!
//! # Caller Protocol
//!
//! ```text
//! is_open(service)?
//!   false → call the real service → record_success / record_failure
//!   true  → execute_with_fallback(service, request)
//! ```
//!
//! # Locking
//!
//! Each service's entry has its own mutex, held only for read → decide →
//! write. Observers and the metrics sink are called after it is released, so
//! a slow sink never stalls circuit checks and a sink may call back into the
//! breaker.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use circuit_guard::resilience::{CircuitBreaker, CircuitBreakerConfig};
//!
//! let breaker = CircuitBreaker::new(CircuitBreakerConfig::new(3, Duration::from_secs(60)))?;
//!
//! if breaker.is_open("linkedin_api") {
//!     let response = breaker.execute_with_fallback("linkedin_api", "failcorp.com").await?;
//! } else {
//!     match call_linkedin("failcorp.com").await {
//!         Ok(_) => breaker.record_success("linkedin_api"),
//!         Err(_) => breaker.record_failure("linkedin_api"),
//!     }
//! }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::fallback::{FallbackContext, FallbackRegistry, FallbackResponse, FallbackStrategy};
use super::registry::CircuitRegistry;
use super::state::{CircuitState, CircuitStateEntry, Transition};
use crate::clock::{Clock, SystemClock, Timestamp};
use crate::error::CircuitBreakerError;
use crate::observability::{self, MetricsSink, TransitionLogger};

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit. Must be at least 1.
    pub failure_threshold: u32,
    /// Time an open circuit waits before admitting probes.
    pub timeout: Duration,
    /// Probes admitted per half-open window (`None` = unlimited).
    pub half_open_max_probes: Option<u32>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
            half_open_max_probes: None,
        }
    }
}

impl CircuitBreakerConfig {
    /// Configuration with unlimited half-open probes.
    #[must_use]
    pub const fn new(failure_threshold: u32, timeout: Duration) -> Self {
        Self {
            failure_threshold,
            timeout,
            half_open_max_probes: None,
        }
    }

    /// Limit the number of probes admitted per half-open window.
    #[must_use]
    pub const fn with_half_open_max_probes(mut self, probes: u32) -> Self {
        self.half_open_max_probes = Some(probes);
        self
    }

    /// Reject configurations the state machine cannot honour.
    pub fn validate(&self) -> Result<(), CircuitBreakerError> {
        if self.failure_threshold == 0 {
            return Err(CircuitBreakerError::InvalidConfig(
                "failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(CircuitBreakerError::InvalidConfig(
                "timeout must be greater than zero".to_string(),
            ));
        }
        if self.half_open_max_probes == Some(0) {
            return Err(CircuitBreakerError::InvalidConfig(
                "half_open_max_probes must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// A state change observed on one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionEvent {
    /// Service whose circuit changed.
    pub service: String,
    /// Previous state.
    pub from: CircuitState,
    /// New state.
    pub to: CircuitState,
    /// Consecutive failures after the change.
    pub failure_count: u32,
    /// When the change happened.
    pub occurred_at: DateTime<Utc>,
    /// Per-service version of the entry after this transition.
    pub sequence: u64,
}

impl TransitionEvent {
    /// The bare transition.
    #[must_use]
    pub const fn transition(&self) -> Transition {
        Transition {
            from: self.from,
            to: self.to,
        }
    }
}

/// Receives every state transition, once, after the entry lock is released.
///
/// Racing callers on one service may deliver events out of order. Within a
/// service, `sequence` is strictly increasing in transition order; observers
/// that need ordering sort or filter on it.
pub trait TransitionObserver: Send + Sync {
    /// Called once per transition.
    fn on_transition(&self, event: &TransitionEvent);
}

/// Point-in-time view of one service's circuit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// Service id.
    pub service: String,
    /// Current state.
    pub state: CircuitState,
    /// Consecutive failures.
    pub failure_count: u32,
    /// When the circuit opened, while `OPEN` or `HALF_OPEN`.
    pub opened_at: Option<DateTime<Utc>>,
    /// Time left before half-open eligibility, while `OPEN`.
    pub timeout_remaining: Option<Duration>,
    /// When the current state was entered.
    pub last_transition: DateTime<Utc>,
    /// Per-service entry version the snapshot was read at. A snapshot with a
    /// lower value than one already seen for the service is stale.
    pub sequence: u64,
}

/// Per-service circuit breaker with fallback strategies.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    registry: CircuitRegistry,
    fallbacks: FallbackRegistry,
    observers: Vec<Arc<dyn TransitionObserver>>,
    metrics_sink: Option<Arc<dyn MetricsSink>>,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    /// Create a breaker on the system clock, logging transitions via `tracing`.
    pub fn new(config: CircuitBreakerConfig) -> Result<Self, CircuitBreakerError> {
        Self::builder(config).build()
    }

    /// Start building a breaker with injected collaborators.
    #[must_use]
    pub fn builder(config: CircuitBreakerConfig) -> CircuitBreakerBuilder {
        CircuitBreakerBuilder::new(config)
    }

    /// Configured failure threshold.
    #[must_use]
    pub const fn failure_threshold(&self) -> u32 {
        self.config.failure_threshold
    }

    /// Configured open-state timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.config.timeout
    }

    /// Full configuration.
    #[must_use]
    pub const fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    // =========================================================================
    // State machine
    // =========================================================================

    /// Whether calls to `service` must fail fast.
    ///
    /// An `OPEN` circuit whose timeout has elapsed moves to `HALF_OPEN` here
    /// and the call returns `false`. Unknown services are `CLOSED`.
    pub fn is_open(&self, service: &str) -> bool {
        let Some(entry) = self.registry.get(service) else {
            return false;
        };
        let now = self.clock.now();

        let (open, event) = {
            let mut entry = entry.lock();
            let admission =
                entry.check(self.config.timeout, self.config.half_open_max_probes, now);
            let event = admission
                .transition
                .map(|transition| event_for(service, transition, &entry, now, 0));
            (admission.open, event)
        };

        if let Some(event) = event {
            self.notify(service, &[event]);
        }
        if open {
            observability::record_circuit_breaker_rejected(service);
        }
        open
    }

    /// Like [`Self::is_open`], as a `Result` for callers that fail fast.
    pub fn guard(&self, service: &str) -> Result<(), CircuitBreakerError> {
        if self.is_open(service) {
            return Err(CircuitBreakerError::CircuitOpen {
                service: service.to_string(),
            });
        }
        Ok(())
    }

    /// Record a successful call. Always leaves the circuit `CLOSED`.
    pub fn record_success(&self, service: &str) {
        let now = self.clock.now();
        let entry = self.registry.get_or_create(service, now);

        let events: Vec<TransitionEvent> = {
            let mut entry = entry.lock();
            let transitions = entry.record_success(now);
            let last = transitions.len().saturating_sub(1);
            transitions
                .into_iter()
                .enumerate()
                .map(|(i, transition)| event_for(service, transition, &entry, now, last - i))
                .collect()
        };

        observability::record_circuit_breaker_success(service);
        self.notify(service, &events);
    }

    /// Record a failed call.
    pub fn record_failure(&self, service: &str) {
        let now = self.clock.now();
        let entry = self.registry.get_or_create(service, now);

        let event = {
            let mut entry = entry.lock();
            entry
                .record_failure(self.config.failure_threshold, now)
                .map(|transition| event_for(service, transition, &entry, now, 0))
        };

        observability::record_circuit_breaker_failure(service);
        if let Some(event) = event {
            self.notify(service, &[event]);
        }
    }

    /// Current state, without any time-based transition.
    #[must_use]
    pub fn get_state(&self, service: &str) -> CircuitState {
        self.registry
            .get(service)
            .map_or(CircuitState::Closed, |entry| entry.lock().state())
    }

    /// Consecutive failures recorded for `service`.
    #[must_use]
    pub fn failure_count(&self, service: &str) -> u32 {
        self.registry
            .get(service)
            .map_or(0, |entry| entry.lock().failure_count())
    }

    /// Time left before an open circuit admits probes; `None` unless `OPEN`.
    #[must_use]
    pub fn time_until_half_open(&self, service: &str) -> Option<Duration> {
        let entry = self.registry.get(service)?;
        let now = self.clock.now();
        entry.lock().time_until_half_open(self.config.timeout, now)
    }

    /// Services with circuit state, sorted.
    #[must_use]
    pub fn services(&self) -> Vec<String> {
        self.registry.services()
    }

    // =========================================================================
    // Fallbacks
    // =========================================================================

    /// Register the fallback strategy for `service`, replacing any previous one.
    pub fn register_fallback(&self, service: impl Into<String>, strategy: Arc<dyn FallbackStrategy>) {
        let service = service.into();
        let name = strategy.name().to_string();
        let replaced = self.fallbacks.register(service.clone(), strategy);

        tracing::info!(
            service = %service,
            strategy = %name,
            replaced = replaced.is_some(),
            "Fallback strategy registered"
        );
    }

    /// Whether a fallback strategy is registered for `service`.
    #[must_use]
    pub fn has_fallback(&self, service: &str) -> bool {
        self.fallbacks.contains(service)
    }

    /// Run the fallback strategy registered for `service`.
    ///
    /// Does not consult circuit state; callers check [`Self::is_open`] first.
    pub async fn execute_with_fallback(
        &self,
        service: &str,
        request: impl Into<String>,
    ) -> Result<FallbackResponse, CircuitBreakerError> {
        let Some(strategy) = self.fallbacks.get(service) else {
            tracing::warn!(service = %service, "No fallback registered");
            observability::record_fallback_execution(service, "missing");
            return Err(CircuitBreakerError::NoFallbackRegistered {
                service: service.to_string(),
            });
        };

        let context = FallbackContext::new(service, request, self.failure_count(service));
        let started = Instant::now();
        let result = strategy.execute(context).await;
        observability::record_fallback_duration(service, started.elapsed().as_secs_f64());

        match result {
            Ok(response) => {
                tracing::debug!(
                    service = %service,
                    strategy = strategy.name(),
                    source = %response.source,
                    "Fallback served response"
                );
                observability::record_fallback_execution(service, response.source.as_label());
                Ok(response)
            }
            Err(source) => {
                tracing::warn!(
                    service = %service,
                    strategy = strategy.name(),
                    error = %source,
                    "Fallback failed"
                );
                observability::record_fallback_execution(service, "failed");
                Err(CircuitBreakerError::FallbackFailed {
                    service: service.to_string(),
                    source,
                })
            }
        }
    }

    // =========================================================================
    // Metrics
    // =========================================================================

    /// Snapshot of `service`'s circuit; `None` if it has no state yet.
    #[must_use]
    pub fn metrics(&self, service: &str) -> Option<CircuitBreakerMetrics> {
        let entry = self.registry.get(service)?;
        let now = self.clock.now();
        let snapshot = snapshot_of(service, &entry.lock(), self.config.timeout, now);
        Some(snapshot)
    }

    /// Snapshots of every tracked service, sorted by service id.
    #[must_use]
    pub fn all_metrics(&self) -> Vec<CircuitBreakerMetrics> {
        self.registry
            .services()
            .iter()
            .filter_map(|service| self.metrics(service))
            .collect()
    }

    /// Snapshot `service` and hand it to the metrics sink.
    pub fn publish_metrics(&self, service: &str) -> Option<CircuitBreakerMetrics> {
        let snapshot = self.metrics(service)?;
        if let Some(sink) = &self.metrics_sink {
            sink.publish(&snapshot);
        }
        Some(snapshot)
    }

    /// Snapshot and publish every tracked service.
    pub fn publish_all_metrics(&self) -> Vec<CircuitBreakerMetrics> {
        let snapshots = self.all_metrics();
        if let Some(sink) = &self.metrics_sink {
            for snapshot in &snapshots {
                sink.publish(snapshot);
            }
        }
        snapshots
    }

    /// Deliver events to observers, then push a fresh snapshot.
    ///
    /// Must be called with no entry lock held. Concurrent calls for one
    /// service can interleave; events and snapshots carry `sequence` so
    /// receivers can order them and drop stale ones.
    fn notify(&self, service: &str, events: &[TransitionEvent]) {
        if events.is_empty() {
            return;
        }
        for event in events {
            observability::record_circuit_breaker_transition(service, event.from, event.to);
            for observer in &self.observers {
                observer.on_transition(event);
            }
        }
        self.publish_metrics(service);
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("services", &self.registry.len())
            .field("fallbacks", &self.fallbacks)
            .field("observers", &self.observers.len())
            .field("metrics_sink", &self.metrics_sink.is_some())
            .field("clock", &self.clock)
            .finish()
    }
}

/// Build the event for a transition made by the call that just released
/// `entry`. Transitions are the last mutations of such a call, so the one
/// `behind` positions from the end took version `entry.version() - behind`.
fn event_for(
    service: &str,
    transition: Transition,
    entry: &CircuitStateEntry,
    now: Timestamp,
    behind: usize,
) -> TransitionEvent {
    TransitionEvent {
        service: service.to_string(),
        from: transition.from,
        to: transition.to,
        failure_count: entry.failure_count(),
        occurred_at: now.wall(),
        sequence: entry.version().saturating_sub(behind as u64),
    }
}

fn snapshot_of(
    service: &str,
    entry: &CircuitStateEntry,
    timeout: Duration,
    now: Timestamp,
) -> CircuitBreakerMetrics {
    CircuitBreakerMetrics {
        service: service.to_string(),
        state: entry.state(),
        failure_count: entry.failure_count(),
        opened_at: entry.opened_at().map(|at| at.wall()),
        timeout_remaining: entry.time_until_half_open(timeout, now),
        last_transition: entry.state_changed_at().wall(),
        sequence: entry.version(),
    }
}

/// Builder for [`CircuitBreaker`].
pub struct CircuitBreakerBuilder {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    observers: Vec<Arc<dyn TransitionObserver>>,
    metrics_sink: Option<Arc<dyn MetricsSink>>,
    default_logger: bool,
}

impl CircuitBreakerBuilder {
    fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            observers: Vec::new(),
            metrics_sink: None,
            default_logger: true,
        }
    }

    /// Use `clock` instead of the system clock.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Add a transition observer. Observers run in registration order.
    #[must_use]
    pub fn observer(mut self, observer: Arc<dyn TransitionObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Publish snapshots to `sink` after each transition and on request.
    #[must_use]
    pub fn metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics_sink = Some(sink);
        self
    }

    /// Do not install the `tracing` transition logger.
    #[must_use]
    pub const fn without_default_logger(mut self) -> Self {
        self.default_logger = false;
        self
    }

    /// Validate the configuration and build the breaker.
    pub fn build(self) -> Result<CircuitBreaker, CircuitBreakerError> {
        self.config.validate()?;

        let mut observers: Vec<Arc<dyn TransitionObserver>> = Vec::new();
        if self.default_logger {
            observers.push(Arc::new(TransitionLogger));
        }
        observers.extend(self.observers);

        tracing::debug!(
            failure_threshold = self.config.failure_threshold,
            timeout_secs = self.config.timeout.as_secs_f64(),
            half_open_max_probes = ?self.config.half_open_max_probes,
            "Circuit breaker created"
        );

        Ok(CircuitBreaker {
            config: self.config,
            registry: CircuitRegistry::new(),
            fallbacks: FallbackRegistry::new(),
            observers,
            metrics_sink: self.metrics_sink,
            clock: self.clock,
        })
    }
}
