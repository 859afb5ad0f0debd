//! End-to-end behaviour of the circuit breaker facade.
//!
//! Time is driven by a manual clock; nothing here sleeps.

#![allow(clippy::unwrap_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use circuit_guard::config::load_config_from_string;
use circuit_guard::{
    CacheFallback, CircuitBreakerConfig, CircuitBreakerError, CircuitState, DefaultValueFallback,
    FallbackChain, FallbackError, FallbackSource,
};

use common::{fixture, standard, trip};

const SERVICE: &str = "svc";
const TIMEOUT: Duration = Duration::from_secs(60);

#[test]
fn three_failures_open_the_circuit() {
    let f = standard();

    trip(&f.breaker, SERVICE, 3);

    assert_eq!(f.breaker.get_state(SERVICE), CircuitState::Open);
    assert!(f.breaker.is_open(SERVICE));
}

#[test]
fn timeout_moves_open_circuit_to_half_open_on_check() {
    let f = standard();
    trip(&f.breaker, SERVICE, 3);

    f.clock.advance(Duration::from_secs(61));

    assert!(!f.breaker.is_open(SERVICE));
    assert_eq!(f.breaker.get_state(SERVICE), CircuitState::HalfOpen);
}

#[test]
fn probe_success_closes_the_circuit() {
    let f = standard();
    trip(&f.breaker, SERVICE, 3);
    f.clock.advance(Duration::from_secs(61));
    assert!(!f.breaker.is_open(SERVICE));

    f.breaker.record_success(SERVICE);

    assert_eq!(f.breaker.get_state(SERVICE), CircuitState::Closed);
    assert_eq!(f.breaker.failure_count(SERVICE), 0);
}

#[test]
fn probe_failure_reopens_with_full_timeout() {
    let f = standard();
    trip(&f.breaker, SERVICE, 3);
    f.clock.advance(Duration::from_secs(61));
    assert!(!f.breaker.is_open(SERVICE));

    f.breaker.record_failure(SERVICE);

    assert_eq!(f.breaker.get_state(SERVICE), CircuitState::Open);
    assert_eq!(f.breaker.time_until_half_open(SERVICE), Some(TIMEOUT));

    f.clock.advance(Duration::from_secs(1));
    assert_eq!(
        f.breaker.time_until_half_open(SERVICE),
        Some(Duration::from_secs(59))
    );
}

#[test]
fn failures_while_open_do_not_extend_the_window() {
    let f = standard();
    trip(&f.breaker, SERVICE, 3);

    f.clock.advance(Duration::from_secs(30));
    trip(&f.breaker, SERVICE, 5);

    assert_eq!(
        f.breaker.time_until_half_open(SERVICE),
        Some(Duration::from_secs(30))
    );
    assert_eq!(f.breaker.failure_count(SERVICE), 8);
    assert_eq!(f.observer.count(CircuitState::Closed, CircuitState::Open), 1);
}

#[test]
fn success_while_open_closes_through_half_open() {
    let f = standard();
    trip(&f.breaker, SERVICE, 3);

    f.breaker.record_success(SERVICE);

    assert_eq!(f.breaker.get_state(SERVICE), CircuitState::Closed);
    assert_eq!(
        f.observer.transitions(),
        vec![
            (CircuitState::Closed, CircuitState::Open),
            (CircuitState::Open, CircuitState::HalfOpen),
            (CircuitState::HalfOpen, CircuitState::Closed),
        ]
    );
}

#[test]
fn transition_events_carry_service_and_failure_count() {
    let f = standard();
    trip(&f.breaker, "linkedin_api", 3);

    let events = f.observer.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].service, "linkedin_api");
    assert_eq!(events[0].failure_count, 3);
    assert_eq!(events[0].to, CircuitState::Open);
}

#[test]
fn limited_probes_reject_extra_callers() {
    let f = fixture(CircuitBreakerConfig::new(1, TIMEOUT).with_half_open_max_probes(1));
    f.breaker.record_failure(SERVICE);
    f.clock.advance(TIMEOUT);

    assert!(!f.breaker.is_open(SERVICE));
    assert!(f.breaker.is_open(SERVICE));
    assert_eq!(f.breaker.get_state(SERVICE), CircuitState::HalfOpen);

    f.breaker.record_success(SERVICE);
    assert!(!f.breaker.is_open(SERVICE));
}

#[test]
fn silent_probe_does_not_wedge_the_circuit() {
    let f = fixture(CircuitBreakerConfig::new(1, TIMEOUT).with_half_open_max_probes(1));
    f.breaker.record_failure(SERVICE);
    f.clock.advance(TIMEOUT);
    assert!(!f.breaker.is_open(SERVICE));
    assert!(f.breaker.is_open(SERVICE));

    f.clock.advance(TIMEOUT);

    assert!(!f.breaker.is_open(SERVICE));
}

#[test]
fn snapshot_reports_open_circuit() {
    let f = standard();
    trip(&f.breaker, SERVICE, 3);
    f.clock.advance(Duration::from_secs(15));

    let snapshot = f.breaker.publish_metrics(SERVICE).unwrap();

    assert_eq!(snapshot.state, CircuitState::Open);
    assert_eq!(snapshot.failure_count, 3);
    assert_eq!(snapshot.timeout_remaining, Some(Duration::from_secs(45)));
    assert!(snapshot.opened_at.is_some());

    let published = f.sink.published();
    assert_eq!(published.len(), 2);
    assert_eq!(published.last(), Some(&snapshot));
}

#[test]
fn closed_snapshot_has_no_open_fields() {
    let f = standard();
    f.breaker.record_failure(SERVICE);

    let snapshot = f.breaker.metrics(SERVICE).unwrap();

    assert_eq!(snapshot.state, CircuitState::Closed);
    assert_eq!(snapshot.opened_at, None);
    assert_eq!(snapshot.timeout_remaining, None);
}

#[test]
fn snapshot_serializes_state_in_screaming_case() {
    let f = standard();
    trip(&f.breaker, SERVICE, 3);

    let json = serde_json::to_value(f.breaker.metrics(SERVICE).unwrap()).unwrap();

    assert_eq!(json["state"], "OPEN");
    assert_eq!(json["service"], SERVICE);
}

#[tokio::test]
async fn cache_fallback_serves_while_open() {
    let f = standard();
    let cache = Arc::new(CacheFallback::new());
    cache.store("failcorp.com", "https://linkedin.com/company/failcorp");
    f.breaker.register_fallback("linkedin_api", cache);

    trip(&f.breaker, "linkedin_api", 3);
    assert!(f.breaker.is_open("linkedin_api"));

    let response = f
        .breaker
        .execute_with_fallback("linkedin_api", "failcorp.com")
        .await
        .unwrap();

    assert_eq!(response.data, "https://linkedin.com/company/failcorp");
    assert_eq!(response.source, FallbackSource::Cache);
}

#[tokio::test]
async fn cache_miss_surfaces_as_fallback_failed() {
    let f = standard();
    f.breaker
        .register_fallback("linkedin_api", Arc::new(CacheFallback::new()));
    trip(&f.breaker, "linkedin_api", 3);

    let err = f
        .breaker
        .execute_with_fallback("linkedin_api", "unknown.com")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CircuitBreakerError::FallbackFailed { ref service, source: FallbackError::CacheMiss { ref key } }
            if service == "linkedin_api" && key == "unknown.com"
    ));
}

#[tokio::test]
async fn unregistered_service_has_no_fallback() {
    let f = standard();
    trip(&f.breaker, "openai_api", 3);

    let err = f
        .breaker
        .execute_with_fallback("openai_api", "prompt")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CircuitBreakerError::NoFallbackRegistered { ref service } if service == "openai_api"
    ));
}

#[tokio::test]
async fn chained_fallback_reaches_default_value() {
    let f = standard();
    let chain = FallbackChain::new()
        .then(Arc::new(CacheFallback::new()))
        .then(Arc::new(DefaultValueFallback::new("{}")));
    f.breaker.register_fallback(SERVICE, Arc::new(chain));

    let response = f.breaker.execute_with_fallback(SERVICE, "req").await.unwrap();

    assert_eq!(response.source, FallbackSource::DefaultValue);
    assert!(f.breaker.has_fallback(SERVICE));
}

#[test]
fn configured_breaker_honours_settings() {
    let config = load_config_from_string(
        r"
circuit_breaker:
  failure_threshold: 2
  timeout_secs: 10
",
    )
    .unwrap();
    let f = fixture(config.circuit_breaker.to_resilience_config());

    trip(&f.breaker, SERVICE, 2);

    assert_eq!(f.breaker.failure_threshold(), 2);
    assert_eq!(f.breaker.timeout(), Duration::from_secs(10));
    assert!(f.breaker.is_open(SERVICE));
}
