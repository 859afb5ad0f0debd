//! Circuit Guard Demo Binary
//!
//! Drives a simulated flaky upstream through the circuit breaker caller
//! protocol, serving cached responses while the circuit is open.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin circuit-guard
//! ```
//!
//! # Environment Variables
//!
//! - `CIRCUIT_GUARD_CONFIG`: Config file path (default: config.yaml, defaults used if absent)
//! - `SIMULATED_OUTAGE_CALLS`: Consecutive upstream failures to inject (default: 5)
//! - `SIMULATED_TOTAL_CALLS`: Calls to make before exiting (default: 40)
//! - `CALL_INTERVAL_MS`: Delay between calls (default: 250)
//! - `RUST_LOG`: Log filter (overrides `observability.logging.level`)

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::{Context, bail};
use circuit_guard::config::{self, Config, ConfigError, DEFAULT_CONFIG_PATH};
use circuit_guard::observability::{self, PrometheusMetricsSink};
use circuit_guard::{CacheFallback, CircuitBreaker, CircuitBreakerError};
use tokio::signal;

/// Service id the simulation protects.
const SERVICE: &str = "linkedin_api";

/// Healthy calls made before the outage starts, so the cache has entries.
const WARMUP_CALLS: u32 = 3;

/// Request payloads the simulation cycles through.
const REQUESTS: [&str; 3] = ["failcorp.com", "acme.io", "initech.com"];

/// Simulation parameters from environment variables.
#[derive(Debug, Clone, Copy)]
struct SimulationConfig {
    outage_calls: u32,
    total_calls: u32,
    call_interval: Duration,
}

impl SimulationConfig {
    fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            outage_calls: env_or("SIMULATED_OUTAGE_CALLS", 5)?,
            total_calls: env_or("SIMULATED_TOTAL_CALLS", 40)?,
            call_interval: Duration::from_millis(env_or("CALL_INTERVAL_MS", 250)?),
        })
    }
}

/// Upstream that fails for a fixed run of calls after a warm-up.
#[derive(Debug)]
struct FlakyUpstream {
    calls: AtomicU32,
    outage_calls: u32,
}

impl FlakyUpstream {
    const fn new(outage_calls: u32) -> Self {
        Self {
            calls: AtomicU32::new(0),
            outage_calls,
        }
    }

    async fn lookup(&self, domain: &str) -> anyhow::Result<String> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed);
        tokio::task::yield_now().await;

        if (WARMUP_CALLS..WARMUP_CALLS + self.outage_calls).contains(&call) {
            bail!("upstream returned 503 for {domain}");
        }
        Ok(format!("https://linkedin.com/company/{}", company_slug(domain)))
    }
}

fn company_slug(domain: &str) -> &str {
    domain.split('.').next().unwrap_or(domain)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = load_configuration()?;
    observability::init_tracing(&config.observability.logging)?;

    tracing::info!(
        failure_threshold = config.circuit_breaker.failure_threshold,
        timeout_secs = config.circuit_breaker.timeout_secs,
        "Starting circuit-guard demo"
    );

    let mut builder = CircuitBreaker::builder(config.circuit_breaker.to_resilience_config());
    if config.observability.metrics.enabled {
        observability::init_metrics(config.observability.metrics.listen_addr)?;
        builder = builder.metrics_sink(Arc::new(PrometheusMetricsSink::new()));
    }
    let breaker = Arc::new(builder.build()?);

    let cache = Arc::new(CacheFallback::new());
    breaker.register_fallback(SERVICE, cache.clone());

    let simulation = SimulationConfig::from_env()?;
    let upstream = FlakyUpstream::new(simulation.outage_calls);

    tokio::select! {
        () = run_simulation(&breaker, &cache, &upstream, simulation) => {
            tracing::info!(calls = simulation.total_calls, "Simulation complete");
        }
        result = signal::ctrl_c() => {
            result.context("failed to listen for Ctrl-C")?;
            tracing::info!("Shutdown signal received");
        }
    }

    let snapshots = breaker.publish_all_metrics();
    println!("{}", serde_json::to_string_pretty(&snapshots)?);

    Ok(())
}

/// Make `total_calls` calls through the caller protocol.
async fn run_simulation(
    breaker: &CircuitBreaker,
    cache: &CacheFallback,
    upstream: &FlakyUpstream,
    simulation: SimulationConfig,
) {
    let mut interval = tokio::time::interval(simulation.call_interval);

    for call in 0..simulation.total_calls {
        interval.tick().await;
        let domain = REQUESTS[call as usize % REQUESTS.len()];

        if breaker.is_open(SERVICE) {
            match breaker.execute_with_fallback(SERVICE, domain).await {
                Ok(response) => tracing::info!(
                    call,
                    domain,
                    source = %response.source,
                    data = %response.data,
                    "Served fallback"
                ),
                Err(CircuitBreakerError::FallbackFailed { source, .. }) => {
                    tracing::warn!(call, domain, error = %source, "Fallback could not serve request");
                }
                Err(e) => tracing::error!(call, domain, error = %e, "Fallback unavailable"),
            }
            continue;
        }

        match upstream.lookup(domain).await {
            Ok(data) => {
                cache.store(domain, data.clone());
                breaker.record_success(SERVICE);
                tracing::info!(call, domain, data = %data, "Upstream call succeeded");
            }
            Err(e) => {
                breaker.record_failure(SERVICE);
                tracing::warn!(
                    call,
                    domain,
                    error = %e,
                    failure_count = breaker.failure_count(SERVICE),
                    "Upstream call failed"
                );
            }
        }
    }
}

/// Load the config file, falling back to defaults when the default path is absent.
fn load_configuration() -> anyhow::Result<Config> {
    let explicit = std::env::var("CIRCUIT_GUARD_CONFIG").ok();
    let path = explicit.as_deref().unwrap_or(DEFAULT_CONFIG_PATH);

    match config::load_config(Some(path)) {
        Ok(config) => Ok(config),
        Err(ConfigError::ReadError { source, .. })
            if explicit.is_none() && source.kind() == std::io::ErrorKind::NotFound =>
        {
            Ok(Config::default())
        }
        Err(e) => Err(e).with_context(|| format!("failed to load configuration from {path}")),
    }
}

fn env_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => value
            .parse()
            .with_context(|| format!("invalid value for {name}: {value}")),
        _ => Ok(default),
    }
}
