//! Configuration loading for circuit-guard.
//!
//! YAML files with `${VAR}` and `${VAR:-default}` environment interpolation,
//! validated before use.
//!
//! # Usage
//!
//! ```rust,ignore
//! use circuit_guard::config::load_config;
//! use circuit_guard::resilience::CircuitBreaker;
//!
//! let config = load_config(Some("config.yaml"))?;
//! let breaker = CircuitBreaker::new(config.circuit_breaker.to_resilience_config())?;
//! ```

mod circuit_breaker;
mod observability;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use circuit_breaker::CircuitBreakerSettings;
pub use observability::{LoggingConfig, MetricsSettings, ObservabilityConfig};

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("Failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Circuit breaker settings.
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
    /// Logging and metrics.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ============================================
// Configuration Loading
// ============================================

/// Load configuration from a YAML file with environment variable interpolation.
///
/// `path` defaults to [`DEFAULT_CONFIG_PATH`].
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or(DEFAULT_CONFIG_PATH);

    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_string(),
        source: e,
    })?;

    load_config_from_string(&contents)
}

/// Load configuration from a YAML string.
pub fn load_config_from_string(yaml: &str) -> Result<Config, ConfigError> {
    let interpolated = interpolate_env_vars(yaml);

    let config: Config = if interpolated.trim().is_empty() {
        Config::default()
    } else {
        serde_yaml_bw::from_str(&interpolated)?
    };

    validate_config(&config)?;
    Ok(config)
}

/// Interpolate environment variables in a string.
///
/// Supports both `${VAR}` and `${VAR:-default}` syntax. A missing or empty
/// variable without a default becomes the empty string.
#[allow(clippy::expect_used)] // Regex is compile-time constant
fn interpolate_env_vars(input: &str) -> String {
    use std::sync::OnceLock;

    static ENV_VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();

    let re = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var regex is valid")
    });

    re.replace_all(input, |caps: &regex::Captures<'_>| {
        let default_value = caps.get(2).map_or("", |m| m.as_str());
        match caps.get(1).map(|m| std::env::var(m.as_str())) {
            Some(Ok(value)) if !value.is_empty() => value,
            _ => default_value.to_string(),
        }
    })
    .into_owned()
}

/// Validate configuration values.
fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let cb = &config.circuit_breaker;

    if cb.failure_threshold == 0 {
        return Err(ConfigError::ValidationError(
            "circuit_breaker.failure_threshold must be at least 1".to_string(),
        ));
    }

    if cb.timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "circuit_breaker.timeout_secs must be at least 1".to_string(),
        ));
    }

    if cb.half_open_max_probes == Some(0) {
        return Err(ConfigError::ValidationError(
            "circuit_breaker.half_open_max_probes must be at least 1 when set".to_string(),
        ));
    }

    let level = config.observability.logging.level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        return Err(ConfigError::ValidationError(format!(
            "observability.logging.level must be one of: {LOG_LEVELS:?}"
        )));
    }

    Ok(())
}
