//! Circuit breaker configuration section.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Circuit breaker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    /// Consecutive failures that open the circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Duration in open state (seconds).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Probes admitted per half-open window. Unlimited when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub half_open_max_probes: Option<u32>,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            timeout_secs: default_timeout_secs(),
            half_open_max_probes: None,
        }
    }
}

impl CircuitBreakerSettings {
    /// Convert config settings to the resilience module's `CircuitBreakerConfig`.
    #[must_use]
    pub const fn to_resilience_config(&self) -> crate::resilience::CircuitBreakerConfig {
        crate::resilience::CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            timeout: Duration::from_secs(self.timeout_secs),
            half_open_max_probes: self.half_open_max_probes,
        }
    }
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_timeout_secs() -> u64 {
    60
}
