//! Fallback strategies used while a service's circuit is open.
//!
//! A strategy gets the service id, the original request payload and the
//! failure count at invocation time, and either produces a substitute
//! response or fails explicitly. At most one strategy is registered per
//! service; registering again replaces the previous one.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Input handed to a fallback strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackContext {
    service: String,
    request: String,
    failure_count: u32,
}

impl FallbackContext {
    /// Create a context.
    #[must_use]
    pub fn new(service: impl Into<String>, request: impl Into<String>, failure_count: u32) -> Self {
        Self {
            service: service.into(),
            request: request.into(),
            failure_count,
        }
    }

    /// Service the request was meant for.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Original request payload.
    #[must_use]
    pub fn request(&self) -> &str {
        &self.request
    }

    /// Consecutive failures recorded for the service when the fallback ran.
    #[must_use]
    pub const fn failure_count(&self) -> u32 {
        self.failure_count
    }
}

/// Where a fallback response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackSource {
    /// Previously cached response.
    Cache,
    /// A different provider served the request.
    AlternativeProvider,
    /// Static default.
    DefaultValue,
}

impl FallbackSource {
    /// Label used in metrics and logs.
    #[must_use]
    pub const fn as_label(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::AlternativeProvider => "alternative_provider",
            Self::DefaultValue => "default_value",
        }
    }
}

impl fmt::Display for FallbackSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Substitute response produced by a strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackResponse {
    /// Response payload.
    pub data: String,
    /// Provenance of the payload.
    pub source: FallbackSource,
}

impl FallbackResponse {
    /// Create a response.
    #[must_use]
    pub fn new(data: impl Into<String>, source: FallbackSource) -> Self {
        Self {
            data: data.into(),
            source,
        }
    }
}

/// Underlying error carried by [`FallbackError::Strategy`].
pub type StrategySource = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Failure reported by a strategy.
///
/// Equality compares variants and messages; the source of a `Strategy`
/// error is compared by its rendered message.
#[derive(Debug, Clone)]
pub enum FallbackError {
    /// Nothing cached for the request.
    CacheMiss {
        /// Cache key that was looked up.
        key: String,
    },

    /// The fallback source itself could not serve the request.
    Unavailable {
        /// What went wrong.
        message: String,
    },

    /// A custom strategy failed with its own error.
    Strategy {
        /// What the strategy was doing.
        message: String,
        /// The strategy's underlying error.
        source: StrategySource,
    },
}

impl fmt::Display for FallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CacheMiss { key } => write!(f, "no cache entry for key {key}"),
            Self::Unavailable { message } => write!(f, "fallback source unavailable: {message}"),
            Self::Strategy { message, .. } => f.write_str(message),
        }
    }
}

// Hand-written so `source()` yields the strategy's error itself, not the
// `Arc` around it, and callers can downcast it.
impl std::error::Error for FallbackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Strategy { source, .. } => Some(source.as_ref()),
            Self::CacheMiss { .. } | Self::Unavailable { .. } => None,
        }
    }
}

impl FallbackError {
    /// Wrap a strategy's own error, keeping it as the source.
    pub fn strategy<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Strategy {
            message: message.into(),
            source: Arc::new(source),
        }
    }
}

impl PartialEq for FallbackError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::CacheMiss { key: a }, Self::CacheMiss { key: b }) => a == b,
            (Self::Unavailable { message: a }, Self::Unavailable { message: b }) => a == b,
            (
                Self::Strategy {
                    message: a,
                    source: source_a,
                },
                Self::Strategy {
                    message: b,
                    source: source_b,
                },
            ) => a == b && source_a.to_string() == source_b.to_string(),
            _ => false,
        }
    }
}

impl Eq for FallbackError {}

/// A way to produce a substitute response for a failing service.
///
/// Implementations must tolerate concurrent calls, including for the same
/// service.
#[async_trait]
pub trait FallbackStrategy: Send + Sync {
    /// Produce a substitute response.
    async fn execute(&self, context: FallbackContext) -> Result<FallbackResponse, FallbackError>;

    /// Short name for logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Service → strategy table.
#[derive(Default)]
pub struct FallbackRegistry {
    strategies: DashMap<String, Arc<dyn FallbackStrategy>>,
}

impl FallbackRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `strategy` for `service`, returning the one it replaced.
    pub fn register(
        &self,
        service: impl Into<String>,
        strategy: Arc<dyn FallbackStrategy>,
    ) -> Option<Arc<dyn FallbackStrategy>> {
        self.strategies.insert(service.into(), strategy)
    }

    /// Strategy registered for `service`.
    ///
    /// The returned handle is detached from the map, so it can be held across
    /// `.await` without pinning a shard lock.
    #[must_use]
    pub fn get(&self, service: &str) -> Option<Arc<dyn FallbackStrategy>> {
        self.strategies
            .get(service)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Whether a strategy is registered for `service`.
    #[must_use]
    pub fn contains(&self, service: &str) -> bool {
        self.strategies.contains_key(service)
    }

    /// Number of registered strategies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// Whether no strategy is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

impl fmt::Debug for FallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut services: Vec<String> = self.strategies.iter().map(|e| e.key().clone()).collect();
        services.sort_unstable();
        f.debug_struct("FallbackRegistry")
            .field("services", &services)
            .finish()
    }
}
