//! Ready-made fallback strategies.
//!
//! - [`CacheFallback`]: serves the last known good response for a request
//! - [`DefaultValueFallback`]: serves a fixed payload
//! - [`FallbackChain`]: tries strategies in order, first success wins

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::fallback::{
    FallbackContext, FallbackError, FallbackResponse, FallbackSource, FallbackStrategy,
};

/// In-memory cache keyed by request payload.
///
/// Callers populate it with [`CacheFallback::store`] after successful calls to
/// the real service.
#[derive(Debug, Default)]
pub struct CacheFallback {
    entries: RwLock<HashMap<String, String>>,
}

impl CacheFallback {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache `response` for `request`, replacing any previous value.
    pub fn store(&self, request: impl Into<String>, response: impl Into<String>) {
        self.entries.write().insert(request.into(), response.into());
    }

    /// Drop the cached value for `request`.
    pub fn evict(&self, request: &str) -> Option<String> {
        self.entries.write().remove(request)
    }

    /// Number of cached requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl FallbackStrategy for CacheFallback {
    async fn execute(&self, context: FallbackContext) -> Result<FallbackResponse, FallbackError> {
        let cached = self.entries.read().get(context.request()).cloned();
        cached
            .map(|data| FallbackResponse::new(data, FallbackSource::Cache))
            .ok_or_else(|| FallbackError::CacheMiss {
                key: context.request().to_string(),
            })
    }

    fn name(&self) -> &str {
        "cache"
    }
}

/// Always answers with the same payload.
#[derive(Debug, Clone)]
pub struct DefaultValueFallback {
    value: String,
}

impl DefaultValueFallback {
    /// Create a strategy that serves `value`.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

#[async_trait]
impl FallbackStrategy for DefaultValueFallback {
    async fn execute(&self, _context: FallbackContext) -> Result<FallbackResponse, FallbackError> {
        Ok(FallbackResponse::new(
            self.value.clone(),
            FallbackSource::DefaultValue,
        ))
    }

    fn name(&self) -> &str {
        "default_value"
    }
}

/// Runs strategies in order until one succeeds.
///
/// Registered as a single strategy, so per-service replacement semantics are
/// unchanged. When every link fails, the last error is returned.
#[derive(Default)]
pub struct FallbackChain {
    links: Vec<Arc<dyn FallbackStrategy>>,
}

impl FallbackChain {
    /// Create an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a strategy.
    #[must_use]
    pub fn then(mut self, strategy: Arc<dyn FallbackStrategy>) -> Self {
        self.links.push(strategy);
        self
    }

    /// Number of strategies in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Whether the chain has no strategies.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

impl std::fmt::Debug for FallbackChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.links.iter().map(|link| link.name()).collect();
        f.debug_struct("FallbackChain").field("links", &names).finish()
    }
}

#[async_trait]
impl FallbackStrategy for FallbackChain {
    async fn execute(&self, context: FallbackContext) -> Result<FallbackResponse, FallbackError> {
        let mut last_error = FallbackError::Unavailable {
            message: "fallback chain is empty".to_string(),
        };

        for link in &self.links {
            match link.execute(context.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    tracing::debug!(
                        service = %context.service(),
                        strategy = link.name(),
                        error = %e,
                        "Fallback link failed, trying next"
                    );
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    fn name(&self) -> &str {
        "chain"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(request: &str) -> FallbackContext {
        FallbackContext::new("linkedin_api", request, 3)
    }

    #[tokio::test]
    async fn cache_hit_returns_cached_payload() {
        let cache = CacheFallback::new();
        cache.store("failcorp.com", "https://linkedin.com/company/failcorp");

        let response = cache.execute(context("failcorp.com")).await.unwrap();

        assert_eq!(
            response,
            FallbackResponse::new(
                "https://linkedin.com/company/failcorp",
                FallbackSource::Cache
            )
        );
    }

    #[tokio::test]
    async fn cache_miss_names_the_key() {
        let cache = CacheFallback::new();

        let err = cache.execute(context("unknown.com")).await.unwrap_err();

        assert_eq!(
            err,
            FallbackError::CacheMiss {
                key: "unknown.com".to_string()
            }
        );
    }

    #[tokio::test]
    async fn evicted_entry_misses() {
        let cache = CacheFallback::new();
        cache.store("a", "1");
        assert_eq!(cache.evict("a"), Some("1".to_string()));
        assert!(cache.is_empty());
        assert!(cache.execute(context("a")).await.is_err());
    }

    #[tokio::test]
    async fn default_value_ignores_request() {
        let strategy = DefaultValueFallback::new("{}");
        let response = strategy.execute(context("anything")).await.unwrap();
        assert_eq!(response.data, "{}");
        assert_eq!(response.source, FallbackSource::DefaultValue);
    }

    #[tokio::test]
    async fn chain_falls_through_to_next_link() {
        let chain = FallbackChain::new()
            .then(Arc::new(CacheFallback::new()))
            .then(Arc::new(DefaultValueFallback::new("default")));

        let response = chain.execute(context("miss")).await.unwrap();

        assert_eq!(response.source, FallbackSource::DefaultValue);
        assert_eq!(chain.len(), 2);
    }

    #[tokio::test]
    async fn chain_reports_last_error() {
        let chain = FallbackChain::new().then(Arc::new(CacheFallback::new()));

        let err = chain.execute(context("miss")).await.unwrap_err();

        assert!(matches!(err, FallbackError::CacheMiss { .. }));
    }

    #[tokio::test]
    async fn empty_chain_is_unavailable() {
        let chain = FallbackChain::new();
        assert!(chain.is_empty());
        let err = chain.execute(context("x")).await.unwrap_err();
        assert!(matches!(err, FallbackError::Unavailable { .. }));
    }
}
