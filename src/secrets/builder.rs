//! Builder for [`SecretCache`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::{Error, Result};
use crate::observability::{init_logging, LoggingConfig};
use crate::secrets::cache::{CacheParts, SecretCache, DEFAULT_TTL};
use crate::secrets::clock::{Clock, SystemClock};
use crate::secrets::fetcher::{ResilientSecretFetcher, ResilientSecretFetcherBuilder, SecretFetcher};
use crate::secrets::hook::{CacheHook, DefaultCacheHook};
use crate::secrets::refresh::{JsonTtlRefreshStrategy, RefreshStrategy, DEFAULT_TTL_PROPERTY};
use crate::secrets::store::{CacheStore, MemoryCacheStore};
use crate::secrets::types::STAGE_ACS_CURRENT;

/// Collects cache settings; every collaborator has a default.
#[derive(Default)]
pub struct SecretCacheBuilder {
    fetcher: Option<Arc<dyn SecretFetcher>>,
    fetcher_builder: Option<ResilientSecretFetcherBuilder>,
    store: Option<Arc<dyn CacheStore>>,
    refresh_strategy: Option<Arc<dyn RefreshStrategy>>,
    hook: Option<Arc<dyn CacheHook>>,
    clock: Option<Arc<dyn Clock>>,
    stage: Option<String>,
    json_ttl_property: Option<String>,
    default_ttl: Option<Duration>,
    ttl_overrides: HashMap<String, Duration>,
    logging: Option<LoggingConfig>,
}

impl SecretCacheBuilder {
    /// Use a ready-made fetcher
    pub fn with_fetcher(mut self, fetcher: Arc<dyn SecretFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Build the default fetcher from these settings
    pub fn with_fetcher_builder(mut self, builder: ResilientSecretFetcherBuilder) -> Self {
        self.fetcher_builder = Some(builder);
        self
    }

    /// Per-secret TTL; the name is also loaded eagerly during init
    pub fn with_secret_ttl(mut self, secret_name: impl Into<String>, ttl: Duration) -> Self {
        self.ttl_overrides.insert(secret_name.into(), ttl);
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// JSON property of the extended config holding a TTL; ignored with a custom strategy
    pub fn with_json_ttl_property(mut self, property: impl Into<String>) -> Self {
        self.json_ttl_property = Some(property.into());
        self
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn with_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_refresh_strategy(mut self, strategy: Arc<dyn RefreshStrategy>) -> Self {
        self.refresh_strategy = Some(strategy);
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn CacheHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Install a global tracing subscriber when the cache is built
    pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = Some(logging);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.stage.as_deref().is_some_and(|s| s.trim().is_empty()) {
            return Err(Error::invalid_argument("stage must not be empty"));
        }
        if self.default_ttl.is_some_and(|ttl| ttl.is_zero()) {
            return Err(Error::invalid_argument("default TTL must be positive"));
        }
        if let Some((name, _)) = self.ttl_overrides.iter().find(|(name, ttl)| name.is_empty() || ttl.is_zero()) {
            return Err(Error::invalid_argument(format!("invalid TTL override for secret[{name}]")));
        }
        Ok(())
    }

    /// Assemble the cache without initializing it
    pub fn build_uninitialized(self) -> Result<SecretCache> {
        self.validate()?;
        if let Some(logging) = &self.logging {
            init_logging(logging);
        }

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let stage = self.stage.unwrap_or_else(|| STAGE_ACS_CURRENT.to_string());
        let fetcher: Arc<dyn SecretFetcher> = match (self.fetcher, self.fetcher_builder) {
            (Some(fetcher), _) => fetcher,
            (None, Some(builder)) => Arc::new(builder.build()),
            (None, None) => Arc::new(ResilientSecretFetcher::builder().build()),
        };
        let refresh_strategy: Arc<dyn RefreshStrategy> = self.refresh_strategy.unwrap_or_else(|| {
            let property = self.json_ttl_property.unwrap_or_else(|| DEFAULT_TTL_PROPERTY.to_string());
            Arc::new(JsonTtlRefreshStrategy::new(property))
        });
        let hook = self
            .hook
            .unwrap_or_else(|| Arc::new(DefaultCacheHook::new(stage.clone(), clock.clone())));

        Ok(SecretCache::from_parts(CacheParts {
            fetcher,
            store: self.store.unwrap_or_else(|| Arc::new(MemoryCacheStore::new())),
            refresh_strategy,
            hook,
            clock,
            stage,
            default_ttl: self.default_ttl.unwrap_or(DEFAULT_TTL),
            ttl_overrides: self.ttl_overrides,
        }))
    }

    /// Assemble and initialize the cache
    pub async fn build(self) -> Result<SecretCache> {
        let cache = self.build_uninitialized()?;
        cache.init().await?;
        Ok(cache)
    }
}
