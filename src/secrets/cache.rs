//! # Secret Cache
//!
//! TTL-aware cache in front of a [`SecretFetcher`].
//!
//! Reads return the stored value while it is fresh. A stale or missing entry
//! is refreshed under a per-name lock, so concurrent callers for one name
//! trigger a single remote fetch while other names proceed independently.
//! Every refresh arms a one-shot timer that repeats the refresh at the next
//! execution time and re-arms itself.
//!
//! ```rust,ignore
//! let cache = SecretCache::builder()
//!     .with_fetcher_builder(ResilientSecretFetcher::builder().with_regions(["cn-hangzhou"]))
//!     .with_secret_ttl("db-password", Duration::from_secs(600))
//!     .build()
//!     .await?;
//!
//! let password = cache.get_string_value("db-password").await?;
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use crate::errors::{Error, Result};
use crate::observability::MetricsRecorder;
use crate::secrets::builder::SecretCacheBuilder;
use crate::secrets::clock::Clock;
use crate::secrets::fetcher::SecretFetcher;
use crate::secrets::hook::CacheHook;
use crate::secrets::refresh::{duration_ms, RefreshStrategy};
use crate::secrets::store::CacheStore;
use crate::secrets::transport::GetSecretValueRequest;
use crate::secrets::types::{CacheLookup, CachedSecretInfo, SecretDataType, SecretInfo, SecretString};
use crate::secret_span;

/// Default freshness window: one hour
pub const DEFAULT_TTL: Duration = Duration::from_millis(3_600_000);

pub(crate) struct CacheParts {
    pub fetcher: Arc<dyn SecretFetcher>,
    pub store: Arc<dyn CacheStore>,
    pub refresh_strategy: Arc<dyn RefreshStrategy>,
    pub hook: Arc<dyn CacheHook>,
    pub clock: Arc<dyn Clock>,
    pub stage: String,
    pub default_ttl: Duration,
    pub ttl_overrides: HashMap<String, Duration>,
}

struct CacheInner {
    fetcher: Arc<dyn SecretFetcher>,
    store: Arc<dyn CacheStore>,
    refresh_strategy: Arc<dyn RefreshStrategy>,
    hook: Arc<dyn CacheHook>,
    clock: Arc<dyn Clock>,
    stage: String,
    default_ttl: Duration,
    ttl_overrides: HashMap<String, Duration>,
    /// Guards creation of per-name locks only
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    timers: DashMap<String, CancellationToken>,
    shutdown: CancellationToken,
    metrics: MetricsRecorder,
}

impl Drop for CacheInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Caching client for remote secrets. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SecretCache {
    inner: Arc<CacheInner>,
}

impl std::fmt::Debug for SecretCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCache")
            .field("stage", &self.inner.stage)
            .field("default_ttl", &self.inner.default_ttl)
            .field("ttl_overrides", &self.inner.ttl_overrides)
            .field("scheduled", &self.inner.timers.len())
            .finish()
    }
}

impl SecretCache {
    pub fn builder() -> SecretCacheBuilder {
        SecretCacheBuilder::default()
    }

    pub(crate) fn from_parts(parts: CacheParts) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                fetcher: parts.fetcher,
                store: parts.store,
                refresh_strategy: parts.refresh_strategy,
                hook: parts.hook,
                clock: parts.clock,
                stage: parts.stage,
                default_ttl: parts.default_ttl,
                ttl_overrides: parts.ttl_overrides,
                locks: Mutex::new(HashMap::new()),
                timers: DashMap::new(),
                shutdown: CancellationToken::new(),
                metrics: MetricsRecorder::new(),
            }),
        }
    }

    /// Initialize collaborators and eagerly load every name with a TTL override.
    ///
    /// A failed eager load is logged and its refresh timer armed anyway, unless
    /// the failure is a configuration or account-state error.
    pub async fn init(&self) -> Result<()> {
        let inner = &self.inner;
        inner.fetcher.init().await?;
        inner.store.init().await?;
        inner.refresh_strategy.init().await?;
        inner.hook.init().await?;

        let mut names: Vec<&String> = inner.ttl_overrides.keys().collect();
        names.sort();
        for name in names {
            let _guard = inner.lock_for(name).await;
            match inner.fetch(name).await {
                Ok(info) => {
                    inner.refresh_locked(name, Some(info), "init").await?;
                }
                Err(e) if e.is_fatal_for_init() => {
                    error!(secret_name = %name, error = %e, "Eager load failed fatally");
                    return Err(e);
                }
                Err(e) => {
                    warn!(secret_name = %name, error = %e, "Eager load failed, refresh scheduled anyway");
                    inner.metrics.record_refresh("init", false);
                    inner.schedule(name).await?;
                }
            }
        }

        info!(
            preloaded = inner.ttl_overrides.len(),
            stage = %inner.stage,
            "Secret cache initialized"
        );
        Ok(())
    }

    /// Return the secret, refreshing it first if the cached copy is missing or stale
    pub async fn get_secret_info(&self, secret_name: &str) -> Result<SecretInfo> {
        validate_name(secret_name)?;
        let inner = &self.inner;

        if let CacheLookup::Fresh(entry) = inner.lookup(secret_name).await? {
            inner.metrics.record_cache_lookup(true);
            return inner.hook.get(&entry).await;
        }
        inner.metrics.record_cache_lookup(false);

        let _guard = inner.lock_for(secret_name).await;
        // another caller may have refreshed while we waited
        if let CacheLookup::Fresh(entry) = inner.lookup(secret_name).await? {
            return inner.hook.get(&entry).await;
        }

        let span = secret_span!("get", secret_name);
        let entry = inner.refresh_locked(secret_name, None, "miss").instrument(span).await?;
        entry
            .map(|entry| entry.secret_info)
            .ok_or_else(|| Error::NoCacheEntry { secret_name: secret_name.to_string() })
    }

    pub async fn get_string_value(&self, secret_name: &str) -> Result<SecretString> {
        let info = self.get_secret_info(secret_name).await?;
        check_data_type(&info, SecretDataType::Text)?;
        Ok(info.secret_value)
    }

    /// Raw bytes of a binary secret's stored value
    pub async fn get_binary_value(&self, secret_name: &str) -> Result<Vec<u8>> {
        let info = self.get_secret_info(secret_name).await?;
        check_data_type(&info, SecretDataType::Binary)?;
        Ok(info.secret_value.expose_secret().as_bytes().to_vec())
    }

    /// Refresh immediately, bypassing the schedule
    pub async fn refresh_now(&self, secret_name: &str) -> Result<bool> {
        validate_name(secret_name)?;
        let inner = &self.inner;
        let _guard = inner.lock_for(secret_name).await;
        let span = secret_span!("refresh_now", secret_name);
        inner.refresh_locked(secret_name, None, "manual").instrument(span).await?;
        Ok(true)
    }

    /// Classify the stored entry without touching the remote service
    pub async fn lookup(&self, secret_name: &str) -> Result<CacheLookup> {
        validate_name(secret_name)?;
        self.inner.lookup(secret_name).await
    }

    /// Number of names with a pending refresh timer
    pub fn scheduled_refreshes(&self) -> usize {
        self.inner.timers.len()
    }

    /// Cancel timers, then close store, refresh strategy, fetcher and hook.
    ///
    /// Collaborator failures are logged and do not stop the remaining steps.
    pub async fn close(&self) -> Result<()> {
        let inner = &self.inner;
        inner.shutdown.cancel();
        inner.timers.clear();

        if let Err(e) = inner.store.close().await {
            error!(error = %e, "Failed to close cache store");
        }
        if let Err(e) = inner.refresh_strategy.close().await {
            error!(error = %e, "Failed to close refresh strategy");
        }
        if let Err(e) = inner.fetcher.close().await {
            error!(error = %e, "Failed to close secret fetcher");
        }
        if let Err(e) = inner.hook.close().await {
            error!(error = %e, "Failed to close cache hook");
        }
        info!("Secret cache closed");
        Ok(())
    }
}

fn validate_name(secret_name: &str) -> Result<()> {
    if secret_name.is_empty() {
        return Err(Error::invalid_argument("the argument secretName must not be empty"));
    }
    Ok(())
}

fn check_data_type(info: &SecretInfo, expected: SecretDataType) -> Result<()> {
    if info.secret_data_type != expected {
        return Err(Error::TypeMismatch {
            secret_name: info.secret_name.clone(),
            expected: expected.as_str().to_string(),
            actual: info.secret_data_type.as_str().to_string(),
        });
    }
    Ok(())
}

impl CacheInner {
    async fn lock_for(&self, secret_name: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(secret_name.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Effective TTL: declared by the secret, else per-name override, else default
    fn ttl_for(&self, secret_name: &str, info: Option<&SecretInfo>) -> Duration {
        info.and_then(|info| self.refresh_strategy.parse_ttl(info))
            .or_else(|| self.ttl_overrides.get(secret_name).copied())
            .unwrap_or(self.default_ttl)
    }

    async fn lookup(&self, secret_name: &str) -> Result<CacheLookup> {
        let Some(entry) = self.store.get(secret_name).await? else {
            return Ok(CacheLookup::Absent);
        };
        let ttl = duration_ms(self.ttl_for(secret_name, Some(&entry.secret_info)));
        let age = self.clock.now_ms().saturating_sub(entry.refresh_timestamp_ms);
        if age > ttl {
            Ok(CacheLookup::Stale(entry))
        } else {
            Ok(CacheLookup::Fresh(entry))
        }
    }

    /// Remote fetch with hook recovery on transient failures
    async fn fetch(&self, secret_name: &str) -> Result<SecretInfo> {
        let request = GetSecretValueRequest::new(secret_name, self.stage.as_str());
        match self.fetcher.get_secret_value(&request).await {
            Ok(mut info) => {
                if info.secret_name.is_empty() {
                    info.secret_name = secret_name.to_string();
                }
                Ok(info)
            }
            Err(e) => {
                error!(secret_name = %secret_name, error = %e, "Failed to fetch secret");
                if !e.is_transient() {
                    return Err(e);
                }
                match self.hook.recovery_get_secret(secret_name).await? {
                    Some(info) => {
                        warn!(secret_name = %secret_name, "Using recovered secret after fetch failure");
                        Ok(info)
                    }
                    None => Err(e),
                }
            }
        }
    }

    /// Fetch (unless supplied), store, and re-arm the timer. Caller holds the name's lock.
    async fn refresh_locked(
        self: &Arc<Self>,
        secret_name: &str,
        supplied: Option<SecretInfo>,
        trigger: &'static str,
    ) -> Result<Option<CachedSecretInfo>> {
        let stored = self.store_fresh(secret_name, supplied).await;
        self.metrics.record_refresh(trigger, stored.is_ok());
        let stored = stored?;
        self.schedule(secret_name).await?;
        info!(secret_name = %secret_name, trigger, "Secret refreshed");
        Ok(stored)
    }

    async fn store_fresh(&self, secret_name: &str, supplied: Option<SecretInfo>) -> Result<Option<CachedSecretInfo>> {
        let info = match supplied {
            Some(info) => info,
            None => self.fetch(secret_name).await?,
        };
        let Some(entry) = self.hook.put(info).await? else {
            debug!(secret_name = %secret_name, "Hook declined to cache secret");
            return Ok(None);
        };
        if entry.secret_info.secret_name != secret_name {
            return Err(Error::hook(
                secret_name,
                format!("entry produced for secret[{}]", entry.secret_info.secret_name),
            ));
        }
        self.store.store(entry.clone()).await?;
        Ok(Some(entry))
    }

    /// Replace the name's timer with one firing at the next execution time
    async fn schedule(self: &Arc<Self>, secret_name: &str) -> Result<()> {
        if let Some((_, previous)) = self.timers.remove(secret_name) {
            previous.cancel();
        }
        if self.shutdown.is_cancelled() {
            return Ok(());
        }

        let now = self.clock.now_ms();
        let entry = self.store.get(secret_name).await?;
        // a declared time already in the past means the last refresh failed; wait a full TTL
        let next = entry
            .as_ref()
            .and_then(|entry| self.refresh_strategy.parse_next_execute_time(entry))
            .filter(|&next| next > now)
            .unwrap_or_else(|| {
                let last = entry.as_ref().map_or(now, |entry| entry.refresh_timestamp_ms);
                let ttl = self.ttl_for(secret_name, entry.as_ref().map(|entry| &entry.secret_info));
                self.refresh_strategy.next_execute_time(secret_name, ttl, last, now)
            })
            .max(now);
        let delay = Duration::from_millis(u64::try_from(next - now).unwrap_or(0));

        let token = self.shutdown.child_token();
        self.timers.insert(secret_name.to_string(), token.clone());
        tokio::spawn(scheduled_refresh(Arc::downgrade(self), secret_name.to_string(), token, delay));
        debug!(secret_name = %secret_name, delay_ms = delay.as_millis() as u64, "Refresh scheduled");
        Ok(())
    }
}

/// One-shot timer body; the refresh it runs arms the next timer
fn scheduled_refresh(
    inner: Weak<CacheInner>,
    secret_name: String,
    token: CancellationToken,
    delay: Duration,
) -> BoxFuture<'static, ()> {
    let span = secret_span!("scheduled_refresh", secret_name);
    async move {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        let Some(inner) = inner.upgrade() else {
            return;
        };

        let _guard = inner.lock_for(&secret_name).await;
        if token.is_cancelled() {
            // replaced by a manual refresh while waiting for the lock
            return;
        }
        if let Err(e) = inner.refresh_locked(&secret_name, None, "scheduled").await {
            error!(secret_name = %secret_name, error = %e, "Scheduled refresh failed");
            if let Err(e) = inner.schedule(&secret_name).await {
                error!(secret_name = %secret_name, error = %e, "Failed to re-arm refresh timer");
            }
        }
    }
    .instrument(span)
    .boxed()
}
