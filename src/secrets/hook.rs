//! Lifecycle hook around cache writes and reads.

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::Result;
use crate::secrets::clock::{Clock, SystemClock};
use crate::secrets::types::{CachedSecretInfo, SecretInfo, STAGE_ACS_CURRENT};

/// Intercepts values on their way into and out of the cache.
///
/// Implementations report their own failures with [`Error::hook`](crate::Error::hook).
/// An entry returned from `put` must keep the secret name it was given.
#[async_trait]
pub trait CacheHook: Send + Sync {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Wrap a freshly fetched secret for storage. `None` skips storing it.
    async fn put(&self, info: SecretInfo) -> Result<Option<CachedSecretInfo>>;

    /// Unwrap a fresh cached entry for the caller
    async fn get(&self, entry: &CachedSecretInfo) -> Result<SecretInfo>;

    /// Fallback value when the remote fetch fails transiently
    async fn recovery_get_secret(&self, _secret_name: &str) -> Result<Option<SecretInfo>> {
        Ok(None)
    }
}

/// Stamps entries with the stage and current time; no recovery
#[derive(Clone)]
pub struct DefaultCacheHook {
    stage: String,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for DefaultCacheHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultCacheHook").field("stage", &self.stage).finish()
    }
}

impl Default for DefaultCacheHook {
    fn default() -> Self {
        Self::new(STAGE_ACS_CURRENT, Arc::new(SystemClock))
    }
}

impl DefaultCacheHook {
    pub fn new(stage: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self { stage: stage.into(), clock }
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }
}

#[async_trait]
impl CacheHook for DefaultCacheHook {
    async fn put(&self, info: SecretInfo) -> Result<Option<CachedSecretInfo>> {
        Ok(Some(CachedSecretInfo::new(info, self.stage.clone(), self.clock.now_ms())))
    }

    async fn get(&self, entry: &CachedSecretInfo) -> Result<SecretInfo> {
        Ok(entry.secret_info.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedClock(i64);

    impl Clock for FixedClock {
        fn now_ms(&self) -> i64 {
            self.0
        }
    }

    #[tokio::test]
    async fn test_put_stamps_stage_and_time() {
        let hook = DefaultCacheHook::new("ACSPrevious", Arc::new(FixedClock(42)));
        let entry = hook.put(SecretInfo::text("db-pass", "v1", "x")).await.unwrap().unwrap();
        assert_eq!(entry.stage, "ACSPrevious");
        assert_eq!(entry.refresh_timestamp_ms, 42);
        assert_eq!(hook.get(&entry).await.unwrap().version_id, "v1");
    }

    #[tokio::test]
    async fn test_default_recovery_is_empty() {
        let hook = DefaultCacheHook::default();
        assert_eq!(hook.stage(), "ACSCurrent");
        assert!(hook.recovery_get_secret("db-pass").await.unwrap().is_none());
    }
}
