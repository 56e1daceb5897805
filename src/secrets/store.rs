//! Storage backend for cached secret entries.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::errors::Result;
use crate::secrets::types::CachedSecretInfo;

/// Persists cached entries keyed by secret name.
///
/// Eviction beyond TTL is the store's own business; the cache never deletes.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn get(&self, secret_name: &str) -> Result<Option<CachedSecretInfo>>;

    /// Insert or overwrite the entry for `entry.secret_name()`
    async fn store(&self, entry: CachedSecretInfo) -> Result<()>;
}

/// In-process store backed by a map
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<String, CachedSecretInfo>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn close(&self) -> Result<()> {
        self.entries.write().await.clear();
        Ok(())
    }

    async fn get(&self, secret_name: &str) -> Result<Option<CachedSecretInfo>> {
        Ok(self.entries.read().await.get(secret_name).cloned())
    }

    async fn store(&self, entry: CachedSecretInfo) -> Result<()> {
        let name = entry.secret_name().to_string();
        self.entries.write().await.insert(name, entry);
        Ok(())
    }
}
