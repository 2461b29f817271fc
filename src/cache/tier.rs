use super::local::{LocalCache, LocalCacheStats};
use super::shared::SharedCache;
use super::types::{CacheEntry, CacheKey};
use crate::config::CacheConfig;
use crate::error::StationResult;
use crate::kv::KvStore;

use std::sync::Arc;
use std::time::Duration;

/// The two fast tiers behind one interface: in-process first, then the
/// shared store.
pub struct TierCache {
    node_id: String,
    local: LocalCache,
    shared: SharedCache,
}

impl TierCache {
    pub fn new(node_id: &str, local: LocalCache, shared: SharedCache) -> Self {
        Self {
            node_id: node_id.to_string(),
            local,
            shared,
        }
    }

    pub fn from_config(node_id: &str, kv: Arc<dyn KvStore>, config: &CacheConfig) -> Self {
        Self::new(
            node_id,
            LocalCache::new(
                config.local_max_entries,
                config.local_max_bytes,
                Duration::from_secs(config.local_ttl_secs),
            ),
            SharedCache::new(
                kv,
                Duration::from_secs(config.shared_manifest_ttl_secs),
                Duration::from_secs(config.shared_blob_ttl_secs),
            ),
        )
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// A shared-tier hit is copied into the in-process tier so the next read
    /// for the same key stays local.
    pub async fn get(&self, key: &CacheKey) -> StationResult<Option<CacheEntry>> {
        let store_key = key.store_key();

        if let Some(entry) = self.local.get(&store_key) {
            tracing::debug!("Local cache hit: {}", store_key);
            return Ok(Some(entry));
        }

        match self.shared.get(key).await? {
            Some(entry) => {
                tracing::debug!("Shared cache hit: {}", store_key);
                self.local.put(&store_key, entry.clone());
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    /// Writes both tiers. An entry without an owner is stamped with this node.
    pub async fn put(&self, key: &CacheKey, mut entry: CacheEntry) -> StationResult<()> {
        if entry.owner_node_id.is_none() {
            entry.owner_node_id = Some(self.node_id.clone());
        }

        let store_key = key.store_key();
        self.local.put(&store_key, entry.clone());
        self.shared.put(key, &entry).await?;
        tracing::debug!("Cached {} ({} bytes)", store_key, entry.size);
        Ok(())
    }

    pub async fn evict(&self, key: &CacheKey) {
        self.local.invalidate(&key.store_key());
        if let Err(e) = self.shared.evict(key).await {
            tracing::warn!("Failed to evict {} from shared cache: {}", key, e);
        }
    }

    pub async fn clear(&self) {
        self.local.clear();
        match self.shared.clear().await {
            Ok(removed) => tracing::info!("Cleared cache ({} shared entries)", removed),
            Err(e) => tracing::warn!("Failed to clear shared cache: {}", e),
        }
    }

    pub fn stats(&self) -> LocalCacheStats {
        self.local.stats()
    }
}
