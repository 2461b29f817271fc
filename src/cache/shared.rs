use super::types::{ArtifactKind, CacheEntry, CacheKey};
use crate::error::StationResult;
use crate::kv::KvStore;

use std::sync::Arc;
use std::time::Duration;

const CACHE_PREFIX: &str = "cache:";

/// Cluster-wide tier kept in the shared store, bincode-encoded.
pub struct SharedCache {
    kv: Arc<dyn KvStore>,
    manifest_ttl: Duration,
    blob_ttl: Duration,
}

impl SharedCache {
    pub fn new(kv: Arc<dyn KvStore>, manifest_ttl: Duration, blob_ttl: Duration) -> Self {
        Self {
            kv,
            manifest_ttl,
            blob_ttl,
        }
    }

    pub fn ttl_for(&self, kind: ArtifactKind) -> Duration {
        match kind {
            ArtifactKind::Manifest => self.manifest_ttl,
            ArtifactKind::Blob => self.blob_ttl,
        }
    }

    pub async fn get(&self, key: &CacheKey) -> StationResult<Option<CacheEntry>> {
        match self.kv.get(&key.store_key()).await? {
            Some(raw) => Ok(Some(bincode::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn put(&self, key: &CacheKey, entry: &CacheEntry) -> StationResult<()> {
        let raw = bincode::serialize(entry)?;
        self.kv
            .set(&key.store_key(), raw, Some(self.ttl_for(key.kind())))
            .await
    }

    pub async fn evict(&self, key: &CacheKey) -> StationResult<bool> {
        self.kv.delete(&key.store_key()).await
    }

    pub async fn clear(&self) -> StationResult<usize> {
        self.kv.delete_prefix(CACHE_PREFIX).await
    }
}
