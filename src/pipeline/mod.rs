//! Resolution Pipeline
//!
//! Serves a registry request by walking the tiers in order, cheapest first:
//!
//! 1. **Tier cache**: in-process LRU, then the shared store.
//! 2. **Durable storage**: this node's disk.
//! 3. **Peers**: ring-selected siblings, asked one at a time.
//! 4. **Origin**: the upstream registry, fetched under the cluster lock for
//!    the artifact so only one node pulls it.
//!
//! A hit backfills every tier above the one that answered. Failures in
//! tiers 1 to 3 are logged and treated as a miss; a failure in tier 4 fails
//! the request.
//!
//! Blob bytes never live in the cache tiers. A blob cache entry records its
//! digest, size and owner; the bytes are always served from disk, so a peer
//! or origin hit is written to storage before it is served.

use crate::cache::{CacheEntry, CacheKey, TierCache};
use crate::error::{StationError, StationResult};
use crate::lock::DistributedLock;
use crate::origin::OriginClient;
use crate::peer::PeerCoordinator;
use crate::storage::types::{
    BlobMetadata, BlobStorage, ByteStream, ManifestData, ManifestStorage,
};

use std::sync::Arc;

#[cfg(test)]
mod tests;

/// A blob ready to be streamed from local storage.
pub struct ResolvedBlob {
    pub digest: String,
    pub size: u64,
    pub stream: ByteStream,
}

pub struct ResolutionPipeline {
    cache: Arc<TierCache>,
    blobs: Arc<dyn BlobStorage>,
    manifests: Arc<dyn ManifestStorage>,
    peers: Arc<PeerCoordinator>,
    lock: Arc<DistributedLock>,
    origin: Arc<dyn OriginClient>,
}

impl ResolutionPipeline {
    pub fn new(
        cache: Arc<TierCache>,
        blobs: Arc<dyn BlobStorage>,
        manifests: Arc<dyn ManifestStorage>,
        peers: Arc<PeerCoordinator>,
        lock: Arc<DistributedLock>,
        origin: Arc<dyn OriginClient>,
    ) -> Self {
        Self {
            cache,
            blobs,
            manifests,
            peers,
            lock,
            origin,
        }
    }

    // ============================================================
    // MANIFESTS
    // ============================================================

    pub async fn resolve_manifest(
        &self,
        repository: &str,
        reference: &str,
    ) -> StationResult<ManifestData> {
        let key = CacheKey::manifest(repository, reference);

        if let Some(manifest) = self.cached_manifest(&key, repository, reference).await {
            tracing::debug!("Resolved {} from cache", key);
            return Ok(manifest);
        }

        match self.manifests.get_manifest(repository, reference).await {
            Ok(Some(manifest)) => {
                tracing::debug!("Resolved {} from storage", key);
                self.backfill_cache(&key, CacheEntry::for_manifest(&manifest))
                    .await;
                return Ok(manifest);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Storage lookup for {} failed: {}", key, e),
        }

        match self.peers.query_manifest(repository, reference).await {
            Ok(manifest) => {
                tracing::info!("Resolved {} from peer", key);
                self.backfill_manifest(&key, &manifest).await;
                return Ok(manifest);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => tracing::warn!("Peer lookup for {} failed: {}", key, e),
        }

        let fetched = self
            .lock
            .run_exclusive(&key.lock_name(), || {
                self.origin.fetch_manifest(repository, reference)
            })
            .await?;

        let manifest = ManifestData {
            repository: repository.to_string(),
            reference: reference.to_string(),
            digest: fetched.digest,
            content_type: fetched.content_type,
            content: fetched.content,
        };
        tracing::info!(
            "Resolved {} from origin ({} bytes, {})",
            key,
            manifest.size(),
            manifest.digest
        );
        self.backfill_manifest(&key, &manifest).await;
        Ok(manifest)
    }

    /// Local view only: the cache tiers, then disk. Never asks peers or the origin.
    pub async fn manifest_head(
        &self,
        repository: &str,
        reference: &str,
    ) -> StationResult<Option<ManifestData>> {
        let key = CacheKey::manifest(repository, reference);
        if let Some(manifest) = self.cached_manifest(&key, repository, reference).await {
            return Ok(Some(manifest));
        }
        self.manifests.get_manifest(repository, reference).await
    }

    async fn cached_manifest(
        &self,
        key: &CacheKey,
        repository: &str,
        reference: &str,
    ) -> Option<ManifestData> {
        match self.cache.get(key).await {
            Ok(entry) => entry.and_then(|e| e.to_manifest(repository, reference)),
            Err(e) => {
                tracing::warn!("Cache lookup for {} failed: {}", key, e);
                None
            }
        }
    }

    async fn backfill_manifest(&self, key: &CacheKey, manifest: &ManifestData) {
        if let Err(e) = self.manifests.save_manifest(manifest).await {
            tracing::warn!("Failed to store {}: {}", key, e);
        }
        self.backfill_cache(key, CacheEntry::for_manifest(manifest))
            .await;
    }

    // ============================================================
    // BLOBS
    // ============================================================

    pub async fn resolve_blob(&self, repository: &str, digest: &str) -> StationResult<ResolvedBlob> {
        let key = CacheKey::blob(digest);

        let cached = match self.cache.get(&key).await {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Cache lookup for {} failed: {}", key, e);
                None
            }
        };
        if let Some(entry) = &cached {
            tracing::debug!(
                "Cache knows {} ({} bytes, owner {:?})",
                key,
                entry.size,
                entry.owner_node_id
            );
        }

        if let Some(blob) = self.open_local(digest).await {
            tracing::debug!("Resolved {} from storage", key);
            if cached.is_none() {
                self.backfill_cache(&key, CacheEntry::for_blob(digest, blob.size))
                    .await;
            }
            return Ok(blob);
        }

        match self.peers.query_blob(digest).await {
            Ok((peer, stream)) => match self.blobs.save_blob(digest, stream).await {
                Ok(meta) => {
                    tracing::info!("Resolved {} from peer {}", key, peer.id());
                    return self.serve_stored(&key, meta).await;
                }
                Err(e) => tracing::warn!("Transfer of {} from {} failed: {}", key, peer.id(), e),
            },
            Err(e) if e.is_not_found() => {}
            Err(e) => tracing::warn!("Peer lookup for {} failed: {}", key, e),
        }

        let meta = self
            .lock
            .run_exclusive(&key.lock_name(), || async {
                let stream = self.origin.stream_blob(repository, digest).await?;
                self.blobs.save_blob(digest, stream).await
            })
            .await?;
        tracing::info!("Resolved {} from origin ({} bytes)", key, meta.size);
        self.serve_stored(&key, meta).await
    }

    /// Disk only; the cache holds no blob bytes to answer from.
    pub async fn blob_head(&self, digest: &str) -> StationResult<Option<BlobMetadata>> {
        match self.blobs.blob_metadata(digest).await {
            Ok(meta) => Ok(Some(meta)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn open_local(&self, digest: &str) -> Option<ResolvedBlob> {
        match self.blobs.blob_metadata(digest).await {
            Ok(meta) => match self.blobs.get_blob(digest, None).await {
                Ok(stream) => Some(ResolvedBlob {
                    digest: meta.digest,
                    size: meta.size,
                    stream,
                }),
                Err(e) => {
                    tracing::warn!("Failed to open blob {}: {}", digest, e);
                    None
                }
            },
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                tracing::warn!("Storage lookup for blob {} failed: {}", digest, e);
                None
            }
        }
    }

    async fn serve_stored(&self, key: &CacheKey, meta: BlobMetadata) -> StationResult<ResolvedBlob> {
        self.backfill_cache(key, CacheEntry::for_blob(&meta.digest, meta.size))
            .await;
        self.open_local(&meta.digest)
            .await
            .ok_or_else(|| StationError::NotFound(key.store_key()))
    }

    async fn backfill_cache(&self, key: &CacheKey, entry: CacheEntry) {
        if let Err(e) = self.cache.put(key, entry).await {
            tracing::warn!("Failed to cache {}: {}", key, e);
        }
    }
}
