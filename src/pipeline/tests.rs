//! Resolution Pipeline Tests
//!
//! Drives the full tier walk with real cache, lock and disk layers over an
//! embedded shared store, and mocked peers and origin.

#[cfg(test)]
mod tests {
    use crate::cache::{CacheKey, TierCache};
    use crate::config::CacheConfig;
    use crate::error::StationError;
    use crate::kv::KvStore;
    use crate::kv::memory::MemoryKvStore;
    use crate::lock::{DEFAULT_LOCK_TTL, DistributedLock};
    use crate::membership::types::NodeId;
    use crate::peer::PeerCoordinator;
    use crate::pipeline::ResolutionPipeline;
    use crate::ring::RingManager;
    use crate::storage::{BlobStorage, FilesystemStorage, ManifestStorage, compute_digest};
    use crate::testing::{MockOrigin, MockPeerTransport, collect, identity, manifest};

    use bytes::Bytes;
    use std::sync::Arc;

    struct Harness {
        pipeline: ResolutionPipeline,
        origin: Arc<MockOrigin>,
        transport: Arc<MockPeerTransport>,
        storage: Arc<FilesystemStorage>,
        cache: Arc<TierCache>,
        kv: Arc<MemoryKvStore>,
        _dir: tempfile::TempDir,
    }

    /// Local node is `node-a`; `node-b` is its only peer.
    async fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let kv = Arc::new(MemoryKvStore::new());
        let storage = Arc::new(FilesystemStorage::open(dir.path(), 8).await.unwrap());
        let cache = Arc::new(TierCache::from_config(
            "node-a",
            kv.clone(),
            &CacheConfig::default(),
        ));

        let ring = Arc::new(RingManager::new(50));
        ring.update_nodes(&[identity("node-a", 50051), identity("node-b", 50052)]);
        let transport = Arc::new(MockPeerTransport::new());
        let peers = Arc::new(PeerCoordinator::new(
            NodeId::from("node-a"),
            ring,
            transport.clone(),
            3,
        ));

        let origin = Arc::new(MockOrigin::new());
        let pipeline = ResolutionPipeline::new(
            cache.clone(),
            storage.clone(),
            storage.clone(),
            peers,
            Arc::new(DistributedLock::new(kv.clone(), "node-a", DEFAULT_LOCK_TTL)),
            origin.clone(),
        );

        Harness {
            pipeline,
            origin,
            transport,
            storage,
            cache,
            kv,
            _dir: dir,
        }
    }

    // ============================================================
    // MANIFEST TESTS
    // ============================================================

    #[tokio::test]
    async fn test_nginx_latest_pulled_from_origin_once() {
        let h = harness().await;
        h.origin
            .with_manifest("library/nginx", "latest", "{\"schemaVersion\":2}");

        let first = h
            .pipeline
            .resolve_manifest("library/nginx", "latest")
            .await
            .unwrap();
        let second = h
            .pipeline
            .resolve_manifest("library/nginx", "latest")
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first.digest, compute_digest(b"{\"schemaVersion\":2}"));
        assert_eq!(h.origin.manifest_calls(), 1);

        // Backfilled to disk and to the shared tier.
        assert!(
            h.storage
                .manifest_exists("library/nginx", "latest")
                .await
                .unwrap()
        );
        let key = CacheKey::manifest("library/nginx", "latest");
        assert!(h.kv.get(&key.store_key()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_storage_hit_backfills_cache() {
        let h = harness().await;
        let stored = manifest("library/redis", "7", "{\"redis\":7}");
        h.storage.save_manifest(&stored).await.unwrap();

        let resolved = h.pipeline.resolve_manifest("library/redis", "7").await.unwrap();
        assert_eq!(resolved.content, stored.content);
        assert_eq!(h.origin.manifest_calls(), 0);

        let entry = h
            .cache
            .get(&CacheKey::manifest("library/redis", "7"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.digest, stored.digest);
        assert_eq!(entry.owner_node_id.as_deref(), Some("node-a"));
    }

    #[tokio::test]
    async fn test_peer_hit_backfills_storage() {
        let h = harness().await;
        h.transport
            .with_manifest("node-b", manifest("library/alpine", "3.19", "{\"alpine\":1}"));

        let resolved = h
            .pipeline
            .resolve_manifest("library/alpine", "3.19")
            .await
            .unwrap();
        assert_eq!(resolved.content, Bytes::from("{\"alpine\":1}"));
        assert_eq!(h.origin.manifest_calls(), 0);
        assert!(
            h.storage
                .manifest_exists("library/alpine", "3.19")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_failing_peer_falls_through_to_origin() {
        let h = harness().await;
        h.transport.fail("node-b");
        h.origin.with_manifest("library/nginx", "1.25", "{}");

        h.pipeline
            .resolve_manifest("library/nginx", "1.25")
            .await
            .unwrap();
        assert_eq!(h.origin.manifest_calls(), 1);
        assert_eq!(h.transport.calls(), vec!["has_manifest:node-b".to_string()]);
    }

    #[tokio::test]
    async fn test_lock_held_elsewhere_fails_request() {
        let h = harness().await;
        h.origin.with_manifest("library/nginx", "latest", "{}");
        h.kv
            .set_if_absent(
                "lock:manifest:library/nginx:latest",
                b"node-z".to_vec(),
                DEFAULT_LOCK_TTL,
            )
            .await
            .unwrap();

        let err = h
            .pipeline
            .resolve_manifest("library/nginx", "latest")
            .await
            .unwrap_err();
        assert!(matches!(err, StationError::LockUnavailable(_)));
        assert_eq!(h.origin.manifest_calls(), 0);
    }

    #[tokio::test]
    async fn test_origin_miss_releases_lock() {
        let h = harness().await;

        let err = h
            .pipeline
            .resolve_manifest("library/ghost", "latest")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(
            h.kv.get("lock:manifest:library/ghost:latest").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_manifest_head_stays_local() {
        let h = harness().await;
        h.transport
            .with_manifest("node-b", manifest("library/busybox", "1", "{}"));

        assert!(
            h.pipeline
                .manifest_head("library/busybox", "1")
                .await
                .unwrap()
                .is_none()
        );
        assert!(h.transport.calls().is_empty());

        h.pipeline
            .resolve_manifest("library/busybox", "1")
            .await
            .unwrap();
        assert!(
            h.pipeline
                .manifest_head("library/busybox", "1")
                .await
                .unwrap()
                .is_some()
        );
    }

    // ============================================================
    // BLOB TESTS
    // ============================================================

    #[tokio::test]
    async fn test_blob_from_origin_is_stored_once() {
        let h = harness().await;
        let data = b"a layer of the nginx image";
        let digest = h.origin.with_blob(data);

        let blob = h
            .pipeline
            .resolve_blob("library/nginx", &digest)
            .await
            .unwrap();
        assert_eq!(blob.size, data.len() as u64);
        assert_eq!(collect(blob.stream).await, data);

        let again = h
            .pipeline
            .resolve_blob("library/nginx", &digest)
            .await
            .unwrap();
        assert_eq!(collect(again.stream).await, data);

        assert_eq!(h.origin.blob_calls(), 1);
        assert!(h.storage.blob_exists(&digest).await.unwrap());

        let entry = h.cache.get(&CacheKey::blob(&digest)).await.unwrap().unwrap();
        assert_eq!(entry.size, data.len() as u64);
        assert!(entry.payload.is_none());
    }

    #[tokio::test]
    async fn test_blob_from_peer_skips_origin() {
        let h = harness().await;
        let data = Bytes::from_static(b"peer layer");
        let digest = compute_digest(&data);
        h.transport.with_blob("node-b", &digest, data.clone());

        let blob = h
            .pipeline
            .resolve_blob("library/nginx", &digest)
            .await
            .unwrap();
        assert_eq!(collect(blob.stream).await, data);
        assert_eq!(h.origin.blob_calls(), 0);
        assert!(h.storage.blob_exists(&digest).await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_peer_blob_falls_back_to_origin() {
        let h = harness().await;
        let data = b"genuine layer";
        let digest = h.origin.with_blob(data);
        h.transport
            .with_blob("node-b", &digest, Bytes::from_static(b"tampered"));

        let blob = h
            .pipeline
            .resolve_blob("library/nginx", &digest)
            .await
            .unwrap();
        assert_eq!(collect(blob.stream).await, data);
        assert_eq!(h.origin.blob_calls(), 1);
    }

    #[tokio::test]
    async fn test_blob_head_checks_disk_only() {
        let h = harness().await;
        let digest = h.origin.with_blob(b"x");

        assert!(h.pipeline.blob_head(&digest).await.unwrap().is_none());
        h.pipeline.resolve_blob("library/x", &digest).await.unwrap();
        assert_eq!(
            h.pipeline.blob_head(&digest).await.unwrap().map(|m| m.size),
            Some(1)
        );
    }
}
