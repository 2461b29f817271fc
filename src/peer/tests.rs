//! Peer Tier Tests
//!
//! - **Coordinator**: ring-ordered sequential fallback, self exclusion,
//!   failures treated as misses.
//! - **Handlers**: the serving side answers from local tiers only.

#[cfg(test)]
mod tests {
    use crate::cache::{CacheEntry, CacheKey, TierCache};
    use crate::config::CacheConfig;
    use crate::kv::KvStore;
    use crate::kv::memory::MemoryKvStore;
    use crate::membership::discovery::RegistryDiscovery;
    use crate::membership::service::{MembershipService, RegistrationPolicy};
    use crate::membership::types::{NodeId, NodeStatus};
    use crate::peer::handlers::{
        handle_blob_exists, handle_get_manifest, handle_health, handle_info,
        handle_manifest_exists,
    };
    use crate::peer::protocol::ManifestQuery;
    use crate::peer::{PeerCoordinator, PeerServiceState};
    use crate::ring::RingManager;
    use crate::storage::{BlobStorage, FilesystemStorage, ManifestStorage};
    use crate::testing::{MockPeerTransport, collect, identity, manifest, stream_of};

    use axum::extract::{Extension, Path, Query};
    use axum::http::StatusCode;
    use bytes::Bytes;
    use std::sync::Arc;
    use std::time::Duration;

    fn coordinator(
        local: &str,
        ring_nodes: &[&str],
    ) -> (PeerCoordinator, Arc<MockPeerTransport>, Arc<RingManager>) {
        let ring = Arc::new(RingManager::new(100));
        let nodes: Vec<_> = ring_nodes
            .iter()
            .enumerate()
            .map(|(i, id)| identity(id, 50051 + i as u16))
            .collect();
        ring.update_nodes(&nodes);

        let transport = Arc::new(MockPeerTransport::new());
        let coordinator =
            PeerCoordinator::new(NodeId::from(local), ring.clone(), transport.clone(), 3);
        (coordinator, transport, ring)
    }

    // ============================================================
    // COORDINATOR TESTS
    // ============================================================

    #[tokio::test]
    async fn test_sequential_fallback_in_ring_order() {
        let (coordinator, transport, _) =
            coordinator("node-self", &["node-a", "node-b", "node-c", "node-d"]);
        let key = CacheKey::manifest("library/nginx", "latest");
        let candidates = coordinator.candidates(&key);
        assert_eq!(candidates.len(), 3);

        let first = candidates[0].id().to_string();
        let second = candidates[1].id().to_string();
        let third = candidates[2].id().to_string();

        transport.fail(&first);
        transport.with_manifest(&third, manifest("library/nginx", "latest", "{\"v\":3}"));

        let found = coordinator
            .query_manifest("library/nginx", "latest")
            .await
            .unwrap();
        assert_eq!(found.content, Bytes::from("{\"v\":3}"));

        assert_eq!(
            transport.calls(),
            vec![
                format!("has_manifest:{}", first),
                format!("has_manifest:{}", second),
                format!("has_manifest:{}", third),
                format!("get_manifest:{}", third),
            ]
        );
    }

    #[tokio::test]
    async fn test_first_positive_answer_wins() {
        let (coordinator, transport, _) = coordinator("node-self", &["node-a", "node-b", "node-c"]);
        let key = CacheKey::manifest("library/redis", "7");
        let candidates = coordinator.candidates(&key);

        for node in &candidates {
            transport.with_manifest(
                node.id().as_str(),
                manifest("library/redis", "7", node.id().as_str()),
            );
        }

        let found = coordinator.query_manifest("library/redis", "7").await.unwrap();
        assert_eq!(found.content, Bytes::from(candidates[0].id().to_string()));
        assert_eq!(transport.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_self_is_never_queried() {
        let (coordinator, transport, _) = coordinator("node-a", &["node-a", "node-b"]);
        let key = CacheKey::blob("sha256:00");

        let candidates = coordinator.candidates(&key);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id().as_str(), "node-b");

        let _ = coordinator.query_blob("sha256:00").await;
        assert!(transport.calls().iter().all(|c| !c.ends_with(":node-a")));
    }

    #[tokio::test]
    async fn test_exhausted_candidates_is_not_found() {
        let (coordinator, transport, _) = coordinator("node-self", &["node-a", "node-b", "node-c"]);
        transport.fail("node-a");

        let result = coordinator.query_manifest("library/nginx", "latest").await;
        assert!(result.unwrap_err().is_not_found());
        assert_eq!(transport.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_empty_ring_is_not_found() {
        let (coordinator, transport, _) = coordinator("node-self", &[]);
        assert!(coordinator.query_blob("sha256:00").await.is_err());
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_blob_is_streamed_from_peer() {
        let (coordinator, transport, _) = coordinator("node-self", &["node-a"]);
        transport.with_blob("node-a", "sha256:ab", Bytes::from_static(b"layer-bytes"));

        let (peer, stream) = coordinator.query_blob("sha256:ab").await.unwrap();
        assert_eq!(peer.id().as_str(), "node-a");
        assert_eq!(collect(stream).await, b"layer-bytes");
    }

    // ============================================================
    // HANDLER TESTS
    // ============================================================

    async fn serving_state(dir: &tempfile::TempDir) -> Arc<PeerServiceState> {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let storage = Arc::new(FilesystemStorage::open(dir.path(), 4).await.unwrap());
        let membership = Arc::new(MembershipService::new(
            identity("node-a", 50051),
            Arc::new(RegistryDiscovery::new(kv.clone(), Duration::from_secs(30))),
            RegistrationPolicy::default(),
        ));

        Arc::new(PeerServiceState {
            membership,
            cache: Arc::new(TierCache::from_config("node-a", kv, &CacheConfig::default())),
            blobs: storage.clone(),
            manifests: storage,
            capacity_bytes: 1 << 30,
        })
    }

    fn query(repository: &str, reference: &str) -> Query<ManifestQuery> {
        Query(ManifestQuery {
            repository: repository.to_string(),
            reference: reference.to_string(),
        })
    }

    #[tokio::test]
    async fn test_manifest_served_from_cache_or_disk() {
        let dir = tempfile::tempdir().unwrap();
        let state = serving_state(&dir).await;

        let cached = manifest("library/nginx", "latest", "{\"cached\":true}");
        state
            .cache
            .put(
                &CacheKey::manifest("library/nginx", "latest"),
                CacheEntry::for_manifest(&cached),
            )
            .await
            .unwrap();
        state
            .manifests
            .save_manifest(&manifest("library/redis", "7", "{\"disk\":true}"))
            .await
            .unwrap();

        let (code, answer) =
            handle_manifest_exists(Extension(state.clone()), query("library/nginx", "latest")).await;
        assert_eq!(code, StatusCode::OK);
        assert!(answer.exists);

        let (_, answer) =
            handle_manifest_exists(Extension(state.clone()), query("library/redis", "7")).await;
        assert!(answer.exists);

        let (_, answer) =
            handle_manifest_exists(Extension(state.clone()), query("library/none", "1")).await;
        assert!(!answer.exists);

        let response =
            handle_get_manifest(Extension(state.clone()), query("library/nginx", "latest")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["Docker-Content-Digest"],
            cached.digest.as_str()
        );

        let response = handle_get_manifest(Extension(state), query("library/none", "1")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_blob_exists_reports_disk_only() {
        let dir = tempfile::tempdir().unwrap();
        let state = serving_state(&dir).await;
        let data = Bytes::from_static(b"0123456789");
        let digest = crate::storage::compute_digest(&data);

        let (_, answer) =
            handle_blob_exists(Extension(state.clone()), Path(digest.clone())).await;
        assert!(!answer.exists);

        state.blobs.save_blob(&digest, stream_of(data)).await.unwrap();
        let (_, answer) = handle_blob_exists(Extension(state), Path(digest)).await;
        assert!(answer.exists);
        assert_eq!(answer.size, Some(10));
    }

    #[tokio::test]
    async fn test_health_goes_down_when_draining() {
        let dir = tempfile::tempdir().unwrap();
        let state = serving_state(&dir).await;

        let (code, health) = handle_health(Extension(state.clone())).await;
        assert_eq!(code, StatusCode::OK);
        assert!(health.is_up());

        state.membership.mark_draining().await.unwrap();
        let (code, health) = handle_health(Extension(state.clone())).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!health.is_up());

        let info = handle_info(Extension(state)).await;
        assert_eq!(info.status, NodeStatus::Draining);
        assert_eq!(info.node_id, "node-a");
    }
}
