//! Registry API Tests
//!
//! Serves `registry_router` on a loopback port and pulls through it with a
//! plain HTTP client, the way a container runtime would.

#[cfg(test)]
mod tests {
    use crate::cache::TierCache;
    use crate::config::CacheConfig;
    use crate::kv::memory::MemoryKvStore;
    use crate::lock::{DEFAULT_LOCK_TTL, DistributedLock};
    use crate::membership::types::NodeId;
    use crate::peer::PeerCoordinator;
    use crate::pipeline::ResolutionPipeline;
    use crate::registry::handlers::{API_VERSION, HEADER_API_VERSION};
    use crate::registry::registry_router;
    use crate::ring::RingManager;
    use crate::storage::{FilesystemStorage, compute_digest};
    use crate::testing::{MockOrigin, MockPeerTransport, identity};

    use std::sync::Arc;

    struct Served {
        base: String,
        origin: Arc<MockOrigin>,
        http: reqwest::Client,
        _dir: tempfile::TempDir,
    }

    async fn serve() -> Served {
        let dir = tempfile::tempdir().unwrap();
        let kv = Arc::new(MemoryKvStore::new());
        let storage = Arc::new(FilesystemStorage::open(dir.path(), 1024).await.unwrap());

        let ring = Arc::new(RingManager::new(10));
        ring.update_nodes(&[identity("node-a", 50051)]);
        let peers = Arc::new(PeerCoordinator::new(
            NodeId::from("node-a"),
            ring,
            Arc::new(MockPeerTransport::new()),
            3,
        ));

        let origin = Arc::new(MockOrigin::new());
        let pipeline = Arc::new(ResolutionPipeline::new(
            Arc::new(TierCache::from_config(
                "node-a",
                kv.clone(),
                &CacheConfig::default(),
            )),
            storage.clone(),
            storage,
            peers,
            Arc::new(DistributedLock::new(kv, "node-a", DEFAULT_LOCK_TTL)),
            origin.clone(),
        ));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, registry_router(pipeline)).await.unwrap();
        });

        Served {
            base: format!("http://{}", addr),
            origin,
            http: reqwest::Client::new(),
            _dir: dir,
        }
    }

    fn header<'a>(response: &'a reqwest::Response, name: &str) -> Option<&'a str> {
        response.headers().get(name).and_then(|v| v.to_str().ok())
    }

    // ============================================================
    // API TESTS
    // ============================================================

    #[tokio::test]
    async fn test_api_version_endpoint() {
        let s = serve().await;
        let response = s.http.get(format!("{}/v2/", s.base)).send().await.unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(header(&response, HEADER_API_VERSION), Some(API_VERSION));
    }

    #[tokio::test]
    async fn test_pull_manifest_through_namespaced_path() {
        let s = serve().await;
        let body = "{\"schemaVersion\":2,\"layers\":[]}";
        s.origin.with_manifest("library/nginx", "latest", body);
        let url = format!("{}/v2/library/nginx/manifests/latest", s.base);

        // HEAD is local-only: nothing cached yet.
        let response = s.http.head(&url).send().await.unwrap();
        assert_eq!(response.status(), 404);

        let response = s.http.get(&url).send().await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(
            header(&response, "Docker-Content-Digest"),
            Some(compute_digest(body.as_bytes()).as_str())
        );
        assert_eq!(response.text().await.unwrap(), body);

        let response = s.http.head(&url).send().await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(
            header(&response, "content-length"),
            Some(body.len().to_string().as_str())
        );

        s.http.get(&url).send().await.unwrap();
        assert_eq!(s.origin.manifest_calls(), 1);
    }

    #[tokio::test]
    async fn test_single_segment_name() {
        let s = serve().await;
        s.origin.with_manifest("alpine", "3.19", "{}");

        let response = s
            .http
            .get(format!("{}/v2/alpine/manifests/3.19", s.base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn test_unknown_manifest_is_404() {
        let s = serve().await;
        let response = s
            .http
            .get(format!("{}/v2/library/ghost/manifests/latest", s.base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
    }

    #[tokio::test]
    async fn test_pull_blob() {
        let s = serve().await;
        let data = vec![7u8; 4096];
        let digest = s.origin.with_blob(&data);
        let url = format!("{}/v2/library/nginx/blobs/{}", s.base, digest);

        let response = s.http.get(&url).send().await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(header(&response, "Docker-Content-Digest"), Some(digest.as_str()));
        assert_eq!(response.bytes().await.unwrap(), data);

        let response = s.http.head(&url).send().await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(header(&response, "content-length"), Some("4096"));
    }

    #[tokio::test]
    async fn test_malformed_digest_is_404() {
        let s = serve().await;
        let response = s
            .http
            .get(format!("{}/v2/library/nginx/blobs/not-a-digest", s.base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
    }
}
