//! In-memory fakes shared by the unit tests.

use crate::error::{StationError, StationResult};
use crate::membership::types::{NodeId, NodeIdentity};
use crate::origin::{OriginClient, OriginManifest};
use crate::peer::client::PeerTransport;
use crate::peer::protocol::PeerInfo;
use crate::storage::compute_digest;
use crate::storage::types::{ByteStream, DEFAULT_MANIFEST_CONTENT_TYPE, ManifestData};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

pub fn identity(id: &str, port: u16) -> NodeIdentity {
    NodeIdentity::new(NodeId::from(id), "127.0.0.1", port, port + 1000)
}

pub fn manifest(repository: &str, reference: &str, body: &str) -> ManifestData {
    ManifestData {
        repository: repository.to_string(),
        reference: reference.to_string(),
        digest: compute_digest(body.as_bytes()),
        content_type: DEFAULT_MANIFEST_CONTENT_TYPE.to_string(),
        content: Bytes::from(body.to_string()),
    }
}

pub fn stream_of(data: Bytes) -> ByteStream {
    // Two chunks, so consumers cannot assume a single buffer.
    let mid = data.len() / 2;
    let chunks = vec![Ok(data.slice(..mid)), Ok(data.slice(mid..))];
    futures::stream::iter(chunks).boxed()
}

pub async fn collect(mut stream: ByteStream) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk.unwrap());
    }
    out
}

/// Peer transport answering from maps keyed by node id.
#[derive(Default)]
pub struct MockPeerTransport {
    manifests: DashMap<(String, String, String), ManifestData>,
    blobs: DashMap<(String, String), Bytes>,
    failing: DashMap<String, ()>,
    infos: DashMap<String, PeerInfo>,
    calls: Mutex<Vec<String>>,
    closed: Mutex<Vec<NodeId>>,
}

impl MockPeerTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_manifest(&self, node: &str, manifest: ManifestData) {
        self.manifests.insert(
            (
                node.to_string(),
                manifest.repository.clone(),
                manifest.reference.clone(),
            ),
            manifest,
        );
    }

    pub fn with_blob(&self, node: &str, digest: &str, data: Bytes) {
        self.blobs.insert((node.to_string(), digest.to_string()), data);
    }

    pub fn fail(&self, node: &str) {
        self.failing.insert(node.to_string(), ());
    }

    pub fn with_info(&self, endpoint: &str, info: PeerInfo) {
        self.infos.insert(endpoint.to_string(), info);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn closed(&self) -> Vec<NodeId> {
        self.closed.lock().clone()
    }

    fn record(&self, call: &str, node: &NodeIdentity) -> StationResult<()> {
        self.calls.lock().push(format!("{}:{}", call, node.id()));
        if self.failing.contains_key(node.id().as_str()) {
            return Err(StationError::peer(node.id().as_str(), "connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl PeerTransport for MockPeerTransport {
    async fn has_manifest(
        &self,
        node: &NodeIdentity,
        repository: &str,
        reference: &str,
    ) -> StationResult<bool> {
        self.record("has_manifest", node)?;
        Ok(self.manifests.contains_key(&(
            node.id().to_string(),
            repository.to_string(),
            reference.to_string(),
        )))
    }

    async fn get_manifest(
        &self,
        node: &NodeIdentity,
        repository: &str,
        reference: &str,
    ) -> StationResult<ManifestData> {
        self.record("get_manifest", node)?;
        self.manifests
            .get(&(
                node.id().to_string(),
                repository.to_string(),
                reference.to_string(),
            ))
            .map(|m| m.clone())
            .ok_or_else(|| StationError::NotFound(format!("{}:{}", repository, reference)))
    }

    async fn has_blob(&self, node: &NodeIdentity, digest: &str) -> StationResult<bool> {
        self.record("has_blob", node)?;
        Ok(self
            .blobs
            .contains_key(&(node.id().to_string(), digest.to_string())))
    }

    async fn get_blob(&self, node: &NodeIdentity, digest: &str) -> StationResult<ByteStream> {
        self.record("get_blob", node)?;
        self.blobs
            .get(&(node.id().to_string(), digest.to_string()))
            .map(|b| stream_of(b.clone()))
            .ok_or_else(|| StationError::NotFound(digest.to_string()))
    }

    async fn health_check(&self, node: &NodeIdentity) -> StationResult<bool> {
        self.record("health_check", node)?;
        Ok(true)
    }

    async fn probe(&self, peer_endpoint: &str) -> StationResult<PeerInfo> {
        self.infos
            .get(peer_endpoint)
            .map(|i| i.clone())
            .ok_or_else(|| StationError::peer(peer_endpoint, "connection refused"))
    }

    fn close(&self, node_id: &NodeId) {
        self.closed.lock().push(node_id.clone());
    }

    fn close_all(&self) {
        self.closed.lock().push(NodeId::from("*"));
    }
}

/// Origin serving fixed artifacts and counting calls.
#[derive(Default)]
pub struct MockOrigin {
    manifests: DashMap<(String, String), OriginManifest>,
    blobs: DashMap<String, Bytes>,
    manifest_calls: AtomicUsize,
    blob_calls: AtomicUsize,
}

impl MockOrigin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_manifest(&self, repository: &str, reference: &str, body: &str) {
        self.manifests.insert(
            (repository.to_string(), reference.to_string()),
            OriginManifest {
                digest: compute_digest(body.as_bytes()),
                content_type: DEFAULT_MANIFEST_CONTENT_TYPE.to_string(),
                content: Bytes::from(body.to_string()),
            },
        );
    }

    pub fn with_blob(&self, data: &[u8]) -> String {
        let digest = compute_digest(data);
        self.blobs.insert(digest.clone(), Bytes::copy_from_slice(data));
        digest
    }

    pub fn manifest_calls(&self) -> usize {
        self.manifest_calls.load(Ordering::SeqCst)
    }

    pub fn blob_calls(&self) -> usize {
        self.blob_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OriginClient for MockOrigin {
    async fn fetch_manifest(
        &self,
        repository: &str,
        reference: &str,
    ) -> StationResult<OriginManifest> {
        self.manifest_calls.fetch_add(1, Ordering::SeqCst);
        self.manifests
            .get(&(repository.to_string(), reference.to_string()))
            .map(|m| m.clone())
            .ok_or_else(|| StationError::NotFound(format!("{}:{}", repository, reference)))
    }

    async fn manifest_exists(&self, repository: &str, reference: &str) -> StationResult<bool> {
        Ok(self
            .manifests
            .contains_key(&(repository.to_string(), reference.to_string())))
    }

    async fn stream_blob(&self, _repository: &str, digest: &str) -> StationResult<ByteStream> {
        self.blob_calls.fetch_add(1, Ordering::SeqCst);
        self.blobs
            .get(digest)
            .map(|b| stream_of(b.clone()))
            .ok_or_else(|| StationError::NotFound(digest.to_string()))
    }

    async fn blob_exists(&self, _repository: &str, digest: &str) -> StationResult<bool> {
        Ok(self.blobs.contains_key(digest))
    }
}
