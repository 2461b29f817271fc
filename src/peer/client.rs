use super::protocol::{
    ENDPOINT_PEER_BLOBS, ENDPOINT_PEER_HEALTH, ENDPOINT_PEER_INFO,
    ENDPOINT_PEER_MANIFEST, ENDPOINT_PEER_MANIFEST_EXISTS, ExistsResponse, HEADER_CONTENT_DIGEST,
    HealthResponse, ManifestQuery, PeerInfo,
};
use crate::error::{StationError, StationResult};
use crate::membership::types::{NodeId, NodeIdentity};
use crate::net::get_with_retry;
use crate::storage::types::{ByteStream, DEFAULT_MANIFEST_CONTENT_TYPE, ManifestData};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use reqwest::StatusCode;
use std::time::Duration;

/// Node-to-node calls used by the peer tier, discovery probes and shutdown.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn has_manifest(
        &self,
        node: &NodeIdentity,
        repository: &str,
        reference: &str,
    ) -> StationResult<bool>;

    async fn get_manifest(
        &self,
        node: &NodeIdentity,
        repository: &str,
        reference: &str,
    ) -> StationResult<ManifestData>;

    async fn has_blob(&self, node: &NodeIdentity, digest: &str) -> StationResult<bool>;

    async fn get_blob(&self, node: &NodeIdentity, digest: &str) -> StationResult<ByteStream>;

    async fn health_check(&self, node: &NodeIdentity) -> StationResult<bool>;

    /// Asks whatever listens on `peer_endpoint` to describe itself.
    async fn probe(&self, peer_endpoint: &str) -> StationResult<PeerInfo>;

    /// Drops the cached connection to a node that left the ring.
    fn close(&self, node_id: &NodeId);

    fn close_all(&self);
}

struct PeerConnection {
    base_url: String,
    client: reqwest::Client,
}

/// HTTP implementation with one pooled client per peer, created on first use.
pub struct HttpPeerClient {
    connections: DashMap<NodeId, PeerConnection>,
    request_timeout: Duration,
    connect_timeout: Duration,
}

impl HttpPeerClient {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            connections: DashMap::new(),
            request_timeout,
            connect_timeout: Duration::from_secs(2),
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn build_client(&self) -> reqwest::Client {
        reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Falling back to default HTTP client: {}", e);
                reqwest::Client::new()
            })
    }

    /// Client and base URL for `node`, rebuilt if its endpoint changed.
    fn connection(&self, node: &NodeIdentity) -> (reqwest::Client, String) {
        let base_url = format!("http://{}", node.peer_endpoint());

        if let Some(conn) = self.connections.get(node.id()) {
            if conn.base_url == base_url {
                return (conn.client.clone(), conn.base_url.clone());
            }
        }

        tracing::debug!("Opening peer connection to {}", node);
        let client = self.build_client();
        self.connections.insert(
            node.id().clone(),
            PeerConnection {
                base_url: base_url.clone(),
                client: client.clone(),
            },
        );
        (client, base_url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        node: &NodeIdentity,
        request: reqwest::RequestBuilder,
    ) -> StationResult<T> {
        let response = request
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| StationError::peer(node.id().as_str(), e))?;
        let response = check_status(node, response)?;
        response
            .json()
            .await
            .map_err(|e| StationError::peer(node.id().as_str(), e))
    }
}

fn check_status(node: &NodeIdentity, response: reqwest::Response) -> StationResult<reqwest::Response> {
    match response.status() {
        status if status.is_success() => Ok(response),
        StatusCode::NOT_FOUND => Err(StationError::NotFound(format!(
            "{} on {}",
            response.url().path(),
            node.id()
        ))),
        status => Err(StationError::peer(
            node.id().as_str(),
            format!("HTTP {}", status),
        )),
    }
}

#[async_trait]
impl PeerTransport for HttpPeerClient {
    async fn has_manifest(
        &self,
        node: &NodeIdentity,
        repository: &str,
        reference: &str,
    ) -> StationResult<bool> {
        let (client, base) = self.connection(node);
        let request = client
            .get(format!("{}{}", base, ENDPOINT_PEER_MANIFEST_EXISTS))
            .query(&ManifestQuery {
                repository: repository.to_string(),
                reference: reference.to_string(),
            });
        let answer: ExistsResponse = self.get_json(node, request).await?;
        Ok(answer.exists)
    }

    async fn get_manifest(
        &self,
        node: &NodeIdentity,
        repository: &str,
        reference: &str,
    ) -> StationResult<ManifestData> {
        let (client, base) = self.connection(node);
        let response = client
            .get(format!("{}{}", base, ENDPOINT_PEER_MANIFEST))
            .query(&ManifestQuery {
                repository: repository.to_string(),
                reference: reference.to_string(),
            })
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| StationError::peer(node.id().as_str(), e))?;
        let response = check_status(node, response)?;

        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let digest = header(HEADER_CONTENT_DIGEST);
        let content_type = header(reqwest::header::CONTENT_TYPE.as_str())
            .unwrap_or_else(|| DEFAULT_MANIFEST_CONTENT_TYPE.to_string());

        let content = response
            .bytes()
            .await
            .map_err(|e| StationError::peer(node.id().as_str(), e))?;

        Ok(ManifestData {
            repository: repository.to_string(),
            reference: reference.to_string(),
            digest: digest.unwrap_or_else(|| crate::storage::compute_digest(&content)),
            content_type,
            content,
        })
    }

    async fn has_blob(&self, node: &NodeIdentity, digest: &str) -> StationResult<bool> {
        let (client, base) = self.connection(node);
        let request = client.get(format!("{}{}/{}/exists", base, ENDPOINT_PEER_BLOBS, digest));
        let answer: ExistsResponse = self.get_json(node, request).await?;
        Ok(answer.exists)
    }

    async fn get_blob(&self, node: &NodeIdentity, digest: &str) -> StationResult<ByteStream> {
        let (client, base) = self.connection(node);
        // Blob bodies get no overall timeout, only the connect timeout.
        let response = client
            .get(format!("{}{}/{}", base, ENDPOINT_PEER_BLOBS, digest))
            .send()
            .await
            .map_err(|e| StationError::peer(node.id().as_str(), e))?;
        let response = check_status(node, response)?;

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other))
            .boxed())
    }

    async fn health_check(&self, node: &NodeIdentity) -> StationResult<bool> {
        let (client, base) = self.connection(node);
        let request = client.get(format!("{}{}", base, ENDPOINT_PEER_HEALTH));
        let health: HealthResponse = self.get_json(node, request).await?;
        Ok(health.is_up())
    }

    async fn probe(&self, peer_endpoint: &str) -> StationResult<PeerInfo> {
        let url = format!("http://{}{}", peer_endpoint, ENDPOINT_PEER_INFO);
        let response = get_with_retry(&self.build_client(), &url, self.request_timeout, 3)
            .await
            .map_err(|e| StationError::peer(peer_endpoint, e))?;

        if !response.status().is_success() {
            return Err(StationError::peer(
                peer_endpoint,
                format!("HTTP {}", response.status()),
            ));
        }
        response
            .json()
            .await
            .map_err(|e| StationError::peer(peer_endpoint, e))
    }

    fn close(&self, node_id: &NodeId) {
        if self.connections.remove(node_id).is_some() {
            tracing::info!("Closed peer connection to {}", node_id);
        }
    }

    fn close_all(&self) {
        let count = self.connection_count();
        self.connections.clear();
        tracing::info!("Closed {} peer connections", count);
    }
}
