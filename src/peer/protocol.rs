//! Peer Network Protocol
//!
//! Endpoints and DTOs of the node-to-node surface. Peers only ever answer
//! from their own cache tiers and disk; a peer request never cascades to
//! another peer or to the origin.

use crate::membership::types::NodeStatus;

use serde::{Deserialize, Serialize};

// --- API Endpoints ---

/// Liveness/readiness of the peer as a whole.
pub const ENDPOINT_PEER_HEALTH: &str = "/internal/peer/health";
/// Identity, status and disk usage of the peer.
pub const ENDPOINT_PEER_INFO: &str = "/internal/peer/info";
/// Manifest body; repository and reference are passed as query parameters.
pub const ENDPOINT_PEER_MANIFEST: &str = "/internal/peer/manifest";
pub const ENDPOINT_PEER_MANIFEST_EXISTS: &str = "/internal/peer/manifest/exists";
/// Prefix of `/{digest}` (streamed body) and `/{digest}/exists`.
pub const ENDPOINT_PEER_BLOBS: &str = "/internal/peer/blobs";

/// Header carrying the manifest digest, as in the registry API.
pub const HEADER_CONTENT_DIGEST: &str = "Docker-Content-Digest";

// --- Data Transfer Objects ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestQuery {
    pub repository: String,
    pub reference: String,
}

/// Optional byte window of a blob transfer.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BlobRangeQuery {
    pub offset: Option<u64>,
    pub length: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExistsResponse {
    pub exists: bool,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `"UP"` or `"DOWN"`.
    pub status: String,
    pub node_id: String,
}

impl HealthResponse {
    pub fn is_up(&self) -> bool {
        self.status == "UP"
    }
}

/// Self-description a node returns to `info` probes. Static discovery builds
/// its membership view from these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerInfo {
    pub node_id: String,
    pub peer_endpoint: String,
    pub control_endpoint: String,
    pub status: NodeStatus,
    pub uptime_seconds: u64,
    pub capacity_bytes: u64,
    pub usage_bytes: u64,
}
