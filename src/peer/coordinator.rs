use super::client::PeerTransport;
use crate::cache::CacheKey;
use crate::error::{StationError, StationResult};
use crate::membership::types::{NodeId, NodeIdentity};
use crate::ring::RingManager;
use crate::storage::types::{ByteStream, ManifestData};

use std::sync::Arc;

pub const DEFAULT_PEER_FANOUT: usize = 3;

/// The peer tier: asks the ring-selected siblings for an artifact, one at a
/// time, in ring order.
pub struct PeerCoordinator {
    local_id: NodeId,
    ring: Arc<RingManager>,
    transport: Arc<dyn PeerTransport>,
    fanout: usize,
}

impl PeerCoordinator {
    pub fn new(
        local_id: NodeId,
        ring: Arc<RingManager>,
        transport: Arc<dyn PeerTransport>,
        fanout: usize,
    ) -> Self {
        Self {
            local_id,
            ring,
            transport,
            fanout,
        }
    }

    /// Ring candidates for `key`, minus this node.
    pub fn candidates(&self, key: &CacheKey) -> Vec<NodeIdentity> {
        if self.ring.is_empty() {
            tracing::warn!("Hash ring is empty, no peers to ask");
            return Vec::new();
        }

        self.ring
            .nodes_for_key(&key.store_key(), self.fanout)
            .into_iter()
            .filter(|node| node.id() != &self.local_id)
            .collect()
    }

    pub async fn query_manifest(
        &self,
        repository: &str,
        reference: &str,
    ) -> StationResult<ManifestData> {
        let key = CacheKey::manifest(repository, reference);
        let peers = self.candidates(&key);
        tracing::debug!("Querying {} peers for {}", peers.len(), key);

        for peer in &peers {
            match self.transport.has_manifest(peer, repository, reference).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    log_miss(peer, &key, &e);
                    continue;
                }
            }

            match self.transport.get_manifest(peer, repository, reference).await {
                Ok(manifest) => {
                    tracing::info!("Peer hit: {} from {}", key, peer.id());
                    return Ok(manifest);
                }
                Err(e) => log_miss(peer, &key, &e),
            }
        }

        tracing::debug!("Peer miss: {}", key);
        Err(StationError::NotFound(key.store_key()))
    }

    /// Returns the serving peer alongside the stream.
    pub async fn query_blob(&self, digest: &str) -> StationResult<(NodeIdentity, ByteStream)> {
        let key = CacheKey::blob(digest);
        let peers = self.candidates(&key);
        tracing::debug!("Querying {} peers for {}", peers.len(), key);

        for peer in peers {
            match self.transport.has_blob(&peer, digest).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    log_miss(&peer, &key, &e);
                    continue;
                }
            }

            match self.transport.get_blob(&peer, digest).await {
                Ok(stream) => {
                    tracing::info!("Peer hit: {} from {}", key, peer.id());
                    return Ok((peer, stream));
                }
                Err(e) => log_miss(&peer, &key, &e),
            }
        }

        tracing::debug!("Peer miss: {}", key);
        Err(StationError::NotFound(key.store_key()))
    }
}

fn log_miss(peer: &NodeIdentity, key: &CacheKey, error: &StationError) {
    if error.is_expected() {
        tracing::warn!("Peer {} failed for {}: {}", peer.id(), key, error);
    } else {
        tracing::error!("Peer {} failed for {}: {}", peer.id(), key, error);
    }
}
