use super::types::{NodeId, NodeIdentity, NodeRecord, NodeStatus};
use crate::error::{StationError, StationResult};
use crate::kv::KvStore;
use crate::peer::client::PeerTransport;

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

pub const ACTIVE_NODES_SET: &str = "nodes:active";
const NODE_KEY_PREFIX: &str = "node:";

/// Extra lifetime of a node record past the heartbeat timeout, so readers
/// see it as expired before the store drops it.
pub const RECORD_TTL_SLACK: Duration = Duration::from_secs(10);

pub fn node_key(node_id: &NodeId) -> String {
    format!("{}{}", NODE_KEY_PREFIX, node_id)
}

/// Source of cluster membership.
#[async_trait]
pub trait NodeDiscovery: Send + Sync {
    /// Publishes (or refreshes) the local record. No-op for sources that do
    /// not accept self-registration.
    async fn publish(&self, record: &NodeRecord) -> StationResult<()>;

    async fn withdraw(&self, node_id: &NodeId) -> StationResult<()>;

    /// Live records of every node except `local`.
    async fn discover(&self, local: &NodeId) -> StationResult<Vec<NodeRecord>>;

    fn name(&self) -> &'static str;
}

/// Self-reporting membership in the shared store: each node writes
/// `node:<id>` with a TTL and adds itself to `nodes:active`.
pub struct RegistryDiscovery {
    kv: Arc<dyn KvStore>,
    node_timeout: Duration,
}

impl RegistryDiscovery {
    pub fn new(kv: Arc<dyn KvStore>, node_timeout: Duration) -> Self {
        Self { kv, node_timeout }
    }

    async fn forget(&self, member: &str) {
        let node_id = NodeId::from(member);
        if let Err(e) = self.kv.delete(&node_key(&node_id)).await {
            tracing::warn!("Failed to delete record of {}: {}", member, e);
        }
        if let Err(e) = self.kv.set_remove(ACTIVE_NODES_SET, member).await {
            tracing::warn!("Failed to drop {} from active set: {}", member, e);
        }
    }
}

#[async_trait]
impl NodeDiscovery for RegistryDiscovery {
    async fn publish(&self, record: &NodeRecord) -> StationResult<()> {
        let raw = serde_json::to_vec(record)?;
        self.kv
            .set(
                &node_key(record.id()),
                raw,
                Some(self.node_timeout + RECORD_TTL_SLACK),
            )
            .await?;
        self.kv
            .set_add(ACTIVE_NODES_SET, record.id().as_str())
            .await?;
        Ok(())
    }

    async fn withdraw(&self, node_id: &NodeId) -> StationResult<()> {
        self.kv.delete(&node_key(node_id)).await?;
        self.kv.set_remove(ACTIVE_NODES_SET, node_id.as_str()).await?;
        Ok(())
    }

    async fn discover(&self, local: &NodeId) -> StationResult<Vec<NodeRecord>> {
        let members = self.kv.set_members(ACTIVE_NODES_SET).await?;
        let now = Utc::now();
        let mut records = Vec::with_capacity(members.len());

        for member in members {
            if member == local.as_str() {
                continue;
            }

            let raw = match self.kv.get(&node_key(&NodeId::from(member.as_str()))).await? {
                Some(raw) => raw,
                None => {
                    tracing::warn!("Node {} has no record, removing from active set", member);
                    self.forget(&member).await;
                    continue;
                }
            };

            let record: NodeRecord = match serde_json::from_slice(&raw) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!("Unreadable record for node {}: {}", member, e);
                    continue;
                }
            };

            if record.is_expired(self.node_timeout, now) {
                tracing::warn!(
                    "Node {} missed heartbeats since {}, removing",
                    member,
                    record.last_heartbeat
                );
                self.forget(&member).await;
                continue;
            }

            records.push(record);
        }

        Ok(records)
    }

    fn name(&self) -> &'static str {
        "registry"
    }
}

/// Membership handed in from outside (an orchestrator or a fixed seed list).
/// Nodes do not register themselves; each listed endpoint is probed and
/// then health checked.
pub struct StaticDiscovery {
    seeds: Vec<String>,
    transport: Arc<dyn PeerTransport>,
}

impl StaticDiscovery {
    pub fn new(seeds: Vec<String>, transport: Arc<dyn PeerTransport>) -> Self {
        Self { seeds, transport }
    }
}

#[async_trait]
impl NodeDiscovery for StaticDiscovery {
    async fn publish(&self, _record: &NodeRecord) -> StationResult<()> {
        Ok(())
    }

    async fn withdraw(&self, _node_id: &NodeId) -> StationResult<()> {
        Ok(())
    }

    async fn discover(&self, local: &NodeId) -> StationResult<Vec<NodeRecord>> {
        let mut records = Vec::with_capacity(self.seeds.len());
        let mut failures = 0;

        for endpoint in &self.seeds {
            let info = match self.transport.probe(endpoint).await {
                Ok(info) => info,
                Err(e) => {
                    tracing::warn!("Seed {} not ready: {}", endpoint, e);
                    failures += 1;
                    continue;
                }
            };

            let node_id = NodeId::from(info.node_id.as_str());
            if &node_id == local {
                continue;
            }

            let identity =
                NodeIdentity::from_endpoints(node_id, &info.peer_endpoint, &info.control_endpoint);

            // A node answering info can still fail its readiness check.
            let status = match info.status {
                NodeStatus::Draining => NodeStatus::Draining,
                reported => match self.transport.health_check(&identity).await {
                    Ok(true) => reported,
                    Ok(false) => NodeStatus::Unhealthy,
                    Err(e) => {
                        tracing::warn!("Health check of {} failed: {}", identity.id(), e);
                        NodeStatus::Unhealthy
                    }
                },
            };

            records.push(NodeRecord {
                identity,
                status,
                last_heartbeat: Utc::now(),
                uptime_seconds: info.uptime_seconds,
            });
        }

        if failures > 0 && failures == self.seeds.len() {
            return Err(StationError::peer(
                "seeds",
                format!("none of {} seeds answered", failures),
            ));
        }

        Ok(records)
    }

    fn name(&self) -> &'static str {
        "static"
    }
}
