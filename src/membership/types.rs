use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Health of a node as seen by the cluster.
///
/// `Draining` is terminal: once set, a node never reports `Healthy` again.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Healthy,
    Unhealthy,
    Draining,
}

/// Addressing of a cluster member.
///
/// Equality and hashing only look at `node_id`, so a refreshed record with
/// new addresses or status still lands on the same ring positions and set
/// entries. Mutable state lives in [`NodeRecord`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeIdentity {
    node_id: NodeId,
    host: String,
    /// `host:port` of the node-to-node listener.
    peer_endpoint: String,
    /// `host:port` of the registry API listener.
    control_endpoint: String,
}

impl NodeIdentity {
    pub fn new(node_id: NodeId, host: &str, peer_port: u16, control_port: u16) -> Self {
        Self {
            node_id,
            host: host.to_string(),
            peer_endpoint: format!("{}:{}", host, peer_port),
            control_endpoint: format!("{}:{}", host, control_port),
        }
    }

    /// Builds an identity from endpoints that are already `host:port`.
    pub fn from_endpoints(node_id: NodeId, peer_endpoint: &str, control_endpoint: &str) -> Self {
        let host = peer_endpoint
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or(peer_endpoint);
        Self {
            node_id,
            host: host.to_string(),
            peer_endpoint: peer_endpoint.to_string(),
            control_endpoint: control_endpoint.to_string(),
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn peer_endpoint(&self) -> &str {
        &self.peer_endpoint
    }

    pub fn control_endpoint(&self) -> &str {
        &self.control_endpoint
    }
}

impl PartialEq for NodeIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.node_id == other.node_id
    }
}

impl Eq for NodeIdentity {}

impl Hash for NodeIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.node_id.hash(state);
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node[id={}, peer={}]", self.node_id, self.peer_endpoint)
    }
}

/// A membership record as published to (and read back from) discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    #[serde(flatten)]
    pub identity: NodeIdentity,
    pub status: NodeStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub uptime_seconds: u64,
}

impl NodeRecord {
    pub fn id(&self) -> &NodeId {
        self.identity.id()
    }

    /// True when no heartbeat arrived within `timeout`.
    pub fn is_expired(&self, timeout: Duration, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(timeout) {
            Ok(timeout) => self.last_heartbeat + timeout < now,
            Err(_) => false,
        }
    }
}
