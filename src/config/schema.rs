//! Configuration schema
//!
//! Every section falls back to its defaults, so an empty file (or no file)
//! yields a working single-node setup.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    pub node: NodeConfig,
    pub discovery: DiscoveryConfig,
    pub coordination: CoordinationConfig,
    pub cache: CacheConfig,
    pub storage: StorageConfig,
    pub origin: OriginConfig,
    pub eviction: EvictionConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Stable node id. Generated at startup when absent.
    pub id: Option<String>,
    /// Address advertised to peers. Falls back to `$HOSTNAME`, then localhost.
    pub advertise_host: Option<String>,
    /// Registry API listener.
    pub bind: SocketAddr,
    /// Node-to-node listener (peer RPC, shared store when hosted here).
    pub peer_bind: SocketAddr,
    /// Seconds to wait for in-flight requests during shutdown.
    pub shutdown_grace_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: None,
            advertise_host: None,
            bind: SocketAddr::from(([0, 0, 0, 0], 5000)),
            peer_bind: SocketAddr::from(([0, 0, 0, 0], 50051)),
            shutdown_grace_secs: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryKind {
    /// Nodes self-report into the shared key-value store.
    Registry,
    /// Fixed peer list; membership comes from outside the cluster.
    Static,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub kind: DiscoveryKind,
    /// Peer endpoint of the node hosting the shared store. `None` hosts it here.
    pub kv_endpoint: Option<String>,
    /// Peer endpoints (`host:port`) used by static discovery.
    pub seeds: Vec<String>,
    pub refresh_interval_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub node_timeout_secs: u64,
    pub register_max_attempts: u32,
    pub register_initial_backoff_secs: u64,
    pub register_max_backoff_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            kind: DiscoveryKind::Registry,
            kv_endpoint: None,
            seeds: Vec::new(),
            refresh_interval_secs: 5,
            heartbeat_interval_secs: 10,
            node_timeout_secs: 30,
            register_max_attempts: 6,
            register_initial_backoff_secs: 5,
            register_max_backoff_secs: 10,
        }
    }
}

impl DiscoveryConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn node_timeout(&self) -> Duration {
        Duration::from_secs(self.node_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    pub virtual_nodes: usize,
    /// Candidates asked by the peer tier, self included before filtering.
    pub peer_fanout: usize,
    pub lock_ttl_secs: u64,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            virtual_nodes: 150,
            peer_fanout: crate::peer::coordinator::DEFAULT_PEER_FANOUT,
            lock_ttl_secs: crate::lock::DEFAULT_LOCK_TTL.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub local_max_entries: u64,
    pub local_max_bytes: u64,
    pub local_ttl_secs: u64,
    pub shared_manifest_ttl_secs: u64,
    pub shared_blob_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            local_max_entries: 10_000,
            local_max_bytes: 1024 * 1024 * 1024,
            local_ttl_secs: 3600,
            shared_manifest_ttl_secs: 24 * 3600,
            shared_blob_ttl_secs: 168 * 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub base_path: PathBuf,
    pub chunk_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("./data/station"),
            chunk_size: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OriginConfig {
    pub registry_url: String,
    pub auth_url: String,
    pub auth_service: String,
    pub timeout_secs: u64,
    pub retry_max_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            registry_url: "https://registry-1.docker.io".to_string(),
            auth_url: "https://auth.docker.io".to_string(),
            auth_service: "registry.docker.io".to_string(),
            timeout_secs: 30,
            retry_max_attempts: 3,
            retry_backoff_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvictionConfig {
    pub enabled: bool,
    /// Usage percentage of `capacity_bytes` that triggers a sweep.
    pub threshold_percent: u8,
    pub interval_secs: u64,
    pub capacity_bytes: u64,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_percent: 90,
            interval_secs: 3600,
            capacity_bytes: 100 * 1024 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// `text` or `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}
