//! Configuration loading
//!
//! Precedence (highest first): command-line flags / environment, the TOML
//! file given with `--config`, built-in defaults.

pub mod schema;

pub use schema::{
    CacheConfig, CoordinationConfig, DiscoveryConfig, DiscoveryKind, EvictionConfig,
    LoggingConfig, NodeConfig, OriginConfig, StationConfig, StorageConfig,
};

use crate::error::{StationError, StationResult};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Values supplied on the command line. `None` keeps the file/default value.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub node_id: Option<String>,
    pub advertise_host: Option<String>,
    pub bind: Option<SocketAddr>,
    pub peer_bind: Option<SocketAddr>,
    pub data_dir: Option<PathBuf>,
    pub kv_endpoint: Option<String>,
    pub discovery: Option<DiscoveryKind>,
    pub seeds: Vec<String>,
    pub log_format: Option<String>,
}

impl StationConfig {
    pub async fn load(path: Option<&Path>) -> StationResult<Self> {
        let Some(path) = path else {
            debug!("No config file given, using defaults");
            return Ok(Self::default());
        };

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| StationError::storage(format!("reading {}", path.display()), e))?;

        Self::from_toml(&content)
            .map_err(|e| StationError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml(content: &str) -> StationResult<Self> {
        toml::from_str(content).map_err(|e| StationError::Config(e.to_string()))
    }

    pub fn apply(&mut self, overrides: ConfigOverrides) {
        if let Some(id) = overrides.node_id {
            self.node.id = Some(id);
        }
        if let Some(host) = overrides.advertise_host {
            self.node.advertise_host = Some(host);
        }
        if let Some(bind) = overrides.bind {
            self.node.bind = bind;
        }
        if let Some(peer_bind) = overrides.peer_bind {
            self.node.peer_bind = peer_bind;
        }
        if let Some(dir) = overrides.data_dir {
            self.storage.base_path = dir;
        }
        if let Some(endpoint) = overrides.kv_endpoint {
            self.discovery.kv_endpoint = Some(endpoint);
        }
        if let Some(kind) = overrides.discovery {
            self.discovery.kind = kind;
        }
        if !overrides.seeds.is_empty() {
            self.discovery.seeds = overrides.seeds;
        }
        if let Some(format) = overrides.log_format {
            self.logging.format = format;
        }
    }

    pub fn validate(&self) -> StationResult<()> {
        if self.coordination.virtual_nodes == 0 {
            return Err(StationError::Config(
                "coordination.virtual_nodes must be at least 1".into(),
            ));
        }
        if self.coordination.peer_fanout == 0 {
            return Err(StationError::Config(
                "coordination.peer_fanout must be at least 1".into(),
            ));
        }
        if self.discovery.heartbeat_interval_secs >= self.discovery.node_timeout_secs {
            return Err(StationError::Config(format!(
                "discovery.heartbeat_interval_secs ({}) must be below node_timeout_secs ({})",
                self.discovery.heartbeat_interval_secs, self.discovery.node_timeout_secs
            )));
        }
        if self.discovery.kind == DiscoveryKind::Static && self.discovery.seeds.is_empty() {
            debug!("Static discovery without seeds: node will run alone");
        }
        if !(1..=100).contains(&self.eviction.threshold_percent) {
            return Err(StationError::Config(format!(
                "eviction.threshold_percent must be within 1..=100, got {}",
                self.eviction.threshold_percent
            )));
        }
        if self.storage.chunk_size == 0 {
            return Err(StationError::Config("storage.chunk_size must be positive".into()));
        }
        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return Err(StationError::Config(format!(
                "logging.format must be text or json, got {}",
                self.logging.format
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = StationConfig::default();
        config.validate().unwrap();
        assert_eq!(config.coordination.virtual_nodes, 150);
        assert_eq!(config.coordination.lock_ttl_secs, 30);
        assert_eq!(config.discovery.heartbeat_interval_secs, 10);
        assert_eq!(config.discovery.refresh_interval_secs, 5);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = StationConfig::from_toml(
            r#"
            [node]
            id = "station-a"

            [coordination]
            virtual_nodes = 64

            [discovery]
            kind = "static"
            seeds = ["10.0.0.2:50051"]
            "#,
        )
        .unwrap();

        assert_eq!(config.node.id.as_deref(), Some("station-a"));
        assert_eq!(config.coordination.virtual_nodes, 64);
        assert_eq!(config.coordination.peer_fanout, 3);
        assert_eq!(config.discovery.kind, DiscoveryKind::Static);
        assert_eq!(config.cache.shared_manifest_ttl_secs, 24 * 3600);
    }

    #[test]
    fn test_overrides_win() {
        let mut config = StationConfig::default();
        config.apply(ConfigOverrides {
            node_id: Some("cli-node".into()),
            seeds: vec!["a:1".into(), "b:2".into()],
            ..Default::default()
        });

        assert_eq!(config.node.id.as_deref(), Some("cli-node"));
        assert_eq!(config.discovery.seeds.len(), 2);
    }

    #[test]
    fn test_rejects_heartbeat_slower_than_timeout() {
        let mut config = StationConfig::default();
        config.discovery.heartbeat_interval_secs = 30;
        assert!(matches!(config.validate(), Err(StationError::Config(_))));
    }

    #[test]
    fn test_rejects_zero_virtual_nodes() {
        let mut config = StationConfig::default();
        config.coordination.virtual_nodes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_threshold() {
        let mut config = StationConfig::default();
        config.eviction.threshold_percent = 0;
        assert!(config.validate().is_err());
    }
}
