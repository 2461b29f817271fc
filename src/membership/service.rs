use super::discovery::NodeDiscovery;
use super::types::{NodeId, NodeIdentity, NodeRecord, NodeStatus};
use crate::config::DiscoveryConfig;
use crate::error::StationResult;
use crate::ring::{RingDelta, RingManager};

use chrono::Utc;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Backoff schedule for the startup registration.
#[derive(Debug, Clone, Copy)]
pub struct RegistrationPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RegistrationPolicy {
    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self {
            max_attempts: config.register_max_attempts.max(1),
            initial_backoff: Duration::from_secs(config.register_initial_backoff_secs),
            max_backoff: Duration::from_secs(config.register_max_backoff_secs),
        }
    }
}

impl Default for RegistrationPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(10),
        }
    }
}

/// The local node's view of, and presence in, the cluster.
pub struct MembershipService {
    local: NodeIdentity,
    status: RwLock<NodeStatus>,
    started_at: Instant,
    discovery: Arc<dyn NodeDiscovery>,
    policy: RegistrationPolicy,
}

impl MembershipService {
    pub fn new(
        local: NodeIdentity,
        discovery: Arc<dyn NodeDiscovery>,
        policy: RegistrationPolicy,
    ) -> Self {
        tracing::info!(
            "Membership for {} using {} discovery",
            local,
            discovery.name()
        );
        Self {
            local,
            status: RwLock::new(NodeStatus::Healthy),
            started_at: Instant::now(),
            discovery,
            policy,
        }
    }

    pub fn local_identity(&self) -> &NodeIdentity {
        &self.local
    }

    pub fn local_id(&self) -> &NodeId {
        self.local.id()
    }

    pub fn status(&self) -> NodeStatus {
        *self.status.read()
    }

    pub fn is_draining(&self) -> bool {
        self.status() == NodeStatus::Draining
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn local_record(&self) -> NodeRecord {
        NodeRecord {
            identity: self.local.clone(),
            status: self.status(),
            last_heartbeat: Utc::now(),
            uptime_seconds: self.uptime().as_secs(),
        }
    }

    /// Publishes the local record, retrying with doubling backoff (capped)
    /// until the attempts run out.
    pub async fn register_self(&self) -> StationResult<()> {
        let mut backoff = self.policy.initial_backoff;
        let mut attempt = 1;

        loop {
            match self.discovery.publish(&self.local_record()).await {
                Ok(()) => {
                    tracing::info!("Registered node {} (attempt {})", self.local_id(), attempt);
                    return Ok(());
                }
                Err(e) if attempt >= self.policy.max_attempts => {
                    tracing::error!(
                        "Giving up registering node {} after {} attempts: {}",
                        self.local_id(),
                        attempt,
                        e
                    );
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        "Registration attempt {} failed: {}. Retrying in {:?}",
                        attempt,
                        e,
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.policy.max_backoff);
                    attempt += 1;
                }
            }
        }
    }

    /// Refreshes the local record. Skipped once draining so the record ages
    /// out instead of advertising a node that is leaving.
    pub async fn heartbeat(&self) -> StationResult<bool> {
        if self.is_draining() {
            tracing::debug!("Skipping heartbeat: node is draining");
            return Ok(false);
        }
        self.discovery.publish(&self.local_record()).await?;
        tracing::debug!("Heartbeat sent for {}", self.local_id());
        Ok(true)
    }

    pub async fn deregister(&self) -> StationResult<()> {
        self.discovery.withdraw(self.local_id()).await?;
        tracing::info!("Deregistered node {}", self.local_id());
        Ok(())
    }

    /// Known nodes, excluding this one.
    pub async fn discover_nodes(&self) -> StationResult<Vec<NodeRecord>> {
        self.discovery.discover(self.local_id()).await
    }

    /// Moves to `Draining` for good and republishes right away.
    pub async fn mark_draining(&self) -> StationResult<()> {
        {
            let mut status = self.status.write();
            if *status == NodeStatus::Draining {
                return Ok(());
            }
            *status = NodeStatus::Draining;
        }
        tracing::info!("Node {} is draining", self.local_id());
        self.discovery.publish(&self.local_record()).await
    }

    /// Flips between healthy and unhealthy. Has no effect once draining.
    pub fn set_health(&self, healthy: bool) {
        let mut status = self.status.write();
        if *status == NodeStatus::Draining {
            return;
        }
        let next = if healthy {
            NodeStatus::Healthy
        } else {
            NodeStatus::Unhealthy
        };
        if *status != next {
            tracing::info!("Node {} is now {:?}", self.local_id(), next);
            *status = next;
        }
    }

    /// Rebuilds the ring from discovery: every healthy node, plus this node
    /// while it is healthy itself.
    pub async fn refresh_ring(&self, ring: &RingManager) -> StationResult<RingDelta> {
        let records = self.discover_nodes().await?;

        let mut nodes: Vec<NodeIdentity> = records
            .into_iter()
            .filter(|r| r.status == NodeStatus::Healthy)
            .map(|r| r.identity)
            .collect();
        if self.status() == NodeStatus::Healthy {
            nodes.push(self.local.clone());
        }

        let delta = ring.update_nodes(&nodes);
        tracing::debug!("Refreshed ring: {} nodes", nodes.len());
        Ok(delta)
    }

    /// Sends heartbeats every `every` until `shutdown` flips.
    pub async fn heartbeat_loop(self: Arc<Self>, every: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.heartbeat().await {
                        tracing::error!("Heartbeat failed: {}", e);
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        tracing::debug!("Heartbeat loop stopped");
    }
}
