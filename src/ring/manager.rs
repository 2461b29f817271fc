use super::hash_ring::HashRing;
use crate::membership::types::{NodeId, NodeIdentity};

use parking_lot::RwLock;
use std::collections::HashSet;

/// Outcome of reconciling the ring against a fresh membership view.
#[derive(Debug, Default, Clone)]
pub struct RingDelta {
    pub added: Vec<NodeIdentity>,
    pub removed: Vec<NodeId>,
    /// Nodes still listed under the same id but reachable at new endpoints.
    pub moved: Vec<NodeIdentity>,
}

impl RingDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.moved.is_empty()
    }
}

fn endpoints_differ(a: &NodeIdentity, b: &NodeIdentity) -> bool {
    a.peer_endpoint() != b.peer_endpoint() || a.control_endpoint() != b.control_endpoint()
}

/// Shared, thread-safe view of the hash ring.
///
/// `update_nodes` is the only writer of ring membership; it is driven by the
/// membership refresh task.
pub struct RingManager {
    ring: RwLock<HashRing>,
}

impl RingManager {
    pub fn new(virtual_nodes: usize) -> Self {
        tracing::info!(
            "Initialized hash ring with {} virtual nodes per physical node",
            virtual_nodes
        );
        Self {
            ring: RwLock::new(HashRing::new(virtual_nodes)),
        }
    }

    /// Reconciles the ring: adds nodes it lacks, drops nodes no longer listed.
    /// Nodes already present keep their positions; their identity is swapped
    /// when they come back at different endpoints.
    pub fn update_nodes(&self, nodes: &[NodeIdentity]) -> RingDelta {
        let wanted: HashSet<&NodeId> = nodes.iter().map(|n| n.id()).collect();
        let mut delta = RingDelta::default();
        let mut ring = self.ring.write();

        let current = ring.nodes();
        for existing in &current {
            if !wanted.contains(existing.id()) {
                ring.remove_node(existing.id());
                delta.removed.push(existing.id().clone());
            }
        }

        for node in nodes {
            if !ring.contains(node.id()) {
                ring.add_node(node.clone());
                delta.added.push(node.clone());
                continue;
            }

            let stale = current
                .iter()
                .any(|existing| existing.id() == node.id() && endpoints_differ(existing, node));
            if stale && !delta.moved.contains(node) {
                // Positions derive from the id alone, so placement is unchanged.
                ring.add_node(node.clone());
                delta.moved.push(node.clone());
            }
        }

        if !delta.is_empty() {
            tracing::info!(
                "Updated hash ring: +{} -{} ~{} ({} nodes active)",
                delta.added.len(),
                delta.removed.len(),
                delta.moved.len(),
                ring.len()
            );
        }

        delta
    }

    pub fn nodes_for_key(&self, key: &str, count: usize) -> Vec<NodeIdentity> {
        let nodes = self.ring.read().nodes_for_key(key, count);
        tracing::debug!(
            "Key '{}' maps to {} nodes: {:?}",
            key,
            nodes.len(),
            nodes.iter().map(|n| n.id().as_str()).collect::<Vec<_>>()
        );
        nodes
    }

    pub fn node_for_key(&self, key: &str) -> Option<NodeIdentity> {
        self.ring.read().node_for_key(key)
    }

    pub fn nodes(&self) -> Vec<NodeIdentity> {
        self.ring.read().nodes()
    }

    pub fn node_count(&self) -> usize {
        self.ring.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.read().is_empty()
    }
}
