use crate::membership::types::{NodeId, NodeIdentity};

use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

pub const DEFAULT_VIRTUAL_NODES: usize = 150;

/// Position of `key` on the ring: the first 8 bytes of its SHA-256, big-endian.
///
/// Every node of a deployment must use the same function, otherwise they
/// disagree on which peers own a key.
pub fn ring_hash(key: &str) -> u64 {
    let digest = Sha256::digest(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

/// Consistent hash ring with virtual nodes.
///
/// Each physical node owns `virtual_nodes` positions, derived from
/// `"<node_id>#<i>"`. Two virtual keys hashing to the same position are
/// resolved in favour of the lower node id, the other claimant is kept aside
/// and restored if the winner leaves.
#[derive(Debug, Clone)]
pub struct HashRing {
    virtual_nodes: usize,
    ring: BTreeMap<u64, NodeIdentity>,
    positions: HashMap<NodeId, Vec<u64>>,
    shadowed: HashMap<u64, Vec<NodeIdentity>>,
}

impl HashRing {
    pub fn new(virtual_nodes: usize) -> Self {
        Self {
            virtual_nodes: virtual_nodes.max(1),
            ring: BTreeMap::new(),
            positions: HashMap::new(),
            shadowed: HashMap::new(),
        }
    }

    pub fn virtual_nodes(&self) -> usize {
        self.virtual_nodes
    }

    /// Inserts the node's virtual positions. Re-adding replaces them.
    pub fn add_node(&mut self, node: NodeIdentity) {
        if self.positions.contains_key(node.id()) {
            self.remove_node(node.id());
        }

        let mut hashes = Vec::with_capacity(self.virtual_nodes);
        for i in 0..self.virtual_nodes {
            let position = ring_hash(&format!("{}#{}", node.id(), i));
            self.claim(position, node.clone());
            hashes.push(position);
        }

        tracing::debug!(
            "Added node {} with {} virtual nodes",
            node.id(),
            self.virtual_nodes
        );
        self.positions.insert(node.id().clone(), hashes);
    }

    /// Deletes every position of the node. Returns whether it was present.
    pub fn remove_node(&mut self, node_id: &NodeId) -> bool {
        let Some(hashes) = self.positions.remove(node_id) else {
            return false;
        };

        for position in &hashes {
            self.release(*position, node_id);
        }

        tracing::debug!(
            "Removed node {} ({} virtual nodes)",
            node_id,
            hashes.len()
        );
        true
    }

    /// Walks clockwise from the key's position and returns up to `count`
    /// distinct physical nodes, wrapping around at most once.
    pub fn nodes_for_key(&self, key: &str, count: usize) -> Vec<NodeIdentity> {
        let mut selected: Vec<NodeIdentity> = Vec::with_capacity(count.min(self.len()));
        if count == 0 || self.ring.is_empty() {
            return selected;
        }

        let hash = ring_hash(key);
        let clockwise = self.ring.range(hash..).chain(self.ring.range(..hash));

        for (_, node) in clockwise {
            if selected.len() >= count {
                break;
            }
            if !selected.iter().any(|chosen| chosen.id() == node.id()) {
                selected.push(node.clone());
            }
        }

        selected
    }

    /// Primary owner of the key.
    pub fn node_for_key(&self, key: &str) -> Option<NodeIdentity> {
        self.nodes_for_key(key, 1).into_iter().next()
    }

    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.positions.contains_key(node_id)
    }

    pub fn nodes(&self) -> Vec<NodeIdentity> {
        let mut nodes: Vec<NodeIdentity> = Vec::with_capacity(self.positions.len());
        for (_, node) in self.ring.iter() {
            if !nodes.contains(node) {
                nodes.push(node.clone());
            }
        }
        for shadows in self.shadowed.values() {
            for node in shadows {
                if !nodes.contains(node) {
                    nodes.push(node.clone());
                }
            }
        }
        nodes.sort_by(|a, b| a.id().cmp(b.id()));
        nodes
    }

    /// Number of physical nodes.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Number of occupied ring positions.
    pub fn position_count(&self) -> usize {
        self.ring.len()
    }

    fn claim(&mut self, position: u64, node: NodeIdentity) {
        let current_wins = self
            .ring
            .get(&position)
            .map(|owner| owner.id() <= node.id());

        match current_wins {
            None => {
                self.ring.insert(position, node);
            }
            Some(true) => {
                self.shadowed.entry(position).or_default().push(node);
            }
            Some(false) => {
                if let Some(previous) = self.ring.insert(position, node) {
                    self.shadowed.entry(position).or_default().push(previous);
                }
            }
        }
    }

    fn release(&mut self, position: u64, node_id: &NodeId) {
        let owns = self
            .ring
            .get(&position)
            .is_some_and(|owner| owner.id() == node_id);

        if !owns {
            if let Some(shadows) = self.shadowed.get_mut(&position) {
                shadows.retain(|n| n.id() != node_id);
                if shadows.is_empty() {
                    self.shadowed.remove(&position);
                }
            }
            return;
        }

        self.ring.remove(&position);

        if let Some(mut shadows) = self.shadowed.remove(&position) {
            shadows.sort_by(|a, b| a.id().cmp(b.id()));
            let successor = shadows.remove(0);
            self.ring.insert(position, successor);
            if !shadows.is_empty() {
                self.shadowed.insert(position, shadows);
            }
        }
    }
}

impl Default for HashRing {
    fn default() -> Self {
        Self::new(DEFAULT_VIRTUAL_NODES)
    }
}
