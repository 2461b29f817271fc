//! Consistent Hash Ring
//!
//! Routes a cache key to an ordered set of candidate nodes. Every node
//! computes the same answer for the same membership, which is what lets the
//! peer tier ask the nodes most likely to hold an artifact first.
//!
//! - **`hash_ring`**: the ring itself (virtual nodes, clockwise walk).
//! - **`manager`**: lock-protected ring shared by the membership refresher
//!   (writer) and the peer coordinator (reader).

pub mod hash_ring;
pub mod manager;

pub use hash_ring::{DEFAULT_VIRTUAL_NODES, HashRing, ring_hash};
pub use manager::{RingDelta, RingManager};
