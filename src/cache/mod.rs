//! Tiered Artifact Cache
//!
//! The two cheapest tiers of the resolution order.
//!
//! - **`local`**: per-process LRU bounded by count and weight, with a write TTL.
//! - **`shared`**: entries in the cluster's shared store, TTL per artifact kind.
//! - **`tier`**: `TierCache`, reading local then shared with write-back, and
//!   writing both.

pub mod local;
pub mod shared;
pub mod tier;
pub mod types;


pub use local::{LocalCache, LocalCacheStats};
pub use shared::SharedCache;
pub use tier::TierCache;
pub use types::{ArtifactKind, CacheEntry, CacheKey};
