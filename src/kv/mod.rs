//! Shared Key-Value Store
//!
//! The cluster keeps three kinds of state in one shared store: the second
//! cache tier, membership records and the cluster-wide locks.
//!
//! ## Implementations
//! - **`memory`**: embedded store with lazily-expired TTLs. One node hosts it.
//! - **`remote`**: HTTP client for a store hosted by another node.
//! - **`handlers`**: the endpoint a hosting node exposes to its peers.

pub mod handlers;
pub mod memory;
pub mod protocol;
pub mod remote;


use crate::error::StationResult;
use async_trait::async_trait;
use std::time::Duration;

/// Primitives the cache, membership and lock layers need from the shared store.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> StationResult<Option<Vec<u8>>>;

    /// Unconditional write. `None` keeps the value until deleted.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> StationResult<()>;

    /// Writes only when the key is absent (or expired). Returns whether it wrote.
    async fn set_if_absent(&self, key: &str, value: Vec<u8>, ttl: Duration)
    -> StationResult<bool>;

    async fn delete(&self, key: &str) -> StationResult<bool>;

    /// Atomic compare-and-delete.
    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> StationResult<bool>;

    async fn set_add(&self, set: &str, member: &str) -> StationResult<bool>;

    async fn set_remove(&self, set: &str, member: &str) -> StationResult<bool>;

    async fn set_members(&self, set: &str) -> StationResult<Vec<String>>;

    /// Drops every value whose key starts with `prefix`.
    async fn delete_prefix(&self, prefix: &str) -> StationResult<usize>;

    async fn ping(&self) -> StationResult<()>;
}
