//! Cluster-Wide Lock
//!
//! Mutual exclusion across nodes on top of the shared store: a lock is the
//! key `lock:<name>` holding the owner's node id, created with
//! set-if-absent and a TTL so a crashed holder cannot block the cluster for
//! longer than that TTL.

use crate::error::{StationError, StationResult};
use crate::kv::KvStore;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(30);
pub const RETRY_INTERVAL: Duration = Duration::from_millis(100);

const LOCK_PREFIX: &str = "lock:";

pub struct DistributedLock {
    kv: Arc<dyn KvStore>,
    node_id: String,
    ttl: Duration,
}

impl DistributedLock {
    pub fn new(kv: Arc<dyn KvStore>, node_id: &str, ttl: Duration) -> Self {
        Self {
            kv,
            node_id: node_id.to_string(),
            ttl,
        }
    }

    fn key(name: &str) -> String {
        format!("{}{}", LOCK_PREFIX, name)
    }

    /// Single attempt. Returns whether this node now holds the lock.
    pub async fn acquire(&self, name: &str) -> StationResult<bool> {
        let acquired = self
            .kv
            .set_if_absent(&Self::key(name), self.node_id.as_bytes().to_vec(), self.ttl)
            .await?;

        if acquired {
            tracing::debug!("Acquired lock {} by node {}", name, self.node_id);
        } else {
            tracing::debug!("Lock {} held by another node", name);
        }
        Ok(acquired)
    }

    /// Deletes the lock only if this node owns it.
    pub async fn release(&self, name: &str) -> StationResult<bool> {
        let released = self
            .kv
            .delete_if_equals(&Self::key(name), self.node_id.as_bytes())
            .await?;

        if released {
            tracing::debug!("Released lock {} by node {}", name, self.node_id);
        } else {
            tracing::warn!("Lock {} not released: not owned by {}", name, self.node_id);
        }
        Ok(released)
    }

    /// Polls `acquire` every 100 ms until it succeeds or `timeout` elapses.
    pub async fn try_acquire(&self, name: &str, timeout: Duration) -> StationResult<bool> {
        let deadline = Instant::now() + timeout;

        loop {
            if self.acquire(name).await? {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(RETRY_INTERVAL.min(deadline - now)).await;
        }
    }

    /// Runs `action` while holding the lock.
    ///
    /// Makes exactly one acquisition attempt and fails with `LockUnavailable`
    /// if another node holds the lock. The lock is released whether the action
    /// succeeds or fails; a cancelled action leaves it to expire via its TTL.
    pub async fn run_exclusive<T, F, Fut>(&self, name: &str, action: F) -> StationResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = StationResult<T>>,
    {
        if !self.acquire(name).await? {
            return Err(StationError::LockUnavailable(name.to_string()));
        }

        let result = action().await;

        if let Err(e) = self.release(name).await {
            tracing::warn!("Failed to release lock {}: {}", name, e);
        }

        result
    }
}

#[cfg(test)]
mod tests;
