use super::KvStore;
use crate::error::StationResult;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Slot {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Slot {
    fn new(value: Vec<u8>, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// In-process store. Expiry is checked on access; `purge_expired` drops
/// expired values nobody reads again.
#[derive(Default)]
pub struct MemoryKvStore {
    values: DashMap<String, Slot>,
    sets: DashMap<String, HashSet<String>>,
    reads: AtomicU64,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `get` calls served so far.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.values.iter().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored values, expired ones included.
    pub fn entry_count(&self) -> usize {
        self.values.len()
    }

    /// Removes every expired value and returns how many went.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.values.len();
        self.values.retain(|_, slot| !slot.is_expired(now));
        before.saturating_sub(self.values.len())
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> StationResult<Option<Vec<u8>>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();

        match self.values.get(key) {
            Some(slot) if !slot.is_expired(now) => return Ok(Some(slot.value.clone())),
            Some(_) => {}
            None => return Ok(None),
        }

        self.values.remove_if(key, |_, slot| slot.is_expired(now));
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> StationResult<()> {
        self.values.insert(key.to_string(), Slot::new(value, ttl));
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> StationResult<bool> {
        let now = Instant::now();
        match self.values.entry(key.to_string()) {
            Entry::Occupied(mut existing) => {
                if existing.get().is_expired(now) {
                    existing.insert(Slot::new(value, Some(ttl)));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(Slot::new(value, Some(ttl)));
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> StationResult<bool> {
        let now = Instant::now();
        Ok(self
            .values
            .remove(key)
            .is_some_and(|(_, slot)| !slot.is_expired(now)))
    }

    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> StationResult<bool> {
        let now = Instant::now();
        Ok(self
            .values
            .remove_if(key, |_, slot| !slot.is_expired(now) && slot.value == expected)
            .is_some())
    }

    async fn set_add(&self, set: &str, member: &str) -> StationResult<bool> {
        Ok(self
            .sets
            .entry(set.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    async fn set_remove(&self, set: &str, member: &str) -> StationResult<bool> {
        Ok(self
            .sets
            .get_mut(set)
            .map(|mut members| members.remove(member))
            .unwrap_or(false))
    }

    async fn set_members(&self, set: &str) -> StationResult<Vec<String>> {
        let mut members: Vec<String> = self
            .sets
            .get(set)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        Ok(members)
    }

    async fn delete_prefix(&self, prefix: &str) -> StationResult<usize> {
        let before = self.values.len();
        self.values.retain(|key, _| !key.starts_with(prefix));
        Ok(before - self.values.len())
    }

    async fn ping(&self) -> StationResult<()> {
        Ok(())
    }
}
