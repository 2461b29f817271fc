use super::types::CacheEntry;

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Bookkeeping cost charged to every entry on top of key and payload.
pub const ENTRY_OVERHEAD: u64 = 128;

/// Approximate memory weight of an entry.
pub fn entry_weight(key: &str, entry: &CacheEntry) -> u64 {
    key.len() as u64 * 2 + entry.payload_len() as u64 + ENTRY_OVERHEAD
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LocalCacheStats {
    pub entries: u64,
    pub weight: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct Slot {
    entry: CacheEntry,
    weight: u64,
    inserted_at: Instant,
    /// Position in `order`.
    tick: u64,
}

#[derive(Default)]
struct LruState {
    index: HashMap<String, Slot>,
    /// Recency order, oldest first.
    order: BTreeMap<u64, String>,
    weight: u64,
    next_tick: u64,
}

impl LruState {
    fn bump(&mut self, key: &str) {
        let tick = self.next_tick;
        self.next_tick += 1;
        if let Some(slot) = self.index.get_mut(key) {
            self.order.remove(&slot.tick);
            slot.tick = tick;
            self.order.insert(tick, key.to_string());
        }
    }

    fn remove(&mut self, key: &str) -> Option<Slot> {
        let slot = self.index.remove(key)?;
        self.order.remove(&slot.tick);
        self.weight -= slot.weight;
        Some(slot)
    }

    fn pop_oldest(&mut self) -> bool {
        let Some((_, key)) = self.order.pop_first() else {
            return false;
        };
        if let Some(slot) = self.index.remove(&key) {
            self.weight -= slot.weight;
        }
        true
    }
}

/// In-process LRU tier, bounded by entry count and approximate bytes, with
/// expiry measured from the write.
pub struct LocalCache {
    state: Mutex<LruState>,
    max_entries: u64,
    max_weight: u64,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl LocalCache {
    pub fn new(max_entries: u64, max_weight: u64, ttl: Duration) -> Self {
        Self {
            state: Mutex::new(LruState::default()),
            max_entries: max_entries.max(1),
            max_weight,
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let mut state = self.state.lock();

        let expired = match state.index.get(key) {
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Some(slot) => slot.inserted_at.elapsed() >= self.ttl,
        };

        if expired {
            state.remove(key);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        state.bump(key);
        self.hits.fetch_add(1, Ordering::Relaxed);
        state.index.get(key).map(|slot| slot.entry.clone())
    }

    /// Inserts or replaces, evicting least recently used entries while over
    /// either bound. An entry heavier than the whole budget is not kept.
    pub fn put(&self, key: &str, entry: CacheEntry) {
        let weight = entry_weight(key, &entry);
        let mut state = self.state.lock();
        state.remove(key);

        if weight > self.max_weight {
            tracing::debug!("Not caching {} locally: too large ({} bytes)", key, weight);
            return;
        }

        let tick = state.next_tick;
        state.next_tick += 1;
        state.index.insert(
            key.to_string(),
            Slot {
                entry,
                weight,
                inserted_at: Instant::now(),
                tick,
            },
        );
        state.order.insert(tick, key.to_string());
        state.weight += weight;

        while state.index.len() as u64 > self.max_entries || state.weight > self.max_weight {
            if !state.pop_oldest() {
                break;
            }
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.state.lock().remove(key).is_some()
    }

    pub fn clear(&self) {
        *self.state.lock() = LruState::default();
    }

    pub fn len(&self) -> usize {
        self.state.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> LocalCacheStats {
        let state = self.state.lock();
        LocalCacheStats {
            entries: state.index.len() as u64,
            weight: state.weight,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
