//! Bounded in-memory response cache
//!
//! Entries expire lazily after their TTL. When an insertion pushes the cache over capacity,
//! expired entries are swept first, then the oldest insertions are evicted until the cache is
//! back at capacity. Insertion order is tracked by an explicit sequence index, so eviction never
//! depends on hash map iteration order.

mod key;

pub use key::{generate_cache_key, QueryParams};

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;

use crate::clock::{Clock, SystemClock};

/// Default maximum number of entries.
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

struct CacheEntry<V> {
    value: V,
    stored_at_ms: i64,
    ttl_ms: i64,
    /// Position in the eviction order; kept on overwrite.
    seq: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now_ms: i64) -> bool {
        now_ms.saturating_sub(self.stored_at_ms) > self.ttl_ms
    }
}

struct CacheState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    /// Insertion sequence → key, oldest first.
    order: BTreeMap<u64, String>,
    next_seq: u64,
}

impl<V> CacheState<V> {
    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.seq);
        Some(entry)
    }

    fn sweep_expired(&mut self, now_ms: i64) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now_ms))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    fn evict_oldest(&mut self, capacity: usize) -> usize {
        let mut evicted = 0;
        while self.entries.len() > capacity {
            let Some((_, key)) = self.order.pop_first() else {
                break;
            };
            self.entries.remove(&key);
            evicted += 1;
        }
        evicted
    }
}

/// TTL cache of upstream responses keyed by [`generate_cache_key`] output.
pub struct ResponseCache<V = Value> {
    state: Mutex<CacheState<V>>,
    capacity: usize,
    clock: Arc<dyn Clock>,
}

impl<V: Clone> ResponseCache<V> {
    /// Create a cache with [`DEFAULT_CACHE_CAPACITY`] and the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY, Arc::new(SystemClock))
    }

    /// Create a cache holding at most `capacity` entries (minimum 1).
    #[must_use]
    pub fn with_capacity(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                order: BTreeMap::new(),
                next_seq: 0,
            }),
            capacity: capacity.max(1),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<V>> {
        // state stays consistent between statements, so a poisoned lock is still usable
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the live value for `key`, removing it if it has expired.
    pub fn get(&self, key: &str) -> Option<V> {
        let now_ms = self.clock.now_millis();
        let mut state = self.lock();

        let expired = state.entries.get(key)?.is_expired(now_ms);
        if expired {
            state.remove(key);
            log::trace!("Cache entry expired: {key}");
            return None;
        }
        state.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Insert or overwrite `key`.
    ///
    /// An overwrite refreshes value, timestamp and TTL but keeps the key's eviction position.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let now_ms = self.clock.now_millis();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let mut state = self.lock();

        if let Some(entry) = state.entries.get_mut(&key) {
            entry.value = value;
            entry.stored_at_ms = now_ms;
            entry.ttl_ms = ttl_ms;
            return;
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.order.insert(seq, key.clone());
        state.entries.insert(
            key,
            CacheEntry {
                value,
                stored_at_ms: now_ms,
                ttl_ms,
                seq,
            },
        );

        if state.entries.len() > self.capacity {
            let swept = state.sweep_expired(now_ms);
            let evicted = state.evict_oldest(self.capacity);
            log::debug!("Cache over capacity: swept {swept} expired, evicted {evicted} oldest");
        }
    }

    /// Remove every entry whose key starts with `prefix`. Returns the number removed.
    ///
    /// Keys have the shape `{company_id}:{endpoint}:...`, so `"12:partners"` never matches
    /// `"123:partners:all"`.
    pub fn invalidate(&self, prefix: &str) -> usize {
        let mut state = self.lock();
        let matching: Vec<String> = state
            .entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        for key in &matching {
            state.remove(key);
        }
        if !matching.is_empty() {
            log::debug!("Invalidated {} cache entries under {prefix}", matching.len());
        }
        matching.len()
    }

    /// Number of entries currently held, including expired ones not yet swept.
    pub fn size(&self) -> usize {
        self.lock().entries.len()
    }

    /// Maximum number of entries kept after an insertion.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every entry, for when the cached view of all companies is stale.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.order.clear();
    }
}

impl<V: Clone> Default for ResponseCache<V> {
    fn default() -> Self {
        Self::new()
    }
}
