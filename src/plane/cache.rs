//! The real cache: a byte-budgeted LRU of string values.
//!
//! ## Architecture
//!
//! ```text
//!   ┌──────────────────────────────────────────────────────────────┐
//!   │                         CacheStore                           │
//!   │                                                              │
//!   │  index: FxHashMap<String, SlotId>                            │
//!   │  entries: IntrusiveList<CacheEntry { key, value, weight }>   │
//!   │                                                              │
//!   │  head ─► [hot] ◄──► [..] ◄──► [cold] ◄── tail                │
//!   │                                                              │
//!   │  used_bytes = Σ entry.weight   (weight = mem_estimate)       │
//!   │  insert over budget ──► evict from tail until it fits        │
//!   └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Per-entry weight is the estimated resident cost
//! ([`mem_estimate::estimate`]), not the raw value length, so the byte
//! budget tracks what the process actually pays. Unlike a store that
//! rejects oversized inserts, this one sheds LRU entries to make room:
//! the budget is a target handed down by the allocator, and the correct
//! response to shrinking it is eviction, not an error.

use rustc_hash::FxHashMap;

use crate::ds::{IntrusiveList, SlotId};
use crate::ghost::mem_estimate;

#[derive(Debug)]
struct CacheEntry {
    key: String,
    value: String,
    weight: u64,
}

/// Point-in-time counters, mirroring the store's lifetime activity.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub updates: u64,
    pub removes: u64,
    pub evictions: u64,
}

/// Byte-budgeted LRU cache of string values.
///
/// Single-threaded: the command thread owns it exclusively.
///
/// # Example
///
/// ```
/// use hopperkv::plane::cache::CacheStore;
///
/// let mut cache = CacheStore::new(1024 * 1024);
/// cache.insert("k", "v", true);
/// assert_eq!(cache.get("k"), Some("v".to_string()));
/// assert_eq!(cache.len(), 1);
/// ```
#[derive(Debug)]
pub struct CacheStore {
    index: FxHashMap<String, SlotId>,
    entries: IntrusiveList<CacheEntry>,
    capacity_bytes: u64,
    used_bytes: u64,
    metrics: CacheMetrics,
}

impl CacheStore {
    /// Creates a cache with the given byte budget.
    pub fn new(capacity_bytes: u64) -> Self {
        Self {
            index: FxHashMap::default(),
            entries: IntrusiveList::new(),
            capacity_bytes,
            used_bytes: 0,
            metrics: CacheMetrics::default(),
        }
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Estimated resident bytes of all entries.
    pub fn used_bytes(&self) -> u64 {
        self.used_bytes
    }

    /// Configured byte budget.
    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    /// Lifetime activity counters.
    pub fn metrics(&self) -> CacheMetrics {
        self.metrics
    }

    /// Returns `true` if `key` is resident, without touching recency.
    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Looks up `key`, promoting it to MRU. Records a hit or miss.
    pub fn get(&mut self, key: &str) -> Option<String> {
        match self.index.get(key).copied() {
            Some(id) => {
                self.entries.move_to_front(id);
                self.metrics.hits += 1;
                Some(self.entries.get(id).expect("indexed entry is live").value.clone())
            }
            None => {
                self.metrics.misses += 1;
                None
            }
        }
    }

    /// Looks up `key` without touching recency or metrics.
    pub fn peek(&self, key: &str) -> Option<&str> {
        let id = self.index.get(key)?;
        Some(self.entries.get(*id)?.value.as_str())
    }

    /// Inserts or overwrites `key`. With `touch` false an overwrite keeps
    /// the entry's recency (a write the policy chose not to admit as a
    /// recency signal); fresh inserts always enter at MRU.
    ///
    /// Evicts from the LRU tail until the new total fits the budget.
    pub fn insert(&mut self, key: &str, value: &str, touch: bool) {
        let weight = u64::from(mem_estimate::estimate(key.len(), value.len()));
        match self.index.get(key).copied() {
            Some(id) => {
                if touch {
                    self.entries.move_to_front(id);
                }
                let entry = self.entries.get_mut(id).expect("indexed entry is live");
                self.used_bytes = self.used_bytes - entry.weight + weight;
                entry.value = value.to_string();
                entry.weight = weight;
                self.metrics.updates += 1;
            }
            None => {
                let id = self.entries.push_front(CacheEntry {
                    key: key.to_string(),
                    value: value.to_string(),
                    weight,
                });
                self.index.insert(key.to_string(), id);
                self.used_bytes += weight;
                self.metrics.inserts += 1;
            }
        }
        self.evict_to_fit();
    }

    /// Removes `key`; returns `true` if it was resident.
    pub fn remove(&mut self, key: &str) -> bool {
        let Some(id) = self.index.remove(key) else {
            return false;
        };
        let entry = self.entries.remove(id).expect("indexed entry is live");
        self.used_bytes -= entry.weight;
        self.metrics.removes += 1;
        true
    }

    /// Adjusts the byte budget, evicting as needed. Driven by
    /// `RESRC.SET`.
    pub fn set_capacity(&mut self, capacity_bytes: u64) {
        self.capacity_bytes = capacity_bytes;
        self.evict_to_fit();
    }

    fn evict_to_fit(&mut self) {
        while self.used_bytes > self.capacity_bytes {
            let Some((_, entry)) = self.entries.pop_back() else {
                break;
            };
            self.index.remove(&entry.key);
            self.used_bytes -= entry.weight;
            self.metrics.evictions += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_weight(key: &str, value: &str) -> u64 {
        u64::from(mem_estimate::estimate(key.len(), value.len()))
    }

    #[test]
    fn insert_get_roundtrip() {
        let mut cache = CacheStore::new(10_000);
        cache.insert("k1", "hello", true);
        assert_eq!(cache.get("k1"), Some("hello".to_string()));
        assert_eq!(cache.get("missing"), None);
        assert_eq!(cache.metrics().hits, 1);
        assert_eq!(cache.metrics().misses, 1);
    }

    #[test]
    fn weight_accounting_tracks_updates() {
        let mut cache = CacheStore::new(10_000);
        cache.insert("k", "aa", true);
        assert_eq!(cache.used_bytes(), entry_weight("k", "aa"));
        cache.insert("k", &"b".repeat(100), true);
        assert_eq!(cache.used_bytes(), entry_weight("k", &"b".repeat(100)));
        cache.remove("k");
        assert_eq!(cache.used_bytes(), 0);
    }

    #[test]
    fn eviction_sheds_lru_first() {
        // room for roughly two small entries
        let budget = entry_weight("k1", "v") + entry_weight("k2", "v") + 10;
        let mut cache = CacheStore::new(budget);
        cache.insert("k1", "v", true);
        cache.insert("k2", "v", true);
        // touch k1 so k2 is the LRU
        cache.get("k1");
        cache.insert("k3", "v", true);
        assert!(cache.contains("k1"));
        assert!(!cache.contains("k2"));
        assert!(cache.contains("k3"));
        assert_eq!(cache.metrics().evictions, 1);
    }

    #[test]
    fn no_touch_overwrite_keeps_recency() {
        let budget = entry_weight("k1", "v") + entry_weight("k2", "v") + 10;
        let mut cache = CacheStore::new(budget);
        cache.insert("k1", "v", true);
        cache.insert("k2", "v", true);
        // overwrite k1 without touching; k1 remains the LRU
        cache.insert("k1", "w", false);
        cache.insert("k3", "v", true);
        assert!(!cache.contains("k1"));
        assert!(cache.contains("k2"));
    }

    #[test]
    fn shrinking_capacity_evicts_down() {
        let mut cache = CacheStore::new(100_000);
        for i in 0..50 {
            cache.insert(&format!("key-{i}"), "some value", true);
        }
        assert_eq!(cache.len(), 50);
        cache.set_capacity(cache.used_bytes() / 2);
        assert!(cache.used_bytes() <= cache.capacity_bytes());
        assert!(cache.len() < 50);
        // the survivors are the most recently inserted
        assert!(cache.contains("key-49"));
        assert!(!cache.contains("key-0"));
    }

    #[test]
    fn peek_does_not_touch() {
        let budget = entry_weight("k1", "v") + entry_weight("k2", "v") + 10;
        let mut cache = CacheStore::new(budget);
        cache.insert("k1", "v", true);
        cache.insert("k2", "v", true);
        assert_eq!(cache.peek("k1"), Some("v"));
        cache.insert("k3", "v", true);
        // k1 was peeked, not touched, so it was still the LRU
        assert!(!cache.contains("k1"));
    }
}
