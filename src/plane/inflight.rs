//! Inflight GET deduplication.
//!
//! An inflight request is a GET that has been submitted to storage but has
//! not completed. Concurrent GETs on the same key coalesce into one
//! upstream request: the first becomes the primary, the rest register as
//! dependents and are woken with a copy of the fetched value.
//!
//! `end_inflight` and `invalidate_inflight` look similar but differ in
//! who calls them: `end_inflight` is the primary GET settling its own
//! entry (and learning whether it may install the value), while
//! `invalidate_inflight` is a SET announcing that the cache now holds a
//! newer value, so the outstanding fetch must not overwrite it. The
//! invalidated fetch still completes and wakes its dependents, who may
//! observe the stale value; the pipeline is eventually consistent, not
//! linearizable.
//!
//! The identity check in `end_inflight` matters: a key can gain a *new*
//! inflight entry after its old one was invalidated (SET, then eviction,
//! then another cold GET), and the old fetch must not settle the new
//! entry.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::plane::client::ClientHandle;
use crate::plane::task::GetTask;

/// Whether concurrent misses on one key share a single upstream fetch.
pub const ENABLE_INFLIGHT_DEDUP: bool = true;

/// Registry of keys with an outstanding upstream read.
///
/// Owned and mutated by the command thread only. At most one entry per
/// key.
#[derive(Debug, Default)]
pub struct InflightRegistry {
    map: FxHashMap<String, Arc<GetTask>>,
}

impl InflightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` has an outstanding fetch.
    pub fn check_inflight(&self, key: &str) -> bool {
        if !ENABLE_INFLIGHT_DEDUP {
            return false;
        }
        self.map.contains_key(key)
    }

    /// Registers a waiter on `key`'s outstanding fetch.
    /// Only valid when [`check_inflight`](Self::check_inflight) returned
    /// `true`.
    pub fn add_dependent(&self, key: &str, client: ClientHandle) {
        debug_assert!(ENABLE_INFLIGHT_DEDUP);
        let task = self.map.get(key).expect("dependent requires an inflight task");
        task.add_dependent(client);
    }

    /// Registers a new outstanding fetch.
    /// Only valid when [`check_inflight`](Self::check_inflight) returned
    /// `false`.
    pub fn begin_inflight(&mut self, key: String, task: Arc<GetTask>) {
        if !ENABLE_INFLIGHT_DEDUP {
            return;
        }
        let prev = self.map.insert(key, task);
        debug_assert!(prev.is_none(), "at most one inflight entry per key");
    }

    /// Settles `key`'s entry when its fetch completes. Removes the entry
    /// only if it is still `task`; returns whether the cache may be
    /// updated from the fetched value.
    pub fn end_inflight(&mut self, key: &str, task: &Arc<GetTask>) -> bool {
        if !ENABLE_INFLIGHT_DEDUP {
            return true;
        }
        match self.map.get(key) {
            Some(current) if Arc::ptr_eq(current, task) => {
                self.map.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Marks `key`'s outstanding fetch (if any) stale. The fetch still
    /// completes and wakes dependents, but will not touch the cache.
    pub fn invalidate_inflight(&mut self, key: &str) {
        if !ENABLE_INFLIGHT_DEDUP {
            return;
        }
        self.map.remove(key);
    }

    /// Number of keys with outstanding fetches.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if no fetches are outstanding.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
