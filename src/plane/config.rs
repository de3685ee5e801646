//! The instance configuration plane.
//!
//! Config names are all lower-case, dotted. `policy.alloc_total_net_bw`
//! is fixed at instance construction: flipping it at runtime would
//! desynchronize the demand counters already accumulated under the old
//! accounting.

/// Ghost-cache memory-estimation calibration.
///
/// The report models `total_memory = base_overhead + bytes_per_key *
/// keys_count`, where the base covers startup allocations plus a fixed
/// figure that per-key amortization cannot absorb. Very small caches
/// carry extra overhead and get their own correction when enabled.
pub mod heuristic {
    pub const CALIB_FIXED: bool = true;
    pub const CALIB_ABNORMAL: bool = true;
    pub const CALIB_SMALL_CACHE: bool = false;

    /// Below this total, an abnormal per-key overhead falls back to the
    /// measured average kv size.
    pub const MIN_TOTAL_ALLOCATED: u64 = 20 * 1024 * 1024;
    pub const MAX_PER_KEY_OVERHEAD: f64 = 300.0;

    pub const MEM_FIXED_OVERHEAD: u64 = 1024 * 1024;
    pub const SMALL_CACHE_THRESHOLD: u64 = 4 * 1024 * 1024;
    pub const SMALL_CACHE_OVERHEAD: u64 = 2 * 1024 * 1024;
}

/// Mock-upstream latency. Not configurable for now.
pub const MOCK_DYNAMO_LATENCY_SEC: f64 = 0.005;

/// Storage worker polling period when idle.
pub const STORAGE_THREAD_POLL_FREQ_SEC: f64 = 0.001;

/// Runtime-adjustable instance configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// `dynamo.table`: upstream table name.
    pub dynamo_table: String,
    /// `dynamo.mock`: serve reads/writes from the mock upstream.
    pub dynamo_mock: bool,
    /// `cache.admit_write`: admit a SET for a non-resident key into the
    /// cache, on the bet that a freshly written value is read soon.
    pub admit_write: bool,
    /// `ghost.range`: tier spacing, in keys.
    pub ghost_tick: u32,
    /// `ghost.range`: smallest tier, in keys.
    pub ghost_min_tick: u32,
    /// `ghost.range`: largest tier, in keys.
    pub ghost_max_tick: u32,
    /// `policy.alloc_total_net_bw`: read-only at runtime.
    pub alloc_total_net_bw: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dynamo_table: "hare_table".into(),
            dynamo_mock: false,
            admit_write: true,
            ghost_tick: 1 << 15,
            ghost_min_tick: 1 << 15,
            ghost_max_tick: 1 << 20,
            alloc_total_net_bw: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = Config::default();
        assert_eq!(c.dynamo_table, "hare_table");
        assert!(!c.dynamo_mock);
        assert!(c.admit_write);
        assert_eq!(c.ghost_tick, 32 * 1024);
        assert_eq!(c.ghost_min_tick, 32 * 1024);
        assert_eq!(c.ghost_max_tick, 1024 * 1024);
        assert!(c.alloc_total_net_bw);
    }
}
