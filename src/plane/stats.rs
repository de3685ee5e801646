//! Request statistics and the resource cost model.
//!
//! The counters feed two consumers: the `STATS` report, and the
//! controller that derives each tenant's demand vector. The `*_if_miss` /
//! `*_if_hit` counters are counterfactuals: what the workload *would*
//! consume if every read missed (the cacheless demand vector) or hit,
//! independent of what actually happened.
//!
//! The cost model is a simple estimator. Capacity units are billed on
//! item size, which exceeds `key + value` in the real store; the
//! divisors approximate the provisioned-table billing granularity.

/// Read capacity units for one item.
pub fn kv_to_rcu(key_size: usize, val_size: usize) -> u64 {
    ((key_size + val_size) / 4096 + 1) as u64
}

/// Write capacity units for one item.
pub fn kv_to_wcu(key_size: usize, val_size: usize) -> u64 {
    ((key_size + val_size) / 1024 + 1) as u64
}

/// Client-leg bandwidth for a GET reply.
pub fn kv_to_net_get_client(key_size: usize, val_size: usize) -> u64 {
    (key_size + val_size) as u64
}

/// Client-leg bandwidth for a SET.
pub fn kv_to_net_set_client(key_size: usize, val_size: usize) -> u64 {
    (key_size + val_size) as u64
}

/// Storage-leg bandwidth for a GET. The store returns whole items; the
/// value dominates, so key + value approximates the transfer.
pub fn kv_to_net_get_storage(key_size: usize, val_size: usize) -> u64 {
    (key_size + val_size) as u64
}

/// Storage-leg bandwidth for a SET.
pub fn kv_to_net_set_storage(key_size: usize, val_size: usize) -> u64 {
    (key_size + val_size) as u64
}

// decay rate for the running average of key-value size
const KV_SIZE_DECAY_RATE: f64 = 0.99;

/// Per-instance request and resource counters.
#[derive(Debug, Default, Clone)]
pub struct Stats {
    /// All requests, reads and writes.
    pub req_cnt: u64,
    /// Read hits.
    pub hit_cnt: u64,
    /// Read misses.
    pub miss_cnt: u64,

    // counterfactual demand accounting
    pub db_rcu_consump_if_miss: u64,
    pub net_bw_consump_if_miss: u64,
    pub net_bw_consump_if_hit: u64,

    // actual consumption
    pub db_rcu_consump: u64,
    pub db_wcu_consump: u64,
    pub net_bw_consump: u64,

    /// Decayed running average of key + value size; calibrates the
    /// memory-estimation heuristics.
    pub avg_kv_size: f64,
}

/// Memory figures handed to the ghost statistics report.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemStats {
    pub total_allocated: u64,
    pub keys_count: u64,
    pub startup_allocated: u64,
    pub clients_normal: u64,
    pub functions_caches: u64,
    pub avg_kv_size: f64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accounts a finished read.
    pub fn record_get_done(
        &mut self,
        key_size: usize,
        val_size: usize,
        is_miss: bool,
        alloc_total_net_bw: bool,
    ) {
        self.req_cnt += 1;
        if is_miss {
            self.miss_cnt += 1;
        } else {
            self.hit_cnt += 1;
        }

        let db_rcu = kv_to_rcu(key_size, val_size);
        self.db_rcu_consump_if_miss += db_rcu;
        if is_miss {
            self.db_rcu_consump += db_rcu;
        }

        let net_client = kv_to_net_get_client(key_size, val_size);
        self.net_bw_consump_if_miss += net_client;
        self.net_bw_consump_if_hit += net_client;
        self.net_bw_consump += net_client;

        if alloc_total_net_bw {
            let net_storage = kv_to_net_get_storage(key_size, val_size);
            self.net_bw_consump_if_miss += net_storage;
            // a hit never touches the storage leg
            if is_miss {
                self.net_bw_consump += net_storage;
            }
        }

        self.update_avg_kv_size(key_size + val_size);
    }

    /// Accounts a finished write.
    pub fn record_set_done(
        &mut self,
        key_size: usize,
        val_size: usize,
        alloc_total_net_bw: bool,
        admit_write: bool,
    ) {
        self.req_cnt += 1;
        self.db_wcu_consump += kv_to_wcu(key_size, val_size);

        let net_client = kv_to_net_set_client(key_size, val_size);
        self.net_bw_consump_if_miss += net_client;
        self.net_bw_consump_if_hit += net_client;
        self.net_bw_consump += net_client;

        if alloc_total_net_bw {
            let net_storage = kv_to_net_set_storage(key_size, val_size);
            self.net_bw_consump_if_miss += net_storage;
            self.net_bw_consump_if_hit += net_storage;
            self.net_bw_consump += net_storage;
        }

        // only writes that land in the cache inform its per-key sizing
        if admit_write {
            self.update_avg_kv_size(key_size + val_size);
        }
    }

    fn update_avg_kv_size(&mut self, curr: usize) {
        let curr = curr as f64;
        self.avg_kv_size = if self.avg_kv_size != 0.0 {
            self.avg_kv_size * KV_SIZE_DECAY_RATE + curr * (1.0 - KV_SIZE_DECAY_RATE)
        } else {
            curr
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_model_granularity() {
        assert_eq!(kv_to_rcu(0, 0), 1);
        assert_eq!(kv_to_rcu(96, 4000), 2);
        assert_eq!(kv_to_wcu(0, 0), 1);
        assert_eq!(kv_to_wcu(24, 1000), 2);
        assert_eq!(kv_to_net_get_client(16, 500), 516);
    }

    #[test]
    fn get_miss_bills_rcu_and_both_net_legs() {
        let mut s = Stats::new();
        s.record_get_done(16, 500, true, true);
        assert_eq!(s.req_cnt, 1);
        assert_eq!(s.miss_cnt, 1);
        assert_eq!(s.db_rcu_consump, 1);
        assert_eq!(s.net_bw_consump, 516 * 2);
        assert_eq!(s.net_bw_consump_if_hit, 516);
        assert_eq!(s.net_bw_consump_if_miss, 516 * 2);
    }

    #[test]
    fn get_hit_bills_client_leg_only() {
        let mut s = Stats::new();
        s.record_get_done(16, 500, false, true);
        assert_eq!(s.hit_cnt, 1);
        assert_eq!(s.db_rcu_consump, 0);
        assert_eq!(s.db_rcu_consump_if_miss, 1);
        assert_eq!(s.net_bw_consump, 516);
    }

    #[test]
    fn set_bills_wcu_and_net() {
        let mut s = Stats::new();
        s.record_set_done(16, 500, false, true);
        assert_eq!(s.req_cnt, 1);
        assert_eq!(s.db_wcu_consump, 1);
        assert_eq!(s.net_bw_consump, 516);
    }

    #[test]
    fn avg_kv_size_seeds_then_decays() {
        let mut s = Stats::new();
        s.record_get_done(10, 90, false, false);
        assert_eq!(s.avg_kv_size, 100.0);
        s.record_get_done(10, 190, false, false);
        let expected = 100.0 * 0.99 + 200.0 * 0.01;
        assert!((s.avg_kv_size - expected).abs() < 1e-9);
    }

    #[test]
    fn non_admitted_writes_skip_avg() {
        let mut s = Stats::new();
        s.record_set_done(10, 90, false, false);
        assert_eq!(s.avg_kv_size, 0.0);
    }
}
