//! Allocation tunables and numeric conventions.
//!
//! The runtime-adjustable knobs live in [`AllocParams`], owned by the
//! allocator and passed by reference into tenant computations. The numeric
//! sentinels in [`numeric`] encode trading conventions: a relinquish offer
//! of zero means *abort this deal*, and a compensation demand of `f32::MAX`
//! means *no one can afford this deal*.

use tracing::info;

/// Numeric epsilons and trade sentinels.
pub mod numeric {
    /// Below this, a `db_rcu` amount is considered zero.
    pub const DB_RCU_EPSILON: f64 = 0.0001;
    /// Below this, a `db_wcu` amount is considered zero.
    pub const DB_WCU_EPSILON: f64 = 0.0001;
    /// Below this, a `net_bw` amount is considered zero.
    pub const NET_BW_EPSILON: f64 = 0.0001;

    /// Miss ratios at or below this are treated as zero miss.
    pub const EPSILON: f64 = f64::EPSILON;

    /// A relinquish offer of this value aborts the deal: the tenant asks
    /// for cache but returns no bandwidth, which no one would accept.
    pub const RELINQ_ABORT_OFFER: f64 = 0.0;

    /// A compensation demand of this value aborts the deal: the tenant
    /// asks for more bandwidth than anyone could possibly afford.
    /// `f32::MAX` rather than `f64::MAX` so later arithmetic cannot
    /// overflow to infinity.
    pub const COMPEN_ABORT_OFFER: f64 = f32::MAX as f64;
}

/// Miss-ratio-curve estimation conventions.
pub mod mrc {
    /// When estimating between the first anchor and zero, treat a
    /// saturated left anchor (miss ratio 1) as saturated everywhere below.
    pub const DISABLE_INTERPOLATION_NEAR_INF: bool = false;
}

/// Hard bound on trading rounds per allocation.
pub const MAX_TRADE_ROUND: u32 = 10_000;

/// Stop trading when a deal improves the estimated ratio by less than this.
pub const MIN_IMPROVE_RATIO_DELTA: f64 = 0.0001;

/// Stop trading cache away once the predicted miss ratio exceeds this.
/// Tenants may have tail-latency constraints that very high miss ratios
/// would violate.
pub const MAX_MISS_RATIO: f64 = 1.0;

/// Stop trading for cache once the predicted miss ratio falls below this.
/// Near zero, estimation error dominates and results become unstable.
pub const MIN_MISS_RATIO: f64 = 0.0;

/// Fraction of a tenant's initial cache that stays reserved for it.
pub const RESERVED_RATIO: f64 = 0.5;

/// Runtime-adjustable allocation parameters.
///
/// Defaults match the production deployment: 4 MiB trading unit, 4 MiB
/// cache floor, 80 KiB/s bandwidth floor.
///
/// # Example
///
/// ```
/// use hopperkv::alloc::params::AllocParams;
///
/// let mut p = AllocParams::default();
/// assert_eq!(p.cache_delta(), 4 * 1024 * 1024);
/// p.set_cache_delta(10);
/// assert_eq!(p.cache_delta(), 10);
/// ```
#[derive(Debug, Clone)]
pub struct AllocParams {
    alloc_total_net_bw: bool,
    cache_delta: u64,
    min_cache_size: u64,
    min_db_rcu: f64,
    min_db_wcu: f64,
    min_net_bw: f64,
}

impl Default for AllocParams {
    fn default() -> Self {
        Self {
            alloc_total_net_bw: true,
            cache_delta: 4 * 1024 * 1024,
            min_cache_size: 4 * 1024 * 1024,
            min_db_rcu: 10.0,
            min_db_wcu: 10.0,
            min_net_bw: 80.0 * 1024.0,
        }
    }
}

impl AllocParams {
    /// Whether to allocate total network bandwidth (client plus storage
    /// legs). When false, only the client leg is allocated and throttled;
    /// the data plane only measures the client leg, so what to allocate is
    /// purely the allocator's choice.
    pub fn alloc_total_net_bw(&self) -> bool {
        self.alloc_total_net_bw
    }

    /// Unit of cache exchanged per trade round, in bytes.
    pub fn cache_delta(&self) -> u64 {
        self.cache_delta
    }

    /// Least cache a tenant can be traded down to, in bytes.
    pub fn min_cache_size(&self) -> u64 {
        self.min_cache_size
    }

    /// Least read capacity a tenant can hold.
    pub fn min_db_rcu(&self) -> f64 {
        self.min_db_rcu
    }

    /// Least write capacity a tenant can hold.
    pub fn min_db_wcu(&self) -> f64 {
        self.min_db_wcu
    }

    /// Least egress bandwidth a tenant can hold, in bytes/s.
    pub fn min_net_bw(&self) -> f64 {
        self.min_net_bw
    }

    pub fn set_alloc_total_net_bw(&mut self, v: bool) {
        info!(
            old = self.alloc_total_net_bw,
            new = v,
            "alloc params: alloc_total_net_bw"
        );
        self.alloc_total_net_bw = v;
    }

    pub fn set_cache_delta(&mut self, v: u64) {
        info!(old = self.cache_delta, new = v, "alloc params: cache_delta");
        self.cache_delta = v;
    }

    pub fn set_min_cache_size(&mut self, v: u64) {
        info!(
            old = self.min_cache_size,
            new = v,
            "alloc params: min_cache_size"
        );
        self.min_cache_size = v;
    }

    pub fn set_min_db_rcu(&mut self, v: f64) {
        info!(old = self.min_db_rcu, new = v, "alloc params: min_db_rcu");
        self.min_db_rcu = v;
    }

    pub fn set_min_db_wcu(&mut self, v: f64) {
        info!(old = self.min_db_wcu, new = v, "alloc params: min_db_wcu");
        self.min_db_wcu = v;
    }

    pub fn set_min_net_bw(&mut self, v: f64) {
        info!(old = self.min_net_bw, new = v, "alloc params: min_net_bw");
        self.min_net_bw = v;
    }
}
