//! The HARE allocator.
//!
//! ## Algorithm
//!
//! ```text
//!   do_alloc()
//!     │
//!     ├─► ≤ 1 tenant? ── yes ──► return 0 (nothing to schedule)
//!     │
//!     ├─► memshare pass (optional, mutually exclusive with harvest)
//!     │     move one cache delta per round from the cheapest donor to
//!     │     the hungriest receiver until no move is profitable
//!     │
//!     ├─► collect idle: avail ← Σ tenant.collect_idle()
//!     │
//!     ├─► harvest (optional)
//!     │     while bottleneck is a tradable dimension:
//!     │       pick relinquisher (max quote) and compensator (min quote)
//!     │       evaluate hypothetical improvement ratio
//!     │       commit the deal or stop
//!     │
//!     └─► redistribute avail
//!           conserving:     proportional to remaining shares, avail ← 0
//!           non-conserving: scale everyone by (1 + improvement ratio)
//! ```
//!
//! The improvement ratio is `avail / (total − avail)` under min-ratio
//! division: the factor by which every tenant's dominant resource could
//! grow if the slack were handed back proportionally.
//!
//! ## Invariants
//!
//! - Conserving redistribution preserves the total stateless allocation to
//!   within the component epsilons.
//! - No trade moves a tenant's cache below `min_cache_size`, and memshare
//!   donations additionally respect the tenant's reserved floor.
//! - With a single tenant, or with fully symmetric tenants, `do_alloc` is
//!   a fixed point.

use tracing::{info, trace};

use crate::alloc::mrc::MissRatioCurve;
use crate::alloc::params::{AllocParams, MAX_TRADE_ROUND, MIN_IMPROVE_RATIO_DELTA};
use crate::alloc::resrc::{ResrcVec, StatelessResrcVec};
use crate::alloc::tenant::Tenant;
use crate::error::MrcError;

/// Which phases an allocation round runs.
///
/// `harvest` and `memshare` are mutually exclusive: harvest trades cache
/// against the bottleneck stateless resource, memshare reallocates cache
/// purely by miss-ratio gradient.
#[derive(Debug, Clone, Copy)]
pub struct AllocPolicy {
    /// Enable the cache-for-bandwidth harvest phase. When disabled the
    /// allocator degrades to cache-unaware DRF.
    pub harvest: bool,
    /// Conserving redistribution: hand all slack back proportionally.
    /// When disabled some stateless resources may stay unallocated.
    pub conserving: bool,
    /// Run the Memshare cache-allocation pass instead of harvest.
    pub memshare: bool,
}

impl Default for AllocPolicy {
    fn default() -> Self {
        Self {
            harvest: true,
            conserving: true,
            memshare: false,
        }
    }
}

/// The multi-tenant allocation engine.
///
/// # Example
///
/// ```
/// use hopperkv::alloc::{Allocator, MissRatioCurve, ResrcVec, StatelessResrcVec};
///
/// let mut a = Allocator::default();
/// a.set_alloc_total_net_bw(false);
/// a.set_cache_delta(10);
/// a.set_min_cache_size(10);
///
/// let mrc = MissRatioCurve::new(vec![10, 20, 40, 80, 100], vec![0.9, 0.8, 0.7, 0.6, 0.4]);
/// a.add_tenant(
///     StatelessResrcVec::new(0.5, 0.5, 4.0),
///     ResrcVec::new(20, 2.0, 1.2, 6.0),
///     mrc,
///     0.0,
/// )
/// .unwrap();
///
/// // a single tenant has nothing to trade with
/// assert_eq!(a.do_alloc(), 0.0);
/// assert_eq!(a.get_alloc_result()[0], ResrcVec::new(20, 2.0, 1.2, 6.0));
/// ```
#[derive(Debug, Default)]
pub struct Allocator {
    policy: AllocPolicy,
    params: AllocParams,
    tenants: Vec<Tenant>,
    total_resrc: ResrcVec,
}

impl Allocator {
    /// Creates an allocator with the given phase policy and default
    /// parameters.
    pub fn new(policy: AllocPolicy) -> Self {
        assert!(
            !(policy.harvest && policy.memshare),
            "harvest and memshare are mutually exclusive"
        );
        Self {
            policy,
            params: AllocParams::default(),
            tenants: Vec::new(),
            total_resrc: ResrcVec::default(),
        }
    }

    /// Registers a tenant and returns its index.
    ///
    /// # Errors
    ///
    /// Returns [`MrcError::MalformedCurve`] if the curve fails its sanity
    /// check; a broken curve would poison every later round.
    pub fn add_tenant(
        &mut self,
        demand_cacheless: StatelessResrcVec,
        base_resrc: ResrcVec,
        mrc: MissRatioCurve,
        net_bw_alpha: f64,
    ) -> Result<usize, MrcError> {
        mrc.check_sanity()?;
        let t_idx = self.tenants.len();
        self.total_resrc += base_resrc;
        self.tenants
            .push(Tenant::new(t_idx, demand_cacheless, base_resrc, mrc, net_bw_alpha));
        trace!(
            t_idx,
            db_rcu = demand_cacheless.db_rcu,
            db_wcu = demand_cacheless.db_wcu,
            net_bw = demand_cacheless.net_bw,
            net_bw_alpha,
            "tenant registered"
        );
        Ok(t_idx)
    }

    /// Returns a tenant by index.
    pub fn get_tenant(&self, t_idx: usize) -> &Tenant {
        &self.tenants[t_idx]
    }

    /// Returns every tenant's current allocation.
    pub fn get_alloc_result(&self) -> Vec<ResrcVec> {
        self.tenants.iter().map(|t| t.resrc()).collect()
    }

    /// Runs one allocation round and returns the improvement ratio.
    pub fn do_alloc(&mut self) -> f64 {
        let mut improve_ratio = 0.0;

        info!(
            harvest = self.policy.harvest,
            conserving = self.policy.conserving,
            memshare = self.policy.memshare,
            "allocation round"
        );

        // nothing to schedule if there is at most one tenant
        if self.tenants.len() <= 1 {
            return improve_ratio;
        }

        if self.policy.memshare {
            self.do_memshare();
        }

        // collect idle resources
        let mut resrc_avail = StatelessResrcVec::default();
        for t in &mut self.tenants {
            let idle = t.collect_idle(&self.params);
            trace!(
                t_idx = t.t_idx,
                db_rcu = idle.db_rcu,
                db_wcu = idle.db_wcu,
                net_bw = idle.net_bw,
                "idle resources collected"
            );
            resrc_avail += idle;
        }
        trace!(
            db_rcu = resrc_avail.db_rcu,
            db_wcu = resrc_avail.db_wcu,
            net_bw = resrc_avail.net_bw,
            "total idle resources"
        );

        if self.policy.harvest {
            self.do_harvest(&mut resrc_avail);
        }

        trace!(
            db_rcu = resrc_avail.db_rcu,
            db_wcu = resrc_avail.db_wcu,
            net_bw = resrc_avail.net_bw,
            "resources to redistribute"
        );

        if !resrc_avail.is_almost_empty() {
            improve_ratio = self.do_redistribute(&mut resrc_avail);
        }

        for t in &self.tenants {
            t.report(false, &self.params);
        }
        improve_ratio
    }

    // Harvest storage reads and bandwidth by relocating cache between
    // tenants. `resrc_avail` accumulates the profit of every committed
    // deal.
    fn do_harvest(&mut self, resrc_avail: &mut StatelessResrcVec) {
        let (mut prev_ratio, mut is_rcu_bottleneck, mut is_net_bottleneck) =
            self.estimate_bottleneck(resrc_avail);

        for t in &mut self.tenants {
            t.update_rcu_net_delta(&self.params);
        }

        let mut trade_round: u32 = 0;

        while trade_round < MAX_TRADE_ROUND {
            let (relinq_idx, compen_idx) = if is_rcu_bottleneck {
                let r = argmax_by(&self.tenants, Tenant::rcu_delta_relinq);
                let c = argmin_excluding(&self.tenants, Tenant::rcu_delta_compen, None);
                (r, c)
            } else if self.params.alloc_total_net_bw() && is_net_bottleneck {
                // bandwidth is only tradable when it is globally allocated
                let r = argmax_by(&self.tenants, Tenant::net_delta_relinq);
                let c = argmin_excluding(&self.tenants, Tenant::net_delta_compen, None);
                (r, c)
            } else {
                // neither cache-correlated resource is the bottleneck, so
                // no cache move can raise the improvement ratio
                break;
            };

            // in a rare case the best relinquisher and compensator are the
            // same tenant; take the second-best compensator instead
            let compen_idx = if relinq_idx == compen_idx {
                if is_rcu_bottleneck {
                    argmin_excluding(&self.tenants, Tenant::rcu_delta_compen, Some(relinq_idx))
                } else {
                    argmin_excluding(&self.tenants, Tenant::net_delta_compen, Some(relinq_idx))
                }
            } else {
                compen_idx
            };

            let rcu_delta_relinq = self.tenants[relinq_idx].rcu_delta_relinq();
            let net_delta_relinq = self.tenants[relinq_idx].net_delta_relinq();
            let rcu_delta_compen = self.tenants[compen_idx].rcu_delta_compen();
            let net_delta_compen = self.tenants[compen_idx].net_delta_compen();

            trace!(
                relinq = relinq_idx,
                compen = compen_idx,
                rcu_delta_relinq,
                net_delta_relinq,
                rcu_delta_compen,
                net_delta_compen,
                "deal candidates"
            );

            let mut resrc_if_deal = *resrc_avail;
            resrc_if_deal.db_rcu += rcu_delta_relinq - rcu_delta_compen;
            resrc_if_deal.net_bw += net_delta_relinq - net_delta_compen;

            // re-estimating against the hypothetical pool is what makes
            // the loop converge
            let (curr_ratio, rcu_bn, net_bn) = self.estimate_bottleneck(&resrc_if_deal);
            is_rcu_bottleneck = rcu_bn;
            is_net_bottleneck = net_bn;
            if curr_ratio - prev_ratio < MIN_IMPROVE_RATIO_DELTA {
                trace!(
                    prev = prev_ratio,
                    curr = curr_ratio,
                    "deal cancelled: improvement gain too low"
                );
                break;
            }

            prev_ratio = curr_ratio;
            *resrc_avail = resrc_if_deal;

            trace!(
                rcu_profit = rcu_delta_relinq - rcu_delta_compen,
                net_profit = net_delta_relinq - net_delta_compen,
                estimated_improve_ratio = curr_ratio,
                "deal committed"
            );

            let (t_relinq, t_compen) = two_muts(&mut self.tenants, relinq_idx, compen_idx);
            Tenant::relocate_resrc(
                t_relinq,
                t_compen,
                rcu_delta_relinq,
                rcu_delta_compen,
                net_delta_relinq,
                net_delta_compen,
                &self.params,
            );

            // only the two parties' quotes changed
            self.tenants[relinq_idx].update_rcu_net_delta(&self.params);
            self.tenants[compen_idx].update_rcu_net_delta(&self.params);

            trade_round += 1;
        }

        info!(trade_round, "harvest trading finished");
    }

    // Distribute `resrc_avail` across tenants; returns the improvement
    // ratio relative to the remaining allocations.
    fn do_redistribute(&mut self, resrc_avail: &mut StatelessResrcVec) -> f64 {
        let resrc_sum = self.total_resrc.stateless - *resrc_avail;
        debug_assert!(
            Tenant::aggregate_resrc(&self.tenants).is_almost_equal(&resrc_sum),
            "tenant allocations drifted from the tracked total"
        );
        let improve_ratio = resrc_avail.min_ratio(&resrc_sum);

        if self.policy.conserving {
            let denom = self.tenants.len();
            for t in &mut self.tenants {
                t.scale_stateless_resrc_by_owned(resrc_avail, &resrc_sum, denom);
            }
            trace!(improve_ratio, "conserving redistribution");
            *resrc_avail = StatelessResrcVec::default();
        } else {
            let scale_factor = 1.0 + improve_ratio;
            for t in &mut self.tenants {
                t.scale_stateless_resrc(scale_factor);
            }
            // recompute the leftover slack
            let resrc_sum = Tenant::aggregate_resrc(&self.tenants);
            *resrc_avail = self.total_resrc.stateless - resrc_sum;
        }
        improve_ratio
    }

    // Memshare's cache allocation: repeatedly move one cache delta from
    // the donor with the smallest miss-ratio loss to the receiver with the
    // largest miss-ratio gain.
    fn do_memshare(&mut self) {
        let mut trade_round: u32 = 0;
        loop {
            for t in &mut self.tenants {
                t.update_mr_delta(&self.params);
            }

            // Receiver fold: the incumbent's mr_inc is compared against
            // the candidate's mr_dec. Asymmetric on purpose; a symmetric
            // key would compare mr_inc on both sides.
            let mut receiver = 0;
            for j in 1..self.tenants.len() {
                if self.tenants[receiver].mr_inc_if_more_cache()
                    < self.tenants[j].mr_dec_if_less_cache()
                {
                    receiver = j;
                }
            }

            // the donor is the cheapest tenant that may still donate; the
            // cheapest overall may be pinned by its reserved floor
            let mut order: Vec<usize> = (0..self.tenants.len()).collect();
            order.sort_by(|&a, &b| {
                self.tenants[a]
                    .mr_dec_if_less_cache()
                    .partial_cmp(&self.tenants[b].mr_dec_if_less_cache())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            let donator = order.into_iter().find(|&j| {
                j != receiver && self.tenants[j].can_donate(self.params.cache_delta())
            });

            let Some(donator) = donator else {
                info!("memshare fails to find a donator");
                break;
            };

            let mr_inc = self.tenants[receiver].mr_inc_if_more_cache();
            let mr_dec = self.tenants[donator].mr_dec_if_less_cache();

            if mr_inc > mr_dec {
                let (t_recv, t_don) = two_muts(&mut self.tenants, receiver, donator);
                Tenant::relocate_cache(t_recv, t_don, self.params.cache_delta());
                trace!(
                    donator,
                    receiver,
                    mr_dec,
                    mr_inc,
                    "memshare relocated one cache delta"
                );
                trade_round += 1;
            } else {
                trace!(donator, receiver, mr_dec, mr_inc, "memshare not profitable");
                break;
            }
        }
        info!(trade_round, "memshare trading finished");
    }

    // Improvement ratio of the hypothetical redistribution of `avail`,
    // plus which dimension is the minimizer. The equality tests mirror the
    // min-ratio computation exactly, so ties resolve to both flags.
    fn estimate_bottleneck(&self, resrc_avail: &StatelessResrcVec) -> (f64, bool, bool) {
        let resrc_sum = self.total_resrc.stateless - *resrc_avail;
        let ratio = resrc_avail.min_ratio(&resrc_sum);
        let is_rcu = ratio == resrc_avail.db_rcu / resrc_sum.db_rcu;
        let is_net = ratio == resrc_avail.net_bw / resrc_sum.net_bw;
        trace!(
            avail_rcu = resrc_avail.db_rcu,
            avail_wcu = resrc_avail.db_wcu,
            avail_net = resrc_avail.net_bw,
            sum_rcu = resrc_sum.db_rcu,
            sum_wcu = resrc_sum.db_wcu,
            sum_net = resrc_sum.net_bw,
            ratio,
            is_rcu,
            is_net,
            "bottleneck estimate"
        );
        (ratio, is_rcu, is_net)
    }

    // -- parameter plumbing -------------------------------------------------

    pub fn alloc_total_net_bw(&self) -> bool {
        self.params.alloc_total_net_bw()
    }

    pub fn set_alloc_total_net_bw(&mut self, v: bool) {
        self.params.set_alloc_total_net_bw(v);
    }

    pub fn cache_delta(&self) -> u64 {
        self.params.cache_delta()
    }

    pub fn set_cache_delta(&mut self, v: u64) {
        self.params.set_cache_delta(v);
    }

    pub fn min_cache_size(&self) -> u64 {
        self.params.min_cache_size()
    }

    pub fn set_min_cache_size(&mut self, v: u64) {
        self.params.set_min_cache_size(v);
    }

    pub fn min_db_rcu(&self) -> f64 {
        self.params.min_db_rcu()
    }

    pub fn set_min_db_rcu(&mut self, v: f64) {
        self.params.set_min_db_rcu(v);
    }

    pub fn min_db_wcu(&self) -> f64 {
        self.params.min_db_wcu()
    }

    pub fn set_min_db_wcu(&mut self, v: f64) {
        self.params.set_min_db_wcu(v);
    }

    pub fn min_net_bw(&self) -> f64 {
        self.params.min_net_bw()
    }

    pub fn set_min_net_bw(&mut self, v: f64) {
        self.params.set_min_net_bw(v);
    }
}

// First index maximizing `key` (ties keep the earliest).
fn argmax_by(tenants: &[Tenant], key: impl Fn(&Tenant) -> f64) -> usize {
    let mut best = 0;
    for j in 1..tenants.len() {
        if key(&tenants[best]) < key(&tenants[j]) {
            best = j;
        }
    }
    best
}

// First index minimizing `key`, optionally skipping one tenant.
fn argmin_excluding(
    tenants: &[Tenant],
    key: impl Fn(&Tenant) -> f64,
    exclude: Option<usize>,
) -> usize {
    let mut best: Option<usize> = None;
    for j in 0..tenants.len() {
        if Some(j) == exclude {
            continue;
        }
        match best {
            Some(b) if key(&tenants[j]) < key(&tenants[b]) => best = Some(j),
            None => best = Some(j),
            _ => {}
        }
    }
    best.expect("at least two tenants during trading")
}

// Mutable references to two distinct tenants.
fn two_muts(tenants: &mut [Tenant], i: usize, j: usize) -> (&mut Tenant, &mut Tenant) {
    assert_ne!(i, j);
    if i < j {
        let (left, right) = tenants.split_at_mut(j);
        (&mut left[i], &mut right[0])
    } else {
        let (left, right) = tenants.split_at_mut(i);
        (&mut right[0], &mut left[j])
    }
}
