//! Per-tenant allocation state.
//!
//! A tenant couples a demand vector (measured as if every request missed
//! the cache), its current allocation, its miss-ratio curve, and the
//! network coupling coefficient `alpha` that says how strongly its
//! bandwidth consumption tracks the miss ratio.
//!
//! During a trade round a tenant quotes two numbers per tradable
//! dimension:
//!
//! - *relinquish*: how much it would give up if handed one more cache
//!   delta (it offers resources, asking for cache);
//! - *compensate*: how much it would demand to surrender one cache delta
//!   (it asks for resources, offering cache).
//!
//! A relinquish quote of zero and a compensation quote of
//! [`numeric::COMPEN_ABORT_OFFER`] are the abort sentinels; a compensation
//! quote of zero is an immediate offer (cache given up for free).

use tracing::trace;

use crate::alloc::mrc::MissRatioCurve;
use crate::alloc::params::{numeric, AllocParams, MAX_MISS_RATIO, MIN_MISS_RATIO, RESERVED_RATIO};
use crate::alloc::resrc::{ResrcVec, StatelessResrcVec};

/// One tenant's allocation state inside the engine.
#[derive(Debug)]
pub struct Tenant {
    /// Tenant index, stable for the lifetime of the allocator.
    pub t_idx: usize,

    // demand vector measured without cache-hit savings
    demand_cacheless: StatelessResrcVec,
    // current allocation; updated during the HARE algorithm
    resrc: ResrcVec,
    mrc: MissRatioCurve,
    net_bw_alpha: f64,

    rcu_delta_relinq: f64,
    rcu_delta_compen: f64,
    net_delta_relinq: f64,
    net_delta_compen: f64,

    // miss ratio changes if given/denied one cache delta
    mr_inc_if_more_cache: f64,
    mr_dec_if_less_cache: f64,

    reserved_cache_size: u64,
}

impl Tenant {
    pub(crate) fn new(
        t_idx: usize,
        demand_cacheless: StatelessResrcVec,
        base_resrc: ResrcVec,
        mrc: MissRatioCurve,
        net_bw_alpha: f64,
    ) -> Self {
        Self {
            t_idx,
            demand_cacheless,
            resrc: base_resrc,
            mrc,
            net_bw_alpha,
            rcu_delta_relinq: 0.0,
            rcu_delta_compen: 0.0,
            net_delta_relinq: 0.0,
            net_delta_compen: 0.0,
            mr_inc_if_more_cache: 0.0,
            mr_dec_if_less_cache: 0.0,
            reserved_cache_size: (base_resrc.cache_size as f64 * RESERVED_RATIO) as u64,
        }
    }

    /// Current allocation, for reporting results.
    pub fn resrc(&self) -> ResrcVec {
        self.resrc
    }

    /// Cache floor that trading may never cross.
    pub fn reserved_cache_size(&self) -> u64 {
        self.reserved_cache_size
    }

    pub(crate) fn rcu_delta_relinq(&self) -> f64 {
        self.rcu_delta_relinq
    }

    pub(crate) fn rcu_delta_compen(&self) -> f64 {
        self.rcu_delta_compen
    }

    pub(crate) fn net_delta_relinq(&self) -> f64 {
        self.net_delta_relinq
    }

    pub(crate) fn net_delta_compen(&self) -> f64 {
        self.net_delta_compen
    }

    pub(crate) fn mr_inc_if_more_cache(&self) -> f64 {
        self.mr_inc_if_more_cache
    }

    pub(crate) fn mr_dec_if_less_cache(&self) -> f64 {
        self.mr_dec_if_less_cache
    }

    /// Shrinks the allocation to what the tenant can actually consume at
    /// its current miss ratio and returns the freed remainder.
    ///
    /// The projected demand scales reads by the miss ratio and, when total
    /// bandwidth is allocated, scales bandwidth by
    /// `mr + (1 - alpha) * (1 - mr)`; writes are cache-independent. The
    /// throughput cap is the min-ratio quotient of the allocation over the
    /// projected demand.
    pub(crate) fn collect_idle(&mut self, params: &AllocParams) -> StatelessResrcVec {
        let mut demand = self.demand_cacheless;
        let mr = self.mrc.get_miss_ratio(self.resrc.cache_size);
        demand.db_rcu *= mr;
        if params.alloc_total_net_bw() {
            demand.net_bw *= mr + (1.0 - self.net_bw_alpha) * (1.0 - mr);
        }

        let tp = self.resrc.stateless.min_ratio(&demand);
        let used = demand * tp;
        let idle = self.resrc.stateless - used;
        self.resrc.stateless = used;
        idle
    }

    /// Recomputes both trade quotes after an allocation change.
    pub(crate) fn update_rcu_net_delta(&mut self, params: &AllocParams) {
        self.pred_rcu_net_delta_if_more_cache(params);
        self.pred_rcu_net_delta_if_less_cache(params);
        trace!(
            t_idx = self.t_idx,
            rcu_relinq = self.rcu_delta_relinq,
            rcu_compen = self.rcu_delta_compen,
            net_relinq = self.net_delta_relinq,
            net_compen = self.net_delta_compen,
            "tenant trade quotes"
        );
    }

    /// Recomputes the miss-ratio deltas used by the memshare cache pass.
    pub(crate) fn update_mr_delta(&mut self, params: &AllocParams) {
        let delta = params.cache_delta();
        let curr_mr = self.mrc.get_miss_ratio(self.resrc.cache_size);
        let more_mr = self.mrc.get_miss_ratio(self.resrc.cache_size + delta);
        let less_mr = self
            .mrc
            .get_miss_ratio(self.resrc.cache_size.saturating_sub(delta));
        self.mr_inc_if_more_cache = curr_mr - more_mr;
        self.mr_dec_if_less_cache = less_mr - curr_mr;
        trace!(
            t_idx = self.t_idx,
            cache = self.resrc.cache_size,
            curr_mr,
            more_mr,
            less_mr,
            "tenant memshare deltas"
        );
    }

    /// Whether the tenant can give up `delta` bytes without crossing its
    /// reserved floor.
    pub(crate) fn can_donate(&self, delta: u64) -> bool {
        self.resrc.cache_size >= self.reserved_cache_size + delta
    }

    /// Scales the stateless allocation uniformly (non-conserving
    /// redistribution).
    pub(crate) fn scale_stateless_resrc(&mut self, scale_factor: f64) {
        self.resrc.stateless *= scale_factor;
    }

    /// Adds this tenant's proportional share of `avail` back into its
    /// allocation. Shares are weighted by the tenant's fraction of `sum`;
    /// a dimension whose sum is zero falls back to an even `1/even_denom`
    /// split.
    pub(crate) fn scale_stateless_resrc_by_owned(
        &mut self,
        avail: &StatelessResrcVec,
        sum: &StatelessResrcVec,
        even_denom: usize,
    ) {
        let even = 1.0 / even_denom as f64;
        let rcu_factor = if sum.db_rcu != 0.0 {
            self.resrc.stateless.db_rcu / sum.db_rcu
        } else {
            even
        };
        let wcu_factor = if sum.db_wcu != 0.0 {
            self.resrc.stateless.db_wcu / sum.db_wcu
        } else {
            even
        };
        let net_factor = if sum.net_bw != 0.0 {
            self.resrc.stateless.net_bw / sum.net_bw
        } else {
            even
        };
        self.resrc.stateless.db_rcu += avail.db_rcu * rcu_factor;
        self.resrc.stateless.db_wcu += avail.db_wcu * wcu_factor;
        self.resrc.stateless.net_bw += avail.net_bw * net_factor;
    }

    /// Moves one cache delta from `donator` to `receiver` (memshare pass).
    pub(crate) fn relocate_cache(receiver: &mut Tenant, donator: &mut Tenant, cache_delta: u64) {
        receiver.resrc.cache_size += cache_delta;
        donator.resrc.cache_size -= cache_delta;
    }

    /// Commits a harvest deal: the relinquisher gains one cache delta and
    /// surrenders resources; the compensator gives up the cache delta and
    /// receives resources.
    pub(crate) fn relocate_resrc(
        t_relinq: &mut Tenant,
        t_compen: &mut Tenant,
        rcu_relinq: f64,
        rcu_compen: f64,
        net_relinq: f64,
        net_compen: f64,
        params: &AllocParams,
    ) {
        let delta = params.cache_delta();
        t_compen.resrc.cache_size -= delta;
        t_relinq.resrc.cache_size += delta;
        t_compen.resrc.stateless.db_rcu += rcu_compen;
        t_relinq.resrc.stateless.db_rcu -= rcu_relinq;
        if params.alloc_total_net_bw() {
            t_compen.resrc.stateless.net_bw += net_compen;
            t_relinq.resrc.stateless.net_bw -= net_relinq;
        } else {
            debug_assert_eq!(net_compen, 0.0);
            debug_assert_eq!(net_relinq, 0.0);
        }
    }

    /// Sums the stateless allocations of all tenants.
    pub(crate) fn aggregate_resrc(tenants: &[Tenant]) -> StatelessResrcVec {
        let mut sum = StatelessResrcVec::default();
        for t in tenants {
            sum += t.resrc.stateless;
        }
        sum
    }

    /// Logs the tenant's allocation; with `detailed`, also its achievable
    /// throughput under the current miss ratio.
    pub(crate) fn report(&self, detailed: bool, params: &AllocParams) {
        if detailed {
            let mut demand = self.demand_cacheless;
            let mr = self.mrc.get_miss_ratio_const(self.resrc.cache_size);
            demand.db_rcu *= mr;
            if params.alloc_total_net_bw() {
                demand.net_bw *= mr;
            }
            let tput = self.resrc.stateless.min_ratio(&demand);
            trace!(
                t_idx = self.t_idx,
                cache_size = self.resrc.cache_size,
                db_rcu = self.resrc.stateless.db_rcu,
                db_wcu = self.resrc.stateless.db_wcu,
                net_bw = self.resrc.stateless.net_bw,
                tput,
                "tenant allocation"
            );
        } else {
            trace!(
                t_idx = self.t_idx,
                cache_size = self.resrc.cache_size,
                db_rcu = self.resrc.stateless.db_rcu,
                db_wcu = self.resrc.stateless.db_wcu,
                net_bw = self.resrc.stateless.net_bw,
                "tenant allocation"
            );
        }
    }

    // If given one more cache delta, how much RCU/net the tenant would
    // relinquish while keeping its throughput. A quote of zero aborts: the
    // tenant would take the cache and return nothing.
    fn pred_rcu_net_delta_if_more_cache(&mut self, params: &AllocParams) {
        let cache_delta = params.cache_delta();

        let curr_mr = self.mrc.get_miss_ratio(self.resrc.cache_size);
        // a saturated-zero miss ratio cannot fund a deal; bail before the
        // division below
        if !curr_mr.is_finite() || curr_mr <= numeric::EPSILON {
            return self.abort_relinq(params);
        }

        let pred_mr = self.mrc.get_miss_ratio(self.resrc.cache_size + cache_delta);
        if !pred_mr.is_finite() {
            return self.abort_relinq(params);
        }
        if pred_mr < MIN_MISS_RATIO {
            return self.abort_relinq(params);
        }

        // miss ratios this close mean more cache frees no bandwidth
        let delta_mr = curr_mr - pred_mr;
        if delta_mr <= numeric::EPSILON {
            return self.abort_relinq(params);
        }
        debug_assert!(delta_mr > 0.0);

        self.rcu_delta_relinq = self.resrc.stateless.db_rcu * delta_mr / curr_mr;
        debug_assert!(self.rcu_delta_relinq >= 0.0);
        if params.alloc_total_net_bw() {
            let alpha = self.net_bw_alpha;
            self.net_delta_relinq = self.resrc.stateless.net_bw * delta_mr * alpha
                / (curr_mr * alpha + 1.0 - alpha);
            debug_assert!(self.net_delta_relinq >= 0.0);
        }

        trace!(
            t_idx = self.t_idx,
            cache = self.resrc.cache_size,
            curr_mr,
            pred_mr,
            rcu_relinq = self.rcu_delta_relinq,
            net_relinq = self.net_delta_relinq,
            "relinquish quote"
        );
    }

    // If asked to give up one cache delta, how much RCU/net the tenant
    // would demand in return. The immediate-offer path (quote zero) covers
    // cache the tenant provably does not need.
    fn pred_rcu_net_delta_if_less_cache(&mut self, params: &AllocParams) {
        let cache_delta = params.cache_delta();

        // written with '+' to avoid unsigned underflow
        if self.resrc.cache_size < params.min_cache_size() + cache_delta {
            return self.abort_compen(params);
        }
        // the reserved floor binds trades the same way it binds memshare
        // donations
        if !self.can_donate(cache_delta) {
            return self.abort_compen(params);
        }

        let curr_mr = self.mrc.get_miss_ratio(self.resrc.cache_size);
        if !curr_mr.is_finite() {
            return self.abort_compen(params);
        }
        let pred_mr = self.mrc.get_miss_ratio(self.resrc.cache_size - cache_delta);
        if !pred_mr.is_finite() {
            return self.abort_compen(params);
        }
        if pred_mr > MAX_MISS_RATIO {
            return self.abort_compen(params);
        }

        let delta_mr = pred_mr - curr_mr;
        if delta_mr <= numeric::EPSILON {
            // miss ratio unchanged: cache can be taken for free
            return self.immediate_compen(params);
        }
        debug_assert!(delta_mr > 0.0);

        // order matters: a still-zero predicted miss ratio is a free
        // donation, while a zero current miss ratio with a nonzero
        // prediction cannot be priced
        if pred_mr <= numeric::EPSILON {
            return self.immediate_compen(params);
        } else if curr_mr <= numeric::EPSILON {
            return self.abort_compen(params);
        }

        self.rcu_delta_compen = self.resrc.stateless.db_rcu * delta_mr / curr_mr;
        debug_assert!(self.rcu_delta_compen >= 0.0);
        self.net_delta_compen = 0.0;
        if params.alloc_total_net_bw() {
            let alpha = self.net_bw_alpha;
            self.net_delta_compen = self.resrc.stateless.net_bw * delta_mr * alpha
                / (curr_mr * alpha + 1.0 - alpha);
            debug_assert!(self.net_delta_compen >= 0.0);
        }

        trace!(
            t_idx = self.t_idx,
            cache = self.resrc.cache_size,
            curr_mr,
            pred_mr,
            rcu_compen = self.rcu_delta_compen,
            net_compen = self.net_delta_compen,
            "compensation quote"
        );
    }

    fn abort_relinq(&mut self, params: &AllocParams) {
        self.rcu_delta_relinq = numeric::RELINQ_ABORT_OFFER;
        if params.alloc_total_net_bw() {
            self.net_delta_relinq = numeric::RELINQ_ABORT_OFFER;
        }
    }

    fn abort_compen(&mut self, params: &AllocParams) {
        self.rcu_delta_compen = numeric::COMPEN_ABORT_OFFER;
        if params.alloc_total_net_bw() {
            self.net_delta_compen = numeric::COMPEN_ABORT_OFFER;
        }
    }

    fn immediate_compen(&mut self, params: &AllocParams) {
        self.rcu_delta_compen = 0.0;
        if params.alloc_total_net_bw() {
            self.net_delta_compen = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params_for_tests() -> AllocParams {
        let mut p = AllocParams::default();
        p.set_alloc_total_net_bw(false);
        p.set_cache_delta(10);
        p.set_min_cache_size(10);
        p
    }

    fn tenant_with(cache: u64, rcu: f64, wcu: f64, net: f64, ratios: Vec<f64>) -> Tenant {
        let ticks = vec![20, 40, 60, 80, 100];
        Tenant::new(
            0,
            StatelessResrcVec::new(0.8, 0.2, 4.0),
            ResrcVec::new(cache, rcu, wcu, net),
            MissRatioCurve::new(ticks, ratios),
            0.0,
        )
    }

    #[test]
    fn collect_idle_shrinks_to_usable_demand() {
        let params = params_for_tests();
        let mut t = tenant_with(40, 2.0, 2.0, 16.0, vec![0.9, 0.85, 0.8, 0.7, 0.5]);

        let idle = t.collect_idle(&params);
        // mr(40) = 0.85, demand = (0.68, 0.2, 4); cap = min(2/0.68, 10, 4)
        let tp = 2.0 / 0.68;
        assert!((t.resrc().stateless.db_rcu - 2.0).abs() < 1e-9);
        assert!((t.resrc().stateless.db_wcu - 0.2 * tp).abs() < 1e-9);
        assert!((idle.db_rcu - 0.0).abs() < 1e-9);
        assert!((idle.db_wcu - (2.0 - 0.2 * tp)).abs() < 1e-9);
    }

    #[test]
    fn relinquish_quote_scales_with_miss_delta() {
        let params = params_for_tests();
        let mut t = tenant_with(40, 2.0, 2.0, 16.0, vec![0.8, 0.6, 0.3, 0.2, 0.15]);
        t.update_rcu_net_delta(&params);
        // mr(40)=0.6, mr(50)=0.45: relinq = 2 * 0.15 / 0.6
        assert!((t.rcu_delta_relinq() - 0.5).abs() < 1e-9);
        // mr(30)=0.7: compen = 2 * 0.1 / 0.6
        assert!((t.rcu_delta_compen() - 2.0 * 0.1 / 0.6).abs() < 1e-9);
    }

    #[test]
    fn flat_curve_aborts_relinquish() {
        let params = params_for_tests();
        let mut t = tenant_with(40, 2.0, 2.0, 16.0, vec![1.0, 1.0, 1.0, 1.0, 1.0]);
        t.update_rcu_net_delta(&params);
        assert_eq!(t.rcu_delta_relinq(), numeric::RELINQ_ABORT_OFFER);
        // flat curve also means free cache donation
        assert_eq!(t.rcu_delta_compen(), 0.0);
    }

    #[test]
    fn cache_floor_aborts_compensation() {
        let params = params_for_tests();
        // cache 15 < min_cache_size(10) + delta(10)
        let mut t = tenant_with(15, 2.0, 2.0, 16.0, vec![0.8, 0.6, 0.3, 0.2, 0.15]);
        t.update_rcu_net_delta(&params);
        assert_eq!(t.rcu_delta_compen(), numeric::COMPEN_ABORT_OFFER);
    }

    #[test]
    fn can_donate_respects_reserved_floor() {
        let t = tenant_with(40, 2.0, 2.0, 16.0, vec![0.9, 0.85, 0.8, 0.7, 0.5]);
        // reserved = 20; donating 10 keeps 30 >= 20 + 10
        assert!(t.can_donate(10));
        assert!(t.can_donate(20));
        assert!(!t.can_donate(21));
    }

    #[test]
    fn proportional_share_with_zero_sum_fallback() {
        let mut t = tenant_with(40, 2.0, 0.0, 16.0, vec![0.9, 0.85, 0.8, 0.7, 0.5]);
        let avail = StatelessResrcVec::new(1.0, 1.0, 4.0);
        let sum = StatelessResrcVec::new(4.0, 0.0, 32.0);
        t.scale_stateless_resrc_by_owned(&avail, &sum, 2);
        let s = t.resrc().stateless;
        assert!((s.db_rcu - 2.5).abs() < 1e-9); // 2 + 1 * 2/4
        assert!((s.db_wcu - 0.5).abs() < 1e-9); // 0 + 1 * 1/2 (fallback)
        assert!((s.net_bw - 18.0).abs() < 1e-9); // 16 + 4 * 16/32
    }

    #[test]
    fn relocate_resrc_moves_cache_and_resources() {
        let params = params_for_tests();
        let mut a = tenant_with(40, 2.0, 2.0, 16.0, vec![0.9, 0.85, 0.8, 0.7, 0.5]);
        let mut b = tenant_with(40, 2.0, 2.0, 16.0, vec![0.8, 0.6, 0.3, 0.2, 0.15]);
        Tenant::relocate_resrc(&mut b, &mut a, 0.5, 0.1, 0.0, 0.0, &params);
        assert_eq!(b.resrc().cache_size, 50);
        assert_eq!(a.resrc().cache_size, 30);
        assert!((b.resrc().stateless.db_rcu - 1.5).abs() < 1e-9);
        assert!((a.resrc().stateless.db_rcu - 2.1).abs() < 1e-9);
    }
}
