//! Miss-ratio curves.
//!
//! A miss-ratio curve (MRC) maps cache size to the expected miss ratio. It
//! is represented by a monotone sequence of anchors `(tick_i, mr_i)` with
//! strictly increasing ticks and non-increasing miss ratios in `[0, 1]`.
//! Queries between anchors are answered by linear interpolation; below the
//! first anchor the curve is anchored at `(0, 1.0)`.
//!
//! Queries beyond the last anchor use a conservative estimate (the last
//! anchor's miss ratio) so the allocator never assumes cache it has no
//! evidence for; [`MissRatioCurve::get_miss_ratio_strict`] refuses such
//! queries instead.
//!
//! Lookups are memoized per integer size: the allocator probes the same
//! handful of sizes (current, plus/minus one cache delta) every trade
//! round.

use rustc_hash::FxHashMap;
use tracing::warn;

use crate::alloc::params::{mrc as mrc_params, numeric};
use crate::error::MrcError;

/// A monotone-decreasing step curve from cache size to miss ratio.
///
/// # Example
///
/// ```
/// use hopperkv::alloc::mrc::MissRatioCurve;
///
/// let mut mrc = MissRatioCurve::new(vec![10, 20, 40, 80], vec![0.9, 0.8, 0.7, 0.6]);
/// mrc.check_sanity().unwrap();
///
/// assert_eq!(mrc.get_miss_ratio(0), 1.0);
/// assert_eq!(mrc.get_miss_ratio(20), 0.8);
/// assert!((mrc.get_miss_ratio(30) - 0.75).abs() < 1e-12);
/// // beyond the last anchor: conservative estimate
/// assert_eq!(mrc.get_miss_ratio(1000), 0.6);
/// ```
#[derive(Debug, Clone)]
pub struct MissRatioCurve {
    ticks: Vec<u64>,
    miss_ratios: Vec<f64>,
    // previously computed answers, keyed by queried size
    memo: FxHashMap<u64, f64>,
}

impl MissRatioCurve {
    /// Creates a curve from anchor ticks and their miss ratios.
    ///
    /// The anchors are not validated here; call
    /// [`check_sanity`](Self::check_sanity) before trusting a curve that
    /// came from measurement or the wire.
    pub fn new(ticks: Vec<u64>, miss_ratios: Vec<f64>) -> Self {
        Self {
            ticks,
            miss_ratios,
            memo: FxHashMap::default(),
        }
    }

    /// Validates the curve shape.
    ///
    /// # Errors
    ///
    /// Returns [`MrcError::MalformedCurve`] when the ticks are empty, the
    /// lengths mismatch, the ticks are not strictly increasing, or the miss
    /// ratios leave `[0, 1]` or increase.
    pub fn check_sanity(&self) -> Result<(), MrcError> {
        if self.ticks.is_empty() {
            return Err(MrcError::MalformedCurve("ticks is empty".into()));
        }
        if self.ticks.len() != self.miss_ratios.len() {
            return Err(MrcError::MalformedCurve(format!(
                "ticks ({}) and miss_ratios ({}) length mismatch",
                self.ticks.len(),
                self.miss_ratios.len()
            )));
        }
        let mut max_mr = 1.0;
        for (i, (&t, &mr)) in self.ticks.iter().zip(&self.miss_ratios).enumerate() {
            if i > 0 && t <= self.ticks[i - 1] {
                return Err(MrcError::MalformedCurve(format!(
                    "ticks not strictly increasing at index {i}"
                )));
            }
            if !(0.0..=1.0).contains(&mr) || mr > max_mr {
                return Err(MrcError::MalformedCurve(format!(
                    "miss ratio {mr} out of range at index {i}"
                )));
            }
            max_mr = mr;
        }
        Ok(())
    }

    /// Memoized miss-ratio lookup.
    ///
    /// Sizes beyond the last anchor return the conservative estimate (the
    /// last anchor's ratio) and log a warning.
    pub fn get_miss_ratio(&mut self, cache_size: u64) -> f64 {
        if let Some(&mr) = self.memo.get(&cache_size) {
            return mr;
        }
        let mr = self.get_miss_ratio_const(cache_size);
        self.memo.insert(cache_size, mr);
        mr
    }

    /// Non-memoizing lookup. Prefer [`get_miss_ratio`](Self::get_miss_ratio)
    /// where a `&mut` borrow is available, so repeated queries reuse
    /// previously computed results.
    ///
    /// A curve with no anchors says nothing; every size reads as a full
    /// miss.
    pub fn get_miss_ratio_const(&self, cache_size: u64) -> f64 {
        let Some(&last_tick) = self.ticks.last() else {
            return 1.0;
        };
        if cache_size > last_tick {
            let mr = self.miss_ratios.last().copied().unwrap_or(1.0);
            warn!(
                max = last_tick,
                requested = cache_size,
                estimate = mr,
                "miss-ratio query out of range; using conservative estimate"
            );
            return mr;
        }
        self.lookup_in_range(cache_size)
    }

    /// Strict lookup that refuses sizes beyond the last anchor.
    ///
    /// # Errors
    ///
    /// Returns [`MrcError::OutOfRange`] when `cache_size` exceeds the last
    /// anchor tick.
    pub fn get_miss_ratio_strict(&self, cache_size: u64) -> Result<f64, MrcError> {
        let Some(&last_tick) = self.ticks.last() else {
            return Err(MrcError::MalformedCurve("ticks is empty".into()));
        };
        if cache_size > last_tick {
            return Err(MrcError::OutOfRange {
                max_tick: last_tick,
                requested: cache_size,
            });
        }
        Ok(self.lookup_in_range(cache_size))
    }

    fn lookup_in_range(&self, cache_size: u64) -> f64 {
        let first_tick = self.ticks[0];
        if cache_size < first_tick {
            // anchor the curve at (0, 1.0)
            return interpolate(
                1.0,
                self.miss_ratios[0],
                cache_size,
                first_tick - cache_size,
            );
        }
        let idx = self.ticks.partition_point(|&t| t < cache_size);
        debug_assert!(idx < self.ticks.len());
        if self.ticks[idx] == cache_size {
            return self.miss_ratios[idx];
        }
        debug_assert!(idx > 0);
        interpolate(
            self.miss_ratios[idx - 1],
            self.miss_ratios[idx],
            cache_size - self.ticks[idx - 1],
            self.ticks[idx] - cache_size,
        )
    }
}

// Linear interpolation between two anchors, weighted by the distance to
// each. `l_val >= r_val` because the curve is non-increasing.
fn interpolate(l_val: f64, r_val: f64, l_dist: u64, r_dist: u64) -> f64 {
    debug_assert!(l_val >= r_val);
    if mrc_params::DISABLE_INTERPOLATION_NEAR_INF && (1.0 - l_val) < numeric::EPSILON {
        return 1.0;
    }
    let total = (l_dist + r_dist) as f64;
    l_val * (r_dist as f64 / total) + r_val * (l_dist as f64 / total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn curve() -> MissRatioCurve {
        MissRatioCurve::new(vec![10, 20, 40, 80], vec![0.9, 0.8, 0.7, 0.6])
    }

    fn assert_mr(mrc: &mut MissRatioCurve, size: u64, expected: f64) {
        let mr = mrc.get_miss_ratio(size);
        assert!(
            (mr - expected).abs() < 1e-12,
            "size={size}: expected {expected}, got {mr}"
        );
    }

    #[test]
    fn anchors_and_interpolation() {
        let mut mrc = curve();
        mrc.check_sanity().unwrap();
        assert_mr(&mut mrc, 0, 1.0);
        assert_mr(&mut mrc, 5, 0.95);
        assert_mr(&mut mrc, 7, 0.93);
        assert_mr(&mut mrc, 10, 0.9);
        assert_mr(&mut mrc, 20, 0.8);
        assert_mr(&mut mrc, 25, 0.775);
        assert_mr(&mut mrc, 30, 0.75);
        assert_mr(&mut mrc, 40, 0.7);
        assert_mr(&mut mrc, 50, 0.675);
        assert_mr(&mut mrc, 60, 0.65);
        assert_mr(&mut mrc, 80, 0.6);
    }

    #[test]
    fn out_of_range_is_conservative() {
        let mut mrc = curve();
        assert_mr(&mut mrc, 81, 0.6);
        assert_mr(&mut mrc, u64::MAX, 0.6);
    }

    #[test]
    fn strict_lookup_refuses_out_of_range() {
        let mrc = curve();
        assert!(mrc.get_miss_ratio_strict(80).is_ok());
        assert_eq!(
            mrc.get_miss_ratio_strict(81),
            Err(MrcError::OutOfRange {
                max_tick: 80,
                requested: 81
            })
        );
    }

    #[test]
    fn memoized_and_const_agree() {
        let mut mrc = curve();
        for size in [0, 3, 10, 27, 33, 80, 200] {
            let fresh = mrc.get_miss_ratio_const(size);
            let memoized = mrc.get_miss_ratio(size);
            let again = mrc.get_miss_ratio(size);
            assert_eq!(fresh, memoized);
            assert_eq!(memoized, again);
        }
    }

    #[test]
    fn sanity_rejects_malformed_curves() {
        assert!(MissRatioCurve::new(vec![], vec![]).check_sanity().is_err());
        assert!(MissRatioCurve::new(vec![10], vec![0.9, 0.8])
            .check_sanity()
            .is_err());
        assert!(MissRatioCurve::new(vec![10, 10], vec![0.9, 0.8])
            .check_sanity()
            .is_err());
        assert!(MissRatioCurve::new(vec![10, 20], vec![0.8, 0.9])
            .check_sanity()
            .is_err());
        assert!(MissRatioCurve::new(vec![10, 20], vec![0.9, 1.5])
            .check_sanity()
            .is_err());
        assert!(MissRatioCurve::new(vec![10, 20], vec![0.9, -0.1])
            .check_sanity()
            .is_err());
    }

    #[test]
    fn flat_saturated_curve_is_valid() {
        let mut mrc = MissRatioCurve::new(vec![10, 20], vec![1.0, 1.0]);
        mrc.check_sanity().unwrap();
        assert_mr(&mut mrc, 5, 1.0);
        assert_mr(&mut mrc, 15, 1.0);
    }
}
