//! Resource vector algebra.
//!
//! ## Problem model
//!
//! Suppose a request consumes `d` units of a resource upon a cache miss and
//! `(1 - alpha) * d` units upon a cache hit, with `alpha` in `[0, 1]`:
//!
//! - `alpha = 0`: cache-independent resource
//! - `alpha = 1`: fully cache-dependent resource, e.g. storage reads
//! - `0 < alpha < 1`: weakly dependent resource, e.g. network bandwidth
//!
//! If a tenant holds `r` units at miss ratio `m` and extra cache lowers the
//! miss ratio by `delta_m`, the allocation that sustains the same
//! throughput shrinks by
//! `delta_r = r * alpha * delta_m / (1 - alpha + alpha * m)`.
//!
//! ## Resource model
//!
//! - A read consumes `net_bw` (to the client) on a hit, and additionally
//!   `db_rcu` plus the storage network leg on a miss.
//! - A write always consumes `net_bw` and `db_wcu`.
//!
//! The model assumes a fixed read/write mix and request sizes independent
//! of key hotness, so average sizes suffice for demand vectors.

use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, MulAssign, Sub, SubAssign};

use crate::alloc::params::numeric;

/// The three stateless resource dimensions.
///
/// Unlike cache bytes, these resources carry no state between allocation
/// rounds: they can be taken from one tenant and given to another without
/// migrating anything.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatelessResrcVec {
    /// Storage read capacity units, in requests/s.
    pub db_rcu: f64,
    /// Storage write capacity units, in requests/s.
    pub db_wcu: f64,
    /// Network bandwidth, in bytes/s.
    pub net_bw: f64,
}

impl StatelessResrcVec {
    /// Creates a vector from its three components.
    pub fn new(db_rcu: f64, db_wcu: f64, net_bw: f64) -> Self {
        Self {
            db_rcu,
            db_wcu,
            net_bw,
        }
    }

    /// Returns `true` if all components are exactly zero.
    pub fn is_empty(&self) -> bool {
        self.db_rcu == 0.0 && self.db_wcu == 0.0 && self.net_bw == 0.0
    }

    /// Returns `true` if all components are within their epsilons of zero.
    pub fn is_almost_empty(&self) -> bool {
        self.db_rcu.abs() < numeric::DB_RCU_EPSILON
            && self.db_wcu.abs() < numeric::DB_WCU_EPSILON
            && self.net_bw.abs() < numeric::NET_BW_EPSILON
    }

    /// Returns `true` if `self` and `other` differ by less than the
    /// component epsilons.
    pub fn is_almost_equal(&self, other: &Self) -> bool {
        (*self - *other).is_almost_empty()
    }

    /// Min-ratio quotient: `min(a.rcu/b.rcu, a.wcu/b.wcu, a.net/b.net)`.
    ///
    /// This is the dominant-resource improvement ratio: how far `self` can
    /// scale `other` before some dimension of `self` runs out.
    ///
    /// # Example
    ///
    /// ```
    /// use hopperkv::alloc::resrc::StatelessResrcVec;
    ///
    /// let have = StatelessResrcVec::new(2.0, 10.0, 16.0);
    /// let need = StatelessResrcVec::new(0.8, 0.2, 4.0);
    /// assert_eq!(have.min_ratio(&need), 2.5);
    /// ```
    pub fn min_ratio(&self, other: &Self) -> f64 {
        let mut min = self.db_rcu / other.db_rcu;
        let wcu = self.db_wcu / other.db_wcu;
        if wcu < min {
            min = wcu;
        }
        let net = self.net_bw / other.net_bw;
        if net < min {
            min = net;
        }
        min
    }
}

impl Add for StatelessResrcVec {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self::new(
            self.db_rcu + other.db_rcu,
            self.db_wcu + other.db_wcu,
            self.net_bw + other.net_bw,
        )
    }
}

impl AddAssign for StatelessResrcVec {
    fn add_assign(&mut self, other: Self) {
        self.db_rcu += other.db_rcu;
        self.db_wcu += other.db_wcu;
        self.net_bw += other.net_bw;
    }
}

impl Sub for StatelessResrcVec {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        Self::new(
            self.db_rcu - other.db_rcu,
            self.db_wcu - other.db_wcu,
            self.net_bw - other.net_bw,
        )
    }
}

impl SubAssign for StatelessResrcVec {
    fn sub_assign(&mut self, other: Self) {
        self.db_rcu -= other.db_rcu;
        self.db_wcu -= other.db_wcu;
        self.net_bw -= other.net_bw;
    }
}

impl Mul<f64> for StatelessResrcVec {
    type Output = Self;

    fn mul(self, scale: f64) -> Self {
        Self::new(self.db_rcu * scale, self.db_wcu * scale, self.net_bw * scale)
    }
}

impl MulAssign<f64> for StatelessResrcVec {
    fn mul_assign(&mut self, scale: f64) {
        self.db_rcu *= scale;
        self.db_wcu *= scale;
        self.net_bw *= scale;
    }
}

// Integer divisor only: used for equal sharing across tenants.
impl Div<u32> for StatelessResrcVec {
    type Output = Self;

    fn div(self, div: u32) -> Self {
        let d = f64::from(div);
        Self::new(self.db_rcu / d, self.db_wcu / d, self.net_bw / d)
    }
}

impl fmt::Display for StatelessResrcVec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{db_rcu={}, db_wcu={}, net_bw={}}}",
            self.db_rcu, self.db_wcu, self.net_bw
        )
    }
}

/// A full allocation vector: cache bytes plus the stateless triple.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResrcVec {
    /// Cache allocation, in bytes.
    pub cache_size: u64,
    /// The stateless resource dimensions.
    pub stateless: StatelessResrcVec,
}

impl ResrcVec {
    /// Creates a vector from its four components.
    pub fn new(cache_size: u64, db_rcu: f64, db_wcu: f64, net_bw: f64) -> Self {
        Self {
            cache_size,
            stateless: StatelessResrcVec::new(db_rcu, db_wcu, net_bw),
        }
    }

    /// Creates a vector from cache bytes plus an existing stateless triple.
    pub fn with_stateless(cache_size: u64, stateless: StatelessResrcVec) -> Self {
        Self {
            cache_size,
            stateless,
        }
    }
}

impl Add for ResrcVec {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self::with_stateless(
            self.cache_size + other.cache_size,
            self.stateless + other.stateless,
        )
    }
}

impl AddAssign for ResrcVec {
    fn add_assign(&mut self, other: Self) {
        self.cache_size += other.cache_size;
        self.stateless += other.stateless;
    }
}

impl Add<StatelessResrcVec> for ResrcVec {
    type Output = Self;

    fn add(self, other: StatelessResrcVec) -> Self {
        Self::with_stateless(self.cache_size, self.stateless + other)
    }
}

impl AddAssign<StatelessResrcVec> for ResrcVec {
    fn add_assign(&mut self, other: StatelessResrcVec) {
        self.stateless += other;
    }
}

// Integer divisor only: dividing cache bytes by a float would silently
// truncate, so equal sharing is the only division offered.
impl Div<u32> for ResrcVec {
    type Output = Self;

    fn div(self, div: u32) -> Self {
        Self::with_stateless(self.cache_size / u64::from(div), self.stateless / div)
    }
}

impl fmt::Display for ResrcVec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{cache_size={}, db_rcu={}, db_wcu={}, net_bw={}}}",
            self.cache_size, self.stateless.db_rcu, self.stateless.db_wcu, self.stateless.net_bw
        )
    }
}
