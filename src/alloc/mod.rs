//! The HARE allocation engine.
//!
//! HARE redistributes three stateless resource dimensions (storage read
//! capacity, storage write capacity, egress bandwidth) plus cache bytes
//! across tenants. Each allocation round collects idle resources, optionally
//! trades cache for the bottleneck resource between tenants, and then
//! redistributes the collected slack.
//!
//! ## Key Components
//!
//! - [`resrc`]: resource vector algebra, including the min-ratio quotient
//!   that embodies dominant-resource fairness.
//! - [`mrc`]: miss-ratio curves with interpolation and memoization.
//! - [`tenant`]: per-tenant state and the relinquish/compensate predictions
//!   that drive trading.
//! - [`engine`]: the allocator itself.
//! - [`params`]: tunables and numeric sentinels.

pub mod engine;
pub mod mrc;
pub mod params;
pub mod resrc;
pub mod tenant;

pub use engine::{AllocPolicy, Allocator};
pub use mrc::MissRatioCurve;
pub use resrc::{ResrcVec, StatelessResrcVec};
pub use tenant::Tenant;
