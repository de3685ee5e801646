//! Internal data structures shared by the cache and the ghost cache.

pub mod intrusive;

pub use intrusive::{IntrusiveList, SlotId};
