//! hopperkv: a multi-tenant caching data plane for a remote table store.
//!
//! The crate has two halves. [`alloc`] is the HARE allocation engine: a
//! cache-aware, multi-resource fair allocator that periodically
//! redistributes cache bytes, storage read/write capacity, and egress
//! bandwidth across tenants based on measured miss-ratio curves. [`plane`]
//! is the per-tenant cache data plane: a read-through/write-through request
//! pipeline with inflight deduplication, a sampled [`ghost`] cache that
//! produces the miss-ratio curves, and rolling-frame rate limiters that
//! enforce the allocator's dictated limits.
//!
//! See `DESIGN.md` for architecture notes and invariants.

pub mod alloc;
pub mod ds;
pub mod error;
pub mod ghost;
pub mod plane;
