//! The per-tenant cache data plane.
//!
//! A single command thread owns the cache, the ghost cache, the inflight
//! registry, and the statistics; a dedicated storage worker thread owns
//! the outbound path to the remote table store. Clients that cannot be
//! answered synchronously receive a [`client::ClientHandle`] that resolves
//! when the command thread processes the task's completion.
//!
//! ```text
//!   command thread                 worker thread           upstream
//!   ──────────────                 ─────────────           ────────
//!   GET/SET ──► task queues ─────► rate-limited pop ─────► async call
//!                                                            │
//!   pump() ◄── completion queue ◄── status set, wakeup ◄─────┘
//!     │
//!     └─► cache + ghost mutations, reply, wake dependents
//! ```

pub mod barrier;
pub mod cache;
pub mod client;
pub mod command;
pub mod config;
pub mod inflight;
pub mod instance;
pub mod rate;
pub mod stats;
pub mod storage;
pub mod task;

pub use client::{ClientHandle, Reply};
pub use instance::{Instance, InstanceOptions};
