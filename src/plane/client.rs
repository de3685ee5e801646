//! Blocked-client handles and the reply model.
//!
//! A [`ClientHandle`] is a one-shot reply slot: the pipeline hands it to
//! the caller when a command cannot be answered synchronously, and the
//! command thread resolves it once the corresponding task completes. The
//! caller may wait from any thread.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// A protocol-level reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// A simple status string, e.g. `OK`.
    Simple(String),
    /// A bulk value.
    Bulk(String),
    /// An integer.
    Int(i64),
    /// A floating-point value.
    Double(f64),
    /// A nested array.
    Array(Vec<Reply>),
    /// The null reply.
    Null,
    /// A protocol error, rendered as `ERR ...`.
    Error(String),
}

impl Reply {
    /// The canonical `OK` status.
    pub fn ok() -> Self {
        Reply::Simple("OK".into())
    }

    /// Convenience constructor for `ERR ...` replies.
    pub fn err(msg: impl Into<String>) -> Self {
        Reply::Error(msg.into())
    }

    /// Returns `true` if this is an error reply.
    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }
}

#[derive(Debug, Default)]
struct ClientSlot {
    reply: Mutex<Option<Reply>>,
    cv: Condvar,
}

/// A handle to a client blocked on a pending reply.
///
/// Cloning the handle shares the slot; the first [`resolve`] wins and any
/// number of waiters observe it.
///
/// [`resolve`]: ClientHandle::resolve
#[derive(Debug, Clone, Default)]
pub struct ClientHandle(Arc<ClientSlot>);

impl ClientHandle {
    /// Creates an unresolved handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves the handle, waking all waiters. Later calls are ignored;
    /// a reply, once delivered, never changes.
    pub fn resolve(&self, reply: Reply) {
        let mut slot = self.0.reply.lock();
        if slot.is_none() {
            *slot = Some(reply);
            self.0.cv.notify_all();
        }
    }

    /// Returns the reply if already resolved, without blocking.
    pub fn peek(&self) -> Option<Reply> {
        self.0.reply.lock().clone()
    }

    /// Blocks until the handle resolves.
    pub fn wait(&self) -> Reply {
        let mut slot = self.0.reply.lock();
        loop {
            if let Some(reply) = slot.clone() {
                return reply;
            }
            self.0.cv.wait(&mut slot);
        }
    }

    /// Blocks up to `timeout` for the reply.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Reply> {
        let deadline = std::time::Instant::now() + timeout;
        let mut slot = self.0.reply.lock();
        loop {
            if let Some(reply) = slot.clone() {
                return Some(reply);
            }
            if self.0.cv.wait_until(&mut slot, deadline).timed_out() {
                return slot.clone();
            }
        }
    }
}
