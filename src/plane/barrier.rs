//! Client barrier.
//!
//! Load drivers use this to line clients up before a measurement window:
//! every client issues `BARRIER.WAIT`, the coordinator polls
//! `BARRIER.COUNT`, then fires `BARRIER.SIGNAL` to release them all.

use crate::plane::client::{ClientHandle, Reply};

/// Waiting clients between a `WAIT` and the next `SIGNAL`.
#[derive(Debug, Default)]
pub struct Barrier {
    waiting: Vec<ClientHandle>,
}

impl Barrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks a client until the next signal.
    pub fn wait(&mut self) -> ClientHandle {
        let handle = ClientHandle::new();
        self.waiting.push(handle.clone());
        handle
    }

    /// Releases every waiting client; returns how many were woken.
    pub fn signal(&mut self) -> usize {
        let woken = self.waiting.len();
        for client in self.waiting.drain(..) {
            client.resolve(Reply::ok());
        }
        woken
    }

    /// Number of clients currently waiting.
    pub fn count(&self) -> usize {
        self.waiting.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_wakes_all_waiters() {
        let mut b = Barrier::new();
        let h1 = b.wait();
        let h2 = b.wait();
        assert_eq!(b.count(), 2);
        assert_eq!(h1.peek(), None);

        assert_eq!(b.signal(), 2);
        assert_eq!(b.count(), 0);
        assert_eq!(h1.wait(), Reply::ok());
        assert_eq!(h2.wait(), Reply::ok());
    }

    #[test]
    fn signal_without_waiters_is_harmless() {
        let mut b = Barrier::new();
        assert_eq!(b.signal(), 0);
    }
}
