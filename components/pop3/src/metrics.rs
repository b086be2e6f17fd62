//! Process-wide counters (§4.6, §4.9 STATS, component I).

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Metrics {
    concurrent_connections: AtomicI64,
    historical_access: AtomicU64,
    transferred_bytes: AtomicU64,
    retrieved_messages: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub struct Snapshot {
    pub concurrent_connections: i64,
    pub historical_access: u64,
    pub transferred_bytes: u64,
    pub retrieved_messages: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bumped when the acceptor (§4.9 J) creates a session.
    pub fn on_accept(&self) {
        self.concurrent_connections.fetch_add(1, Ordering::Relaxed);
        self.historical_access.fetch_add(1, Ordering::Relaxed);
    }

    /// Bumped at DONE/ERROR when an origin connection had been
    /// established (§4.6).
    pub fn on_teardown(&self) {
        self.concurrent_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn add_transferred_bytes(&self, n: u64) {
        self.transferred_bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn on_retrieved_message(&self) {
        self.retrieved_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            concurrent_connections: self.concurrent_connections.load(Ordering::Relaxed),
            historical_access: self.historical_access.load(Ordering::Relaxed),
            transferred_bytes: self.transferred_bytes.load(Ordering::Relaxed),
            retrieved_messages: self.retrieved_messages.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_and_teardown_balance_concurrent_connections() {
        let m = Metrics::new();
        m.on_accept();
        m.on_accept();
        assert_eq!(m.snapshot().concurrent_connections, 2);
        m.on_teardown();
        assert_eq!(m.snapshot().concurrent_connections, 1);
    }

    #[test]
    fn historical_access_never_decreases() {
        let m = Metrics::new();
        m.on_accept();
        m.on_teardown();
        m.on_accept();
        assert_eq!(m.snapshot().historical_access, 2);
    }
}
