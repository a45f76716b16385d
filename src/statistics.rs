//! Connection-level counters, kept separate from the protocol counts the
//! `ProfileStats` request already exposes (hosted identities, active
//! relays) because those live in the `service` crate and are queried on
//! demand; these are incremented on the hot path of every connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct Inner {
    connections_accepted: AtomicU64,
    connections_active: AtomicU64,
    frames_received: AtomicU64,
    frames_sent: AtomicU64,
}

#[derive(Clone, Default)]
pub struct Statistics(Arc<Inner>);

impl Statistics {
    pub fn connection_opened(&self) {
        self.0.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.0.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.0.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn frame_received(&self) {
        self.0.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_sent(&self) {
        self.0.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            connections_accepted: self.0.connections_accepted.load(Ordering::Relaxed),
            connections_active: self.0.connections_active.load(Ordering::Relaxed),
            frames_received: self.0.frames_received.load(Ordering::Relaxed),
            frames_sent: self.0.frames_sent.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Snapshot {
    pub connections_accepted: u64,
    pub connections_active: u64,
    pub frames_received: u64,
    pub frames_sent: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_active_connections_across_open_and_close() {
        let stats = Statistics::default();
        stats.connection_opened();
        stats.connection_opened();
        stats.connection_closed();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.connections_accepted, 2);
        assert_eq!(snapshot.connections_active, 1);
    }
}
