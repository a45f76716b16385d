//! Global identity-to-connection mapping.
//!
//! At most one connection may be checked in for a given identity at a
//! time; a second check-in displaces the first rather than being
//! rejected, matching a phone picking up a call on a new device.

use ahash::HashMap;
use codec::message::IdentityId;
use parking_lot::RwLock;
use tokio::sync::mpsc;

use codec::message::{RequestBody, Response};

/// Everything that can reach a connection's write half from outside its
/// own task: either a node-initiated request body to wrap and send, or a
/// signal that has no wire representation of its own.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Forward as a fresh `ConversationRequest`. The owning connection
    /// assigns the `msg_id` and records the outstanding request in its
    /// own [`crate::session::UnfinishedRequests`] table before writing
    /// the frame — the registry only knows how to reach a connection,
    /// not what it has already sent.
    Push(RequestBody),
    /// A deferred reply to a request this connection already sent and
    /// is still waiting on (a `CallIdentityAppService` whose callee has
    /// now accepted, rejected, or timed out). Carries the connection's
    /// own `msg_id` already, so it is written back verbatim.
    Reply(Response),
    /// A newer connection just checked in for the same identity; this
    /// connection lost its claim and should close.
    Displaced,
}

pub type Outbox = mpsc::UnboundedSender<Outbound>;

#[derive(Default)]
struct Inner {
    by_identity: HashMap<IdentityId, (u64, Outbox)>,
}

/// Tracks which connection, if any, is currently checked in for each
/// identity. Connection identity is a monotonically increasing
/// `connection_id`, not the socket itself, so registry operations never
/// need to touch I/O.
pub struct ClientRegistry {
    inner: RwLock<Inner>,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self { inner: RwLock::new(Inner::default()) }
    }

    /// Register `connection_id` as checked in for `identity_id`,
    /// returning the previously registered connection's outbox, if any,
    /// so the caller can notify it that it has been displaced.
    pub fn check_in(&self, identity_id: IdentityId, connection_id: u64, outbox: Outbox) -> Option<Outbox> {
        self.inner.write().by_identity.insert(identity_id, (connection_id, outbox)).map(|(_, old)| old)
    }

    /// Remove the registration for `identity_id`, but only if it still
    /// belongs to `connection_id` — avoids a stale disconnect clearing a
    /// newer check-in for the same identity.
    pub fn check_out(&self, identity_id: &IdentityId, connection_id: u64) {
        let mut inner = self.inner.write();
        if let Some((current, _)) = inner.by_identity.get(identity_id) {
            if *current == connection_id {
                inner.by_identity.remove(identity_id);
            }
        }
    }

    pub fn outbox_for(&self, identity_id: &IdentityId) -> Option<Outbox> {
        self.inner.read().by_identity.get(identity_id).map(|(_, outbox)| outbox.clone())
    }

    pub fn is_checked_in(&self, identity_id: &IdentityId) -> bool {
        self.inner.read().by_identity.contains_key(identity_id)
    }

    pub fn checked_in_count(&self) -> usize {
        self.inner.read().by_identity.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> IdentityId {
        IdentityId([byte; 32])
    }

    #[test]
    fn second_check_in_displaces_the_first() {
        let registry = ClientRegistry::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();

        assert!(registry.check_in(id(1), 100, tx1).is_none());
        let displaced = registry.check_in(id(1), 200, tx2);
        assert!(displaced.is_some());
        assert_eq!(registry.checked_in_count(), 1);
    }

    #[test]
    fn stale_check_out_does_not_clear_newer_registration() {
        let registry = ClientRegistry::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();

        registry.check_in(id(1), 100, tx1);
        registry.check_in(id(1), 200, tx2);

        registry.check_out(&id(1), 100);
        assert!(registry.is_checked_in(&id(1)));

        registry.check_out(&id(1), 200);
        assert!(!registry.is_checked_in(&id(1)));
    }
}
