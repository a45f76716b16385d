//! App-service call relay.
//!
//! `CallIdentityAppService` does not carry application payload itself —
//! it only asks the node to broker a channel between a caller and a
//! callee that both registered the same app service name. The callee is
//! notified, and once it accepts, both sides address the same relay by
//! a private 128-bit token and exchange `ApplicationServiceSendMessage`
//! frames the node forwards verbatim.
//!
//! The caller's own response is deferred until the callee answers (or
//! the accept window times out): `create` stashes the caller's outbox
//! and original `msg_id` on the relay, and `accept`/`reject`/
//! `sweep_expired` hand it back out once there is something to answer
//! with.

use std::time::{Duration, Instant};

use ahash::HashMap;
use codec::message::IdentityId;
use parking_lot::RwLock;

use crate::session::registry::Outbox;

/// How long a relay may sit in `NotificationSent` before it is destroyed
/// for going unanswered.
pub const ACCEPT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long an `Open` relay may sit idle (no forwarded payload) before
/// the sweeper reclaims it.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayStatus {
    /// The callee has been told about the call and has not yet
    /// responded.
    NotificationSent,
    /// The callee accepted; the relay is usable for forwarding but has
    /// not exchanged a payload yet.
    Accepted,
    /// At least one payload has been forwarded in either direction.
    Open,
    /// Torn down — rejected, timed out, or explicitly closed. Lookups
    /// against either token return not-found from here on.
    Destroyed,
}

pub struct Relay {
    pub caller_id: IdentityId,
    pub callee_id: IdentityId,
    pub service_name: String,
    pub caller_token: [u8; 16],
    pub callee_token: [u8; 16],
    pub status: RelayStatus,
    last_activity: Instant,
    /// Where, and under what `msg_id`, to send the caller's deferred
    /// `CallIdentityAppService` response. Taken (and thus cleared) the
    /// moment that response is actually sent.
    caller_reply: Option<(Outbox, u32)>,
}

impl Relay {
    fn is_expired(&self, now: Instant) -> bool {
        match self.status {
            RelayStatus::NotificationSent => now.duration_since(self.last_activity) > ACCEPT_TIMEOUT,
            RelayStatus::Accepted | RelayStatus::Open => now.duration_since(self.last_activity) > IDLE_TIMEOUT,
            RelayStatus::Destroyed => true,
        }
    }
}

#[derive(Default)]
struct Inner {
    by_caller_token: HashMap<[u8; 16], [u8; 16]>,
    relays: HashMap<[u8; 16], Relay>,
}

/// Tracks every in-flight app-service call by its callee token (the
/// primary key) with a secondary index from caller token to callee
/// token, since either side may address the relay by its own token.
pub struct RelayManager {
    inner: RwLock<Inner>,
}

impl Default for RelayManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayManager {
    pub fn new() -> Self {
        Self { inner: RwLock::new(Inner::default()) }
    }

    pub fn create(
        &self,
        caller_id: IdentityId,
        callee_id: IdentityId,
        service_name: String,
        caller_outbox: Outbox,
        caller_msg_id: u32,
    ) -> ([u8; 16], [u8; 16]) {
        let caller_token = codec::crypto::random_relay_token();
        let callee_token = codec::crypto::random_relay_token();
        let relay = Relay {
            caller_id,
            callee_id,
            service_name,
            caller_token,
            callee_token,
            status: RelayStatus::NotificationSent,
            last_activity: Instant::now(),
            caller_reply: Some((caller_outbox, caller_msg_id)),
        };

        let mut inner = self.inner.write();
        inner.by_caller_token.insert(caller_token, callee_token);
        inner.relays.insert(callee_token, relay);
        (caller_token, callee_token)
    }

    fn resolve(inner: &Inner, token: &[u8; 16]) -> Option<[u8; 16]> {
        if inner.relays.contains_key(token) {
            return Some(*token);
        }
        inner.by_caller_token.get(token).copied()
    }

    /// The callee accepted: flip the relay to `Accepted` and hand back
    /// the caller's deferred reply destination plus the token to answer
    /// with.
    pub fn accept(&self, callee_token: &[u8; 16]) -> Option<(Outbox, u32, [u8; 16])> {
        let mut inner = self.inner.write();
        let relay = inner.relays.get_mut(callee_token)?;
        if relay.status != RelayStatus::NotificationSent {
            return None;
        }
        relay.status = RelayStatus::Accepted;
        relay.last_activity = Instant::now();
        let caller_token = relay.caller_token;
        let reply = relay.caller_reply.take()?;
        Some((reply.0, reply.1, caller_token))
    }

    /// The callee rejected: destroy the relay and hand back the
    /// caller's deferred reply destination so it can be told the call
    /// did not go through.
    pub fn reject(&self, callee_token: &[u8; 16]) -> Option<(Outbox, u32)> {
        let reply = {
            let mut inner = self.inner.write();
            inner.relays.get_mut(callee_token).and_then(|relay| relay.caller_reply.take())
        };
        self.destroy_by_any_token(callee_token);
        reply
    }

    /// Forward a payload addressed by `token` (either the caller's or
    /// callee's), returning the peer's identity/token so the caller can
    /// push an `ApplicationServiceSendMessage` notification there.
    pub fn forward(&self, token: &[u8; 16]) -> Option<(IdentityId, [u8; 16])> {
        let mut inner = self.inner.write();
        let callee_token = Self::resolve(&inner, token)?;
        let relay = inner.relays.get_mut(&callee_token)?;
        if relay.status == RelayStatus::Destroyed {
            return None;
        }
        relay.status = RelayStatus::Open;
        relay.last_activity = Instant::now();

        if *token == relay.caller_token {
            Some((relay.callee_id, relay.callee_token))
        } else {
            Some((relay.caller_id, relay.caller_token))
        }
    }

    pub fn destroy_by_any_token(&self, token: &[u8; 16]) {
        let mut inner = self.inner.write();
        if let Some(callee_token) = Self::resolve(&inner, token) {
            if let Some(relay) = inner.relays.get_mut(&callee_token) {
                relay.status = RelayStatus::Destroyed;
            }
            let caller_token = inner.relays.get(&callee_token).map(|r| r.caller_token);
            inner.relays.remove(&callee_token);
            if let Some(caller_token) = caller_token {
                inner.by_caller_token.remove(&caller_token);
            }
        }
    }

    pub fn status(&self, token: &[u8; 16]) -> Option<RelayStatus> {
        let inner = self.inner.read();
        let callee_token = Self::resolve(&inner, token)?;
        inner.relays.get(&callee_token).map(|r| r.status)
    }

    /// Remove relays that have exceeded their timeout for their current
    /// status. Called periodically by the root sweeper. Relays that
    /// timed out while still `NotificationSent` had never gotten an
    /// answer, so their caller's deferred reply destination is handed
    /// back for the sweeper to tell them the call timed out.
    pub fn sweep_expired(&self) -> (usize, Vec<(Outbox, u32)>) {
        let now = Instant::now();
        let mut inner = self.inner.write();
        let expired: Vec<[u8; 16]> = inner
            .relays
            .iter()
            .filter(|(_, relay)| relay.is_expired(now))
            .map(|(token, _)| *token)
            .collect();

        let mut timed_out = Vec::new();
        for callee_token in &expired {
            if let Some(mut relay) = inner.relays.remove(callee_token) {
                inner.by_caller_token.remove(&relay.caller_token);
                if relay.status == RelayStatus::NotificationSent {
                    if let Some(reply) = relay.caller_reply.take() {
                        timed_out.push(reply);
                    }
                }
            }
        }
        (expired.len(), timed_out)
    }

    pub fn active_count(&self) -> usize {
        self.inner.read().relays.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn id(b: u8) -> IdentityId {
        IdentityId([b; 32])
    }

    #[test]
    fn accept_then_forward_transitions_to_open() {
        let manager = RelayManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let (caller_token, callee_token) = manager.create(id(1), id(2), "chat".into(), tx, 7);

        let accepted = manager.accept(&callee_token);
        assert!(accepted.is_some());
        assert_eq!(manager.status(&caller_token), Some(RelayStatus::Accepted));

        let (peer_identity, peer_token) = manager.forward(&caller_token).unwrap();
        assert_eq!(peer_identity, id(2));
        assert_eq!(peer_token, callee_token);
        assert_eq!(manager.status(&caller_token), Some(RelayStatus::Open));
    }

    #[test]
    fn reject_destroys_the_relay_for_both_tokens() {
        let manager = RelayManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let (caller_token, callee_token) = manager.create(id(1), id(2), "chat".into(), tx, 7);

        let reply = manager.reject(&callee_token);
        assert!(reply.is_some());
        assert_eq!(manager.status(&caller_token), None);
        assert_eq!(manager.status(&callee_token), None);
    }

    #[test]
    fn cannot_accept_an_already_accepted_relay_twice() {
        let manager = RelayManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let (_, callee_token) = manager.create(id(1), id(2), "chat".into(), tx, 7);
        assert!(manager.accept(&callee_token).is_some());
        assert!(manager.accept(&callee_token).is_none());
    }

    #[test]
    fn sweep_returns_caller_reply_for_timed_out_notifications() {
        let manager = RelayManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let (_, callee_token) = manager.create(id(1), id(2), "chat".into(), tx, 7);

        {
            let mut inner = manager.inner.write();
            let relay = inner.relays.get_mut(&callee_token).unwrap();
            relay.last_activity = Instant::now() - ACCEPT_TIMEOUT - Duration::from_secs(1);
        }

        let (removed, timed_out) = manager.sweep_expired();
        assert_eq!(removed, 1);
        assert_eq!(timed_out.len(), 1);
    }
}
