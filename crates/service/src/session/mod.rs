//! Per-connection conversation state.
//!
//! Every accepted connection gets exactly one [`Session`], created in
//! [`ConversationStatus::None`] and torn down when the socket closes.
//! Everything a handler needs to know about "who is on the other end of
//! this connection and what have they proven" lives here.

pub mod registry;

use std::collections::VecDeque;
use std::time::Instant;

use ahash::HashMap;
use codec::message::{IdentityId, Kind, PublicKey};

/// Progression of a conversation. A connection starts at `None` and can
/// only move forward; a failed step (bad signature, unsupported version)
/// terminates the connection rather than stepping status back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationStatus {
    /// No `StartConversation` has completed yet. Only stateless
    /// [`Kind::is_single_request`] requests are reachable here.
    None,
    /// `StartConversation` completed: a peer public key and session
    /// challenge are on file, but the peer has not yet proven it holds
    /// the matching private key.
    Started,
    /// The peer has signed the challenge issued at `Started` and the
    /// node has verified it. The peer's identity is established for the
    /// remainder of the connection.
    Verified,
    /// `Verified` plus a specific role granted for this connection
    /// (hosting registered, app service call accepted, ...). Most
    /// mutating requests require this.
    Authenticated,
}

/// Cap on how many requests a connection may have outstanding without a
/// response before the oldest is evicted to bound memory. Node-initiated
/// requests (app-service relay notifications) are the main source of
/// requests that can go unanswered for a while.
pub const MAX_UNFINISHED_REQUESTS: usize = 128;

/// How long a connection may go without a successfully decoded frame
/// before the sweeper closes it. Refreshed on every frame this node
/// decodes from the peer, request or response alike.
pub const KEEP_ALIVE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

/// The four roles a connection may be authorized for, configured per
/// listening interface. Distinct from [`Session::role`], which is the
/// narrower "what has this specific connection proven" fact established
/// during the handshake — `roles` is "what is this listening socket even
/// allowed to ask for", checked before a request ever reaches the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Customer,
    Hosting,
    AppService,
    Directory,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Hosting => "hosting",
            Role::AppService => "app-service",
            Role::Directory => "directory",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "customer" => Some(Role::Customer),
            "hosting" => Some(Role::Hosting),
            "app-service" => Some(Role::AppService),
            "directory" => Some(Role::Directory),
            _ => None,
        }
    }

    /// Every role, for listeners that do not restrict which roles they
    /// accept.
    pub fn all() -> Vec<Role> {
        vec![Role::Customer, Role::Hosting, Role::AppService, Role::Directory]
    }
}

/// A request this node sent to a peer and is still waiting to hear back
/// about, keyed by the `msg_id` it was sent under. `token` carries the
/// relay token a `IncomingCallNotification` was sent for, so the reply
/// can be turned back into a `RelayManager::accept`/`reject` call
/// without the peer having to echo the token itself.
struct UnfinishedRequest {
    kind: Kind,
    token: Option<[u8; 16]>,
    #[allow(dead_code)]
    sent_at: Instant,
}

/// Bounded table of outstanding node-initiated requests on one
/// connection. Insertion beyond [`MAX_UNFINISHED_REQUESTS`] evicts the
/// oldest entry (FIFO) rather than growing unbounded or rejecting the
/// new request outright — a slow or unresponsive peer degrades to losing
/// track of its oldest calls, not to the connection refusing new work.
pub struct UnfinishedRequests {
    order: VecDeque<u32>,
    by_id: HashMap<u32, UnfinishedRequest>,
}

impl Default for UnfinishedRequests {
    fn default() -> Self {
        Self::new()
    }
}

impl UnfinishedRequests {
    pub fn new() -> Self {
        Self { order: VecDeque::with_capacity(MAX_UNFINISHED_REQUESTS), by_id: HashMap::default() }
    }

    pub fn insert(&mut self, msg_id: u32, kind: Kind, token: Option<[u8; 16]>) {
        if self.order.len() >= MAX_UNFINISHED_REQUESTS {
            if let Some(oldest) = self.order.pop_front() {
                self.by_id.remove(&oldest);
            }
        }
        self.order.push_back(msg_id);
        self.by_id.insert(msg_id, UnfinishedRequest { kind, token, sent_at: Instant::now() });
    }

    /// Remove and return the expected [`Kind`] and correlation token for
    /// `msg_id`, if a request with that id is still outstanding.
    pub fn take(&mut self, msg_id: u32) -> Option<(Kind, Option<[u8; 16]>)> {
        let entry = self.by_id.remove(&msg_id)?;
        self.order.retain(|id| *id != msg_id);
        Some((entry.kind, entry.token))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// State tracked for the lifetime of one accepted connection.
pub struct Session {
    pub status: ConversationStatus,
    /// Set once `StartConversation` has been processed.
    pub peer_public_key: Option<PublicKey>,
    /// `IdentityId::from_public_key(peer_public_key)`, cached alongside
    /// it so lookups don't re-hash on every request.
    pub peer_identity_id: Option<IdentityId>,
    /// The challenge this node issued at `StartConversation`, consumed
    /// (and cleared) the moment it is verified.
    pub pending_challenge: Option<[u8; 32]>,
    /// Role granted once authenticated (hosting, app-service, customer,
    /// directory) — `None` before `Authenticated`.
    pub role: Option<&'static str>,
    /// Roles this connection's listening interface is configured to
    /// accept requests for at all, checked before conversation status
    /// or store state — see [`Role`].
    pub roles: Vec<Role>,
    pub unfinished_requests: UnfinishedRequests,
    pub search_cursor: Option<SearchCursor>,
    pub created_at: Instant,
    /// Refreshed on every successfully decoded frame; the sweeper closes
    /// the connection once this deadline passes.
    pub keep_alive_deadline: Instant,
}

/// Cached state for paging through a `ProfileSearch` result set via
/// `ProfileSearchPart`.
pub struct SearchCursor {
    pub query_id: u64,
    pub results: Vec<codec::message::IdentitySummary>,
    pub created_at: Instant,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self::with_roles(Role::all())
    }

    /// Build a session for a connection accepted on an interface
    /// restricted to `roles`. An empty `roles` list is treated as "no
    /// restriction configured" by [`crate::routing::role_satisfies`].
    pub fn with_roles(roles: Vec<Role>) -> Self {
        let now = Instant::now();
        Self {
            status: ConversationStatus::None,
            peer_public_key: None,
            peer_identity_id: None,
            pending_challenge: None,
            role: None,
            roles,
            unfinished_requests: UnfinishedRequests::new(),
            search_cursor: None,
            created_at: now,
            keep_alive_deadline: now + KEEP_ALIVE_TIMEOUT,
        }
    }

    /// Push the keep-alive deadline out from now. Called after every
    /// frame this node successfully decodes from the peer.
    pub fn refresh_keep_alive(&mut self) {
        self.keep_alive_deadline = Instant::now() + KEEP_ALIVE_TIMEOUT;
    }

    pub fn start(&mut self, public_key: PublicKey, challenge: [u8; 32]) {
        self.peer_identity_id = Some(IdentityId::from_public_key(&public_key));
        self.peer_public_key = Some(public_key);
        self.pending_challenge = Some(challenge);
        self.status = ConversationStatus::Started;
    }

    pub fn mark_verified(&mut self) {
        self.pending_challenge = None;
        self.status = ConversationStatus::Verified;
    }

    pub fn authenticate(&mut self, role: &'static str) {
        self.role = Some(role);
        self.status = ConversationStatus::Authenticated;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unfinished_requests_evict_oldest_past_capacity() {
        let mut table = UnfinishedRequests::new();
        for i in 0..(MAX_UNFINISHED_REQUESTS as u32 + 1) {
            table.insert(i, Kind::IncomingCallNotification, None);
        }
        assert_eq!(table.len(), MAX_UNFINISHED_REQUESTS);
        assert!(table.take(0).is_none());
        assert!(table.take(MAX_UNFINISHED_REQUESTS as u32).is_some());
    }

    #[test]
    fn session_progresses_through_statuses() {
        let mut session = Session::new();
        assert_eq!(session.status, ConversationStatus::None);

        session.start(PublicKey([1u8; 32]), [2u8; 32]);
        assert_eq!(session.status, ConversationStatus::Started);
        assert!(session.peer_identity_id.is_some());

        session.mark_verified();
        assert_eq!(session.status, ConversationStatus::Verified);
        assert!(session.pending_challenge.is_none());

        session.authenticate("hosting");
        assert_eq!(session.status, ConversationStatus::Authenticated);
        assert_eq!(session.role, Some("hosting"));
    }
}
