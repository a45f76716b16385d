//! Request dispatch: checks a request's preconditions (role, conversation
//! status, signature) against the session it arrived on, then executes
//! it against the store/relay/registry and builds the response.
//!
//! Node-initiated requests (the two notification kinds) are built here
//! too, for callers pushing a relay's other side a message, but they are
//! never *received* by this dispatcher — a peer never sends
//! `IncomingCallNotification` to us.

pub mod handlers;

use codec::message::{Kind, Request, Response, StatusCode};

use crate::session::registry::Outbox;
use crate::session::{ConversationStatus, Role, Session};
use crate::Service;

/// Minimum conversation status a [`Kind`] requires before the
/// dispatcher will even attempt to execute it. Requests that fail this
/// check get `BadConversationStatus` without touching the store.
fn required_status(kind: Kind) -> ConversationStatus {
    use ConversationStatus::*;
    match kind {
        Kind::Ping
        | Kind::ListRoles
        | Kind::GetIdentityInformation
        | Kind::ApplicationServiceSendMessage
        | Kind::ProfileStats
        | Kind::GetIdentityRelationships
        | Kind::ProfileSearch
        | Kind::ProfileSearchPart
        | Kind::GetIdentityImage => None,
        Kind::StartConversation => None,
        Kind::CheckIn | Kind::VerifyIdentity => Started,
        Kind::HostingRegister => Verified,
        Kind::UpdateProfile
        | Kind::CancelHosting
        | Kind::AppServiceAdd
        | Kind::AppServiceRemove
        | Kind::CallIdentityAppService
        | Kind::AddRelatedIdentity
        | Kind::RemoveRelatedIdentity => Authenticated,
        Kind::IncomingCallNotification | Kind::AppServiceReceiveMessageNotification => None,
    }
}

fn status_satisfies(have: ConversationStatus, need: ConversationStatus) -> bool {
    use ConversationStatus::*;
    let rank = |s: ConversationStatus| match s {
        None => 0,
        Started => 1,
        Verified => 2,
        Authenticated => 3,
    };
    rank(have) >= rank(need)
}

/// Roles a connection's interface must carry at least one of to reach a
/// given [`Kind`] at all. An empty slice means every role is permitted.
/// Checked ahead of conversation status and before the store is
/// touched, mirroring how `required_status` gates on session state.
fn required_roles(kind: Kind) -> &'static [Role] {
    match kind {
        Kind::VerifyIdentity => &[Role::Hosting, Role::Directory],
        Kind::HostingRegister
        | Kind::UpdateProfile
        | Kind::CancelHosting
        | Kind::AppServiceAdd
        | Kind::AppServiceRemove
        | Kind::AddRelatedIdentity
        | Kind::RemoveRelatedIdentity => &[Role::Hosting],
        Kind::CallIdentityAppService | Kind::ApplicationServiceSendMessage => &[Role::Customer, Role::AppService],
        _ => &[],
    }
}

fn role_satisfies(have: &[Role], need: &[Role]) -> bool {
    need.is_empty() || have.iter().any(|role| need.contains(role))
}

/// Dispatch one incoming [`Request`] against `session`, returning the
/// response to write back, or `None` when the response has been
/// deferred (a `CallIdentityAppService` waiting on the callee).
/// `connection_id` identifies this connection in the client registry;
/// `caller_outbox` is this connection's own outbox, stashed by handlers
/// that need to answer asynchronously; `outbox` lets handlers that
/// trigger node-initiated notifications (an app-service call) reach the
/// callee's connection.
pub async fn dispatch(
    service: &Service,
    session: &mut Session,
    connection_id: u64,
    caller_outbox: &Outbox,
    request: Request,
) -> Option<Response> {
    let (msg_id, version_ok, body) = match &request {
        Request::Single(r) => (0u32, r.version == codec::message::Version::V1, &r.body),
        Request::Conversation(r) => (r.msg_id, true, &r.body),
    };

    let kind = body.kind();
    session.refresh_keep_alive();
    if !version_ok {
        return Some(Response::error(msg_id, kind, StatusCode::Unsupported));
    }
    if !role_satisfies(&session.roles, required_roles(kind)) {
        return Some(Response::error(msg_id, kind, StatusCode::BadRole));
    }
    if !status_satisfies(session.status, required_status(kind)) {
        return Some(Response::error(msg_id, kind, StatusCode::BadConversationStatus));
    }

    let signature = match &request {
        Request::Conversation(r) => r.signature.as_ref(),
        Request::Single(_) => None,
    };

    handlers::handle(service, session, connection_id, caller_outbox, msg_id, kind, body, signature).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_ranking_is_monotonic() {
        assert!(status_satisfies(ConversationStatus::Authenticated, ConversationStatus::Started));
        assert!(!status_satisfies(ConversationStatus::None, ConversationStatus::Started));
        assert!(status_satisfies(ConversationStatus::None, ConversationStatus::None));
    }
}
