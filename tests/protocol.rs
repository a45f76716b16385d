//! End-to-end exercises of the protocol engine through
//! [`service::routing::dispatch`], bypassing the TCP/TLS transport.
//!
//! Each test plays a full conversation by hand (`StartConversation` →
//! `CheckIn`/`VerifyIdentity` → ...) against a fresh [`Service`], the way
//! a single connection's handler loop would, just without a socket in
//! the way.

use codec::crypto;
use codec::message::{
    GpsLocation, IdentityId, PublicKey, Request, RequestBody, Response, ResponseBody, SearchParams,
    Signature, SingleRequest, StatusCode, Version,
};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use service::session::registry::{Outbound, Outbox};
use service::session::{ConversationStatus, Session};
use service::{routing, Service, ServiceOptions};
use tokio::sync::mpsc;

struct Peer {
    signing_key: SigningKey,
}

impl Peer {
    fn new() -> Self {
        Self { signing_key: SigningKey::generate(&mut OsRng) }
    }

    fn public_key(&self) -> PublicKey {
        PublicKey(self.signing_key.verifying_key().to_bytes())
    }

    fn identity_id(&self) -> IdentityId {
        IdentityId::from_public_key(&self.public_key())
    }

    fn sign(&self, body: &[u8]) -> Signature {
        Signature(crypto::sign(&self.signing_key, body))
    }
}

fn new_service(tmp: &tempfile::TempDir) -> Service {
    Service::new(ServiceOptions { max_hosted_identities: 10, images_dir: tmp.path().to_path_buf(), node_keys: None })
}

fn single(body: RequestBody) -> Request {
    Request::Single(SingleRequest { version: Version::V1, body })
}

/// A throwaway outbox for call sites that must pass one to `dispatch`
/// but never expect anything to actually arrive on it.
fn outbox() -> Outbox {
    let (tx, _rx) = mpsc::unbounded_channel();
    tx
}

/// Dispatch expecting an immediate response (every request except a
/// deferred `CallIdentityAppService`).
async fn dispatch_ok(service: &Service, session: &mut Session, connection_id: u64, request: Request) -> Response {
    routing::dispatch(service, session, connection_id, &outbox(), request)
        .await
        .expect("expected an immediate response")
}

/// Drive a connection through `StartConversation` and either `CheckIn`
/// (grants the "hosting" role) or `VerifyIdentity` (verified only),
/// returning the session left at `Verified`/`Authenticated`.
async fn handshake(service: &Service, peer: &Peer, grant_hosting: bool) -> Session {
    let mut session = Session::new();

    let started = dispatch_ok(
        service,
        &mut session,
        1,
        single(RequestBody::StartConversation {
            offered_versions: vec![Version::V1],
            public_key: peer.public_key(),
            client_challenge: [0u8; 32],
        }),
    )
    .await;
    assert!(started.status.is_ok());
    assert_eq!(session.status, ConversationStatus::Started);

    let challenge = session.pending_challenge.expect("challenge issued");
    let signature = peer.sign(&challenge);

    let body = if grant_hosting { RequestBody::CheckIn { signature } } else { RequestBody::VerifyIdentity { signature } };
    let reply = dispatch_ok(service, &mut session, 1, single(body)).await;
    assert!(reply.status.is_ok(), "handshake step failed: {:?}", reply.status);

    session
}

async fn host_identity(service: &Service, peer: &Peer, session: &mut Session, contract_type: &str) {
    let signature = peer.sign(contract_type.as_bytes());
    let response = dispatch_ok(
        service,
        session,
        1,
        single(RequestBody::HostingRegister { contract_type: contract_type.to_string(), signature }),
    )
    .await;
    assert!(response.status.is_ok(), "hosting register failed: {:?}", response.status);
    assert_eq!(session.status, ConversationStatus::Authenticated);
    assert_eq!(session.role, Some("hosting"));
}

#[tokio::test]
async fn basic_hosting_cycle_register_update_lookup_cancel() {
    let tmp = tempfile::tempdir().unwrap();
    let service = new_service(&tmp);
    let peer = Peer::new();

    let mut session = handshake(&service, &peer, true).await;
    host_identity(&service, &peer, &mut session, "human").await;
    assert_eq!(service.store.hosted_count(), 1);

    let name_signature = peer.sign(b"Alice");
    let patch = codec::message::ProfilePatch {
        name: Some("Alice".into()),
        extra_data: Some("likes:hiking".into()),
        location: Some(GpsLocation::from_degrees(51.5, -0.1)),
        image: None,
        version: None,
    };
    let update = dispatch_ok(
        &service,
        &mut session,
        2,
        single(RequestBody::UpdateProfile { patch, signature: name_signature }),
    )
    .await;
    assert!(update.status.is_ok());

    let lookup = dispatch_ok(
        &service,
        &mut Session::new(),
        3,
        single(RequestBody::GetIdentityInformation { id: peer.identity_id() }),
    )
    .await;
    match lookup.body {
        ResponseBody::IdentityInformation { summary } => {
            assert_eq!(summary.name, "Alice");
            assert_eq!(summary.id, peer.identity_id());
        }
        other => panic!("expected identity information, got {other:?}"),
    }

    let cancel = dispatch_ok(
        &service,
        &mut session,
        4,
        single(RequestBody::CancelHosting { redirect_to: None, signature: peer.sign(b"cancel-hosting") }),
    )
    .await;
    assert!(cancel.status.is_ok());
    assert_eq!(service.store.hosted_count(), 0);
}

#[tokio::test]
async fn location_search_and_pagination_cursor() {
    let tmp = tempfile::tempdir().unwrap();
    let service = new_service(&tmp);

    for i in 0..3u8 {
        let peer = Peer::new();
        let mut session = handshake(&service, &peer, true).await;
        host_identity(&service, &peer, &mut session, "human").await;

        let name = format!("Neighbor{i}");
        let patch = codec::message::ProfilePatch {
            name: Some(name.clone()),
            extra_data: Some("likes:tea".into()),
            location: Some(GpsLocation::from_degrees(51.5 + i as f64 * 0.001, -0.1)),
            image: None,
            version: None,
        };
        let response = dispatch_ok(
            &service,
            &mut session,
            10,
            single(RequestBody::UpdateProfile { patch, signature: peer.sign(name.as_bytes()) }),
        )
        .await;
        assert!(response.status.is_ok(), "profile update failed: {:?}", response.status);
    }

    let mut searcher = Session::new();
    let params = SearchParams {
        location: GpsLocation::from_degrees(51.5, -0.1),
        radius_meters: 5_000,
        extra_data_regex: Some("tea".into()),
        name_prefix: None,
        limit: 2,
        hosted_only: false,
        include_images: false,
    };
    let first = dispatch_ok(&service, &mut searcher, 1, single(RequestBody::ProfileSearch { params })).await;
    let (total_matched, has_more) = match first.body {
        ResponseBody::SearchResults { results, total_matched, has_more } => {
            assert!(results.len() <= 2);
            (total_matched, has_more)
        }
        other => panic!("expected search results, got {other:?}"),
    };
    assert!(total_matched >= 2);

    if has_more {
        let more =
            dispatch_ok(&service, &mut searcher, 2, single(RequestBody::ProfileSearchPart { offset: 2, count: 2 })).await;
        assert!(matches!(more.body, ResponseBody::SearchResults { .. }));
    }
}

#[tokio::test]
async fn app_service_call_relays_a_message_end_to_end() {
    let tmp = tempfile::tempdir().unwrap();
    let service = new_service(&tmp);

    let caller = Peer::new();
    let callee = Peer::new();

    let mut caller_session = handshake(&service, &caller, true).await;
    host_identity(&service, &caller, &mut caller_session, "human").await;

    let mut callee_session = handshake(&service, &callee, true).await;
    host_identity(&service, &callee, &mut callee_session, "human").await;

    let added = dispatch_ok(
        &service,
        &mut callee_session,
        5,
        single(RequestBody::AppServiceAdd { service_name: "chat".into() }),
    )
    .await;
    assert!(added.status.is_ok());

    let (callee_outbox_tx, mut callee_outbox_rx) = mpsc::unbounded_channel();
    service.registry.check_in(callee.identity_id(), 200, callee_outbox_tx);

    // `CallIdentityAppService` never answers immediately: the response
    // is deferred until the callee's own connection answers the
    // `IncomingCallNotification` pushed to it below.
    let (caller_outbox_tx, mut caller_outbox_rx) = mpsc::unbounded_channel();
    let call = routing::dispatch(
        &service,
        &mut caller_session,
        6,
        &caller_outbox_tx,
        single(RequestBody::CallIdentityAppService { callee_id: callee.identity_id(), service_name: "chat".into() }),
    )
    .await;
    assert!(call.is_none(), "CallIdentityAppService must defer its response to the callee's answer");

    let pushed = callee_outbox_rx.try_recv().expect("callee should have been notified");
    let callee_token = match pushed {
        Outbound::Push(RequestBody::IncomingCallNotification { callee_token, .. }) => callee_token,
        other => panic!("expected an incoming call notification, got {other:?}"),
    };

    let (reply_outbox, reply_msg_id, caller_token) =
        service.relays.accept(&callee_token).expect("relay should accept once the callee answers ok");
    let _ = reply_outbox.send(Outbound::Reply(Response::ok(
        reply_msg_id,
        codec::message::Kind::CallIdentityAppService,
        ResponseBody::CallAccepted { caller_token },
    )));

    let caller_reply = caller_outbox_rx.try_recv().expect("caller should receive its deferred reply");
    match caller_reply {
        Outbound::Reply(response) => {
            assert!(response.status.is_ok());
            assert!(matches!(response.body, ResponseBody::CallAccepted { caller_token: t } if t == caller_token));
        }
        other => panic!("expected a deferred reply, got {other:?}"),
    }

    let forward = dispatch_ok(
        &service,
        &mut caller_session,
        7,
        single(RequestBody::ApplicationServiceSendMessage { token: caller_token, payload: b"hello".to_vec() }),
    )
    .await;
    assert!(forward.status.is_ok());

    let delivered = callee_outbox_rx.try_recv().expect("callee should have received the forwarded payload");
    match delivered {
        Outbound::Push(RequestBody::AppServiceReceiveMessageNotification { payload, .. }) => {
            assert_eq!(payload, b"hello");
        }
        other => panic!("expected a forwarded message, got {other:?}"),
    }
}

#[tokio::test]
async fn app_service_send_message_with_an_invalid_token_is_not_available() {
    let tmp = tempfile::tempdir().unwrap();
    let service = new_service(&tmp);
    let peer = Peer::new();

    let mut session = handshake(&service, &peer, true).await;
    host_identity(&service, &peer, &mut session, "human").await;

    let response = dispatch_ok(
        &service,
        &mut session,
        1,
        single(RequestBody::ApplicationServiceSendMessage { token: [0u8; 16], payload: b"hi".to_vec() }),
    )
    .await;
    assert_eq!(response.status, StatusCode::NotAvailable);
}

#[tokio::test]
async fn cancellation_with_redirect_to_a_neighbor() {
    let tmp = tempfile::tempdir().unwrap();
    let service = new_service(&tmp);
    let peer = Peer::new();
    let neighbor = Peer::new();

    let mut session = handshake(&service, &peer, true).await;
    host_identity(&service, &peer, &mut session, "human").await;

    let redirect = dispatch_ok(
        &service,
        &mut session,
        1,
        single(RequestBody::CancelHosting {
            redirect_to: Some(neighbor.identity_id()),
            signature: peer.sign(b"cancel-hosting"),
        }),
    )
    .await;
    assert!(redirect.status.is_ok());
    assert_eq!(service.store.hosted_count(), 0);
}

#[tokio::test]
async fn protocol_violation_is_rejected_without_touching_the_store() {
    let tmp = tempfile::tempdir().unwrap();
    let service = new_service(&tmp);
    let peer = Peer::new();
    let mut session = Session::new();

    // HostingRegister before StartConversation/CheckIn: the dispatcher's
    // precondition table should reject this before it ever reaches the
    // store.
    let response = dispatch_ok(
        &service,
        &mut session,
        1,
        single(RequestBody::HostingRegister { contract_type: "human".into(), signature: peer.sign(b"human") }),
    )
    .await;
    assert_eq!(response.status, StatusCode::BadConversationStatus);
    assert_eq!(service.store.hosted_count(), 0);
}

#[tokio::test]
async fn unsupported_version_is_rejected_at_start_conversation() {
    let tmp = tempfile::tempdir().unwrap();
    let service = new_service(&tmp);
    let mut session = Session::new();

    let request = Request::Single(SingleRequest {
        version: Version::V1,
        body: RequestBody::StartConversation {
            offered_versions: vec![],
            public_key: Peer::new().public_key(),
            client_challenge: [0u8; 32],
        },
    });
    let response = dispatch_ok(&service, &mut session, 1, request).await;
    assert_eq!(response.status, StatusCode::InvalidValue("no mutually supported protocol version".into()));
}

#[tokio::test]
async fn second_check_in_displaces_the_first_connection() {
    let tmp = tempfile::tempdir().unwrap();
    let service = new_service(&tmp);
    let peer = Peer::new();

    let (tx1, mut rx1) = mpsc::unbounded_channel();
    let (tx2, _rx2) = mpsc::unbounded_channel();

    assert!(service.registry.check_in(peer.identity_id(), 100, tx1).is_none());
    let displaced = service.registry.check_in(peer.identity_id(), 200, tx2);
    assert!(displaced.is_some());
    displaced.unwrap().send(Outbound::Displaced).unwrap();

    match rx1.try_recv() {
        Ok(Outbound::Displaced) => {}
        other => panic!("expected a displacement signal, got {other:?}"),
    }
    assert_eq!(service.registry.checked_in_count(), 1);
}
