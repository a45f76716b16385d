//! Per-request-kind business logic, grouped by the area of the store or
//! session they touch.

use codec::message::{
    IdentityId, Kind, PublicKey, RelatedIdentityCard, RequestBody, Response, ResponseBody,
    Signature, StatusCode, Version,
};

use crate::error::Error as StoreError;
use crate::session::registry::Outbox;
use crate::session::Session;
use crate::Service;

pub async fn handle(
    service: &Service,
    session: &mut Session,
    connection_id: u64,
    caller_outbox: &Outbox,
    msg_id: u32,
    kind: Kind,
    body: &RequestBody,
    signature: Option<&Signature>,
) -> Option<Response> {
    let result = match body {
        RequestBody::Ping { payload } => Ok(ResponseBody::Pong { payload: payload.clone() }),
        RequestBody::ListRoles => list_roles(),
        RequestBody::ProfileStats => profile_stats(service),
        RequestBody::GetIdentityInformation { id } => get_identity_information(service, id),
        RequestBody::GetIdentityRelationships { id } => get_identity_relationships(service, id),
        RequestBody::GetIdentityImage { id } => get_identity_image(service, id).await,
        RequestBody::ProfileSearch { params } => search::run_search(service, session, params),
        RequestBody::ProfileSearchPart { offset, count } => search::run_search_part(session, *offset, *count),
        RequestBody::ApplicationServiceSendMessage { token, payload } => {
            application_service_send_message(service, token, payload)
        }
        RequestBody::StartConversation { offered_versions, public_key, client_challenge } => {
            conversation::start(service, session, offered_versions, public_key, client_challenge)
        }
        RequestBody::CheckIn { signature } => conversation::check_in(session, signature),
        RequestBody::VerifyIdentity { signature } => conversation::verify_identity(session, signature),
        RequestBody::HostingRegister { contract_type, signature } => {
            conversation::hosting_register(service, session, contract_type, signature)
        }
        RequestBody::UpdateProfile { patch, signature } => profile::update(service, session, patch, signature).await,
        RequestBody::CancelHosting { redirect_to, signature } => {
            profile::cancel_hosting(service, session, *redirect_to, signature)
        }
        RequestBody::AppServiceAdd { service_name } => profile::app_service_add(service, session, service_name),
        RequestBody::AppServiceRemove { service_name } => {
            profile::app_service_remove(service, session, service_name)
        }
        RequestBody::AddRelatedIdentity { card } => relations::add(service, session, card),
        RequestBody::RemoveRelatedIdentity { application_id } => {
            relations::remove(service, session, application_id)
        }
        RequestBody::CallIdentityAppService { callee_id, service_name } => {
            appservice::call(service, session, msg_id, caller_outbox.clone(), callee_id, service_name)
        }
        RequestBody::IncomingCallNotification { .. } | RequestBody::AppServiceReceiveMessageNotification { .. } => {
            Err(StoreError::InvalidValue("node-initiated kinds are never received from a peer".into()))
        }
    };

    match result {
        Ok(response_body) => Some(Response::ok(msg_id, kind, response_body)),
        Err(StoreError::Deferred) => None,
        Err(err) => Some(Response::error(msg_id, kind, status_for(&err))),
    }
}

fn status_for(err: &StoreError) -> StatusCode {
    match err {
        StoreError::NotFound => StatusCode::NotFound,
        StoreError::AlreadyHosted => StatusCode::AlreadyExists,
        StoreError::QuotaExceeded => StatusCode::QuotaExceeded,
        StoreError::InvalidValue(details) => StatusCode::InvalidValue(details.clone()),
        StoreError::InvalidSignature => StatusCode::InvalidSignature,
        StoreError::Card(_) => StatusCode::InvalidSignature,
        StoreError::Search(_) => StatusCode::InvalidValue("extra_data_regex is not valid".into()),
        StoreError::Image(_) => StatusCode::InvalidValue("image could not be decoded".into()),
        StoreError::NotAvailable => StatusCode::NotAvailable,
        StoreError::Rejected => StatusCode::Rejected,
        StoreError::BadRole => StatusCode::BadRole,
        StoreError::Deferred => StatusCode::Internal,
    }
}

fn list_roles() -> Result<ResponseBody, StoreError> {
    Ok(ResponseBody::RolesList { roles: vec!["customer".into(), "hosting".into(), "app-service".into(), "directory".into()] })
}

fn profile_stats(service: &Service) -> Result<ResponseBody, StoreError> {
    Ok(ResponseBody::Stats {
        hosted_count: service.store.hosted_count() as u32,
        neighbor_count: service.store.neighbor_count() as u32,
        active_sessions: service.registry.checked_in_count() as u32,
        active_relays: service.relays.active_count() as u32,
    })
}

fn get_identity_information(service: &Service, id: &IdentityId) -> Result<ResponseBody, StoreError> {
    let mut summary = service.store.get_summary(id).ok_or(StoreError::NotFound)?;
    summary.is_online = service.registry.is_checked_in(id);
    Ok(ResponseBody::IdentityInformation { summary })
}

fn get_identity_relationships(service: &Service, id: &IdentityId) -> Result<ResponseBody, StoreError> {
    let cards = service.store.related_identities(id)?;
    Ok(ResponseBody::IdentityRelationships { cards })
}

async fn get_identity_image(service: &Service, id: &IdentityId) -> Result<ResponseBody, StoreError> {
    let token = service.store.image_token(id).ok_or(StoreError::NotFound)?;
    let images_dir = service.store.images_dir().to_path_buf();
    let bytes = tokio::task::spawn_blocking(move || crate::store::images::read(&images_dir, &token))
        .await
        .map_err(|_| crate::store::images::ImageError::TaskFailed)??;
    Ok(ResponseBody::IdentityImage { bytes })
}

fn application_service_send_message(
    service: &Service,
    token: &[u8; 16],
    payload: &[u8],
) -> Result<ResponseBody, StoreError> {
    let (peer_identity, peer_token) = service.relays.forward(token).ok_or(StoreError::NotAvailable)?;
    if let Some(outbox) = service.registry.outbox_for(&peer_identity) {
        let _ = outbox.send(crate::session::registry::Outbound::Push(RequestBody::AppServiceReceiveMessageNotification {
            token: peer_token,
            payload: payload.to_vec(),
        }));
    }
    Ok(ResponseBody::Empty)
}

mod conversation {
    use super::*;

    pub fn start(
        service: &Service,
        session: &mut Session,
        offered_versions: &[Version],
        public_key: &PublicKey,
        client_challenge: &[u8; 32],
    ) -> Result<ResponseBody, StoreError> {
        if !offered_versions.contains(&Version::V1) {
            return Err(StoreError::InvalidValue("no mutually supported protocol version".into()));
        }
        let server_challenge = codec::crypto::random_challenge();
        session.start(*public_key, server_challenge);

        // `client_challenge` is echoed into what the peer signs in its own
        // `CheckIn`/`VerifyIdentity` reply chain on its side; this node has
        // no further use for it once the conversation is started.
        let _ = client_challenge;

        Ok(ResponseBody::StartConversation {
            negotiated_version: Version::V1,
            server_public_key: service.identity.public_key(),
            server_challenge,
        })
    }

    pub fn check_in(session: &mut Session, signature: &Signature) -> Result<ResponseBody, StoreError> {
        verify_pending_challenge(session, signature)?;
        session.mark_verified();
        session.authenticate("hosting");
        Ok(ResponseBody::Empty)
    }

    pub fn verify_identity(session: &mut Session, signature: &Signature) -> Result<ResponseBody, StoreError> {
        verify_pending_challenge(session, signature)?;
        session.mark_verified();
        Ok(ResponseBody::Empty)
    }

    pub fn hosting_register(
        service: &Service,
        session: &mut Session,
        contract_type: &str,
        signature: &Signature,
    ) -> Result<ResponseBody, StoreError> {
        let public_key = session.peer_public_key.ok_or(StoreError::InvalidSignature)?;
        codec::crypto::verify(&public_key.0, contract_type.as_bytes(), &signature.0)
            .map_err(|_| StoreError::InvalidSignature)?;

        if contract_type.is_empty() || contract_type.len() > codec::message::values::limits::TYPE_MAX {
            return Err(StoreError::InvalidValue("hosting contract type is invalid".into()));
        }

        service.store.host(public_key, contract_type.to_string())?;
        session.authenticate("hosting");
        Ok(ResponseBody::Empty)
    }

    fn verify_pending_challenge(session: &Session, signature: &Signature) -> Result<(), StoreError> {
        let public_key = session.peer_public_key.ok_or(StoreError::InvalidSignature)?;
        let challenge = session.pending_challenge.ok_or(StoreError::InvalidSignature)?;
        codec::crypto::verify(&public_key.0, &challenge, &signature.0).map_err(|_| StoreError::InvalidSignature)
    }
}

mod search {
    use super::*;
    use crate::store::search::SearchQuery;

    pub fn run_search(
        service: &Service,
        session: &mut Session,
        params: &codec::message::SearchParams,
    ) -> Result<ResponseBody, StoreError> {
        let response_cap = if params.include_images {
            crate::store::search::MAX_RESULTS_WITH_IMAGES
        } else {
            crate::store::search::MAX_RESULTS_WITHOUT_IMAGES
        };
        let query = SearchQuery {
            center: params.location,
            radius_meters: params.radius_meters,
            extra_data_regex: params.extra_data_regex.as_deref(),
            name_prefix: params.name_prefix.as_deref(),
            limit: (params.limit as usize).min(response_cap),
            hosted_only: params.hosted_only,
        };
        let (results, total_matched) = service.store.search(&query)?;
        let has_more = total_matched as usize > results.len();

        session.search_cursor = Some(crate::session::SearchCursor {
            query_id: rand::random(),
            results: results.clone(),
            created_at: std::time::Instant::now(),
        });

        Ok(ResponseBody::SearchResults { results, total_matched, has_more })
    }

    pub fn run_search_part(session: &mut Session, offset: u32, count: u32) -> Result<ResponseBody, StoreError> {
        let cursor = session.search_cursor.as_ref().ok_or(StoreError::NotFound)?;
        if cursor.created_at.elapsed() > crate::store::search::SEARCH_SESSION_TIME_BUDGET {
            session.search_cursor = None;
            return Err(StoreError::NotFound);
        }
        let start = offset as usize;
        let end = (start + count as usize).min(cursor.results.len());
        let page = if start < cursor.results.len() { cursor.results[start..end].to_vec() } else { Vec::new() };
        let has_more = end < cursor.results.len();
        let total_matched = cursor.results.len() as u32;
        Ok(ResponseBody::SearchResults { results: page, total_matched, has_more })
    }
}

mod profile {
    use super::*;

    fn require_hosting(session: &Session) -> Result<IdentityId, StoreError> {
        if session.role != Some("hosting") {
            return Err(StoreError::BadRole);
        }
        session.peer_identity_id.ok_or(StoreError::InvalidSignature)
    }

    pub async fn update(
        service: &Service,
        session: &mut Session,
        patch: &codec::message::ProfilePatch,
        signature: &Signature,
    ) -> Result<ResponseBody, StoreError> {
        let id = require_hosting(session)?;
        let public_key = session.peer_public_key.ok_or(StoreError::InvalidSignature)?;

        let mut to_sign = Vec::new();
        if let Some(name) = &patch.name {
            to_sign.extend_from_slice(name.as_bytes());
        }
        codec::crypto::verify(&public_key.0, &to_sign, &signature.0).map_err(|_| StoreError::InvalidSignature)?;

        let image_token = match &patch.image {
            Some(raw) => {
                let raw = raw.clone();
                let images_dir = service.store.images_dir().to_path_buf();
                let token = tokio::task::spawn_blocking(move || {
                    let thumbnail = crate::store::images::transcode_to_thumbnail(&raw)?;
                    let token = crate::store::images::random_image_token();
                    crate::store::images::write_atomic(&images_dir, &token, &thumbnail)?;
                    Ok::<_, crate::store::images::ImageError>(token)
                })
                .await
                .map_err(|_| crate::store::images::ImageError::TaskFailed)??;
                Some(token)
            }
            None => None,
        };

        service.store.update_profile(
            &id,
            patch.name.clone(),
            patch.extra_data.clone(),
            patch.location,
            image_token,
            patch.version,
        )?;
        Ok(ResponseBody::Empty)
    }

    pub fn cancel_hosting(
        service: &Service,
        session: &mut Session,
        redirect_to: Option<IdentityId>,
        signature: &Signature,
    ) -> Result<ResponseBody, StoreError> {
        let id = require_hosting(session)?;
        let public_key = session.peer_public_key.ok_or(StoreError::InvalidSignature)?;
        codec::crypto::verify(&public_key.0, b"cancel-hosting", &signature.0).map_err(|_| StoreError::InvalidSignature)?;

        // The row is kept as a tombstone for the grace period rather than
        // removed outright; its image is cleaned up once the sweeper
        // actually purges it past expiry.
        service.store.cancel_hosting(&id, redirect_to)?;
        Ok(ResponseBody::Empty)
    }

    pub fn app_service_add(service: &Service, session: &mut Session, service_name: &str) -> Result<ResponseBody, StoreError> {
        let id = require_hosting(session)?;
        service.store.add_app_service(&id, service_name.to_string())?;
        Ok(ResponseBody::Empty)
    }

    pub fn app_service_remove(service: &Service, session: &mut Session, service_name: &str) -> Result<ResponseBody, StoreError> {
        let id = require_hosting(session)?;
        service.store.remove_app_service(&id, service_name)?;
        Ok(ResponseBody::Empty)
    }
}

mod relations {
    use super::*;

    fn require_hosting(session: &Session) -> Result<IdentityId, StoreError> {
        if session.role != Some("hosting") {
            return Err(StoreError::BadRole);
        }
        session.peer_identity_id.ok_or(StoreError::InvalidSignature)
    }

    pub fn add(service: &Service, session: &mut Session, card: &RelatedIdentityCard) -> Result<ResponseBody, StoreError> {
        let id = require_hosting(session)?;
        service.store.add_related_identity(&id, card.clone())?;
        Ok(ResponseBody::Empty)
    }

    pub fn remove(service: &Service, session: &mut Session, application_id: &[u8]) -> Result<ResponseBody, StoreError> {
        let id = require_hosting(session)?;
        service.store.remove_related_identity(&id, application_id)?;
        Ok(ResponseBody::Empty)
    }
}

mod appservice {
    use super::*;

    /// Notifies the callee and registers the caller's own response to
    /// be sent later — by `handle_incoming_response` once the callee
    /// answers, or by the sweeper once `ACCEPT_TIMEOUT` elapses. Always
    /// returns `Err(StoreError::Deferred)` on success; there is no
    /// immediate `CallAccepted` to hand back here.
    pub fn call(
        service: &Service,
        session: &Session,
        msg_id: u32,
        caller_outbox: Outbox,
        callee_id: &IdentityId,
        service_name: &str,
    ) -> Result<ResponseBody, StoreError> {
        let caller_id = session.peer_identity_id.ok_or(StoreError::InvalidSignature)?;
        if !service.store.has_app_service(callee_id, service_name) {
            return Err(StoreError::NotAvailable);
        }
        let callee_outbox = service.registry.outbox_for(callee_id).ok_or(StoreError::NotAvailable)?;

        let (_caller_token, callee_token) =
            service.relays.create(caller_id, *callee_id, service_name.to_string(), caller_outbox, msg_id);

        let _ = callee_outbox.send(crate::session::registry::Outbound::Push(RequestBody::IncomingCallNotification {
            caller_id,
            service_name: service_name.to_string(),
            callee_token,
        }));

        Err(StoreError::Deferred)
    }
}
