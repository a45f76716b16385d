//! Request bodies and the envelope that wraps them.
//!
//! A request on the wire is either a [`SingleRequest`] (stateless,
//! carries the sender's protocol version) or a [`ConversationRequest`]
//! (bound to the connection's session, optionally signed). Which shape a
//! [`Kind`] uses is fixed — see [`Kind::is_single_request`].

use super::tags::Kind;
use super::values::{
    limits, read_array, read_blob, read_location, read_option, read_string, read_u16, read_u32,
    read_u64, read_version, write_blob, write_id32, write_location, write_option, write_string,
    write_version, CardId, GpsLocation, IdentityId, PublicKey, Signature, Version,
};
use crate::{Error, Result};
use bytes::{BufMut, BytesMut};

/// A profile field update. Every field is optional: omitted fields are
/// left unchanged by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilePatch {
    pub name: Option<String>,
    pub extra_data: Option<String>,
    pub location: Option<GpsLocation>,
    pub image: Option<Vec<u8>>,
    pub version: Option<Version>,
}

impl ProfilePatch {
    fn encode(&self, out: &mut BytesMut) {
        write_option(out, &self.name, |o, v| write_string(o, v));
        write_option(out, &self.extra_data, |o, v| write_string(o, v));
        write_option(out, &self.location, |o, v| write_location(o, *v));
        write_option(out, &self.image, |o, v| write_blob(o, v));
        write_option(out, &self.version, |o, v| write_version(o, *v));
    }

    fn decode(buf: &mut &[u8]) -> Result<Self> {
        Ok(Self {
            name: read_option(buf, |b| read_string(b, limits::NAME_MAX))?,
            extra_data: read_option(buf, |b| read_string(b, limits::EXTRA_MAX))?,
            location: read_option(buf, read_location)?,
            image: read_option(buf, |b| read_blob(b, limits::IMAGE_MAX))?,
            version: read_option(buf, read_version)?,
        })
    }
}

/// Parameters of a location-bounded profile search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchParams {
    pub location: GpsLocation,
    pub radius_meters: u32,
    pub extra_data_regex: Option<String>,
    pub name_prefix: Option<String>,
    pub limit: u32,
    /// When `true`, the node answers only from identities it hosts
    /// itself; it does not fall through to its neighbor mirror to fill
    /// out the result set.
    pub hosted_only: bool,
    /// When `true`, the result set is capped at 100 rows (images make
    /// each row heavier); when `false`, it is capped at 1000.
    pub include_images: bool,
}

impl SearchParams {
    fn encode(&self, out: &mut BytesMut) {
        write_location(out, self.location);
        out.put_u32_le(self.radius_meters);
        write_option(out, &self.extra_data_regex, |o, v| write_string(o, v));
        write_option(out, &self.name_prefix, |o, v| write_string(o, v));
        out.put_u32_le(self.limit);
        out.put_u8(self.hosted_only as u8);
        out.put_u8(self.include_images as u8);
    }

    fn decode(buf: &mut &[u8]) -> Result<Self> {
        Ok(Self {
            location: read_location(buf)?,
            radius_meters: read_u32(buf)?,
            extra_data_regex: read_option(buf, |b| read_string(b, limits::SEARCH_REGEX_MAX))?,
            name_prefix: read_option(buf, |b| read_string(b, limits::NAME_MAX))?,
            limit: read_u32(buf)?,
            hosted_only: read_array::<1>(buf)?[0] != 0,
            include_images: read_array::<1>(buf)?[0] != 0,
        })
    }
}

/// A relationship card asserting a link to another identity.
///
/// Two parties sign it: the issuer (`peer_identity_id`/`peer_public_key`)
/// signs `card_id` itself, attesting to this exact card; the recipient
/// (the identity the card is attached to, not carried in the card) signs
/// `application_id`, attesting that it accepted the link under that
/// application. Verifying both closes the gap a single signature leaves
/// open — a one-sided card, the issuer could hand out a relationship
/// the recipient never agreed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelatedIdentityCard {
    pub application_id: Vec<u8>,
    pub peer_identity_id: IdentityId,
    pub peer_public_key: PublicKey,
    pub card_id: CardId,
    pub card_type: String,
    pub valid_from: u64,
    pub valid_to: u64,
    pub issuer_signature: Signature,
    pub recipient_signature: Signature,
}

impl RelatedIdentityCard {
    /// Bytes `card_id` is derived from: every field in wire order, with
    /// `card_id` itself replaced by 32 zero bytes (it can't sign its own
    /// position) and the two signatures omitted (they sign over this).
    pub fn card_bytes(&self) -> BytesMut {
        let mut out = BytesMut::new();
        write_blob(&mut out, &self.application_id);
        write_id32(&mut out, &self.peer_identity_id.0);
        write_id32(&mut out, &self.peer_public_key.0);
        write_id32(&mut out, &[0u8; 32]);
        write_string(&mut out, &self.card_type);
        out.put_u64_le(self.valid_from);
        out.put_u64_le(self.valid_to);
        out
    }

    pub(crate) fn encode(&self, out: &mut BytesMut) {
        write_blob(out, &self.application_id);
        write_id32(out, &self.peer_identity_id.0);
        write_id32(out, &self.peer_public_key.0);
        write_id32(out, &self.card_id.0);
        write_string(out, &self.card_type);
        out.put_u64_le(self.valid_from);
        out.put_u64_le(self.valid_to);
        out.extend_from_slice(&self.issuer_signature.0);
        out.extend_from_slice(&self.recipient_signature.0);
    }

    pub(crate) fn decode(buf: &mut &[u8]) -> Result<Self> {
        Ok(Self {
            application_id: read_blob(buf, limits::APPLICATION_ID_MAX)?,
            peer_identity_id: IdentityId(read_array(buf)?),
            peer_public_key: PublicKey(read_array(buf)?),
            card_id: CardId(read_array(buf)?),
            card_type: read_string(buf, limits::TYPE_MAX)?,
            valid_from: read_u64(buf)?,
            valid_to: read_u64(buf)?,
            issuer_signature: Signature(read_array(buf)?),
            recipient_signature: Signature(read_array(buf)?),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Ping { payload: Vec<u8> },
    ListRoles,
    GetIdentityInformation { id: IdentityId },
    ApplicationServiceSendMessage { token: [u8; 16], payload: Vec<u8> },
    ProfileStats,
    GetIdentityRelationships { id: IdentityId },
    StartConversation { offered_versions: Vec<Version>, public_key: PublicKey, client_challenge: [u8; 32] },
    HostingRegister { contract_type: String, signature: Signature },
    CheckIn { signature: Signature },
    VerifyIdentity { signature: Signature },
    UpdateProfile { patch: ProfilePatch, signature: Signature },
    CancelHosting { redirect_to: Option<IdentityId>, signature: Signature },
    AppServiceAdd { service_name: String },
    AppServiceRemove { service_name: String },
    CallIdentityAppService { callee_id: IdentityId, service_name: String },
    ProfileSearch { params: SearchParams },
    ProfileSearchPart { offset: u32, count: u32 },
    AddRelatedIdentity { card: RelatedIdentityCard },
    RemoveRelatedIdentity { application_id: Vec<u8> },
    IncomingCallNotification { caller_id: IdentityId, service_name: String, callee_token: [u8; 16] },
    AppServiceReceiveMessageNotification { token: [u8; 16], payload: Vec<u8> },
    GetIdentityImage { id: IdentityId },
}

impl RequestBody {
    pub fn kind(&self) -> Kind {
        match self {
            Self::Ping { .. } => Kind::Ping,
            Self::ListRoles => Kind::ListRoles,
            Self::GetIdentityInformation { .. } => Kind::GetIdentityInformation,
            Self::ApplicationServiceSendMessage { .. } => Kind::ApplicationServiceSendMessage,
            Self::ProfileStats => Kind::ProfileStats,
            Self::GetIdentityRelationships { .. } => Kind::GetIdentityRelationships,
            Self::StartConversation { .. } => Kind::StartConversation,
            Self::HostingRegister { .. } => Kind::HostingRegister,
            Self::CheckIn { .. } => Kind::CheckIn,
            Self::VerifyIdentity { .. } => Kind::VerifyIdentity,
            Self::UpdateProfile { .. } => Kind::UpdateProfile,
            Self::CancelHosting { .. } => Kind::CancelHosting,
            Self::AppServiceAdd { .. } => Kind::AppServiceAdd,
            Self::AppServiceRemove { .. } => Kind::AppServiceRemove,
            Self::CallIdentityAppService { .. } => Kind::CallIdentityAppService,
            Self::ProfileSearch { .. } => Kind::ProfileSearch,
            Self::ProfileSearchPart { .. } => Kind::ProfileSearchPart,
            Self::AddRelatedIdentity { .. } => Kind::AddRelatedIdentity,
            Self::RemoveRelatedIdentity { .. } => Kind::RemoveRelatedIdentity,
            Self::IncomingCallNotification { .. } => Kind::IncomingCallNotification,
            Self::AppServiceReceiveMessageNotification { .. } => Kind::AppServiceReceiveMessageNotification,
            Self::GetIdentityImage { .. } => Kind::GetIdentityImage,
        }
    }

    pub(crate) fn encode(&self, out: &mut BytesMut) {
        match self {
            Self::Ping { payload } => write_blob(out, payload),
            Self::ListRoles | Self::ProfileStats => {}
            Self::GetIdentityInformation { id } | Self::GetIdentityRelationships { id } | Self::GetIdentityImage { id } => {
                write_id32(out, &id.0)
            }
            Self::ApplicationServiceSendMessage { token, payload }
            | Self::AppServiceReceiveMessageNotification { token, payload } => {
                out.extend_from_slice(token);
                write_blob(out, payload);
            }
            Self::StartConversation { offered_versions, public_key, client_challenge } => {
                out.put_u8(offered_versions.len() as u8);
                for v in offered_versions {
                    write_version(out, *v);
                }
                write_id32(out, &public_key.0);
                out.extend_from_slice(client_challenge);
            }
            Self::HostingRegister { contract_type, signature } => {
                write_string(out, contract_type);
                out.extend_from_slice(&signature.0);
            }
            Self::CheckIn { signature } | Self::VerifyIdentity { signature } => {
                out.extend_from_slice(&signature.0);
            }
            Self::UpdateProfile { patch, signature } => {
                patch.encode(out);
                out.extend_from_slice(&signature.0);
            }
            Self::CancelHosting { redirect_to, signature } => {
                write_option(out, redirect_to, |o, v| write_id32(o, &v.0));
                out.extend_from_slice(&signature.0);
            }
            Self::AppServiceAdd { service_name } | Self::AppServiceRemove { service_name } => {
                write_string(out, service_name)
            }
            Self::CallIdentityAppService { callee_id, service_name } => {
                write_id32(out, &callee_id.0);
                write_string(out, service_name);
            }
            Self::ProfileSearch { params } => params.encode(out),
            Self::ProfileSearchPart { offset, count } => {
                out.put_u32_le(*offset);
                out.put_u32_le(*count);
            }
            Self::AddRelatedIdentity { card } => card.encode(out),
            Self::RemoveRelatedIdentity { application_id } => write_blob(out, application_id),
            Self::IncomingCallNotification { caller_id, service_name, callee_token } => {
                write_id32(out, &caller_id.0);
                write_string(out, service_name);
                out.extend_from_slice(callee_token);
            }
        }
    }

    pub(crate) fn decode(kind: Kind, buf: &mut &[u8]) -> Result<Self> {
        Ok(match kind {
            Kind::Ping => Self::Ping { payload: read_blob(buf, limits::PING_PAYLOAD_MAX)? },
            Kind::ListRoles => Self::ListRoles,
            Kind::ProfileStats => Self::ProfileStats,
            Kind::GetIdentityInformation => Self::GetIdentityInformation { id: IdentityId(read_array(buf)?) },
            Kind::GetIdentityRelationships => Self::GetIdentityRelationships { id: IdentityId(read_array(buf)?) },
            Kind::GetIdentityImage => Self::GetIdentityImage { id: IdentityId(read_array(buf)?) },
            Kind::ApplicationServiceSendMessage => Self::ApplicationServiceSendMessage {
                token: read_array(buf)?,
                payload: read_blob(buf, limits::APP_MESSAGE_MAX)?,
            },
            Kind::AppServiceReceiveMessageNotification => Self::AppServiceReceiveMessageNotification {
                token: read_array(buf)?,
                payload: read_blob(buf, limits::APP_MESSAGE_MAX)?,
            },
            Kind::StartConversation => {
                let count = read_array::<1>(buf)?[0] as usize;
                let mut offered_versions = Vec::with_capacity(count);
                for _ in 0..count {
                    offered_versions.push(read_version(buf)?);
                }
                Self::StartConversation {
                    offered_versions,
                    public_key: PublicKey(read_array(buf)?),
                    client_challenge: read_array(buf)?,
                }
            }
            Kind::HostingRegister => Self::HostingRegister {
                contract_type: read_string(buf, limits::TYPE_MAX)?,
                signature: Signature(read_array(buf)?),
            },
            Kind::CheckIn => Self::CheckIn { signature: Signature(read_array(buf)?) },
            Kind::VerifyIdentity => Self::VerifyIdentity { signature: Signature(read_array(buf)?) },
            Kind::UpdateProfile => Self::UpdateProfile {
                patch: ProfilePatch::decode(buf)?,
                signature: Signature(read_array(buf)?),
            },
            Kind::CancelHosting => Self::CancelHosting {
                redirect_to: read_option(buf, |b| Ok(IdentityId(read_array(b)?)))?,
                signature: Signature(read_array(buf)?),
            },
            Kind::AppServiceAdd => Self::AppServiceAdd { service_name: read_string(buf, limits::SERVICE_NAME_MAX)? },
            Kind::AppServiceRemove => Self::AppServiceRemove { service_name: read_string(buf, limits::SERVICE_NAME_MAX)? },
            Kind::CallIdentityAppService => Self::CallIdentityAppService {
                callee_id: IdentityId(read_array(buf)?),
                service_name: read_string(buf, limits::SERVICE_NAME_MAX)?,
            },
            Kind::ProfileSearch => Self::ProfileSearch { params: SearchParams::decode(buf)? },
            Kind::ProfileSearchPart => Self::ProfileSearchPart { offset: read_u32(buf)?, count: read_u32(buf)? },
            Kind::AddRelatedIdentity => Self::AddRelatedIdentity { card: RelatedIdentityCard::decode(buf)? },
            Kind::RemoveRelatedIdentity => {
                Self::RemoveRelatedIdentity { application_id: read_blob(buf, limits::APPLICATION_ID_MAX)? }
            }
            Kind::IncomingCallNotification => Self::IncomingCallNotification {
                caller_id: IdentityId(read_array(buf)?),
                service_name: read_string(buf, limits::SERVICE_NAME_MAX)?,
                callee_token: read_array(buf)?,
            },
        })
    }
}

/// A stateless request, scoped only by the sender's declared protocol
/// version — no session signature, no conversation status requirement
/// beyond what the dispatcher checks per [`Kind`].
#[derive(Debug, Clone, PartialEq)]
pub struct SingleRequest {
    pub version: Version,
    pub body: RequestBody,
}

/// A session-bound request. `msg_id` correlates the eventual response;
/// `signature`, when present, covers `body`'s encoded bytes with the
/// session's established peer key.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationRequest {
    pub msg_id: u32,
    pub signature: Option<Signature>,
    pub body: RequestBody,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Single(SingleRequest),
    Conversation(ConversationRequest),
}

impl Request {
    pub fn kind(&self) -> Kind {
        match self {
            Self::Single(r) => r.body.kind(),
            Self::Conversation(r) => r.body.kind(),
        }
    }

    pub(crate) fn encode(&self, out: &mut BytesMut) {
        match self {
            Self::Single(r) => {
                out.put_u8(0);
                write_version(out, r.version);
                out.put_u8(r.body.kind().tag());
                r.body.encode(out);
            }
            Self::Conversation(r) => {
                out.put_u8(1);
                out.put_u32_le(r.msg_id);
                match &r.signature {
                    None => out.put_u8(0),
                    Some(sig) => {
                        out.put_u8(1);
                        out.extend_from_slice(&sig.0);
                    }
                }
                out.put_u8(r.body.kind().tag());
                r.body.encode(out);
            }
        }
    }

    pub(crate) fn decode(buf: &mut &[u8]) -> Result<Self> {
        let shape = read_array::<1>(buf)?[0];
        match shape {
            0 => {
                let version = read_version(buf)?;
                let kind = Kind::from_tag(read_array::<1>(buf)?[0])?;
                let body = RequestBody::decode(kind, buf)?;
                Ok(Self::Single(SingleRequest { version, body }))
            }
            1 => {
                let msg_id = read_u32(buf)?;
                let signature = match read_array::<1>(buf)?[0] {
                    0 => None,
                    _ => Some(Signature(read_array(buf)?)),
                };
                let kind = Kind::from_tag(read_array::<1>(buf)?[0])?;
                let body = RequestBody::decode(kind, buf)?;
                Ok(Self::Conversation(ConversationRequest { msg_id, signature, body }))
            }
            _other => Err(Error::ProtocolViolation("unknown request shape byte")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_ping_round_trips() {
        let req = Request::Single(SingleRequest {
            version: Version::V1,
            body: RequestBody::Ping { payload: vec![1, 2, 3] },
        });

        let mut out = BytesMut::new();
        req.encode(&mut out);

        let mut slice = &out[..];
        assert_eq!(Request::decode(&mut slice).unwrap(), req);
        assert!(slice.is_empty());
    }

    #[test]
    fn conversation_request_with_signature_round_trips() {
        let req = Request::Conversation(ConversationRequest {
            msg_id: 42,
            signature: Some(Signature([7u8; 64])),
            body: RequestBody::CheckIn { signature: Signature([9u8; 64]) },
        });

        let mut out = BytesMut::new();
        req.encode(&mut out);

        let mut slice = &out[..];
        assert_eq!(Request::decode(&mut slice).unwrap(), req);
    }

    #[test]
    fn profile_patch_with_all_fields_none_round_trips() {
        let patch = ProfilePatch { name: None, extra_data: None, location: None, image: None, version: None };
        let mut out = BytesMut::new();
        patch.encode(&mut out);

        let mut slice = &out[..];
        assert_eq!(ProfilePatch::decode(&mut slice).unwrap(), patch);
    }
}
