//! Response bodies and the envelope that wraps them.
//!
//! Every response carries the [`StatusCode`] of the request it answers
//! and the request's [`Kind`], so a caller can confirm the response
//! actually matches the outstanding request before trusting its payload
//! (see the routing layer's unfinished-request table).

use super::requests::RelatedIdentityCard;
use super::tags::{Kind, StatusCode};
use super::values::{
    limits, read_array, read_blob, read_location, read_option, read_string, read_u32,
    read_version, write_blob, write_id32, write_location, write_option, write_string,
    write_version, GpsLocation, IdentityId, PublicKey, Version,
};
use crate::{Error, Result};
use bytes::{Buf, BufMut, BytesMut};

/// A condensed view of an identity's profile, returned from information
/// lookups and search results.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentitySummary {
    pub id: IdentityId,
    pub name: String,
    pub location: GpsLocation,
    pub extra_data: String,
    pub has_image: bool,
    pub roles: Vec<String>,
    /// Set only in search results, where distance from the query point
    /// is part of what was matched on.
    pub distance_meters: Option<u32>,
    /// `true` when this node is itself hosting the identity; `false`
    /// for a canceled-but-not-yet-expired tombstone or a neighbor row.
    pub is_hosted: bool,
    /// `true` when the identity currently has a checked-in connection.
    pub is_online: bool,
    /// Set for a canceled identity redirected to another home node.
    pub target_home_node_id: Option<String>,
}

impl IdentitySummary {
    fn encode(&self, out: &mut BytesMut) {
        write_id32(out, &self.id.0);
        write_string(out, &self.name);
        write_location(out, self.location);
        write_string(out, &self.extra_data);
        out.put_u8(self.has_image as u8);
        out.put_u8(self.roles.len() as u8);
        for role in &self.roles {
            write_string(out, role);
        }
        match self.distance_meters {
            None => out.put_u8(0),
            Some(d) => {
                out.put_u8(1);
                out.put_u32_le(d);
            }
        }
        out.put_u8(self.is_hosted as u8);
        out.put_u8(self.is_online as u8);
        write_option(out, &self.target_home_node_id, |o, v| write_string(o, v));
    }

    fn decode(buf: &mut &[u8]) -> Result<Self> {
        let id = IdentityId(read_array(buf)?);
        let name = read_string(buf, limits::NAME_MAX)?;
        let location = read_location(buf)?;
        let extra_data = read_string(buf, limits::EXTRA_MAX)?;
        let has_image = read_array::<1>(buf)?[0] != 0;
        let role_count = read_array::<1>(buf)?[0] as usize;
        let mut roles = Vec::with_capacity(role_count);
        for _ in 0..role_count {
            roles.push(read_string(buf, limits::SERVICE_NAME_MAX)?);
        }
        let distance_meters = match read_array::<1>(buf)?[0] {
            0 => None,
            _ => Some(read_u32(buf)?),
        };
        let is_hosted = read_array::<1>(buf)?[0] != 0;
        let is_online = read_array::<1>(buf)?[0] != 0;
        let target_home_node_id = read_option(buf, |b| read_string(b, limits::NAME_MAX))?;
        Ok(Self {
            id,
            name,
            location,
            extra_data,
            has_image,
            roles,
            distance_meters,
            is_hosted,
            is_online,
            target_home_node_id,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Empty,
    Pong { payload: Vec<u8> },
    RolesList { roles: Vec<String> },
    IdentityInformation { summary: IdentitySummary },
    Stats { hosted_count: u32, neighbor_count: u32, active_sessions: u32, active_relays: u32 },
    IdentityRelationships { cards: Vec<RelatedIdentityCard> },
    StartConversation { negotiated_version: Version, server_public_key: PublicKey, server_challenge: [u8; 32] },
    SearchResults { results: Vec<IdentitySummary>, total_matched: u32, has_more: bool },
    CallAccepted { caller_token: [u8; 16] },
    IdentityImage { bytes: Vec<u8> },
}

impl ResponseBody {
    pub(crate) fn encode(&self, out: &mut BytesMut) {
        match self {
            Self::Empty => {}
            Self::Pong { payload } => {
                out.put_u32_le(payload.len() as u32);
                out.extend_from_slice(payload);
            }
            Self::RolesList { roles } => {
                out.put_u8(roles.len() as u8);
                for role in roles {
                    write_string(out, role);
                }
            }
            Self::IdentityInformation { summary } => summary.encode(out),
            Self::Stats { hosted_count, neighbor_count, active_sessions, active_relays } => {
                out.put_u32_le(*hosted_count);
                out.put_u32_le(*neighbor_count);
                out.put_u32_le(*active_sessions);
                out.put_u32_le(*active_relays);
            }
            Self::IdentityRelationships { cards } => {
                out.put_u32_le(cards.len() as u32);
                for card in cards {
                    card.encode(out);
                }
            }
            Self::StartConversation { negotiated_version, server_public_key, server_challenge } => {
                write_version(out, *negotiated_version);
                write_id32(out, &server_public_key.0);
                out.extend_from_slice(server_challenge);
            }
            Self::SearchResults { results, total_matched, has_more } => {
                out.put_u32_le(results.len() as u32);
                for r in results {
                    r.encode(out);
                }
                out.put_u32_le(*total_matched);
                out.put_u8(*has_more as u8);
            }
            Self::CallAccepted { caller_token } => out.extend_from_slice(caller_token),
            Self::IdentityImage { bytes } => write_blob(out, bytes),
        }
    }

    pub(crate) fn decode(kind: Kind, buf: &mut &[u8]) -> Result<Self> {
        Ok(match kind {
            Kind::Ping => {
                let len = read_u32(buf)? as usize;
                if buf.len() < len {
                    return Err(Error::UnexpectedEof);
                }
                let payload = buf[..len].to_vec();
                buf.advance(len);
                Self::Pong { payload }
            }
            Kind::ListRoles => {
                let count = read_array::<1>(buf)?[0] as usize;
                let mut roles = Vec::with_capacity(count);
                for _ in 0..count {
                    roles.push(read_string(buf, limits::SERVICE_NAME_MAX)?);
                }
                Self::RolesList { roles }
            }
            Kind::GetIdentityInformation => Self::IdentityInformation { summary: IdentitySummary::decode(buf)? },
            Kind::ProfileStats => Self::Stats {
                hosted_count: read_u32(buf)?,
                neighbor_count: read_u32(buf)?,
                active_sessions: read_u32(buf)?,
                active_relays: read_u32(buf)?,
            },
            Kind::GetIdentityRelationships => {
                let count = read_u32(buf)? as usize;
                let mut cards = Vec::with_capacity(count);
                for _ in 0..count {
                    cards.push(RelatedIdentityCard::decode(buf)?);
                }
                Self::IdentityRelationships { cards }
            }
            Kind::StartConversation => Self::StartConversation {
                negotiated_version: read_version(buf)?,
                server_public_key: PublicKey(read_array(buf)?),
                server_challenge: read_array(buf)?,
            },
            Kind::ProfileSearch | Kind::ProfileSearchPart => {
                let count = read_u32(buf)? as usize;
                let mut results = Vec::with_capacity(count);
                for _ in 0..count {
                    results.push(IdentitySummary::decode(buf)?);
                }
                let total_matched = read_u32(buf)?;
                let has_more = read_array::<1>(buf)?[0] != 0;
                Self::SearchResults { results, total_matched, has_more }
            }
            Kind::CallIdentityAppService => Self::CallAccepted { caller_token: read_array(buf)? },
            Kind::GetIdentityImage => Self::IdentityImage { bytes: read_blob(buf, limits::IMAGE_MAX)? },
            Kind::ApplicationServiceSendMessage
            | Kind::HostingRegister
            | Kind::CheckIn
            | Kind::VerifyIdentity
            | Kind::UpdateProfile
            | Kind::CancelHosting
            | Kind::AppServiceAdd
            | Kind::AppServiceRemove
            | Kind::AddRelatedIdentity
            | Kind::RemoveRelatedIdentity
            | Kind::IncomingCallNotification
            | Kind::AppServiceReceiveMessageNotification => Self::Empty,
        })
    }
}

/// A response to either a [`super::requests::SingleRequest`] or a
/// [`super::requests::ConversationRequest`]. `msg_id` is `0` for
/// responses to single requests (they carry no correlation id of their
/// own); conversation responses echo the request's `msg_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub msg_id: u32,
    pub kind: Kind,
    pub status: StatusCode,
    pub body: ResponseBody,
}

impl Response {
    pub fn ok(msg_id: u32, kind: Kind, body: ResponseBody) -> Self {
        Self { msg_id, kind, status: StatusCode::Ok, body }
    }

    pub fn error(msg_id: u32, kind: Kind, status: StatusCode) -> Self {
        Self { msg_id, kind, status, body: ResponseBody::Empty }
    }

    pub(crate) fn encode(&self, out: &mut BytesMut) {
        out.put_u32_le(self.msg_id);
        out.put_u8(self.kind.tag());
        self.status.encode(out);
        if self.status.is_ok() {
            self.body.encode(out);
        }
    }

    pub(crate) fn decode(buf: &mut &[u8]) -> Result<Self> {
        let msg_id = read_u32(buf)?;
        let kind = Kind::from_tag(read_array::<1>(buf)?[0])?;
        let status = StatusCode::decode(buf)?;
        let body = if status.is_ok() { ResponseBody::decode(kind, buf)? } else { ResponseBody::Empty };
        Ok(Self { msg_id, kind, status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pong_round_trips() {
        let resp = Response::ok(0, Kind::Ping, ResponseBody::Pong { payload: vec![9, 8, 7] });
        let mut out = BytesMut::new();
        resp.encode(&mut out);

        let mut slice = &out[..];
        assert_eq!(Response::decode(&mut slice).unwrap(), resp);
    }

    #[test]
    fn error_response_carries_no_body() {
        let resp = Response::error(5, Kind::CheckIn, StatusCode::InvalidSignature);
        let mut out = BytesMut::new();
        resp.encode(&mut out);

        let mut slice = &out[..];
        assert_eq!(Response::decode(&mut slice).unwrap(), resp);
    }

    #[test]
    fn invalid_value_status_carries_details() {
        let resp = Response::error(1, Kind::UpdateProfile, StatusCode::InvalidValue("name too long".into()));
        let mut out = BytesMut::new();
        resp.encode(&mut out);

        let mut slice = &out[..];
        let decoded = Response::decode(&mut slice).unwrap();
        assert_eq!(decoded.status, StatusCode::InvalidValue("name too long".into()));
    }
}
