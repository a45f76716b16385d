//! Structured messages carried inside a frame body (see [`crate`]).
//!
//! A frame body is always exactly one [`Message`]: either a [`Request`]
//! from a peer, or a [`Response`] to a request the peer (or this node,
//! for node-initiated notifications) previously sent.

pub mod requests;
pub mod responses;
pub mod tags;
pub mod values;

pub use requests::{ConversationRequest, ProfilePatch, RelatedIdentityCard, Request, RequestBody, SearchParams, SingleRequest};
pub use responses::{IdentitySummary, Response, ResponseBody};
pub use tags::{Kind, StatusCode};
pub use values::{CardId, GpsLocation, IdentityId, PublicKey, Signature, Version};

use crate::{Error, Result};
use bytes::BytesMut;

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    /// Encode this message into a frame body (does not add the 5-byte
    /// frame header; pass the result to [`crate::encode_frame`]).
    pub fn encode(&self) -> BytesMut {
        let mut out = BytesMut::new();
        match self {
            Self::Request(r) => {
                out.extend_from_slice(&[0]);
                r.encode(&mut out);
            }
            Self::Response(r) => {
                out.extend_from_slice(&[1]);
                r.encode(&mut out);
            }
        }
        out
    }

    /// Decode a complete frame body (as returned by
    /// [`crate::try_decode_frame`]) into a message.
    pub fn decode(body: &[u8]) -> Result<Self> {
        let mut buf = body;
        if buf.is_empty() {
            return Err(Error::UnexpectedEof);
        }
        let discriminant = buf[0];
        buf = &buf[1..];
        match discriminant {
            0 => Ok(Self::Request(Request::decode(&mut buf)?)),
            1 => Ok(Self::Response(Response::decode(&mut buf)?)),
            _other => Err(Error::ProtocolViolation("unknown message discriminant")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_message_round_trips_through_a_frame() {
        let msg = Message::Request(Request::Single(SingleRequest {
            version: Version::V1,
            body: RequestBody::ListRoles,
        }));

        let frame = crate::encode_frame(&msg.encode()).unwrap();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&frame);

        let body = crate::try_decode_frame(&mut buf).unwrap().unwrap();
        assert_eq!(Message::decode(&body).unwrap(), msg);
    }

    #[test]
    fn response_message_round_trips() {
        let msg = Message::Response(Response::ok(3, Kind::ProfileStats, ResponseBody::Stats {
            hosted_count: 1,
            neighbor_count: 2,
            active_sessions: 3,
            active_relays: 0,
        }));

        let encoded = msg.encode();
        assert_eq!(Message::decode(&encoded).unwrap(), msg);
    }

    #[test]
    fn empty_body_is_rejected() {
        assert!(Message::decode(&[]).is_err());
    }
}
