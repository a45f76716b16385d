//! Message kind and status tags. A [`Kind`] identifies what a request
//! asks for and, paired with a matching [`Kind`] on the response, lets a
//! caller confirm a response actually answers the request it claims to
//! answer — that check lives in the routing layer, not here.

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Kind {
    Ping = 1,
    ListRoles = 2,
    GetIdentityInformation = 3,
    ApplicationServiceSendMessage = 4,
    ProfileStats = 5,
    GetIdentityRelationships = 6,
    StartConversation = 7,
    HostingRegister = 8,
    CheckIn = 9,
    VerifyIdentity = 10,
    UpdateProfile = 11,
    CancelHosting = 12,
    AppServiceAdd = 13,
    AppServiceRemove = 14,
    CallIdentityAppService = 15,
    ProfileSearch = 16,
    ProfileSearchPart = 17,
    AddRelatedIdentity = 18,
    RemoveRelatedIdentity = 19,
    IncomingCallNotification = 20,
    AppServiceReceiveMessageNotification = 21,
    GetIdentityImage = 22,
}

impl Kind {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        Ok(match tag {
            1 => Self::Ping,
            2 => Self::ListRoles,
            3 => Self::GetIdentityInformation,
            4 => Self::ApplicationServiceSendMessage,
            5 => Self::ProfileStats,
            6 => Self::GetIdentityRelationships,
            7 => Self::StartConversation,
            8 => Self::HostingRegister,
            9 => Self::CheckIn,
            10 => Self::VerifyIdentity,
            11 => Self::UpdateProfile,
            12 => Self::CancelHosting,
            13 => Self::AppServiceAdd,
            14 => Self::AppServiceRemove,
            15 => Self::CallIdentityAppService,
            16 => Self::ProfileSearch,
            17 => Self::ProfileSearchPart,
            18 => Self::AddRelatedIdentity,
            19 => Self::RemoveRelatedIdentity,
            20 => Self::IncomingCallNotification,
            21 => Self::AppServiceReceiveMessageNotification,
            22 => Self::GetIdentityImage,
            other => return Err(Error::UnknownMessageTag(other)),
        })
    }

    /// `true` for requests that do not require an established
    /// conversation (stateless queries and relay forwarding); `false`
    /// for requests that mutate session or profile state and require at
    /// least `Started` conversation status.
    pub fn is_single_request(self) -> bool {
        matches!(
            self,
            Self::Ping
                | Self::ListRoles
                | Self::GetIdentityInformation
                | Self::ApplicationServiceSendMessage
                | Self::ProfileStats
                | Self::GetIdentityRelationships
                | Self::ProfileSearch
                | Self::ProfileSearchPart
                | Self::GetIdentityImage
        )
    }

    /// `true` for the two kinds the node itself originates toward a
    /// peer, rather than ones a peer sends to the node.
    pub fn is_node_initiated(self) -> bool {
        matches!(self, Self::IncomingCallNotification | Self::AppServiceReceiveMessageNotification)
    }
}

/// Outcome of a request, carried on every response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    ProtocolViolation,
    Unsupported,
    BadRole,
    BadConversationStatus,
    Unauthorized,
    Internal,
    QuotaExceeded,
    InvalidValue(String),
    InvalidSignature,
    NotFound,
    AlreadyExists,
    NotAvailable,
    Rejected,
    Uninitialized,
}

impl StatusCode {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    fn discriminant_tag(&self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::ProtocolViolation => 1,
            Self::Unsupported => 2,
            Self::BadRole => 3,
            Self::BadConversationStatus => 4,
            Self::Unauthorized => 5,
            Self::Internal => 6,
            Self::QuotaExceeded => 7,
            Self::InvalidValue(_) => 8,
            Self::InvalidSignature => 9,
            Self::NotFound => 10,
            Self::AlreadyExists => 11,
            Self::NotAvailable => 12,
            Self::Rejected => 13,
            Self::Uninitialized => 14,
        }
    }

    pub(crate) fn encode(&self, out: &mut bytes::BytesMut) {
        use bytes::BufMut;
        out.put_u8(self.discriminant_tag());
        if let Self::InvalidValue(details) = self {
            super::values::write_string(out, details);
        }
    }

    pub(crate) fn decode(buf: &mut &[u8]) -> Result<Self> {
        use super::values::{read_string, read_u8, limits};
        Ok(match read_u8(buf)? {
            0 => Self::Ok,
            1 => Self::ProtocolViolation,
            2 => Self::Unsupported,
            3 => Self::BadRole,
            4 => Self::BadConversationStatus,
            5 => Self::Unauthorized,
            6 => Self::Internal,
            7 => Self::QuotaExceeded,
            8 => Self::InvalidValue(read_string(buf, limits::DETAILS_MAX)?),
            9 => Self::InvalidSignature,
            10 => Self::NotFound,
            11 => Self::AlreadyExists,
            12 => Self::NotAvailable,
            13 => Self::Rejected,
            14 => Self::Uninitialized,
            other => return Err(Error::UnknownStatusTag(other)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_round_trip() {
        for tag in 1..=22u8 {
            let kind = Kind::from_tag(tag).unwrap();
            assert_eq!(kind.tag(), tag);
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert!(Kind::from_tag(0).is_err());
        assert!(Kind::from_tag(23).is_err());
    }
}
