//! Identity record shapes held in the profile store.

use std::time::Instant;

use codec::message::{GpsLocation, IdentityId, PublicKey, RelatedIdentityCard, Version};

/// A profile this node is authoritative for: created via
/// `StartConversation` + `HostingRegister`, updated via `UpdateProfile`,
/// torn down via `CancelHosting` or sweeper expiry.
#[derive(Debug, Clone)]
pub struct Identity {
    pub id: IdentityId,
    pub public_key: PublicKey,
    pub version: Version,
    pub name: String,
    pub extra_data: String,
    pub location: GpsLocation,
    pub hosting_contract_type: String,
    pub image_token: Option<[u8; 16]>,
    pub app_services: Vec<String>,
    pub relations: Vec<RelatedIdentityCard>,
    /// Set by `CancelHosting`: the row is kept as a tombstone until this
    /// deadline instead of being removed immediately, so lookups can
    /// still answer `isHosted=false`/`targetHomeNodeId` during the
    /// cancellation grace period.
    pub expires_at: Option<Instant>,
    /// Home node a canceled identity was redirected to, if any.
    pub redirect_home_node: Option<IdentityId>,
}

impl Identity {
    pub fn new(id: IdentityId, public_key: PublicKey, hosting_contract_type: String) -> Self {
        Self {
            id,
            public_key,
            version: Version::ZERO,
            name: String::new(),
            extra_data: String::new(),
            location: GpsLocation::NONE,
            hosting_contract_type,
            image_token: None,
            app_services: Vec::new(),
            relations: Vec::new(),
            expires_at: None,
            redirect_home_node: None,
        }
    }

    /// `true` for a normally hosted identity; `false` once `CancelHosting`
    /// has set an expiration.
    pub fn is_active(&self) -> bool {
        self.expires_at.is_none()
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

/// A profile mirrored from a neighbor node through the directory
/// interface. Read-only from this node's point of view: the neighbor
/// node remains the authority and pushes updates as they happen.
#[derive(Debug, Clone)]
pub struct NeighborIdentity {
    pub id: IdentityId,
    pub name: String,
    pub extra_data: String,
    pub location: GpsLocation,
    pub home_node: String,
}
