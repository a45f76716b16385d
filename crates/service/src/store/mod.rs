//! Profile storage: hosted identities, mirrored neighbor identities,
//! profile images, and relationship cards.

pub mod identity;
pub mod images;
pub mod relations;
pub mod search;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use ahash::HashMap;
use codec::message::{GpsLocation, IdentityId, IdentitySummary, PublicKey, RelatedIdentityCard, Version};
use parking_lot::RwLock;

pub use identity::{Identity, NeighborIdentity};

use crate::error::{Error, Result};

pub const MAX_RELATIONS_PER_IDENTITY: usize = 100;
pub const MAX_APP_SERVICES_PER_IDENTITY: usize = 32;

/// How long a canceled-with-redirect identity is kept as a tombstone
/// (still answering `GetIdentityInformation` with `isHosted=false` and
/// the redirect target) before it is purged outright. A cancellation
/// with no redirect skips the grace period entirely.
pub const CANCELLATION_GRACE_PERIOD: Duration = Duration::from_secs(14 * 24 * 3600);

fn hex_id(id: &IdentityId) -> String {
    id.0.iter().map(|b| format!("{b:02x}")).collect()
}

fn neighbor_summary(n: &NeighborIdentity) -> IdentitySummary {
    IdentitySummary {
        id: n.id,
        name: n.name.clone(),
        location: n.location,
        extra_data: n.extra_data.clone(),
        has_image: false,
        roles: vec!["neighbor".into()],
        distance_meters: None,
        is_hosted: false,
        is_online: false,
        target_home_node_id: None,
    }
}

pub struct StoreConfig {
    pub max_hosted_identities: usize,
    pub images_dir: PathBuf,
}

struct State {
    hosted: HashMap<IdentityId, Identity>,
    neighbors: HashMap<IdentityId, NeighborIdentity>,
}

/// In-memory profile store backed by on-disk image blobs. All mutation
/// goes through a single `RwLock`; profile operations are infrequent
/// enough relative to reads (search, lookups) that a read-write lock
/// outperforms sharding the map, the same trade the allocation table in
/// the teacher's session layer makes.
pub struct ProfileStore {
    state: RwLock<State>,
    config: StoreConfig,
}

impl ProfileStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            state: RwLock::new(State { hosted: HashMap::default(), neighbors: HashMap::default() }),
            config,
        }
    }

    pub fn images_dir(&self) -> &std::path::Path {
        &self.config.images_dir
    }

    /// Create a new hosted identity, or resurrect one left as a
    /// cancellation tombstone. Fails if the node is already at capacity
    /// (counting only actively hosted identities) or the identity is
    /// already actively hosted here.
    pub fn host(&self, public_key: PublicKey, hosting_contract_type: String) -> Result<IdentityId> {
        let id = IdentityId::from_public_key(&public_key);
        let mut state = self.state.write();

        if let Some(identity) = state.hosted.get_mut(&id) {
            if identity.is_active() {
                return Err(Error::AlreadyHosted);
            }
            identity.expires_at = None;
            identity.redirect_home_node = None;
            identity.hosting_contract_type = hosting_contract_type;
            return Ok(id);
        }

        let active_count = state.hosted.values().filter(|i| i.is_active()).count();
        if active_count >= self.config.max_hosted_identities {
            return Err(Error::QuotaExceeded);
        }
        state.hosted.insert(id, Identity::new(id, public_key, hosting_contract_type));
        Ok(id)
    }

    pub fn get_hosted(&self, id: &IdentityId) -> Option<Identity> {
        self.state.read().hosted.get(id).cloned()
    }

    pub fn image_token(&self, id: &IdentityId) -> Option<[u8; 16]> {
        self.state.read().hosted.get(id)?.image_token
    }

    pub fn get_summary(&self, id: &IdentityId) -> Option<IdentitySummary> {
        let state = self.state.read();
        if let Some(identity) = state.hosted.get(id) {
            if identity.is_expired(Instant::now()) {
                return state.neighbors.get(id).map(neighbor_summary);
            }
            return Some(IdentitySummary {
                id: identity.id,
                name: identity.name.clone(),
                location: identity.location,
                extra_data: identity.extra_data.clone(),
                has_image: identity.image_token.is_some(),
                roles: vec![identity.hosting_contract_type.clone()],
                distance_meters: None,
                is_hosted: identity.is_active(),
                is_online: false,
                target_home_node_id: identity.redirect_home_node.as_ref().map(hex_id),
            });
        }
        state.neighbors.get(id).map(neighbor_summary)
    }

    pub fn update_profile(
        &self,
        id: &IdentityId,
        name: Option<String>,
        extra_data: Option<String>,
        location: Option<GpsLocation>,
        image_token: Option<[u8; 16]>,
        version: Option<Version>,
    ) -> Result<()> {
        if name.is_none() && extra_data.is_none() && location.is_none() && image_token.is_none() && version.is_none() {
            return Err(Error::InvalidValue("patch must set at least one field".into()));
        }

        let mut state = self.state.write();
        let identity = state.hosted.get_mut(id).ok_or(Error::NotFound)?;

        if identity.version.is_zero() && (name.is_none() || location.is_none()) {
            return Err(Error::InvalidValue("the first profile update must set name and location".into()));
        }

        if let Some(name) = name {
            identity.name = name;
        }
        if let Some(extra_data) = extra_data {
            identity.extra_data = extra_data;
        }
        if let Some(location) = location {
            identity.location = location;
        }
        if let Some(token) = image_token {
            identity.image_token = Some(token);
        }
        identity.version = match version {
            Some(version) => version,
            None if identity.version.is_zero() => Version::V1,
            None => identity.version,
        };
        Ok(())
    }

    /// Mark `id` canceled: the row stays as a tombstone (so lookups keep
    /// answering `isHosted=false`/`targetHomeNodeId`) until it expires —
    /// immediately if there is no redirect, or after
    /// [`CANCELLATION_GRACE_PERIOD`] if there is.
    pub fn cancel_hosting(&self, id: &IdentityId, redirect_to: Option<IdentityId>) -> Result<Identity> {
        let mut state = self.state.write();
        let identity = state.hosted.get_mut(id).ok_or(Error::NotFound)?;
        if !identity.is_active() {
            return Err(Error::NotFound);
        }

        // An uninitialized profile (never completed its first
        // `UpdateProfile`) still needs a nonzero version to remain
        // distinguishable from "never existed" while it tombstones.
        if identity.version.is_zero() {
            identity.version = Version::V1;
        }

        identity.expires_at = Some(match redirect_to {
            Some(_) => Instant::now() + CANCELLATION_GRACE_PERIOD,
            None => Instant::now(),
        });
        identity.redirect_home_node = redirect_to;
        // App-service registrations belong to the hosting session, not
        // the identity record itself; they do not survive past the
        // session that registered them.
        identity.app_services.clear();
        Ok(identity.clone())
    }

    /// Drop tombstoned identities whose grace period has elapsed,
    /// freeing their image blob along with the row itself. Called
    /// periodically by the root sweeper.
    pub fn purge_expired_identities(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.write();
        let expired: Vec<IdentityId> =
            state.hosted.iter().filter(|(_, identity)| identity.is_expired(now)).map(|(id, _)| *id).collect();

        for id in &expired {
            if let Some(identity) = state.hosted.remove(id) {
                if let Some(token) = identity.image_token {
                    images::remove(self.images_dir(), &token);
                }
            }
        }
        expired.len()
    }

    pub fn add_app_service(&self, id: &IdentityId, service_name: String) -> Result<()> {
        let mut state = self.state.write();
        let identity = state.hosted.get_mut(id).ok_or(Error::NotFound)?;
        if identity.app_services.contains(&service_name) {
            return Ok(());
        }
        if identity.app_services.len() >= MAX_APP_SERVICES_PER_IDENTITY {
            return Err(Error::QuotaExceeded);
        }
        identity.app_services.push(service_name);
        Ok(())
    }

    pub fn remove_app_service(&self, id: &IdentityId, service_name: &str) -> Result<()> {
        let mut state = self.state.write();
        let identity = state.hosted.get_mut(id).ok_or(Error::NotFound)?;
        identity.app_services.retain(|s| s != service_name);
        Ok(())
    }

    pub fn has_app_service(&self, id: &IdentityId, service_name: &str) -> bool {
        self.state.read().hosted.get(id).is_some_and(|i| i.app_services.iter().any(|s| s == service_name))
    }

    pub fn add_related_identity(&self, id: &IdentityId, card: RelatedIdentityCard) -> Result<()> {
        let mut state = self.state.write();
        let identity = state.hosted.get_mut(id).ok_or(Error::NotFound)?;
        relations::verify_card(&card, &identity.public_key)?;
        if identity.relations.iter().any(|c| c.card_id == card.card_id) {
            return Err(Error::AlreadyHosted);
        }
        if identity.relations.len() >= MAX_RELATIONS_PER_IDENTITY {
            return Err(Error::QuotaExceeded);
        }
        identity.relations.push(card);
        Ok(())
    }

    pub fn remove_related_identity(&self, id: &IdentityId, application_id: &[u8]) -> Result<()> {
        let mut state = self.state.write();
        let identity = state.hosted.get_mut(id).ok_or(Error::NotFound)?;
        identity.relations.retain(|c| c.application_id != application_id);
        Ok(())
    }

    pub fn related_identities(&self, id: &IdentityId) -> Result<Vec<RelatedIdentityCard>> {
        Ok(self.state.read().hosted.get(id).ok_or(Error::NotFound)?.relations.clone())
    }

    pub fn upsert_neighbor(&self, neighbor: NeighborIdentity) {
        self.state.write().neighbors.insert(neighbor.id, neighbor);
    }

    pub fn remove_neighbor(&self, id: &IdentityId) {
        self.state.write().neighbors.remove(id);
    }

    /// Purge every mirrored identity whose home node just left the
    /// neighborhood, as reported by the directory.
    pub fn remove_neighbors_by_home_node(&self, home_node: &str) {
        self.state.write().neighbors.retain(|_, n| n.home_node != home_node);
    }

    /// Search hosted identities, chaining in the mirrored neighbor
    /// repository when `query.hosted_only` is `false` — the caller can
    /// restrict the search to this node's own identities, but by
    /// default a node answers for its whole neighborhood.
    pub fn search(&self, query: &search::SearchQuery) -> Result<(Vec<IdentitySummary>, u32)> {
        let now = Instant::now();
        let state = self.state.read();
        let hosted = state.hosted.values().filter(|i| i.is_active() && !i.is_expired(now)).map(|i| i as &dyn search::Searchable);

        if query.hosted_only {
            Ok(search::search(hosted, query)?)
        } else {
            let neighbors = state.neighbors.values().map(|n| n as &dyn search::Searchable);
            Ok(search::search(hosted.chain(neighbors), query)?)
        }
    }

    pub fn hosted_count(&self) -> usize {
        let now = Instant::now();
        self.state.read().hosted.values().filter(|i| i.is_active() && !i.is_expired(now)).count()
    }

    pub fn neighbor_count(&self) -> usize {
        self.state.read().neighbors.len()
    }

    /// Identities whose hosting should be dropped because their home is
    /// long gone is a directory concern, not this store's; the sweeper
    /// instead evicts sessions, not hosted profiles — hosting persists
    /// until explicitly canceled.
    pub fn hosted_ids(&self) -> Vec<IdentityId> {
        self.state.read().hosted.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ProfileStore {
        ProfileStore::new(StoreConfig { max_hosted_identities: 2, images_dir: std::env::temp_dir() })
    }

    #[test]
    fn hosting_respects_quota() {
        let store = store();
        store.host(PublicKey([1u8; 32]), "customer".into()).unwrap();
        store.host(PublicKey([2u8; 32]), "customer".into()).unwrap();
        assert!(matches!(store.host(PublicKey([3u8; 32]), "customer".into()), Err(Error::QuotaExceeded)));
    }

    #[test]
    fn double_hosting_the_same_key_is_rejected() {
        let store = store();
        store.host(PublicKey([1u8; 32]), "customer".into()).unwrap();
        assert!(matches!(store.host(PublicKey([1u8; 32]), "customer".into()), Err(Error::AlreadyHosted)));
    }

    #[test]
    fn cancel_hosting_without_redirect_frees_the_slot_immediately() {
        let store = store();
        let id = store.host(PublicKey([1u8; 32]), "customer".into()).unwrap();
        store.cancel_hosting(&id, None).unwrap();
        assert_eq!(store.hosted_count(), 0);
        store.host(PublicKey([1u8; 32]), "customer".into()).unwrap();
    }

    #[test]
    fn cancel_hosting_with_redirect_keeps_a_tombstone_during_the_grace_period() {
        let store = store();
        let id = store.host(PublicKey([1u8; 32]), "customer".into()).unwrap();
        let redirect = IdentityId([9u8; 32]);
        store.cancel_hosting(&id, Some(redirect)).unwrap();

        assert_eq!(store.hosted_count(), 0);
        let summary = store.get_summary(&id).unwrap();
        assert!(!summary.is_hosted);
        assert_eq!(summary.target_home_node_id, Some(hex_id(&redirect)));
    }

    #[test]
    fn update_profile_rejects_an_empty_patch() {
        let store = store();
        let id = store.host(PublicKey([1u8; 32]), "customer".into()).unwrap();
        assert!(matches!(
            store.update_profile(&id, None, None, None, None, None),
            Err(Error::InvalidValue(_))
        ));
    }

    #[test]
    fn update_profile_requires_name_and_location_on_first_update() {
        let store = store();
        let id = store.host(PublicKey([1u8; 32]), "customer".into()).unwrap();
        assert!(matches!(
            store.update_profile(&id, Some("Alice".into()), None, None, None, None),
            Err(Error::InvalidValue(_))
        ));
    }

    #[test]
    fn update_profile_only_touches_supplied_fields() {
        let store = store();
        let id = store.host(PublicKey([1u8; 32]), "customer".into()).unwrap();
        let somewhere = GpsLocation::from_degrees(50.0, 14.0);
        store.update_profile(&id, Some("Alice".into()), None, Some(somewhere), None, None).unwrap();
        store.update_profile(&id, None, Some("likes:tea".into()), None, None, None).unwrap();

        let identity = store.get_hosted(&id).unwrap();
        assert_eq!(identity.name, "Alice");
        assert_eq!(identity.extra_data, "likes:tea");
        assert_eq!(identity.version, Version::V1);
    }
}
