//! Location- and text-bounded profile search.
//!
//! Distance filtering uses the haversine formula against a caller
//! supplied radius; `ExtraData` filtering uses a caller-supplied regular
//! expression under a wall-clock budget, since `ExtraData` is
//! free-text and a pathological pattern must not be able to stall the
//! node. [`regex`]'s automaton is linear in input length with no
//! backtracking, so the budget below is a coarse backstop against a
//! very large candidate set rather than a defense against catastrophic
//! backtracking itself.

use std::time::{Duration, Instant};

use codec::message::{GpsLocation, IdentityId, IdentitySummary};
use regex::Regex;

use super::identity::{Identity, NeighborIdentity};

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Upper bound on how long the `ExtraData` regex may spend against a
/// single candidate; a candidate that blows this budget is skipped
/// rather than aborting the whole search.
pub const PER_MATCH_TIME_BUDGET: Duration = Duration::from_millis(25);

/// Upper bound on one `search()` call's total running time; once hit,
/// the candidates seen so far are returned and the rest are dropped.
pub const PER_QUERY_TIME_BUDGET: Duration = Duration::from_secs(1);

/// Response size cap when results carry image availability information.
pub const MAX_RESULTS_WITH_IMAGES: usize = 100;

/// Response size cap when results omit images.
pub const MAX_RESULTS_WITHOUT_IMAGES: usize = 1000;

/// How long a cached search result set may be paged through via
/// `ProfileSearchPart` before the cursor is considered stale and a fresh
/// `ProfileSearch` is required.
pub const SEARCH_SESSION_TIME_BUDGET: Duration = Duration::from_secs(15);

pub fn haversine_meters(a: GpsLocation, b: GpsLocation) -> f64 {
    let lat1 = a.latitude().to_radians();
    let lat2 = b.latitude().to_radians();
    let dlat = (b.latitude() - a.latitude()).to_radians();
    let dlon = (b.longitude() - a.longitude()).to_radians();

    let sin_dlat = (dlat / 2.0).sin();
    let sin_dlon = (dlon / 2.0).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    2.0 * EARTH_RADIUS_METERS * h.sqrt().asin()
}

/// A bounding box wide enough to contain every point within `radius_m`
/// of `center`, used to cheaply discard identities before the exact
/// (and costlier) haversine check.
fn bounding_box(center: GpsLocation, radius_m: f64) -> (GpsLocation, GpsLocation) {
    let lat_delta = (radius_m / EARTH_RADIUS_METERS).to_degrees();
    let lon_scale = center.latitude().to_radians().cos().max(0.01);
    let lon_delta = (radius_m / (EARTH_RADIUS_METERS * lon_scale)).to_degrees();

    let min = GpsLocation::from_degrees(center.latitude() - lat_delta, center.longitude() - lon_delta);
    let max = GpsLocation::from_degrees(center.latitude() + lat_delta, center.longitude() + lon_delta);
    (min, max)
}

fn within_bounding_box(point: GpsLocation, min: GpsLocation, max: GpsLocation) -> bool {
    point.latitude() >= min.latitude()
        && point.latitude() <= max.latitude()
        && point.longitude() >= min.longitude()
        && point.longitude() <= max.longitude()
}

/// A candidate row a search can run over. Implemented by both the hosted
/// and the mirrored-neighbor repositories so one search pass can read
/// from either (or both, chained) without the store having to build a
/// temporary `Identity` for every neighbor row.
pub trait Searchable {
    fn id(&self) -> IdentityId;
    fn name(&self) -> &str;
    fn location(&self) -> GpsLocation;
    fn extra_data(&self) -> &str;
    fn has_image(&self) -> bool;
    fn roles(&self) -> Vec<String>;
    fn is_hosted(&self) -> bool;
}

impl Searchable for Identity {
    fn id(&self) -> IdentityId {
        self.id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn location(&self) -> GpsLocation {
        self.location
    }
    fn extra_data(&self) -> &str {
        &self.extra_data
    }
    fn has_image(&self) -> bool {
        self.image_token.is_some()
    }
    fn roles(&self) -> Vec<String> {
        vec![self.hosting_contract_type.clone()]
    }
    fn is_hosted(&self) -> bool {
        true
    }
}

impl Searchable for NeighborIdentity {
    fn id(&self) -> IdentityId {
        self.id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn location(&self) -> GpsLocation {
        self.location
    }
    fn extra_data(&self) -> &str {
        &self.extra_data
    }
    fn has_image(&self) -> bool {
        false
    }
    fn roles(&self) -> Vec<String> {
        vec!["neighbor".into()]
    }
    fn is_hosted(&self) -> bool {
        false
    }
}

pub struct SearchQuery<'a> {
    pub center: GpsLocation,
    pub radius_meters: u32,
    pub extra_data_regex: Option<&'a str>,
    pub name_prefix: Option<&'a str>,
    pub limit: usize,
    /// When `true`, only the hosted repository is searched; the neighbor
    /// mirror is never consulted even if the hosted set comes up short.
    pub hosted_only: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("extra_data_regex is not a valid regular expression")]
    InvalidRegex,
}

/// Run `query` over `candidates`, returning matches ordered by distance
/// ascending along with the total number matched (which may exceed
/// `limit`).
pub fn search<'i>(
    candidates: impl Iterator<Item = &'i dyn Searchable>,
    query: &SearchQuery,
) -> Result<(Vec<IdentitySummary>, u32), SearchError> {
    let regex = query.extra_data_regex.map(Regex::new).transpose().map_err(|_| SearchError::InvalidRegex)?;
    let (min, max) = bounding_box(query.center, query.radius_meters as f64);
    let query_deadline = Instant::now() + PER_QUERY_TIME_BUDGET;

    let mut matches: Vec<(f64, IdentitySummary)> = Vec::new();
    let mut total_matched = 0u32;

    for candidate in candidates {
        if Instant::now() > query_deadline {
            break;
        }
        if !candidate.location().is_set() || !within_bounding_box(candidate.location(), min, max) {
            continue;
        }
        let distance = haversine_meters(query.center, candidate.location());
        if distance > query.radius_meters as f64 {
            continue;
        }
        if let Some(prefix) = query.name_prefix {
            if !candidate.name().starts_with(prefix) {
                continue;
            }
        }
        if let Some(re) = &regex {
            let match_started = Instant::now();
            let is_match = re.is_match(candidate.extra_data());
            if match_started.elapsed() > PER_MATCH_TIME_BUDGET {
                // This candidate's regex evaluation blew its own budget;
                // skip just this row rather than abandoning the query.
                continue;
            }
            if !is_match {
                continue;
            }
        }

        total_matched += 1;
        matches.push((
            distance,
            IdentitySummary {
                id: candidate.id(),
                name: candidate.name().to_string(),
                location: candidate.location(),
                extra_data: candidate.extra_data().to_string(),
                has_image: candidate.has_image(),
                roles: candidate.roles(),
                distance_meters: Some(distance.round() as u32),
                is_hosted: candidate.is_hosted(),
                is_online: false,
                target_home_node_id: None,
            },
        ));
    }

    matches.sort_by(|a, b| a.0.total_cmp(&b.0));
    matches.truncate(query.limit);

    Ok((matches.into_iter().map(|(_, summary)| summary).collect(), total_matched))
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::message::PublicKey;

    fn make(id: u8, lat: f64, lon: f64, extra: &str) -> Identity {
        let mut identity = Identity::new(codec::message::IdentityId([id; 32]), PublicKey([id; 32]), "customer".into());
        identity.location = GpsLocation::from_degrees(lat, lon);
        identity.extra_data = extra.into();
        identity.name = format!("id-{id}");
        identity
    }

    fn query(radius_meters: u32, extra_data_regex: Option<&str>, name_prefix: Option<&str>, limit: usize) -> SearchQuery {
        SearchQuery {
            center: GpsLocation::from_degrees(50.0, 14.4),
            radius_meters,
            extra_data_regex,
            name_prefix,
            limit,
            hosted_only: false,
        }
    }

    #[test]
    fn filters_by_radius() {
        let near = make(1, 50.0, 14.4, "");
        let far = make(2, 10.0, 10.0, "");
        let candidates: Vec<&dyn Searchable> = vec![&near, &far];

        let query = query(1_000, None, None, 10);
        let (results, total) = search(candidates.into_iter(), &query).unwrap();
        assert_eq!(total, 1);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, codec::message::IdentityId([1u8; 32]));
    }

    #[test]
    fn filters_by_extra_data_regex() {
        let matching = make(1, 50.0, 14.4, "likes:hiking");
        let not_matching = make(2, 50.0, 14.4, "likes:reading");
        let candidates: Vec<&dyn Searchable> = vec![&matching, &not_matching];

        let query = query(1_000, Some("hiking"), None, 10);
        let (results, _) = search(candidates.into_iter(), &query).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn invalid_regex_is_rejected() {
        let query = SearchQuery {
            center: GpsLocation::from_degrees(0.0, 0.0),
            radius_meters: 1,
            extra_data_regex: Some("("),
            name_prefix: None,
            limit: 10,
            hosted_only: false,
        };
        assert!(search(std::iter::empty(), &query).is_err());
    }

    #[test]
    fn results_are_ordered_by_distance() {
        let closer = make(1, 50.001, 14.4, "");
        let farther = make(2, 50.01, 14.4, "");
        let candidates: Vec<&dyn Searchable> = vec![&farther, &closer];

        let query = query(5_000, None, None, 10);
        let (results, _) = search(candidates.into_iter(), &query).unwrap();
        assert_eq!(results[0].id, codec::message::IdentityId([1u8; 32]));
    }

    #[test]
    fn neighbor_rows_fill_out_results_alongside_hosted_ones() {
        let hosted = make(1, 50.0, 14.4, "");
        let neighbor = NeighborIdentity {
            id: codec::message::IdentityId([2u8; 32]),
            name: "id-2".into(),
            extra_data: String::new(),
            location: GpsLocation::from_degrees(50.0005, 14.4),
            home_node: "node-b".into(),
        };
        let candidates: Vec<&dyn Searchable> = vec![&hosted, &neighbor];

        let query = query(5_000, None, None, 10);
        let (results, total) = search(candidates.into_iter(), &query).unwrap();
        assert_eq!(total, 2);
        assert!(results.iter().any(|r| r.id == codec::message::IdentityId([1u8; 32]) && r.is_hosted));
        assert!(results.iter().any(|r| r.id == codec::message::IdentityId([2u8; 32]) && !r.is_hosted));
    }
}
