//! Ground-truth prediction of search results
//!
//! Mirrors the federation-aware query semantics of the real servers against
//! the world model: a local pass over the target's hosted records with
//! primary data, then a pass over its LOC neighbors with propagated data.
//! Comparison against live results is by multiset of protobuf encodings,
//! order-irrelevant.

use std::collections::HashMap;
use std::sync::Arc;

use prost::Message;

use peernet_core::{
    ActivityQueryFilter, Identity, NetworkId, ProfileInfo, ProfileQueryFilter, Server, ServerKind,
    SimError, SimResult, WorldModel,
};
use peernet_proto::profile::ProfileQueryInformation;
use peernet_proto::proximity::{
    ActivityInformation, ActivityQueryInformation, SignedActivityInformation,
};

/// Predicted outcome of a profile search.
#[derive(Debug, Clone)]
pub struct ProfilePrediction {
    /// Expected result records
    pub profiles: Vec<ProfileQueryInformation>,
    /// Expected covered servers, target first
    pub covered_servers: Vec<Vec<u8>>,
    /// How many results the target alone contributes
    pub local_count: usize,
}

/// Predicted outcome of an activity search.
#[derive(Debug, Clone)]
pub struct ActivityPrediction {
    /// Expected result records
    pub activities: Vec<ActivityQueryInformation>,
    /// Expected covered servers, target first
    pub covered_servers: Vec<Vec<u8>>,
    /// How many results the target alone contributes
    pub local_count: usize,
}

/// Predict a profile search on `target` whose LOC neighbors are `neighbors`.
pub fn predict_profile_search(
    world: &WorldModel,
    target: &Arc<Server>,
    neighbors: &[Arc<Server>],
    filter: &ProfileQueryFilter,
    include_hosted_only: bool,
    include_images: bool,
) -> SimResult<ProfilePrediction> {
    let target_id = require_network_id(target)?;
    let mut covered_servers = vec![target_id.to_vec()];
    let mut profiles = Vec::new();

    for handle in target.hosted_identities()? {
        let identity = world.identity(&handle)?;
        if filter.matches(
            &identity.primary_profile,
            identity.profile_initialized,
            identity.hosting_active,
        ) {
            profiles.push(profile_record(
                identity,
                &identity.primary_profile,
                true,
                None,
                include_images,
            ));
        }
    }
    let local_count = profiles.len();

    if !include_hosted_only {
        for neighbor in neighbors {
            if neighbor.kind() != ServerKind::Profile {
                continue;
            }
            let neighbor_id = require_network_id(neighbor)?;
            covered_servers.push(neighbor_id.to_vec());
            for handle in neighbor.hosted_identities()? {
                let identity = world.identity(&handle)?;
                if filter.matches(
                    &identity.propagated_profile,
                    identity.profile_initialized,
                    identity.hosting_active,
                ) {
                    profiles.push(profile_record(
                        identity,
                        &identity.propagated_profile,
                        false,
                        Some(neighbor_id),
                        include_images,
                    ));
                }
            }
        }
    }

    Ok(ProfilePrediction {
        profiles,
        covered_servers,
        local_count,
    })
}

fn profile_record(
    identity: &Identity,
    profile: &ProfileInfo,
    is_hosted: bool,
    hosting_server: Option<NetworkId>,
    include_images: bool,
) -> ProfileQueryInformation {
    ProfileQueryInformation {
        is_hosted,
        is_online: false,
        hosting_server_network_id: hosting_server.map(|id| id.to_vec()).unwrap_or_default(),
        version: profile.version.to_vec(),
        identity_public_key: identity.public_key_bytes(),
        profile_type: profile.profile_type.clone(),
        name: profile.name.clone(),
        latitude: profile.location.latitude_micro(),
        longitude: profile.location.longitude_micro(),
        extra_data: profile.extra_data.clone(),
        profile_image: if include_images {
            profile
                .profile_image
                .as_ref()
                .map(|i| i.bytes().to_vec())
                .unwrap_or_default()
        } else {
            Vec::new()
        },
        thumbnail_image: if include_images {
            profile
                .thumbnail_image
                .as_ref()
                .map(|i| i.bytes().to_vec())
                .unwrap_or_default()
        } else {
            Vec::new()
        },
    }
}

/// Predict an activity search on `target` whose LOC neighbors are
/// `neighbors`.
pub fn predict_activity_search(
    world: &WorldModel,
    target: &Arc<Server>,
    neighbors: &[Arc<Server>],
    filter: &ActivityQueryFilter,
    include_primary_only: bool,
) -> SimResult<ActivityPrediction> {
    let target_id = require_network_id(target)?;
    let mut covered_servers = vec![target_id.to_vec()];
    let mut activities = Vec::new();

    for key in target.primary_activities()? {
        let activity = world
            .activities
            .get(&key.id)
            .ok_or_else(|| SimError::internal(format!("activity {} missing from world", key.id)))?;
        if filter.matches(&activity.primary, activity.hosting_active) {
            activities.push(ActivityQueryInformation {
                is_primary: true,
                primary_server_ip: Vec::new(),
                primary_server_port: 0,
                activity: Some(SignedActivityInformation {
                    activity: Some(ActivityInformation::from(&activity.primary)),
                    signature: activity.signature.clone(),
                }),
            });
        }
    }
    let local_count = activities.len();

    if !include_primary_only {
        for neighbor in neighbors {
            if neighbor.kind() != ServerKind::Proximity {
                continue;
            }
            let neighbor_id = require_network_id(neighbor)?;
            covered_servers.push(neighbor_id.to_vec());
            let contact = neighbor.contact();
            for key in neighbor.primary_activities()? {
                let activity = world.activities.get(&key.id).ok_or_else(|| {
                    SimError::internal(format!("activity {} missing from world", key.id))
                })?;
                if filter.matches(&activity.propagated, activity.hosting_active) {
                    activities.push(ActivityQueryInformation {
                        is_primary: false,
                        primary_server_ip: match contact.ip {
                            std::net::IpAddr::V4(v4) => v4.octets().to_vec(),
                            std::net::IpAddr::V6(v6) => v6.octets().to_vec(),
                        },
                        primary_server_port: u32::from(contact.primary_port),
                        activity: Some(SignedActivityInformation {
                            activity: Some(ActivityInformation::from(&activity.propagated)),
                            signature: activity.signature.clone(),
                        }),
                    });
                }
            }
        }
    }

    Ok(ActivityPrediction {
        activities,
        covered_servers,
        local_count,
    })
}

fn require_network_id(server: &Server) -> SimResult<NetworkId> {
    server.network_id().ok_or_else(|| {
        SimError::internal(format!("server {} has no network id", server.name()))
    })
}

/// Compare a live result set against the prediction.
///
/// With at most `max_total` expected records the live set must be equal as
/// a multiset; beyond that the live set must be a size-`max_total` subset
/// of the expected multiset. Records compare by their protobuf encodings.
pub fn compare_result_sets<M: Message>(
    expected: &[M],
    actual: &[M],
    max_total: usize,
) -> SimResult<()> {
    if expected.len() <= max_total {
        if actual.len() != expected.len() {
            return Err(SimError::mismatch(format!(
                "expected {} results, server returned {}",
                expected.len(),
                actual.len()
            )));
        }
    } else if actual.len() != max_total {
        return Err(SimError::mismatch(format!(
            "expected the {max_total}-record truncation of {} results, server returned {}",
            expected.len(),
            actual.len()
        )));
    }

    let mut multiset: HashMap<Vec<u8>, usize> = HashMap::new();
    for item in expected {
        *multiset.entry(item.encode_to_vec()).or_insert(0) += 1;
    }
    for (position, item) in actual.iter().enumerate() {
        let key = item.encode_to_vec();
        match multiset.get_mut(&key) {
            Some(count) if *count > 0 => *count -= 1,
            _ => {
                return Err(SimError::mismatch(format!(
                    "result record #{position} is not in the expected set"
                )))
            }
        }
    }
    Ok(())
}

/// Compare live covered servers against the prediction.
///
/// When the target alone could satisfy the whole result budget
/// (`max_total <= local_count`), a covered list of just the target is
/// legal. Otherwise the live list must be a permutation of the expected
/// one, each expected entry consumed at most once.
pub fn compare_covered_servers(
    expected: &[Vec<u8>],
    actual: &[Vec<u8>],
    max_total: usize,
    local_count: usize,
    target_id: &[u8],
) -> SimResult<()> {
    if max_total <= local_count && actual.len() == 1 && actual[0] == target_id {
        return Ok(());
    }
    if actual.len() != expected.len() {
        return Err(SimError::mismatch(format!(
            "expected {} covered servers, server reported {}",
            expected.len(),
            actual.len()
        )));
    }
    let mut remaining: Vec<&Vec<u8>> = expected.iter().collect();
    for entry in actual {
        match remaining.iter().position(|candidate| *candidate == entry) {
            Some(found) => {
                remaining.swap_remove(found);
            }
            None => {
                return Err(SimError::mismatch(format!(
                    "covered server {} was not expected",
                    hex::encode(entry)
                )))
            }
        }
    }
    Ok(())
}

/// Result-set budget of a live profile query.
pub fn profile_max_total(include_images: bool) -> usize {
    if include_images {
        1_000
    } else {
        10_000
    }
}

/// Per-page budget of a live profile query.
pub fn profile_max_response(include_images: bool) -> u32 {
    if include_images {
        100
    } else {
        1_000
    }
}

/// Result-set budget of a live activity query.
pub const ACTIVITY_MAX_TOTAL: usize = 10_000;

/// Per-page budget of a live activity query.
pub const ACTIVITY_MAX_RESPONSE: u32 = 1_000;

#[cfg(test)]
mod tests {
    use super::*;
    use peernet_proto::profile::ProfileQueryInformation;

    fn record(name: &str) -> ProfileQueryInformation {
        ProfileQueryInformation {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn equal_multisets_compare_equal_in_any_order() {
        let expected = vec![record("a"), record("b"), record("b")];
        let actual = vec![record("b"), record("a"), record("b")];
        compare_result_sets(&expected, &actual, 1_000).unwrap();
    }

    #[test]
    fn count_mismatch_fails() {
        let expected = vec![record("a"), record("b")];
        let actual = vec![record("a")];
        assert!(compare_result_sets(&expected, &actual, 1_000).is_err());
    }

    #[test]
    fn foreign_record_fails() {
        let expected = vec![record("a"), record("b")];
        let actual = vec![record("a"), record("c")];
        assert!(compare_result_sets(&expected, &actual, 1_000).is_err());
    }

    #[test]
    fn duplicate_beyond_multiplicity_fails() {
        let expected = vec![record("a"), record("b")];
        let actual = vec![record("a"), record("a")];
        assert!(compare_result_sets(&expected, &actual, 1_000).is_err());
    }

    #[test]
    fn truncation_law_requires_exactly_max_total_records() {
        let expected: Vec<_> = (0..5).map(|i| record(&format!("r{i}"))).collect();
        // 5 expected, budget 3: any 3-subset passes.
        let actual = vec![record("r4"), record("r0"), record("r2")];
        compare_result_sets(&expected, &actual, 3).unwrap();
        // Returning fewer than the budget fails.
        let short = vec![record("r0"), record("r1")];
        assert!(compare_result_sets(&expected, &short, 3).is_err());
    }

    #[test]
    fn covered_servers_compare_as_permutation() {
        let a = vec![1u8; 32];
        let b = vec![2u8; 32];
        compare_covered_servers(
            &[a.clone(), b.clone()],
            &[b.clone(), a.clone()],
            1_000,
            0,
            &a,
        )
        .unwrap();
        assert!(compare_covered_servers(&[a.clone(), b.clone()], &[a.clone()], 1_000, 0, &a).is_err());
    }

    #[test]
    fn target_only_coverage_is_legal_when_local_results_fill_the_budget() {
        let a = vec![1u8; 32];
        let b = vec![2u8; 32];
        // local_count >= max_total: {target} is accepted.
        compare_covered_servers(&[a.clone(), b], &[a.clone()], 10, 10, &a).unwrap();
    }
}
