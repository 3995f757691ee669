//! Ground-truth predictor semantics against a hand-built world model.

use std::path::Path;
use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;

use peernet_core::{
    activity::activity_info, Activity, ActivityQueryFilter, GpsLocation, Identity,
    IdentityHandle, NetworkId, ProfileInfo, ProfileQueryFilter, Server, ServerKind, WildcardFilter,
    WorldModel,
};
use peernet_proto::crypto;
use peernet_sim::predict::{
    compare_covered_servers, compare_result_sets, predict_activity_search, predict_profile_search,
};

struct Fixture {
    world: WorldModel,
    a: Arc<Server>,
    b: Arc<Server>,
}

fn profile_fixture() -> Fixture {
    let mut world = WorldModel::new();
    let mut rng = ChaCha12Rng::seed_from_u64(77);
    let a = Server::new(
        "A001",
        ServerKind::Profile,
        GpsLocation::new(10.0, 20.0).unwrap(),
        10_000,
        Path::new("instances"),
    );
    let b = Server::new(
        "A002",
        ServerKind::Profile,
        GpsLocation::new(10.1, 20.1).unwrap(),
        10_020,
        Path::new("instances"),
    );
    a.set_network_id(NetworkId::new([1; 32])).unwrap();
    b.set_network_id(NetworkId::new([2; 32])).unwrap();
    world.add_server(Arc::clone(&a)).unwrap();
    world.add_server(Arc::clone(&b)).unwrap();

    for (group, server, count) in [("Ia", &a, 3), ("Ib", &b, 2)] {
        let mut members = Vec::new();
        for i in 0..count {
            let name = peernet_core::identity_member_name(group, i);
            let profile = ProfileInfo::new(
                &name,
                "Test",
                GpsLocation::new(10.0 + i as f64 * 0.01, 20.0).unwrap(),
            );
            let mut identity = Identity::generate(&name, profile, server.name(), &mut rng);
            identity.profile_initialized = true;
            identity.hosting_active = true;
            server
                .add_hosted_identity(IdentityHandle::new(group, i))
                .unwrap();
            members.push(identity);
        }
        world.identities.insert(group.to_string(), members);
    }

    Fixture { world, a, b }
}

fn unfiltered() -> ProfileQueryFilter {
    ProfileQueryFilter {
        name: WildcardFilter::None,
        profile_type: WildcardFilter::None,
        location: None,
    }
}

#[test]
fn hosted_pass_tags_and_counts_local_results() {
    let fx = profile_fixture();
    let prediction =
        predict_profile_search(&fx.world, &fx.a, &[], &unfiltered(), false, false).unwrap();
    assert_eq!(prediction.profiles.len(), 3);
    assert_eq!(prediction.local_count, 3);
    assert!(prediction.profiles.iter().all(|p| p.is_hosted));
    assert!(prediction
        .profiles
        .iter()
        .all(|p| p.hosting_server_network_id.is_empty()));
    assert_eq!(prediction.covered_servers, vec![vec![1u8; 32]]);
}

#[test]
fn neighbor_pass_uses_propagated_data_and_tags_the_host() {
    let mut fx = profile_fixture();
    // Diverge B's first propagated profile to prove the neighbor pass reads
    // the propagated copy.
    fx.world
        .identities
        .get_mut("Ib")
        .unwrap()
        .get_mut(0)
        .unwrap()
        .propagated_profile
        .extra_data = "stale".to_string();

    let neighbors = vec![Arc::clone(&fx.b)];
    let prediction =
        predict_profile_search(&fx.world, &fx.a, &neighbors, &unfiltered(), false, false).unwrap();
    assert_eq!(prediction.profiles.len(), 5);
    assert_eq!(prediction.local_count, 3);
    let from_b: Vec<_> = prediction.profiles.iter().filter(|p| !p.is_hosted).collect();
    assert_eq!(from_b.len(), 2);
    assert!(from_b
        .iter()
        .all(|p| p.hosting_server_network_id == vec![2u8; 32]));
    assert!(from_b.iter().any(|p| p.extra_data == "stale"));
    assert_eq!(
        prediction.covered_servers,
        vec![vec![1u8; 32], vec![2u8; 32]]
    );
}

#[test]
fn hosted_only_queries_skip_neighbors() {
    let fx = profile_fixture();
    let neighbors = vec![Arc::clone(&fx.b)];
    let prediction =
        predict_profile_search(&fx.world, &fx.a, &neighbors, &unfiltered(), true, false).unwrap();
    assert_eq!(prediction.profiles.len(), 3);
    assert_eq!(prediction.covered_servers, vec![vec![1u8; 32]]);
}

#[test]
fn uninitialized_or_cancelled_profiles_never_match() {
    let mut fx = profile_fixture();
    fx.world.identities.get_mut("Ia").unwrap()[0].profile_initialized = false;
    fx.world.identities.get_mut("Ia").unwrap()[1].hosting_active = false;
    let prediction =
        predict_profile_search(&fx.world, &fx.a, &[], &unfiltered(), false, false).unwrap();
    assert_eq!(prediction.profiles.len(), 1);
}

#[test]
fn name_filter_applies_to_both_passes() {
    let fx = profile_fixture();
    let filter = ProfileQueryFilter {
        name: WildcardFilter::parse("Ia*"),
        profile_type: WildcardFilter::None,
        location: None,
    };
    let neighbors = vec![Arc::clone(&fx.b)];
    let prediction =
        predict_profile_search(&fx.world, &fx.a, &neighbors, &filter, false, false).unwrap();
    assert_eq!(prediction.profiles.len(), 3);
    // The neighbor still counts as covered even with zero contributions.
    assert_eq!(prediction.covered_servers.len(), 2);
}

#[test]
fn location_filter_uses_great_circle_distance() {
    let fx = profile_fixture();
    let filter = ProfileQueryFilter {
        name: WildcardFilter::None,
        profile_type: WildcardFilter::None,
        // ~1.1 km per 0.01 degree of latitude; a 1.5 km radius keeps the
        // first two identities (offsets 0 and 0.01) and drops the third.
        location: Some((GpsLocation::new(10.0, 20.0).unwrap(), 1_500)),
    };
    let prediction = predict_profile_search(&fx.world, &fx.a, &[], &filter, false, false).unwrap();
    assert_eq!(prediction.profiles.len(), 2);
}

#[test]
fn images_are_included_only_on_request() {
    let mut fx = profile_fixture();
    let image = peernet_core::ImageData::new(vec![9, 9, 9]);
    fx.world.identities.get_mut("Ia").unwrap()[0]
        .primary_profile
        .profile_image = Some(image);
    let with = predict_profile_search(&fx.world, &fx.a, &[], &unfiltered(), false, true).unwrap();
    let without =
        predict_profile_search(&fx.world, &fx.a, &[], &unfiltered(), false, false).unwrap();
    assert!(with.profiles.iter().any(|p| !p.profile_image.is_empty()));
    assert!(without.profiles.iter().all(|p| p.profile_image.is_empty()));
}

fn activity_fixture() -> (WorldModel, Arc<Server>, Arc<Server>) {
    let mut world = WorldModel::new();
    let mut rng = ChaCha12Rng::seed_from_u64(99);
    let px1 = Server::new(
        "PX001",
        ServerKind::Proximity,
        GpsLocation::new(10.0, 20.0).unwrap(),
        20_000,
        Path::new("instances"),
    );
    let px2 = Server::new(
        "PX002",
        ServerKind::Proximity,
        GpsLocation::new(11.0, 21.0).unwrap(),
        20_020,
        Path::new("instances"),
    );
    px1.set_network_id(NetworkId::new([11; 32])).unwrap();
    px2.set_network_id(NetworkId::new([12; 32])).unwrap();

    let ps = Server::new(
        "A001",
        ServerKind::Profile,
        GpsLocation::new(10.0, 20.0).unwrap(),
        10_000,
        Path::new("instances"),
    );
    world.add_server(Arc::clone(&ps)).unwrap();
    world.add_server(Arc::clone(&px1)).unwrap();
    world.add_server(Arc::clone(&px2)).unwrap();

    let profile = ProfileInfo::new("Ia00001", "Test", GpsLocation::new(10.0, 20.0).unwrap());
    let identity = Identity::generate("Ia00001", profile, "A001", &mut rng);
    let owner = IdentityHandle::new("Ia", 0);
    world.identities.insert("Ia".into(), vec![identity]);

    for (server, start, expiration) in
        [(&px1, 0i64, 3_600i64), (&px1, 100, 7_200), (&px2, 50, 1_800)]
    {
        let id = world.allocate_activity_id();
        let identity = &world.identities["Ia"][0];
        let info = activity_info(
            id,
            identity.identity_id,
            identity.public_key_bytes(),
            ps.contact(),
            "Run",
            server.location(),
            100,
            start,
            expiration,
        );
        let signature = crypto::sign_activity(&identity.signing_key, &info);
        let mut activity = Activity::new(info, signature, owner.clone(), server.name()).unwrap();
        activity.hosting_active = true;
        server.add_primary_activity(activity.key()).unwrap();
        world.activities.insert(id, activity);
        world
            .activity_groups
            .entry("G".into())
            .or_default()
            .push(Some(id));
    }
    (world, px1, px2)
}

fn unfiltered_activities() -> ActivityQueryFilter {
    ActivityQueryFilter {
        activity_type: WildcardFilter::None,
        start_not_after: None,
        expiration_not_before: None,
        location: None,
    }
}

#[test]
fn activity_prediction_tags_primary_and_neighbor_results() {
    let (world, px1, px2) = activity_fixture();
    let neighbors = vec![Arc::clone(&px2)];
    let prediction =
        predict_activity_search(&world, &px1, &neighbors, &unfiltered_activities(), false).unwrap();
    assert_eq!(prediction.activities.len(), 3);
    assert_eq!(prediction.local_count, 2);
    let primary: Vec<_> = prediction.activities.iter().filter(|a| a.is_primary).collect();
    assert_eq!(primary.len(), 2);
    let neighbor: Vec<_> = prediction
        .activities
        .iter()
        .filter(|a| !a.is_primary)
        .collect();
    assert_eq!(neighbor.len(), 1);
    assert_eq!(neighbor[0].primary_server_port, u32::from(px2.primary_port()));
    assert_eq!(
        prediction.covered_servers,
        vec![vec![11u8; 32], vec![12u8; 32]]
    );
}

#[test]
fn activity_time_filters_bound_start_and_expiration() {
    let (world, px1, _px2) = activity_fixture();
    let mut filter = unfiltered_activities();
    filter.start_not_after = Some(60);
    let prediction = predict_activity_search(&world, &px1, &[], &filter, false).unwrap();
    // Only the start=0 activity on PX001 passes start <= 60.
    assert_eq!(prediction.activities.len(), 1);

    let mut filter = unfiltered_activities();
    filter.expiration_not_before = Some(5_000);
    let prediction = predict_activity_search(&world, &px1, &[], &filter, false).unwrap();
    // Only the expiration=7200 activity passes expiration >= 5000.
    assert_eq!(prediction.activities.len(), 1);
}

#[test]
fn prediction_matches_itself_under_comparison_laws() {
    let (world, px1, px2) = activity_fixture();
    let neighbors = vec![Arc::clone(&px2)];
    let prediction =
        predict_activity_search(&world, &px1, &neighbors, &unfiltered_activities(), false).unwrap();
    compare_result_sets(&prediction.activities, &prediction.activities, 10_000).unwrap();
    let target_id = px1.network_id().unwrap().to_vec();
    compare_covered_servers(
        &prediction.covered_servers,
        &prediction.covered_servers,
        10_000,
        prediction.local_count,
        &target_id,
    )
    .unwrap();
}
