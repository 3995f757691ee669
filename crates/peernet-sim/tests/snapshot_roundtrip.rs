//! Snapshot round-trip: freezing and rehydrating a world reproduces the
//! same logical state, including neighbor sets and shared images.

use std::sync::Arc;

use indexmap::IndexMap;
use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;

use peernet_core::{
    activity::activity_info, Activity, GpsLocation, Identity, IdentityHandle, ImageData,
    NetworkId, ProfileInfo, Server, ServerKind, WorldModel,
};
use peernet_loc::LocServer;
use peernet_proto::crypto;
use peernet_sim::supervisor::ServerProcess;
use peernet_sim::{snapshot, SimContext};

async fn build_world(ctx: &mut SimContext) -> IndexMap<String, ServerProcess> {
    let mut rng = ChaCha12Rng::seed_from_u64(123);

    let a = Server::new(
        "A001",
        ServerKind::Profile,
        GpsLocation::new(10.0, 20.0).unwrap(),
        47_300,
        &ctx.paths.instances(),
    );
    let b = Server::new(
        "A002",
        ServerKind::Profile,
        GpsLocation::new(10.1, 20.1).unwrap(),
        47_320,
        &ctx.paths.instances(),
    );
    let px = Server::new(
        "PX001",
        ServerKind::Proximity,
        GpsLocation::new(10.2, 20.2).unwrap(),
        47_340,
        &ctx.paths.instances(),
    );
    a.set_network_id(NetworkId::new([1; 32])).unwrap();
    b.set_network_id(NetworkId::new([2; 32])).unwrap();
    px.set_network_id(NetworkId::new([3; 32])).unwrap();

    // One identity on A001 with a shared image on both profile slots.
    let image = ImageData::new(vec![42; 64]);
    let mut profile = ProfileInfo::new("Ia00001", "Test", GpsLocation::new(10.0, 20.0).unwrap());
    profile.profile_image = Some(image.clone());
    profile.thumbnail_image = Some(image);
    let mut identity = Identity::generate("Ia00001", profile, "A001", &mut rng);
    identity.profile_initialized = true;
    identity.hosting_active = true;
    a.add_hosted_identity(IdentityHandle::new("Ia", 0)).unwrap();

    let activity_id = ctx.world.allocate_activity_id();
    let info = activity_info(
        activity_id,
        identity.identity_id,
        identity.public_key_bytes(),
        a.contact(),
        "Run",
        px.location(),
        250,
        100,
        9_000,
    );
    let signature = crypto::sign_activity(&identity.signing_key, &info);
    let mut activity =
        Activity::new(info, signature, IdentityHandle::new("Ia", 0), "PX001").unwrap();
    activity.hosting_active = true;
    px.add_primary_activity(activity.key()).unwrap();

    ctx.world.identities.insert("Ia".into(), vec![identity]);
    ctx.world.activities.insert(activity_id, activity);
    ctx.world
        .activity_groups
        .insert("G".into(), vec![Some(activity_id), None]);
    ctx.world.add_server(Arc::clone(&a)).unwrap();
    ctx.world.add_server(Arc::clone(&b)).unwrap();
    ctx.world.add_server(Arc::clone(&px)).unwrap();

    let mut procs = IndexMap::new();
    for server in [&a, &b, &px] {
        let loc = LocServer::start(Arc::clone(server)).await.unwrap();
        procs.insert(
            server.name().to_string(),
            ServerProcess::new(Arc::clone(server), loc),
        );
    }
    procs["A001"]
        .loc()
        .add_neighborhood(&[Arc::clone(&b)])
        .await
        .unwrap();
    procs["A002"]
        .loc()
        .add_neighborhood(&[Arc::clone(&a)])
        .await
        .unwrap();
    procs
}

fn world_digest(world: &WorldModel) -> Vec<(String, u16, Option<String>)> {
    world
        .servers
        .values()
        .map(|s| {
            (
                s.name().to_string(),
                s.base_port(),
                s.network_id().map(|id| id.to_string()),
            )
        })
        .collect()
}

#[tokio::test]
async fn snapshot_roundtrip_reproduces_the_world() {
    let base = tempfile::tempdir().unwrap();
    let mut ctx = SimContext::new(base.path(), Some(7));
    let procs = build_world(&mut ctx).await;

    let running = vec!["A001".to_string()];
    snapshot::save(&ctx, &procs, &running, "roundtrip").unwrap();

    // Free the LOC ports before rehydrating.
    for proc in procs.values() {
        proc.loc().shutdown().await;
    }
    let original_digest = world_digest(&ctx.world);

    let mut restored_ctx = SimContext::new(base.path(), Some(7));
    let (restored_procs, restored_running) =
        snapshot::load(&mut restored_ctx, "roundtrip").await.unwrap();

    assert_eq!(restored_running, running);
    assert_eq!(world_digest(&restored_ctx.world), original_digest);

    // Neighbor sets are re-established silently.
    assert_eq!(
        restored_procs["A001"].loc().neighbor_names(),
        vec!["A002".to_string()]
    );
    assert_eq!(
        restored_procs["A002"].loc().neighbor_names(),
        vec!["A001".to_string()]
    );
    assert!(restored_procs["PX001"].loc().neighbor_names().is_empty());

    // Identities come back with keys, flags, and shared image content.
    let identity = &restored_ctx.world.identities["Ia"][0];
    let original = &ctx.world.identities["Ia"][0];
    assert_eq!(identity.name, original.name);
    assert_eq!(identity.identity_id, original.identity_id);
    assert_eq!(identity.public_key_bytes(), original.public_key_bytes());
    assert!(identity.profile_initialized);
    assert!(identity.hosting_active);
    let restored_image = identity.primary_profile.profile_image.as_ref().unwrap();
    let original_image = original.primary_profile.profile_image.as_ref().unwrap();
    assert_eq!(restored_image.hash(), original_image.hash());
    assert_eq!(restored_image.bytes(), original_image.bytes());
    // The thumbnail shares the same content-addressed image.
    assert_eq!(
        identity.primary_profile.thumbnail_image.as_ref().unwrap().hash(),
        restored_image.hash()
    );

    // Activities, their signatures, and the positional group with its
    // deleted slot are preserved.
    assert_eq!(restored_ctx.world.activities.len(), 1);
    let restored_activity = restored_ctx.world.activities.values().next().unwrap();
    let original_activity = ctx.world.activities.values().next().unwrap();
    assert_eq!(restored_activity.primary, original_activity.primary);
    assert_eq!(restored_activity.signature, original_activity.signature);
    assert!(restored_activity.hosting_active);
    crypto::verify_activity(&restored_activity.primary, &restored_activity.signature).unwrap();
    assert_eq!(
        restored_ctx.world.activity_groups["G"],
        vec![Some(1), None]
    );

    // Proximity payload came back too.
    assert_eq!(
        restored_ctx.world.servers["PX001"].primary_activities().unwrap(),
        ctx.world.servers["PX001"].primary_activities().unwrap()
    );

    // A fresh id allocation does not collide with restored activities.
    assert_eq!(restored_ctx.world.allocate_activity_id(), 2);

    for proc in restored_procs.values() {
        proc.loc().shutdown().await;
    }
}

#[tokio::test]
async fn loading_a_missing_snapshot_fails_cleanly() {
    let base = tempfile::tempdir().unwrap();
    let mut ctx = SimContext::new(base.path(), None);
    assert!(snapshot::load(&mut ctx, "nope").await.is_err());
}
