//! Snapshot engine: freeze and rehydrate the whole simulation
//!
//! State lands as JSON in one snapshot directory (`ProfileServers.json`,
//! `ProximityServers.json`, `Identities.json`, `Activities.json`,
//! `Images.json`) plus `bin/<server>/` copies of the instance directories
//! with logs and tmp data excluded. Image bytes are stored once, keyed by
//! SHA-256, and shared between profiles.
//!
//! Servers are stopped before the state is serialized, but in-flight
//! neighborhood notifications are not quiesced first, so a snapshot can
//! legitimately record a partially propagated neighbor set. This matches
//! the behavior of the system being simulated and is deliberate.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use ed25519_dalek::SigningKey;

use peernet_core::{
    Activity, ActivityInfo, ActivityKey, GpsLocation, Identity, IdentityHandle, IdentityId,
    ImageData, NetworkId, ProfileInfo, Server, ServerContact, ServerKind, ServerPayload,
    SessionState, SimError, SimResult,
};
use peernet_loc::LocServer;

use crate::context::{copy_dir_recursive, SimContext};
use crate::supervisor::ServerProcess;

/// Directory entries never copied into or out of a snapshot.
const INSTANCE_EXCLUDES: &[&str] = &["Logs", "tmp"];

#[derive(Debug, Serialize, Deserialize)]
struct ServerDto {
    name: String,
    base_port: u16,
    latitude: f64,
    longitude: f64,
    network_id: Option<String>,
    is_running: bool,
    available_slots: usize,
    #[serde(default)]
    identities: Vec<IdentityHandle>,
    #[serde(default)]
    activities: Vec<ActivityKeyDto>,
    neighbors: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ActivityKeyDto {
    activity_type: String,
    id: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ProfileInfoDto {
    version: [u8; 3],
    name: String,
    profile_type: String,
    latitude: f64,
    longitude: f64,
    profile_image: Option<String>,
    thumbnail_image: Option<String>,
    extra_data: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct IdentityDto {
    name: String,
    secret_key: String,
    primary: ProfileInfoDto,
    propagated: ProfileInfoDto,
    host_server: String,
    profile_initialized: bool,
    hosting_active: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ContactDto {
    ip: String,
    primary_port: u16,
}

#[derive(Debug, Serialize, Deserialize)]
struct ActivityInfoDto {
    version: [u8; 3],
    id: u32,
    owner_identity_id: String,
    owner_public_key: String,
    owner_profile_server: ContactDto,
    activity_type: String,
    latitude: f64,
    longitude: f64,
    precision: u32,
    start_time: i64,
    expiration_time: i64,
    extra_data: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ActivityDto {
    primary: ActivityInfoDto,
    propagated: ActivityInfoDto,
    signature: String,
    owner: IdentityHandle,
    primary_server: String,
    hosting_active: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ActivitiesDto {
    groups: IndexMap<String, Vec<Option<u32>>>,
    activities: Vec<ActivityDto>,
}

/// Freeze the simulation into `snapshots/<name>/`.
///
/// `running` is the set of servers that were running before the snapshot
/// stop; their `is_running` flag is what `LoadSnapshot` restarts.
pub fn save(
    ctx: &SimContext,
    procs: &IndexMap<String, ServerProcess>,
    running: &[String],
    name: &str,
) -> SimResult<()> {
    let dir = ctx.paths.snapshot_dir(name);
    if dir.exists() {
        std::fs::remove_dir_all(&dir)
            .map_err(|e| SimError::io(format!("cannot clear snapshot {name}: {e}")))?;
    }
    std::fs::create_dir_all(&dir)?;

    let mut profile_servers = Vec::new();
    let mut proximity_servers = Vec::new();
    for (server_name, proc) in procs {
        let server = proc.server();
        let dto = server_dto(server, proc.loc(), running.contains(server_name));
        match server.kind() {
            ServerKind::Profile => profile_servers.push(dto),
            ServerKind::Proximity => proximity_servers.push(dto),
        }
    }

    let mut identities: IndexMap<String, Vec<IdentityDto>> = IndexMap::new();
    let mut images: BTreeMap<String, String> = BTreeMap::new();
    for (group, members) in &ctx.world.identities {
        let dtos = members
            .iter()
            .map(|identity| identity_dto(identity, &mut images))
            .collect();
        identities.insert(group.clone(), dtos);
    }

    let activities = ActivitiesDto {
        groups: ctx.world.activity_groups.clone(),
        activities: ctx
            .world
            .activities
            .values()
            .map(activity_dto)
            .collect(),
    };

    write_json(&dir.join("ProfileServers.json"), &profile_servers)?;
    write_json(&dir.join("ProximityServers.json"), &proximity_servers)?;
    write_json(&dir.join("Identities.json"), &identities)?;
    write_json(&dir.join("Activities.json"), &activities)?;
    write_json(&dir.join("Images.json"), &images)?;

    // Instance directories, logs and tmp data excluded.
    for proc in procs.values() {
        let instance = proc.server().instance_dir();
        if instance.is_dir() {
            let target = dir.join("bin").join(proc.server().name());
            copy_dir_recursive(instance, &target, INSTANCE_EXCLUDES)?;
        }
    }

    info!(snapshot = name, servers = procs.len(), "snapshot taken");
    Ok(())
}

/// Rehydrate `snapshots/<name>/` into a fresh context.
///
/// Rebuilds the world model, restores instance directories, starts a LOC
/// server for every managed server, and re-establishes neighbor maps
/// without emitting notifications. Returns the process table and the names
/// of the servers recorded as running; the caller restarts those.
pub async fn load(
    ctx: &mut SimContext,
    name: &str,
) -> SimResult<(IndexMap<String, ServerProcess>, Vec<String>)> {
    let dir = ctx.paths.snapshot_dir(name);
    if !dir.is_dir() {
        return Err(SimError::not_found(format!("snapshot {name}")));
    }

    let profile_servers: Vec<ServerDto> = read_json(&dir.join("ProfileServers.json"))?;
    let proximity_servers: Vec<ServerDto> = read_json(&dir.join("ProximityServers.json"))?;
    let identities: IndexMap<String, Vec<IdentityDto>> = read_json(&dir.join("Identities.json"))?;
    let activities: ActivitiesDto = read_json(&dir.join("Activities.json"))?;
    let images_raw: BTreeMap<String, String> = read_json(&dir.join("Images.json"))?;

    let mut images: BTreeMap<String, ImageData> = BTreeMap::new();
    for (hash, bytes_hex) in &images_raw {
        let bytes = hex::decode(bytes_hex)
            .map_err(|e| SimError::serialization(format!("image {hash}: {e}")))?;
        let image = ImageData::new(bytes);
        if hex::encode(image.hash()) != *hash {
            return Err(SimError::serialization(format!(
                "image content does not match its recorded hash {hash}"
            )));
        }
        images.insert(hash.clone(), image);
    }

    let mut running = Vec::new();
    let mut neighbor_names: IndexMap<String, Vec<String>> = IndexMap::new();
    for (dto, kind) in profile_servers
        .iter()
        .map(|dto| (dto, ServerKind::Profile))
        .chain(
            proximity_servers
                .iter()
                .map(|dto| (dto, ServerKind::Proximity)),
        )
    {
        let server = restore_server(ctx, dto, kind)?;
        if dto.is_running {
            running.push(dto.name.clone());
        }
        neighbor_names.insert(dto.name.clone(), dto.neighbors.clone());
        ctx.world.add_server(server)?;
    }

    for (group, members) in &identities {
        let rebuilt: SimResult<Vec<Identity>> = members
            .iter()
            .map(|dto| restore_identity(dto, &images))
            .collect();
        ctx.world.identities.insert(group.clone(), rebuilt?);
    }

    ctx.world.activity_groups = activities.groups;
    for dto in &activities.activities {
        let activity = restore_activity(dto)?;
        let id = activity.primary.id;
        ctx.world.reserve_activity_id(id);
        ctx.world.activities.insert(id, activity);
    }

    // Instance directories come back before any child is started.
    let bin_root = dir.join("bin");
    for server in ctx.world.servers.values() {
        let source = bin_root.join(server.name());
        if source.is_dir() {
            if server.instance_dir().is_dir() {
                std::fs::remove_dir_all(server.instance_dir())?;
            }
            copy_dir_recursive(&source, server.instance_dir(), &[])?;
        }
    }

    // LOC servers for every managed server, then the neighbor maps,
    // silently.
    let mut procs: IndexMap<String, ServerProcess> = IndexMap::new();
    for server in ctx.world.servers.values() {
        let loc = LocServer::start(Arc::clone(server)).await?;
        procs.insert(server.name().to_string(), ServerProcess::new(Arc::clone(server), loc));
    }
    for (server_name, names) in &neighbor_names {
        let peers: SimResult<Vec<Arc<Server>>> = names
            .iter()
            .map(|peer| ctx.world.server(peer).map(Arc::clone))
            .collect();
        procs
            .get(server_name)
            .ok_or_else(|| SimError::internal(format!("no process entry for {server_name}")))?
            .loc()
            .set_neighborhood(&peers?);
    }

    debug!(
        snapshot = name,
        servers = procs.len(),
        running = running.len(),
        "snapshot rehydrated"
    );
    Ok((procs, running))
}

fn server_dto(server: &Arc<Server>, loc: &LocServer, is_running: bool) -> ServerDto {
    let location = server.location();
    let (available_slots, identities, activities) = match &*server.payload() {
        ServerPayload::Profile {
            available_slots,
            identities,
        } => (*available_slots, identities.clone(), Vec::new()),
        ServerPayload::Proximity {
            available_slots,
            activities,
        } => (
            *available_slots,
            Vec::new(),
            activities
                .iter()
                .map(|key| ActivityKeyDto {
                    activity_type: key.activity_type.clone(),
                    id: key.id,
                })
                .collect(),
        ),
    };
    ServerDto {
        name: server.name().to_string(),
        base_port: server.base_port(),
        latitude: location.latitude,
        longitude: location.longitude,
        network_id: server.network_id().map(|id| id.to_string()),
        is_running,
        available_slots,
        identities,
        activities,
        neighbors: loc.neighbor_names(),
    }
}

fn restore_server(ctx: &SimContext, dto: &ServerDto, kind: ServerKind) -> SimResult<Arc<Server>> {
    let location = GpsLocation::new(dto.latitude, dto.longitude)?;
    let server = Server::new(
        dto.name.clone(),
        kind,
        location,
        dto.base_port,
        &ctx.paths.instances(),
    );
    if let Some(hex_id) = &dto.network_id {
        server.shared().network_id = Some(NetworkId::from_hex(hex_id)?);
    }
    match &mut *server.payload() {
        ServerPayload::Profile {
            available_slots,
            identities,
        } => {
            *available_slots = dto.available_slots;
            *identities = dto.identities.clone();
        }
        ServerPayload::Proximity {
            available_slots,
            activities,
        } => {
            *available_slots = dto.available_slots;
            *activities = dto
                .activities
                .iter()
                .map(|key| ActivityKey {
                    activity_type: key.activity_type.clone(),
                    id: key.id,
                })
                .collect();
        }
    }
    Ok(server)
}

fn identity_dto(identity: &Identity, images: &mut BTreeMap<String, String>) -> IdentityDto {
    IdentityDto {
        name: identity.name.clone(),
        secret_key: hex::encode(identity.signing_key.to_bytes()),
        primary: profile_dto(&identity.primary_profile, images),
        propagated: profile_dto(&identity.propagated_profile, images),
        host_server: identity.host_server.clone(),
        profile_initialized: identity.profile_initialized,
        hosting_active: identity.hosting_active,
    }
}

fn profile_dto(profile: &ProfileInfo, images: &mut BTreeMap<String, String>) -> ProfileInfoDto {
    let mut register = |image: &ImageData| {
        let hash = hex::encode(image.hash());
        images
            .entry(hash.clone())
            .or_insert_with(|| hex::encode(image.bytes()));
        hash
    };
    ProfileInfoDto {
        version: profile.version,
        name: profile.name.clone(),
        profile_type: profile.profile_type.clone(),
        latitude: profile.location.latitude,
        longitude: profile.location.longitude,
        profile_image: profile.profile_image.as_ref().map(&mut register),
        thumbnail_image: profile.thumbnail_image.as_ref().map(&mut register),
        extra_data: profile.extra_data.clone(),
    }
}

fn restore_identity(dto: &IdentityDto, images: &BTreeMap<String, ImageData>) -> SimResult<Identity> {
    let secret = hex::decode(&dto.secret_key)
        .map_err(|e| SimError::serialization(format!("identity {}: {e}", dto.name)))?;
    let secret: [u8; 32] = secret
        .as_slice()
        .try_into()
        .map_err(|_| SimError::serialization(format!("identity {}: bad secret key", dto.name)))?;
    let signing_key = SigningKey::from_bytes(&secret);
    Ok(Identity {
        name: dto.name.clone(),
        identity_id: IdentityId::from_public_key(&signing_key.verifying_key()),
        signing_key,
        primary_profile: restore_profile(&dto.primary, images)?,
        propagated_profile: restore_profile(&dto.propagated, images)?,
        host_server: dto.host_server.clone(),
        profile_initialized: dto.profile_initialized,
        hosting_active: dto.hosting_active,
        session: SessionState::default(),
    })
}

fn restore_profile(
    dto: &ProfileInfoDto,
    images: &BTreeMap<String, ImageData>,
) -> SimResult<ProfileInfo> {
    let lookup = |hash: &Option<String>| -> SimResult<Option<ImageData>> {
        match hash {
            None => Ok(None),
            Some(hash) => images
                .get(hash)
                .cloned()
                .map(Some)
                .ok_or_else(|| SimError::serialization(format!("missing image {hash}"))),
        }
    };
    Ok(ProfileInfo {
        version: dto.version,
        name: dto.name.clone(),
        profile_type: dto.profile_type.clone(),
        location: GpsLocation::new(dto.latitude, dto.longitude)?,
        profile_image: lookup(&dto.profile_image)?,
        thumbnail_image: lookup(&dto.thumbnail_image)?,
        extra_data: dto.extra_data.clone(),
    })
}

fn activity_dto(activity: &Activity) -> ActivityDto {
    ActivityDto {
        primary: activity_info_dto(&activity.primary),
        propagated: activity_info_dto(&activity.propagated),
        signature: hex::encode(&activity.signature),
        owner: activity.owner.clone(),
        primary_server: activity.primary_server.clone(),
        hosting_active: activity.hosting_active,
    }
}

fn activity_info_dto(info: &ActivityInfo) -> ActivityInfoDto {
    ActivityInfoDto {
        version: info.version,
        id: info.id,
        owner_identity_id: info.owner_identity_id.to_string(),
        owner_public_key: hex::encode(&info.owner_public_key),
        owner_profile_server: ContactDto {
            ip: info.owner_profile_server.ip.to_string(),
            primary_port: info.owner_profile_server.primary_port,
        },
        activity_type: info.activity_type.clone(),
        latitude: info.location.latitude,
        longitude: info.location.longitude,
        precision: info.precision,
        start_time: info.start_time,
        expiration_time: info.expiration_time,
        extra_data: info.extra_data.clone(),
    }
}

fn restore_activity(dto: &ActivityDto) -> SimResult<Activity> {
    Ok(Activity {
        primary: restore_activity_info(&dto.primary)?,
        propagated: restore_activity_info(&dto.propagated)?,
        signature: hex::decode(&dto.signature)
            .map_err(|e| SimError::serialization(format!("activity {}: {e}", dto.primary.id)))?,
        owner: dto.owner.clone(),
        primary_server: dto.primary_server.clone(),
        hosting_active: dto.hosting_active,
    })
}

fn restore_activity_info(dto: &ActivityInfoDto) -> SimResult<ActivityInfo> {
    let ip: IpAddr = dto
        .owner_profile_server
        .ip
        .parse()
        .map_err(|e| SimError::serialization(format!("activity {}: bad IP: {e}", dto.id)))?;
    Ok(ActivityInfo {
        version: dto.version,
        id: dto.id,
        owner_identity_id: IdentityId::from_hex(&dto.owner_identity_id)?,
        owner_public_key: hex::decode(&dto.owner_public_key)
            .map_err(|e| SimError::serialization(format!("activity {}: {e}", dto.id)))?,
        owner_profile_server: ServerContact {
            ip,
            primary_port: dto.owner_profile_server.primary_port,
        },
        activity_type: dto.activity_type.clone(),
        location: GpsLocation::new(dto.latitude, dto.longitude)?,
        precision: dto.precision,
        start_time: dto.start_time,
        expiration_time: dto.expiration_time,
        extra_data: dto.extra_data.clone(),
    })
}

fn write_json<T: Serialize>(path: &std::path::Path, value: &T) -> SimResult<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| SimError::serialization(e.to_string()))?;
    std::fs::write(path, json)
        .map_err(|e| SimError::io(format!("cannot write {}: {e}", path.display())))?;
    Ok(())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &std::path::Path) -> SimResult<T> {
    let bytes = std::fs::read(path)
        .map_err(|e| SimError::io(format!("cannot read {}: {e}", path.display())))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| SimError::serialization(format!("{}: {e}", path.display())))
}
