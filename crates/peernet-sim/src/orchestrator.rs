//! Command executor
//!
//! Runs scenario commands one at a time in order, mutating the world model
//! and driving child processes through their client protocols. The first
//! failure of any kind aborts the run.

use std::sync::Arc;

use ed25519_dalek::SigningKey;
use indexmap::IndexMap;
use rand::Rng;
use tracing::{debug, error, info, warn};

use peernet_core::{
    ActivityInfo, ActivityQueryFilter, GpsLocation, Identity, IdentityHandle, ProfileInfo,
    ProfileQueryFilter, Server, ServerKind, SimError, SimResult, WildcardFilter,
    identity_member_name, server_instance_name, NO_LOCATION_MICRO, PORT_BLOCK_SIZE,
};
use peernet_loc::LocServer;
use peernet_proto::crypto;
use peernet_proto::profile::ProfileSearchRequest;
use peernet_proto::proximity::{ActivitySearchRequest, ANY_TIME};

use crate::context::{now_timestamp, SimContext};
use crate::driver;
use crate::predict::{
    compare_covered_servers, compare_result_sets, predict_activity_search,
    predict_profile_search, profile_max_response, profile_max_total, ACTIVITY_MAX_RESPONSE,
    ACTIVITY_MAX_TOTAL,
};
use crate::scenario::{
    Command, CreateActivities, CreateIdentities, CreateServers, GroupRange, ParsedCommand,
    TestQuery, TestQueryActivity,
};
use crate::snapshot;
use crate::supervisor::ServerProcess;

/// Counters reported at the end of a run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunSummary {
    /// Commands executed to completion
    pub commands: usize,
    /// Test queries executed and compared
    pub queries_executed: usize,
    /// Test queries skipped because the target was not initialized
    pub queries_skipped: usize,
    /// Log-scan error lines across all servers
    pub log_errors: usize,
    /// Log-scan warning lines across all servers
    pub log_warnings: usize,
}

/// Executes a parsed scenario against the world model and child processes.
pub struct Orchestrator {
    ctx: SimContext,
    procs: IndexMap<String, ServerProcess>,
    debug: bool,
}

impl Orchestrator {
    /// Build an orchestrator over a fresh context.
    pub fn new(ctx: SimContext) -> Self {
        Self {
            ctx,
            procs: IndexMap::new(),
            debug: false,
        }
    }

    /// Execute all commands in scenario order; abort on the first failure.
    pub async fn run(&mut self, commands: &[ParsedCommand]) -> SimResult<RunSummary> {
        let mut summary = RunSummary::default();
        for parsed in commands {
            info!(line = parsed.line, "executing command");
            if let Err(e) = self.execute(&parsed.command, &mut summary).await {
                error!(line = parsed.line, error = %e, "command failed");
                return Err(e);
            }
            summary.commands += 1;
        }

        for proc in self.procs.values() {
            let scan = proc.scan_logs()?;
            if scan.errors > 0 || scan.warnings > 0 {
                warn!(
                    server = %proc.server().name(),
                    errors = scan.errors,
                    warnings = scan.warnings,
                    "log scan found problems"
                );
            }
            summary.log_errors += scan.errors;
            summary.log_warnings += scan.warnings;
        }
        Ok(summary)
    }

    /// Stop every child and LOC server. Instance directories stay on disk
    /// for inspection.
    pub async fn shutdown(&mut self) {
        for proc in self.procs.values_mut() {
            if let Err(e) = proc.shutdown().await {
                warn!(server = %proc.server().name(), error = %e, "shutdown failed");
            }
        }
    }

    async fn execute(&mut self, command: &Command, summary: &mut RunSummary) -> SimResult<()> {
        match command {
            Command::ProfileServer(create) => {
                self.create_servers(ServerKind::Profile, create).await
            }
            Command::ProximityServer(create) => {
                self.create_servers(ServerKind::Proximity, create).await
            }
            Command::StartServer(range) => self.start_servers(range).await,
            Command::StopServer(range) => self.stop_servers(range).await,
            Command::Neighborhood(ranges) => self.change_neighborhood(ranges, true).await,
            Command::CancelNeighborhood(ranges) => self.change_neighborhood(ranges, false).await,
            Command::Neighbor { source, targets } => {
                self.change_neighbors(source, targets, true).await
            }
            Command::CancelNeighbor { source, targets } => {
                self.change_neighbors(source, targets, false).await
            }
            Command::Identity(create) => self.create_identities(create).await,
            Command::CancelIdentity {
                group,
                index,
                count,
            } => self.cancel_identities(group, *index, *count).await,
            Command::Activity(create) => self.create_activities(create).await,
            Command::DeleteActivity {
                group,
                index,
                count,
            } => self.delete_activities(group, *index, *count).await,
            Command::TestQuery(query) => self.test_query(query, summary).await,
            Command::TestQueryActivity(query) => self.test_query_activity(query, summary).await,
            Command::Delay { seconds } => {
                debug!(seconds, "delay");
                tokio::time::sleep(std::time::Duration::from_secs_f64(*seconds)).await;
                Ok(())
            }
            Command::TakeSnapshot { name } => self.take_snapshot(name).await,
            Command::LoadSnapshot { name } => self.load_snapshot(name).await,
            Command::DebugMode { enabled } => {
                self.debug = *enabled;
                info!(enabled, "debug mode");
                Ok(())
            }
        }
    }

    async fn create_servers(&mut self, kind: ServerKind, create: &CreateServers) -> SimResult<()> {
        let center = GpsLocation::new(create.latitude, create.longitude)?;
        for i in 1..=create.count {
            let name = server_instance_name(&create.group, i);
            let base_port = create.base_port + PORT_BLOCK_SIZE * (i as u16 - 1);
            let location = center.random_in_disc(f64::from(create.radius), &mut self.ctx.rng);
            let server = Server::new(
                name.clone(),
                kind,
                location,
                base_port,
                &self.ctx.paths.instances(),
            );
            self.ctx.world.add_server(Arc::clone(&server))?;
            let loc = LocServer::start(Arc::clone(&server)).await?;
            self.procs
                .insert(name.clone(), ServerProcess::new(server, loc));
            debug!(server = %name, %kind, port = base_port, "server created");
        }
        Ok(())
    }

    fn server_names(range: &GroupRange) -> Vec<String> {
        (range.index..range.index + range.count)
            .map(|i| server_instance_name(&range.group, i))
            .collect()
    }

    async fn start_servers(&mut self, range: &GroupRange) -> SimResult<()> {
        for name in Self::server_names(range) {
            let proc = self
                .procs
                .get_mut(&name)
                .ok_or_else(|| SimError::not_found(format!("server {name}")))?;
            proc.start(&self.ctx.paths).await?;
        }
        Ok(())
    }

    async fn stop_servers(&mut self, range: &GroupRange) -> SimResult<()> {
        for name in Self::server_names(range) {
            let proc = self
                .procs
                .get_mut(&name)
                .ok_or_else(|| SimError::not_found(format!("server {name}")))?;
            proc.stop().await?;
        }
        Ok(())
    }

    async fn change_neighborhood(&mut self, ranges: &[GroupRange], add: bool) -> SimResult<()> {
        // Union of all selected servers, dedup, command order preserved.
        let mut servers: Vec<Arc<Server>> = Vec::new();
        for range in ranges {
            for server in self
                .ctx
                .world
                .servers_in_group(&range.group, range.index, range.count)?
            {
                if !servers.iter().any(|s| s.name() == server.name()) {
                    servers.push(server);
                }
            }
        }
        for server in &servers {
            let others: Vec<Arc<Server>> = servers
                .iter()
                .filter(|s| s.name() != server.name())
                .cloned()
                .collect();
            let loc = self.loc_of(server.name())?;
            if add {
                loc.add_neighborhood(&others).await?;
            } else {
                loc.cancel_neighborhood(&others).await?;
            }
        }
        Ok(())
    }

    async fn change_neighbors(&mut self, source: &str, targets: &[String], add: bool) -> SimResult<()> {
        let resolved: SimResult<Vec<Arc<Server>>> = targets
            .iter()
            .map(|name| self.ctx.world.server(name).map(Arc::clone))
            .collect();
        let resolved = resolved?;
        let loc = self.loc_of(source)?;
        if add {
            loc.add_neighborhood(&resolved).await
        } else {
            loc.cancel_neighborhood(&resolved).await
        }
    }

    fn loc_of(&self, name: &str) -> SimResult<LocServer> {
        self.procs
            .get(name)
            .map(|proc| proc.loc().clone())
            .ok_or_else(|| SimError::not_found(format!("server {name}")))
    }

    async fn create_identities(&mut self, create: &CreateIdentities) -> SimResult<()> {
        let servers = self.ctx.world.servers_in_group(
            &create.servers.group,
            create.servers.index,
            create.servers.count,
        )?;
        for server in &servers {
            if server.kind() != ServerKind::Profile {
                return Err(SimError::invalid(format!(
                    "server {} is not a profile server",
                    server.name()
                )));
            }
        }
        let capacity: usize = servers.iter().map(|s| s.available_slots()).sum();
        if capacity < create.create_count {
            return Err(SimError::invalid(format!(
                "{} identities requested but only {capacity} slots available",
                create.create_count
            )));
        }

        let center = GpsLocation::new(create.latitude, create.longitude)?;
        let existing = self
            .ctx
            .world
            .identities
            .get(&create.group)
            .map(Vec::len)
            .unwrap_or(0);

        for j in 0..create.create_count {
            let index = existing + j;
            let name = identity_member_name(&create.group, index);

            let candidates: Vec<Arc<Server>> = servers
                .iter()
                .filter(|s| s.available_slots() > 0)
                .cloned()
                .collect();
            let host = candidates[self.ctx.rng.gen_range(0..candidates.len())].clone();

            let location = center.random_in_disc(f64::from(create.radius), &mut self.ctx.rng);
            let mut profile = ProfileInfo::new(&name, &create.identity_type, location);
            if self.ctx.rng.gen_range(0..100) < create.profile_image_chance {
                profile.profile_image = Some(
                    self.ctx
                        .images
                        .pick(&create.profile_image_mask, &mut self.ctx.rng)?,
                );
            }
            if self.ctx.rng.gen_range(0..100) < create.thumbnail_chance {
                profile.thumbnail_image = Some(
                    self.ctx
                        .images
                        .pick(&create.thumbnail_mask, &mut self.ctx.rng)?,
                );
            }

            let mut identity =
                Identity::generate(&name, profile, host.name(), &mut self.ctx.rng);
            driver::host_identity(&mut identity, &host, &mut self.ctx.rng).await?;

            host.add_hosted_identity(IdentityHandle::new(&create.group, index))?;
            self.ctx
                .world
                .identities
                .entry(create.group.clone())
                .or_default()
                .push(identity);
        }
        info!(
            group = %create.group,
            count = create.create_count,
            "identities created and hosted"
        );
        Ok(())
    }

    async fn cancel_identities(&mut self, group: &str, index: usize, count: usize) -> SimResult<()> {
        let handles = self.ctx.world.identities_in_range(group, index, count)?;
        for handle in handles {
            let host_name = self.ctx.world.identity(&handle)?.host_server.clone();
            let host = Arc::clone(self.ctx.world.server(&host_name)?);
            let identity = self.ctx.world.identity_mut(&handle)?;
            driver::cancel_identity_hosting(identity, &host, &mut self.ctx.rng).await?;
            host.remove_hosted_identity(&handle)?;
        }
        info!(group, index, count, "identity hosting cancelled");
        Ok(())
    }

    async fn create_activities(&mut self, create: &CreateActivities) -> SimResult<()> {
        let owner_handles = self.ctx.world.identities_in_range(
            &create.owners.group,
            create.owners.index,
            create.owners.count,
        )?;
        let proximity: Vec<Arc<Server>> = self
            .ctx
            .world
            .servers
            .values()
            .filter(|s| s.kind() == ServerKind::Proximity)
            .cloned()
            .collect();
        if proximity.is_empty() {
            return Err(SimError::not_found("no proximity servers exist"));
        }

        let center = GpsLocation::new(create.latitude, create.longitude)?;
        let now = now_timestamp();

        struct Pending {
            info: ActivityInfo,
            signature: Vec<u8>,
            owner: IdentityHandle,
            server: Arc<Server>,
        }

        let mut pending: Vec<Pending> = Vec::with_capacity(create.create_count);
        for _ in 0..create.create_count {
            let owner_handle =
                owner_handles[self.ctx.rng.gen_range(0..owner_handles.len())].clone();
            let location = center.random_in_disc(f64::from(create.radius), &mut self.ctx.rng);
            let precision = self
                .ctx
                .rng
                .gen_range(create.precision_min..=create.precision_max);
            let start_offset = sample_range(&mut self.ctx.rng, create.start_from, create.start_to);
            let lifetime =
                sample_range(&mut self.ctx.rng, create.lifetime_from, create.lifetime_to);
            let start_time = now + start_offset;
            let expiration_time = start_time + lifetime;
            let id = self.ctx.world.allocate_activity_id();

            let owner = self.ctx.world.identity(&owner_handle)?;
            let host_contact = self.ctx.world.server(&owner.host_server)?.contact();
            let info = peernet_core::activity::activity_info(
                id,
                owner.identity_id,
                owner.public_key_bytes(),
                host_contact,
                create.group.clone(),
                location,
                precision,
                start_time,
                expiration_time,
            );
            info.validate()?;
            let signature = crypto::sign_activity(&owner.signing_key, &info);

            // Nearest proximity server by great-circle distance hosts it.
            let server = proximity
                .iter()
                .min_by(|a, b| {
                    let da = info.location.distance_to(&a.location());
                    let db = info.location.distance_to(&b.location());
                    da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
                })
                .cloned()
                .ok_or_else(|| SimError::internal("no proximity server"))?;

            pending.push(Pending {
                info,
                signature,
                owner: owner_handle,
                server,
            });
        }

        // Capacity pre-check over the whole batch.
        let mut needed: IndexMap<String, usize> = IndexMap::new();
        for p in &pending {
            *needed.entry(p.server.name().to_string()).or_insert(0) += 1;
        }
        for (server_name, count) in &needed {
            let available = self.ctx.world.server(server_name)?.available_slots();
            if available < *count {
                return Err(SimError::invalid(format!(
                    "proximity server {server_name} has {available} slots, batch needs {count}"
                )));
            }
        }

        // Positional slots reflect creation order regardless of batching.
        {
            let slots = self
                .ctx
                .world
                .activity_groups
                .entry(create.group.clone())
                .or_default();
            for p in &pending {
                slots.push(Some(p.info.id));
            }
        }

        // Submit grouped by (owner, primary server) as verified batches.
        let mut batches: IndexMap<(IdentityHandle, String), Vec<usize>> = IndexMap::new();
        for (position, p) in pending.iter().enumerate() {
            batches
                .entry((p.owner.clone(), p.server.name().to_string()))
                .or_default()
                .push(position);
        }
        for ((owner_handle, _server_name), positions) in &batches {
            let batch: Vec<(ActivityInfo, Vec<u8>)> = positions
                .iter()
                .map(|&i| (pending[i].info.clone(), pending[i].signature.clone()))
                .collect();
            let server = Arc::clone(&pending[positions[0]].server);
            let owner = self.ctx.world.identity(owner_handle)?;
            driver::create_activities(owner, &server, &batch, &mut self.ctx.rng).await?;
        }

        for p in pending {
            p.server.add_primary_activity(p.info.key())?;
            let id = p.info.id;
            let mut activity =
                peernet_core::Activity::new(p.info, p.signature, p.owner, p.server.name())?;
            activity.hosting_active = true;
            self.ctx.world.activities.insert(id, activity);
        }
        info!(
            group = %create.group,
            count = create.create_count,
            "activities created"
        );
        Ok(())
    }

    async fn delete_activities(&mut self, group: &str, index: usize, count: usize) -> SimResult<()> {
        let ids = self.ctx.world.activities_in_range(group, index, count)?;
        for id in ids {
            let (owner_handle, server_name, key) = {
                let activity = self
                    .ctx
                    .world
                    .activities
                    .get(&id)
                    .ok_or_else(|| SimError::not_found(format!("activity {id}")))?;
                (
                    activity.owner.clone(),
                    activity.primary_server.clone(),
                    activity.key(),
                )
            };
            let server = Arc::clone(self.ctx.world.server(&server_name)?);
            {
                let owner = self.ctx.world.identity(&owner_handle)?;
                driver::delete_activity(owner, &server, id, &mut self.ctx.rng).await?;
            }
            server.remove_primary_activity(&key)?;
            self.ctx.world.activities.shift_remove(&id);
            // The positional slot stays, emptied, so later index arithmetic
            // is unaffected.
            if let Some(slots) = self.ctx.world.activity_groups.get_mut(group) {
                for slot in slots.iter_mut() {
                    if *slot == Some(id) {
                        *slot = None;
                    }
                }
            }
        }
        info!(group, index, count, "activities deleted");
        Ok(())
    }

    async fn test_query(&mut self, query: &TestQuery, summary: &mut RunSummary) -> SimResult<()> {
        let servers = self.ctx.world.servers_in_group(
            &query.servers.group,
            query.servers.index,
            query.servers.count,
        )?;
        for target in servers {
            if target.kind() != ServerKind::Profile {
                return Err(SimError::invalid(format!(
                    "server {} is not a profile server",
                    target.name()
                )));
            }
            if !target.is_initialized() {
                info!(server = %target.name(), "query target not initialized, skipping");
                summary.queries_skipped += 1;
                continue;
            }

            let location = match query.location {
                Some((lat, lon)) => Some((GpsLocation::new(lat, lon)?, query.radius)),
                None => None,
            };
            let max_total = profile_max_total(query.include_images);

            let ephemeral = SigningKey::generate(&mut self.ctx.rng);
            let mut client =
                driver::ProfileClient::connect(target.client_non_customer_port()).await?;
            client
                .start_conversation(
                    ephemeral.verifying_key().as_bytes().to_vec(),
                    &mut self.ctx.rng,
                )
                .await?;
            let outcome = client
                .search(ProfileSearchRequest {
                    include_hosted_only: false,
                    include_images: query.include_images,
                    type_filter: query.type_filter.clone(),
                    name_filter: query.name_filter.clone(),
                    latitude: location
                        .map(|(l, _)| l.latitude_micro())
                        .unwrap_or(NO_LOCATION_MICRO),
                    longitude: location
                        .map(|(l, _)| l.longitude_micro())
                        .unwrap_or(NO_LOCATION_MICRO),
                    radius: query.radius,
                    max_response_record_count: profile_max_response(query.include_images),
                    max_total_record_count: max_total as u32,
                })
                .await?;

            let filter = ProfileQueryFilter {
                name: WildcardFilter::parse(&query.name_filter),
                profile_type: WildcardFilter::parse(&query.type_filter),
                location,
            };
            let neighbors = self.loc_of(target.name())?.neighbors();
            let prediction = predict_profile_search(
                &self.ctx.world,
                &target,
                &neighbors,
                &filter,
                false,
                query.include_images,
            )?;

            if self.debug {
                debug!(
                    server = %target.name(),
                    expected = prediction.profiles.len(),
                    actual = outcome.profiles.len(),
                    expected_covered = ?prediction.covered_servers.iter().map(hex::encode).collect::<Vec<_>>(),
                    actual_covered = ?outcome.covered_servers.iter().map(hex::encode).collect::<Vec<_>>(),
                    "profile query comparison"
                );
            }

            let target_id = target
                .network_id()
                .ok_or_else(|| SimError::internal("initialized server without network id"))?;
            compare_result_sets(&prediction.profiles, &outcome.profiles, max_total)?;
            compare_covered_servers(
                &prediction.covered_servers,
                &outcome.covered_servers,
                max_total,
                prediction.local_count,
                &target_id.to_vec(),
            )?;
            summary.queries_executed += 1;
            info!(server = %target.name(), results = outcome.profiles.len(), "profile query matched");
        }
        Ok(())
    }

    async fn test_query_activity(
        &mut self,
        query: &TestQueryActivity,
        summary: &mut RunSummary,
    ) -> SimResult<()> {
        let servers = self.ctx.world.servers_in_group(
            &query.servers.group,
            query.servers.index,
            query.servers.count,
        )?;
        let now = now_timestamp();
        for target in servers {
            if target.kind() != ServerKind::Proximity {
                return Err(SimError::invalid(format!(
                    "server {} is not a proximity server",
                    target.name()
                )));
            }
            if !target.is_initialized() {
                info!(server = %target.name(), "query target not initialized, skipping");
                summary.queries_skipped += 1;
                continue;
            }

            let location = match query.location {
                Some((lat, lon)) => Some((GpsLocation::new(lat, lon)?, query.radius)),
                None => None,
            };
            let start_not_after = query.start_not_after.map(|offset| now + offset);
            let expiration_not_before = query.expiration_not_before.map(|offset| now + offset);

            let ephemeral = SigningKey::generate(&mut self.ctx.rng);
            let mut client = driver::ProximityClient::connect(target.client_port()).await?;
            client
                .start_conversation(
                    ephemeral.verifying_key().as_bytes().to_vec(),
                    &mut self.ctx.rng,
                )
                .await?;
            let outcome = client
                .search(ActivitySearchRequest {
                    include_primary_only: false,
                    type_filter: query.type_filter.clone(),
                    start_not_after: start_not_after.unwrap_or(ANY_TIME),
                    expiration_not_before: expiration_not_before.unwrap_or(ANY_TIME),
                    latitude: location
                        .map(|(l, _)| l.latitude_micro())
                        .unwrap_or(NO_LOCATION_MICRO),
                    longitude: location
                        .map(|(l, _)| l.longitude_micro())
                        .unwrap_or(NO_LOCATION_MICRO),
                    radius: query.radius,
                    max_response_record_count: ACTIVITY_MAX_RESPONSE,
                    max_total_record_count: ACTIVITY_MAX_TOTAL as u32,
                })
                .await?;

            let filter = ActivityQueryFilter {
                activity_type: WildcardFilter::parse(&query.type_filter),
                start_not_after,
                expiration_not_before,
                location,
            };
            let neighbors = self.loc_of(target.name())?.neighbors();
            let prediction =
                predict_activity_search(&self.ctx.world, &target, &neighbors, &filter, false)?;

            if self.debug {
                debug!(
                    server = %target.name(),
                    expected = prediction.activities.len(),
                    actual = outcome.activities.len(),
                    "activity query comparison"
                );
            }

            let target_id = target
                .network_id()
                .ok_or_else(|| SimError::internal("initialized server without network id"))?;
            compare_result_sets(&prediction.activities, &outcome.activities, ACTIVITY_MAX_TOTAL)?;
            compare_covered_servers(
                &prediction.covered_servers,
                &outcome.covered_servers,
                ACTIVITY_MAX_TOTAL,
                prediction.local_count,
                &target_id.to_vec(),
            )?;
            summary.queries_executed += 1;
            info!(server = %target.name(), results = outcome.activities.len(), "activity query matched");
        }
        Ok(())
    }

    async fn take_snapshot(&mut self, name: &str) -> SimResult<()> {
        let running: Vec<String> = self
            .procs
            .values()
            .filter(|p| p.server().is_running())
            .map(|p| p.server().name().to_string())
            .collect();
        for proc in self.procs.values_mut() {
            proc.stop().await?;
        }
        snapshot::save(&self.ctx, &self.procs, &running, name)?;
        info!(snapshot = name, "snapshot taken; servers remain stopped");
        Ok(())
    }

    async fn load_snapshot(&mut self, name: &str) -> SimResult<()> {
        if !self.procs.is_empty() {
            return Err(SimError::invalid(
                "LoadSnapshot requires a fresh simulation",
            ));
        }
        let (procs, running) = snapshot::load(&mut self.ctx, name).await?;
        self.procs = procs;
        for server_name in running {
            let proc = self
                .procs
                .get_mut(&server_name)
                .ok_or_else(|| SimError::internal(format!("no process for {server_name}")))?;
            proc.start(&self.ctx.paths).await?;
        }
        info!(snapshot = name, "snapshot loaded");
        Ok(())
    }
}

/// Uniform draw from `[from, to)`, degenerating to `from` when empty.
fn sample_range(rng: &mut rand_chacha::ChaCha12Rng, from: i64, to: i64) -> i64 {
    if from >= to {
        from
    } else {
        rng.gen_range(from..to)
    }
}
