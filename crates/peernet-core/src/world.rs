//! The world model: ground truth for the whole simulation
//!
//! Tables of servers, identity groups, and activity groups, keyed by stable
//! names and dense positional indices. Only the orchestrator mutates these;
//! LOC servers read the per-server lockable sections through their `Arc`
//! handles.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::activity::Activity;
use crate::errors::{SimError, SimResult};
use crate::identity::Identity;
use crate::server::Server;

/// Stable handle of an identity: group name plus zero-based member index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityHandle {
    /// Identity group name
    pub group: String,
    /// Zero-based index within the group
    pub index: usize,
}

impl IdentityHandle {
    /// Build a handle.
    pub fn new(group: impl Into<String>, index: usize) -> Self {
        Self {
            group: group.into(),
            index,
        }
    }
}

impl std::fmt::Display for IdentityHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", identity_member_name(&self.group, self.index))
    }
}

/// Synthesized server instance name: group plus 1-based zero-padded(3) index.
pub fn server_instance_name(group: &str, index_1based: usize) -> String {
    format!("{group}{index_1based:03}")
}

/// Synthesized identity member name: group plus 1-based zero-padded(5) index.
pub fn identity_member_name(group: &str, index_0based: usize) -> String {
    format!("{}{:05}", group, index_0based + 1)
}

/// All simulation state the orchestrator reasons about.
#[derive(Debug, Default)]
pub struct WorldModel {
    /// Managed servers by name, in creation order
    pub servers: IndexMap<String, Arc<Server>>,
    /// Identity groups by group name; member order is creation order
    pub identities: IndexMap<String, Vec<Identity>>,
    /// Activity groups by group name. A deleted activity leaves a `None`
    /// slot so positional index arithmetic stays stable.
    pub activity_groups: IndexMap<String, Vec<Option<u32>>>,
    /// All live activities by simulation-unique id
    pub activities: IndexMap<u32, Activity>,
    next_activity_id: u32,
}

impl WorldModel {
    /// Empty world.
    pub fn new() -> Self {
        Self {
            next_activity_id: 1,
            ..Self::default()
        }
    }

    /// Register a server; names must be unique and port blocks disjoint.
    pub fn add_server(&mut self, server: Arc<Server>) -> SimResult<()> {
        if self.servers.contains_key(server.name()) {
            return Err(SimError::invalid(format!(
                "duplicate server name {}",
                server.name()
            )));
        }
        let block = server.port_block();
        for existing in self.servers.values() {
            let other = existing.port_block();
            if block.start < other.end && other.start < block.end {
                return Err(SimError::invalid(format!(
                    "port block {}..{} of {} overlaps {}..{} of {}",
                    block.start,
                    block.end,
                    server.name(),
                    other.start,
                    other.end,
                    existing.name()
                )));
            }
        }
        self.servers.insert(server.name().to_string(), server);
        Ok(())
    }

    /// Look up a server by exact name.
    pub fn server(&self, name: &str) -> SimResult<&Arc<Server>> {
        self.servers
            .get(name)
            .ok_or_else(|| SimError::not_found(format!("server {name}")))
    }

    /// Resolve `count` servers `group<index>..` with 1-based `index`.
    pub fn servers_in_group(
        &self,
        group: &str,
        index: usize,
        count: usize,
    ) -> SimResult<Vec<Arc<Server>>> {
        let mut servers = Vec::with_capacity(count);
        for i in index..index + count {
            let name = server_instance_name(group, i);
            servers.push(Arc::clone(self.server(&name)?));
        }
        Ok(servers)
    }

    /// Look up an identity by handle.
    pub fn identity(&self, handle: &IdentityHandle) -> SimResult<&Identity> {
        self.identities
            .get(&handle.group)
            .and_then(|group| group.get(handle.index))
            .ok_or_else(|| SimError::not_found(format!("identity {handle}")))
    }

    /// Look up an identity mutably by handle.
    pub fn identity_mut(&mut self, handle: &IdentityHandle) -> SimResult<&mut Identity> {
        self.identities
            .get_mut(&handle.group)
            .and_then(|group| group.get_mut(handle.index))
            .ok_or_else(|| SimError::not_found(format!("identity {}{}", handle.group, handle.index)))
    }

    /// Resolve `count` identity handles starting at 1-based `index` within a
    /// group. Every selected member must exist.
    pub fn identities_in_range(
        &self,
        group: &str,
        index: usize,
        count: usize,
    ) -> SimResult<Vec<IdentityHandle>> {
        let members = self
            .identities
            .get(group)
            .ok_or_else(|| SimError::not_found(format!("identity group {group}")))?;
        if index == 0 || index + count - 1 > members.len() {
            return Err(SimError::not_found(format!(
                "identity range {index}..{} in group {group} of {} members",
                index + count - 1,
                members.len()
            )));
        }
        Ok((index - 1..index - 1 + count)
            .map(|i| IdentityHandle::new(group, i))
            .collect())
    }

    /// Allocate the next simulation-unique activity id.
    pub fn allocate_activity_id(&mut self) -> u32 {
        let id = self.next_activity_id;
        self.next_activity_id += 1;
        id
    }

    /// Bump the id allocator past `id` (snapshot restore).
    pub fn reserve_activity_id(&mut self, id: u32) {
        if id >= self.next_activity_id {
            self.next_activity_id = id + 1;
        }
    }

    /// Resolve `count` live activity ids starting at 1-based `index` within
    /// a positional activity group. Deleted (`None`) slots are an error.
    pub fn activities_in_range(
        &self,
        group: &str,
        index: usize,
        count: usize,
    ) -> SimResult<Vec<u32>> {
        let slots = self
            .activity_groups
            .get(group)
            .ok_or_else(|| SimError::not_found(format!("activity group {group}")))?;
        if index == 0 || index + count - 1 > slots.len() {
            return Err(SimError::not_found(format!(
                "activity range {index}..{} in group {group} of {} slots",
                index + count - 1,
                slots.len()
            )));
        }
        slots[index - 1..index - 1 + count]
            .iter()
            .enumerate()
            .map(|(offset, slot)| {
                slot.ok_or_else(|| {
                    SimError::not_found(format!(
                        "activity {group}[{}] was deleted",
                        index + offset
                    ))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GpsLocation;
    use crate::server::ServerKind;
    use std::path::Path;

    fn add_server(world: &mut WorldModel, name: &str, base_port: u16) -> SimResult<()> {
        world.add_server(Server::new(
            name,
            ServerKind::Profile,
            GpsLocation::new(0.0, 0.0).unwrap(),
            base_port,
            Path::new("instances"),
        ))
    }

    #[test]
    fn rejects_duplicate_names_and_overlapping_ports() {
        let mut world = WorldModel::new();
        add_server(&mut world, "A001", 10_000).unwrap();
        assert!(add_server(&mut world, "A001", 11_000).is_err());
        // 10_019 is inside A001's block.
        assert!(add_server(&mut world, "B001", 10_019).is_err());
        add_server(&mut world, "B001", 10_020).unwrap();
    }

    #[test]
    fn group_resolution_uses_padded_names() {
        let mut world = WorldModel::new();
        add_server(&mut world, "A001", 10_000).unwrap();
        add_server(&mut world, "A002", 10_020).unwrap();
        let servers = world.servers_in_group("A", 1, 2).unwrap();
        assert_eq!(servers[0].name(), "A001");
        assert_eq!(servers[1].name(), "A002");
        assert!(world.servers_in_group("A", 2, 2).is_err());
    }

    #[test]
    fn activity_ranges_respect_deleted_slots() {
        let mut world = WorldModel::new();
        world
            .activity_groups
            .insert("G".to_string(), vec![Some(1), None, Some(3)]);
        assert_eq!(world.activities_in_range("G", 3, 1).unwrap(), vec![3]);
        assert!(world.activities_in_range("G", 1, 2).is_err());
        assert!(world.activities_in_range("G", 1, 4).is_err());
        assert!(world.activities_in_range("G", 0, 1).is_err());
    }

    #[test]
    fn member_names_are_zero_padded() {
        assert_eq!(server_instance_name("A", 1), "A001");
        assert_eq!(server_instance_name("A", 999), "A999");
        assert_eq!(identity_member_name("Ia", 0), "Ia00001");
        assert_eq!(identity_member_name("Ia", 109), "Ia00110");
    }
}
