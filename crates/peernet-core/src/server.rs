//! Managed server records
//!
//! A `Server` is the simulator's view of one child server process: its
//! location, its 20-port block, its on-disk instance directory, and the
//! lockable initialization section the LOC server and the supervisor
//! coordinate through. Kind-specific state (hosted identities vs primary
//! activities) lives in a variant payload.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexSet;
use parking_lot::{Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};

use crate::activity::{ActivityKey, ServerContact};
use crate::errors::{SimError, SimResult};
use crate::geo::GpsLocation;
use crate::ids::NetworkId;
use crate::world::IdentityHandle;

/// Number of ports each server reserves, starting at its base port.
pub const PORT_BLOCK_SIZE: u16 = 20;

/// Identity capacity of a profile server.
pub const MAX_IDENTITIES: usize = 20_000;

/// Activity capacity of a proximity server.
pub const MAX_ACTIVITIES: usize = 50_000;

/// All servers bind loopback; the simulator runs on a single host.
pub const SERVER_IP: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// The two kinds of managed servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerKind {
    /// Hosts user identities and their profiles
    Profile,
    /// Hosts time-bounded geolocated activities
    Proximity,
}

impl ServerKind {
    /// Instance-directory prefix, `instances/<prefix>-<name>/`.
    pub fn instance_prefix(&self) -> &'static str {
        match self {
            Self::Profile => "Ps",
            Self::Proximity => "Px",
        }
    }

    /// Name of the binary template directory under `bin/`.
    pub fn template_dir(&self) -> &'static str {
        match self {
            Self::Profile => "ProfileServer",
            Self::Proximity => "ProximityServer",
        }
    }

    /// Name of the generated configuration file.
    pub fn config_file(&self) -> &'static str {
        match self {
            Self::Profile => "ProfileServer.conf",
            Self::Proximity => "ProximityServer.conf",
        }
    }

    /// Stdout line marking the child as ready for traffic.
    pub fn readiness_marker(&self) -> &'static str {
        match self {
            Self::Profile => "ENTER",
            Self::Proximity => "Location initialization completed",
        }
    }
}

impl std::fmt::Display for ServerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Profile => write!(f, "profile"),
            Self::Proximity => write!(f, "proximity"),
        }
    }
}

/// Sender installed by a LOC server waiting for this server to initialize.
pub type InitWaiterTx = mpsc::UnboundedSender<Arc<Server>>;

/// The mutex-guarded section of a server record.
///
/// The LOC server performs "check-if-initialized and subscribe" atomically
/// under this lock; the guard is never held across an await point.
#[derive(Debug, Default)]
pub struct ServerShared {
    /// Network id assigned by the child's RegisterService; stable once set
    pub network_id: Option<NetworkId>,
    /// Whether the child has completed LOC registration
    pub initialized: bool,
    /// Whether the child process is currently running
    pub running: bool,
    init_waiters: Vec<(String, InitWaiterTx)>,
}

impl ServerShared {
    /// Install a deferred-initialization waiter unless the subscriber
    /// already has one. Returns whether a waiter was installed.
    pub fn subscribe_init(&mut self, subscriber: &str, tx: InitWaiterTx) -> bool {
        if self.init_waiters.iter().any(|(name, _)| name == subscriber) {
            return false;
        }
        self.init_waiters.push((subscriber.to_string(), tx));
        true
    }

    /// Remove a pending waiter installed by `subscriber`, if any.
    pub fn unsubscribe_init(&mut self, subscriber: &str) {
        self.init_waiters.retain(|(name, _)| name != subscriber);
    }

    fn take_init_waiters(&mut self) -> Vec<(String, InitWaiterTx)> {
        std::mem::take(&mut self.init_waiters)
    }
}

/// Kind-specific server state.
#[derive(Debug)]
pub enum ServerPayload {
    /// Profile server: identity slots and hosted identities
    Profile {
        /// Remaining identity capacity
        available_slots: usize,
        /// Handles of the identities hosted here
        identities: Vec<IdentityHandle>,
    },
    /// Proximity server: activity slots and primary activities
    Proximity {
        /// Remaining activity capacity
        available_slots: usize,
        /// Composite keys of the activities whose primary server this is
        activities: IndexSet<ActivityKey>,
    },
}

/// One managed server.
#[derive(Debug)]
pub struct Server {
    name: String,
    kind: ServerKind,
    location: GpsLocation,
    base_port: u16,
    instance_dir: PathBuf,
    shared: Mutex<ServerShared>,
    payload: Mutex<ServerPayload>,
    init_tx: watch::Sender<bool>,
    location_ready_tx: watch::Sender<bool>,
}

impl Server {
    /// Create a server record. The child process is not started here.
    pub fn new(
        name: impl Into<String>,
        kind: ServerKind,
        location: GpsLocation,
        base_port: u16,
        instances_root: &Path,
    ) -> Arc<Self> {
        let name = name.into();
        let instance_dir = instances_root.join(format!("{}-{}", kind.instance_prefix(), name));
        let payload = match kind {
            ServerKind::Profile => ServerPayload::Profile {
                available_slots: MAX_IDENTITIES,
                identities: Vec::new(),
            },
            ServerKind::Proximity => ServerPayload::Proximity {
                available_slots: MAX_ACTIVITIES,
                activities: IndexSet::new(),
            },
        };
        Arc::new(Self {
            name,
            kind,
            location: location.quantized(),
            base_port,
            instance_dir,
            shared: Mutex::new(ServerShared::default()),
            payload: Mutex::new(payload),
            init_tx: watch::channel(false).0,
            location_ready_tx: watch::channel(false).0,
        })
    }

    /// Unique server name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Server kind.
    pub fn kind(&self) -> ServerKind {
        self.kind
    }

    /// GPS location, micro-degree quantized.
    pub fn location(&self) -> GpsLocation {
        self.location
    }

    /// First port of the server's 20-port block; the LOC port.
    pub fn base_port(&self) -> u16 {
        self.base_port
    }

    /// Port of the simulated LOC server.
    pub fn loc_port(&self) -> u16 {
        self.base_port
    }

    /// Primary interface port.
    pub fn primary_port(&self) -> u16 {
        self.base_port + 1
    }

    /// Server-to-server neighbor interface port.
    pub fn neighbor_port(&self) -> u16 {
        self.base_port + 2
    }

    /// Profile non-customer client port (hosting registration).
    pub fn client_non_customer_port(&self) -> u16 {
        self.base_port + 3
    }

    /// Profile customer client port (check-in, profile updates, searches).
    pub fn client_customer_port(&self) -> u16 {
        self.base_port + 4
    }

    /// Profile application-service port.
    pub fn client_app_service_port(&self) -> u16 {
        self.base_port + 5
    }

    /// Proximity client port (activities and searches).
    pub fn client_port(&self) -> u16 {
        self.base_port + 3
    }

    /// Content-addressable-network API port.
    pub fn can_api_port(&self) -> u16 {
        self.base_port + 6
    }

    /// The reserved port block, for overlap checks.
    pub fn port_block(&self) -> std::ops::Range<u32> {
        let base = u32::from(self.base_port);
        base..base + u32::from(PORT_BLOCK_SIZE)
    }

    /// Contact information advertised to neighbors.
    pub fn contact(&self) -> ServerContact {
        ServerContact {
            ip: SERVER_IP,
            primary_port: self.primary_port(),
        }
    }

    /// On-disk instance directory.
    pub fn instance_dir(&self) -> &Path {
        &self.instance_dir
    }

    /// Lock the shared section.
    pub fn shared(&self) -> MutexGuard<'_, ServerShared> {
        self.shared.lock()
    }

    /// Lock the kind-specific payload.
    pub fn payload(&self) -> MutexGuard<'_, ServerPayload> {
        self.payload.lock()
    }

    /// Whether the child has completed LOC registration.
    pub fn is_initialized(&self) -> bool {
        self.shared.lock().initialized
    }

    /// The assigned network id, if any.
    pub fn network_id(&self) -> Option<NetworkId> {
        self.shared.lock().network_id
    }

    /// Whether the child process is running.
    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    /// Record that the child process started or stopped.
    pub fn set_running(&self, running: bool) {
        self.shared.lock().running = running;
    }

    /// Assign the network id reported by the child's RegisterService and
    /// mark the server initialized.
    ///
    /// The id is stable: re-registration with the same id is accepted, a
    /// different id is an error. Deferred-initialization waiters are drained
    /// exactly once, in insertion order.
    pub fn set_network_id(self: &Arc<Self>, id: NetworkId) -> SimResult<()> {
        let waiters = {
            let mut shared = self.shared.lock();
            if let Some(existing) = shared.network_id {
                if existing != id {
                    return Err(SimError::internal(format!(
                        "server {}: network id changed from {existing} to {id}",
                        self.name
                    )));
                }
            }
            shared.network_id = Some(id);
            shared.initialized = true;
            shared.take_init_waiters()
        };
        self.init_tx.send_replace(true);
        for (subscriber, tx) in waiters {
            if tx.send(Arc::clone(self)).is_err() {
                tracing::debug!(
                    server = %self.name,
                    subscriber = %subscriber,
                    "init waiter dropped before notification"
                );
            }
        }
        Ok(())
    }

    /// Mark the server uninitialized (DeregisterService or child stop).
    /// The network id is retained; it is stable for the server's lifetime.
    pub fn uninitialize(&self) {
        self.shared.lock().initialized = false;
        self.init_tx.send_replace(false);
    }

    /// Watch for initialization transitions.
    pub fn init_watch(&self) -> watch::Receiver<bool> {
        self.init_tx.subscribe()
    }

    /// Record that a proximity child printed its location-readiness marker.
    pub fn mark_location_ready(&self) {
        self.location_ready_tx.send_replace(true);
    }

    /// Reset the location-readiness latch (child stopped).
    pub fn clear_location_ready(&self) {
        self.location_ready_tx.send_replace(false);
    }

    /// Watch for the location-readiness marker.
    pub fn location_ready_watch(&self) -> watch::Receiver<bool> {
        self.location_ready_tx.subscribe()
    }

    /// Remaining capacity of the server, identities or activities.
    pub fn available_slots(&self) -> usize {
        match &*self.payload.lock() {
            ServerPayload::Profile {
                available_slots, ..
            }
            | ServerPayload::Proximity {
                available_slots, ..
            } => *available_slots,
        }
    }

    /// Record a hosted identity, consuming one slot.
    pub fn add_hosted_identity(&self, handle: IdentityHandle) -> SimResult<()> {
        match &mut *self.payload.lock() {
            ServerPayload::Profile {
                available_slots,
                identities,
            } => {
                if *available_slots == 0 {
                    return Err(SimError::invalid(format!(
                        "profile server {} is full",
                        self.name
                    )));
                }
                *available_slots -= 1;
                identities.push(handle);
                Ok(())
            }
            ServerPayload::Proximity { .. } => Err(SimError::internal(format!(
                "server {} is not a profile server",
                self.name
            ))),
        }
    }

    /// Remove a hosted identity (hosting cancelled), releasing its slot.
    pub fn remove_hosted_identity(&self, handle: &IdentityHandle) -> SimResult<()> {
        match &mut *self.payload.lock() {
            ServerPayload::Profile {
                available_slots,
                identities,
            } => {
                let position = identities.iter().position(|h| h == handle).ok_or_else(|| {
                    SimError::not_found(format!("identity {handle} not hosted on {}", self.name))
                })?;
                identities.remove(position);
                *available_slots += 1;
                Ok(())
            }
            ServerPayload::Proximity { .. } => Err(SimError::internal(format!(
                "server {} is not a profile server",
                self.name
            ))),
        }
    }

    /// Handles of the identities hosted on this profile server.
    pub fn hosted_identities(&self) -> SimResult<Vec<IdentityHandle>> {
        match &*self.payload.lock() {
            ServerPayload::Profile { identities, .. } => Ok(identities.clone()),
            ServerPayload::Proximity { .. } => Err(SimError::internal(format!(
                "server {} is not a profile server",
                self.name
            ))),
        }
    }

    /// Record a primary activity, consuming one slot.
    pub fn add_primary_activity(&self, key: ActivityKey) -> SimResult<()> {
        match &mut *self.payload.lock() {
            ServerPayload::Proximity {
                available_slots,
                activities,
            } => {
                if *available_slots == 0 {
                    return Err(SimError::invalid(format!(
                        "proximity server {} is full",
                        self.name
                    )));
                }
                *available_slots -= 1;
                activities.insert(key);
                Ok(())
            }
            ServerPayload::Profile { .. } => Err(SimError::internal(format!(
                "server {} is not a proximity server",
                self.name
            ))),
        }
    }

    /// Remove a primary activity, releasing its slot.
    pub fn remove_primary_activity(&self, key: &ActivityKey) -> SimResult<()> {
        match &mut *self.payload.lock() {
            ServerPayload::Proximity {
                available_slots,
                activities,
            } => {
                if activities.shift_remove(key) {
                    *available_slots += 1;
                    Ok(())
                } else {
                    Err(SimError::not_found(format!(
                        "activity {}:{} not hosted on {}",
                        key.activity_type, key.id, self.name
                    )))
                }
            }
            ServerPayload::Profile { .. } => Err(SimError::internal(format!(
                "server {} is not a proximity server",
                self.name
            ))),
        }
    }

    /// Composite keys of the activities whose primary server this is.
    pub fn primary_activities(&self) -> SimResult<Vec<ActivityKey>> {
        match &*self.payload.lock() {
            ServerPayload::Proximity { activities, .. } => {
                Ok(activities.iter().cloned().collect())
            }
            ServerPayload::Profile { .. } => Err(SimError::internal(format!(
                "server {} is not a proximity server",
                self.name
            ))),
        }
    }
}
