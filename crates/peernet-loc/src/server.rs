//! The simulated LOC server
//!
//! Every managed server owns one of these. It listens on the owner's LOC
//! port, accepts its owner's child process (one connection at a time),
//! serves registration and neighborhood requests, and pushes neighborhood
//! changes to a keep-alive client. The outbound stream is guarded by an
//! async mutex so a reply and a change notification can never interleave.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use peernet_core::{NetworkId, Server, ServerKind, SimError, SimResult, SERVER_IP};
use peernet_proto::framing::{decode, read_frame, write_frame, MAX_LOC_BODY};
use peernet_proto::loc::{
    loc_message, loc_request, loc_response, neighbourhood_change, DeregisterServiceResponse,
    GetNeighbourNodesResponse, LocMessage, LocStatus, NeighbourhoodChange,
    NeighbourhoodChangedNotification, NodeInfo, RegisterServiceRequest, ServiceType,
};

/// How long shutdown waits for the accept task to unwind.
const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// The currently connected child's outbound stream.
#[derive(Default)]
struct ClientSlot {
    stream: Option<OwnedWriteHalf>,
    wants_updates: bool,
}

struct LocState {
    owner: Arc<Server>,
    neighbors: Mutex<IndexMap<String, Arc<Server>>>,
    client: AsyncMutex<ClientSlot>,
    shutdown_tx: watch::Sender<bool>,
    deferred_tx: mpsc::UnboundedSender<Arc<Server>>,
    next_id: AtomicU32,
}

/// Handle to one running LOC server.
#[derive(Clone)]
pub struct LocServer {
    state: Arc<LocState>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl LocServer {
    /// Bind the owner's LOC port and start serving.
    pub async fn start(owner: Arc<Server>) -> SimResult<Self> {
        let listener = TcpListener::bind((SERVER_IP, owner.loc_port()))
            .await
            .map_err(|e| {
                SimError::io(format!(
                    "LOC bind failed for {} on port {}: {e}",
                    owner.name(),
                    owner.loc_port()
                ))
            })?;

        let (shutdown_tx, _) = watch::channel(false);
        let (deferred_tx, deferred_rx) = mpsc::unbounded_channel();
        let state = Arc::new(LocState {
            owner,
            neighbors: Mutex::new(IndexMap::new()),
            client: AsyncMutex::new(ClientSlot::default()),
            shutdown_tx,
            deferred_tx,
            next_id: AtomicU32::new(1),
        });

        let server = Self {
            state,
            tasks: Arc::new(Mutex::new(Vec::new())),
        };

        let accept = tokio::spawn(server.clone().accept_loop(listener));
        let deferred = tokio::spawn(server.clone().deferred_loop(deferred_rx));
        server.tasks.lock().extend([accept, deferred]);

        info!(
            server = %server.state.owner.name(),
            port = server.state.owner.loc_port(),
            "LOC server listening"
        );
        Ok(server)
    }

    /// The owning managed server.
    pub fn owner(&self) -> &Arc<Server> {
        &self.state.owner
    }

    /// Names of the current neighbors, in insertion order.
    pub fn neighbor_names(&self) -> Vec<String> {
        self.state.neighbors.lock().keys().cloned().collect()
    }

    /// The current neighbors, in insertion order.
    pub fn neighbors(&self) -> Vec<Arc<Server>> {
        self.state.neighbors.lock().values().cloned().collect()
    }

    /// Add candidate peers to the neighborhood.
    ///
    /// Initialized peers are inserted and announced to a keep-alive client;
    /// uninitialized peers get a deferred hook that re-invokes this method
    /// once they initialize, so each subscriber learns of the peer exactly
    /// once. Self and existing neighbors are skipped.
    pub async fn add_neighborhood(&self, peers: &[Arc<Server>]) -> SimResult<()> {
        let mut changes = Vec::new();
        for peer in peers {
            if peer.name() == self.state.owner.name() {
                continue;
            }
            let mut neighbors = self.state.neighbors.lock();
            if neighbors.contains_key(peer.name()) {
                continue;
            }
            // Atomic check-if-initialized and subscribe, under the peer's lock.
            let mut shared = peer.shared();
            if shared.initialized {
                let Some(id) = shared.network_id else {
                    return Err(SimError::internal(format!(
                        "initialized server {} has no network id",
                        peer.name()
                    )));
                };
                neighbors.insert(peer.name().to_string(), Arc::clone(peer));
                changes.push(NeighbourhoodChange {
                    change: Some(neighbourhood_change::Change::AddedNodeInfo(
                        NodeInfo::for_server(peer, id),
                    )),
                });
            } else if shared.subscribe_init(self.state.owner.name(), self.state.deferred_tx.clone())
            {
                debug!(
                    server = %self.state.owner.name(),
                    peer = %peer.name(),
                    "peer not initialized yet, deferred neighborhood hook installed"
                );
            }
        }
        self.deliver_changes(changes).await;
        Ok(())
    }

    /// Remove peers from the neighborhood; uninstall pending deferred hooks.
    pub async fn cancel_neighborhood(&self, peers: &[Arc<Server>]) -> SimResult<()> {
        let mut changes = Vec::new();
        for peer in peers {
            if peer.name() == self.state.owner.name() {
                continue;
            }
            let removed = self.state.neighbors.lock().shift_remove(peer.name());
            match removed {
                Some(removed_peer) => {
                    if let Some(id) = removed_peer.network_id() {
                        changes.push(NeighbourhoodChange {
                            change: Some(neighbourhood_change::Change::RemovedNodeId(id.to_vec())),
                        });
                    }
                }
                None => peer.shared().unsubscribe_init(self.state.owner.name()),
            }
        }
        self.deliver_changes(changes).await;
        Ok(())
    }

    /// Replace the neighborhood atomically without emitting notifications.
    /// Used only during snapshot restore.
    pub fn set_neighborhood(&self, peers: &[Arc<Server>]) {
        let mut neighbors = self.state.neighbors.lock();
        neighbors.clear();
        for peer in peers {
            if peer.name() != self.state.owner.name() {
                neighbors.insert(peer.name().to_string(), Arc::clone(peer));
            }
        }
    }

    /// Signal shutdown and wait for the background tasks to unwind.
    pub async fn shutdown(&self) {
        let _ = self.state.shutdown_tx.send(true);
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, task).await.is_err() {
                warn!(
                    server = %self.state.owner.name(),
                    "LOC task did not unwind within {SHUTDOWN_JOIN_TIMEOUT:?}"
                );
            }
        }
    }

    async fn accept_loop(self, listener: TcpListener) {
        let mut shutdown = self.state.shutdown_tx.subscribe();
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = shutdown.changed() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!(
                            server = %self.state.owner.name(),
                            peer = %addr,
                            "LOC client connected"
                        );
                        // One client at a time: the connection is served on
                        // the accept loop itself.
                        self.serve_connection(stream, &mut shutdown).await;
                    }
                    Err(e) => {
                        warn!(
                            server = %self.state.owner.name(),
                            error = %e,
                            "LOC accept failed"
                        );
                    }
                }
            }
        }
        debug!(server = %self.state.owner.name(), "LOC accept loop exited");
    }

    async fn deferred_loop(self, mut rx: mpsc::UnboundedReceiver<Arc<Server>>) {
        let mut shutdown = self.state.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                peer = rx.recv() => match peer {
                    Some(peer) => {
                        debug!(
                            server = %self.state.owner.name(),
                            peer = %peer.name(),
                            "deferred peer initialized"
                        );
                        if let Err(e) = self.add_neighborhood(&[peer]).await {
                            warn!(
                                server = %self.state.owner.name(),
                                error = %e,
                                "deferred neighborhood add failed"
                            );
                        }
                    }
                    None => break,
                }
            }
        }
    }

    async fn serve_connection(
        &self,
        stream: TcpStream,
        shutdown: &mut watch::Receiver<bool>,
    ) {
        let (mut reader, writer) = stream.into_split();
        {
            let mut client = self.state.client.lock().await;
            client.stream = Some(writer);
            client.wants_updates = false;
        }

        loop {
            let frame = tokio::select! {
                _ = shutdown.changed() => break,
                frame = read_frame(&mut reader, MAX_LOC_BODY) => frame,
            };
            match frame {
                Ok(Some(body)) => {
                    if !self.handle_frame(&body).await {
                        break;
                    }
                }
                Ok(None) => {
                    debug!(server = %self.state.owner.name(), "LOC client disconnected");
                    break;
                }
                Err(SimError::Protocol { message }) => {
                    debug!(
                        server = %self.state.owner.name(),
                        reason = %message,
                        "LOC protocol violation"
                    );
                    self.send_violation().await;
                    break;
                }
                Err(e) => {
                    warn!(server = %self.state.owner.name(), error = %e, "LOC read failed");
                    break;
                }
            }
        }

        let mut client = self.state.client.lock().await;
        client.stream = None;
        client.wants_updates = false;
    }

    /// Dispatch one decoded frame. Returns false when the connection must
    /// close (protocol violation).
    async fn handle_frame(&self, body: &[u8]) -> bool {
        let message: LocMessage = match decode(body) {
            Ok(message) => message,
            Err(_) => {
                self.send_violation().await;
                return false;
            }
        };

        match message.body {
            Some(loc_message::Body::Request(request)) => match request.payload {
                Some(loc_request::Payload::RegisterService(register)) => {
                    self.handle_register(message.id, register).await
                }
                Some(loc_request::Payload::DeregisterService(_)) => {
                    self.state.owner.uninitialize();
                    info!(server = %self.state.owner.name(), "service deregistered");
                    self.send_message(&LocMessage::response(
                        message.id,
                        LocStatus::Ok,
                        Some(loc_response::Payload::DeregisterService(
                            DeregisterServiceResponse::default(),
                        )),
                    ))
                    .await;
                    true
                }
                Some(loc_request::Payload::GetNeighbourNodes(get)) => {
                    self.handle_get_neighbour_nodes(message.id, get.keep_alive).await;
                    true
                }
                // Change notifications only ever flow server-to-client.
                Some(loc_request::Payload::NeighbourhoodChanged(_)) | None => {
                    self.send_violation().await;
                    false
                }
            },
            // The client acknowledging a change notification.
            Some(loc_message::Body::Response(response)) => {
                debug!(
                    server = %self.state.owner.name(),
                    id = message.id,
                    status = response.status,
                    "notification acknowledged"
                );
                true
            }
            None => {
                self.send_violation().await;
                false
            }
        }
    }

    async fn handle_register(&self, id: u32, register: RegisterServiceRequest) -> bool {
        let Some(service) = register.service else {
            self.send_violation().await;
            return false;
        };
        let expected = ServiceType::from(self.state.owner.kind()) as i32;
        if service.service_type != expected {
            warn!(
                server = %self.state.owner.name(),
                got = service.service_type,
                "RegisterService with mismatched service type"
            );
            self.send_message(&LocMessage::response(id, LocStatus::ErrorInvalidValue, None))
                .await;
            return true;
        }
        let network_id = match NetworkId::from_slice(&service.service_data) {
            Ok(network_id) => network_id,
            Err(_) => {
                warn!(
                    server = %self.state.owner.name(),
                    len = service.service_data.len(),
                    "RegisterService with malformed network id"
                );
                self.send_message(&LocMessage::response(id, LocStatus::ErrorInvalidValue, None))
                    .await;
                return true;
            }
        };

        match self.state.owner.kind() {
            ServerKind::Profile => {
                if let Err(e) = self.state.owner.set_network_id(network_id) {
                    warn!(server = %self.state.owner.name(), error = %e, "registration rejected");
                    self.send_message(&LocMessage::response(id, LocStatus::ErrorInternal, None))
                        .await;
                    return true;
                }
            }
            ServerKind::Proximity => {
                // The network id is armed only once the child reports its
                // location initialization; deferred subscribers installed in
                // the meantime fire exactly once when it lands.
                let owner = Arc::clone(&self.state.owner);
                let mut shutdown = self.state.shutdown_tx.subscribe();
                tokio::spawn(async move {
                    let mut ready = owner.location_ready_watch();
                    loop {
                        if *ready.borrow() {
                            if let Err(e) = owner.set_network_id(network_id) {
                                warn!(server = %owner.name(), error = %e, "deferred registration rejected");
                            }
                            break;
                        }
                        tokio::select! {
                            _ = shutdown.changed() => break,
                            changed = ready.changed() => {
                                if changed.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                });
            }
        }

        info!(
            server = %self.state.owner.name(),
            network_id = %network_id,
            "service registered"
        );
        self.send_message(&peernet_proto::loc::register_response(
            id,
            self.state.owner.location(),
        ))
        .await;
        true
    }

    async fn handle_get_neighbour_nodes(&self, id: u32, keep_alive: bool) {
        let nodes: Vec<NodeInfo> = {
            let neighbors = self.state.neighbors.lock();
            neighbors
                .values()
                .filter_map(|peer| peer.network_id().map(|nid| NodeInfo::for_server(peer, nid)))
                .collect()
        };
        let response = LocMessage::response(
            id,
            LocStatus::Ok,
            Some(loc_response::Payload::GetNeighbourNodes(
                GetNeighbourNodesResponse { nodes },
            )),
        );
        {
            let mut client = self.state.client.lock().await;
            if keep_alive {
                client.wants_updates = true;
            }
        }
        self.send_message(&response).await;
    }

    /// Push accumulated changes to a connected keep-alive client.
    async fn deliver_changes(&self, changes: Vec<NeighbourhoodChange>) {
        if changes.is_empty() {
            return;
        }
        let id = self.allocate_id();
        let notification = LocMessage::request(
            id,
            loc_request::Payload::NeighbourhoodChanged(NeighbourhoodChangedNotification {
                changes,
            }),
        );
        let mut client = self.state.client.lock().await;
        if !client.wants_updates {
            return;
        }
        let Some(stream) = client.stream.as_mut() else {
            return;
        };
        if let Err(e) = write_frame(stream, &notification, MAX_LOC_BODY).await {
            warn!(
                server = %self.state.owner.name(),
                error = %e,
                "change notification failed, dropping client stream"
            );
            client.stream = None;
            client.wants_updates = false;
        }
    }

    async fn send_message(&self, message: &LocMessage) {
        let mut client = self.state.client.lock().await;
        let Some(stream) = client.stream.as_mut() else {
            return;
        };
        if let Err(e) = write_frame(stream, message, MAX_LOC_BODY).await {
            warn!(server = %self.state.owner.name(), error = %e, "LOC send failed");
            client.stream = None;
            client.wants_updates = false;
        }
    }

    async fn send_violation(&self) {
        self.send_message(&LocMessage::protocol_violation()).await;
    }

    fn allocate_id(&self) -> u32 {
        let id = self.state.next_id.fetch_add(1, Ordering::Relaxed);
        // The violation sentinel is reserved.
        if id == peernet_proto::loc::PROTOCOL_VIOLATION_ID {
            self.state.next_id.fetch_add(1, Ordering::Relaxed)
        } else {
            id
        }
    }
}
