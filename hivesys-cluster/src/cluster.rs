//! The cluster facade: wiring transport, membership, pending tables,
//! monitors, and the global registry over one runtime.

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

// Layer 3: Internal module imports
use crate::catalogue::BehaviorCatalogue;
use crate::config::ClusterConfig;
use crate::error::ClusterError;
use crate::global::{GlobalRegistry, MergeOutcome};
use crate::membership::Membership;
use crate::monitor::MonitorRegistry;
use crate::node::{NodeDownReason, NodeId, NodeInfo, ServerRef};
use crate::pending::{PendingStats, PendingTable};
use crate::proto::{
    CallOutcome, ClusterMessage, DownReason, GlobalEntry, RegistryOp, RemoteCallErrorKind,
    SpawnErrorKind, SpawnOptions,
};
use crate::spawn::handle_spawn_request;
use crate::transport::{Transport, TransportEvent, TransportSettings};
use hivesys_rt::events::{EventSubscription, LifecycleEventKind};
use hivesys_rt::server::{BehaviorError, ExitReason, ServerError};
use hivesys_rt::system::Runtime;
use hivesys_rt::util::{CallId, MonitorId, ServerId, SpawnId};

/// Lifecycle of the cluster node itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatus {
    /// Constructed but never started.
    Idle,
    /// Binding and dialing seeds.
    Starting,
    /// Heartbeats flowing.
    Running,
    /// Broadcasting departure and tearing down.
    Stopping,
    /// Fully stopped.
    Stopped,
}

/// Cluster-wide introspection snapshot, aggregated from heartbeats.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterStats {
    /// This node.
    pub local: NodeInfo,

    /// Every known peer with its last-heartbeat view.
    pub peers: Vec<NodeInfo>,

    /// Peers currently connected.
    pub connected_peers: usize,

    /// Servers across the cluster (local plus last-reported peer counts).
    pub total_processes: usize,

    /// Names in the global registry replica.
    pub global_names: usize,

    /// Pending-call table counters.
    pub pending_calls: PendingStats,

    /// Pending-spawn table counters.
    pub pending_spawns: PendingStats,

    /// Pending monitor-ack counters.
    pub pending_monitors: PendingStats,

    /// Monitors this node initiated.
    pub outgoing_monitors: usize,

    /// Monitors other nodes hold on local servers.
    pub incoming_monitors: usize,
}

struct ClusterShell {
    config: ClusterConfig,
    runtime: Runtime,
    catalogue: Arc<BehaviorCatalogue>,
    status: RwLock<ClusterStatus>,
    core: OnceCell<Arc<ClusterCore>>,
}

pub(crate) struct ClusterCore {
    local: NodeId,
    started_at: DateTime<Utc>,
    config: ClusterConfig,
    runtime: Runtime,
    catalogue: Arc<BehaviorCatalogue>,
    transport: Arc<Transport>,
    membership: Membership,
    pending_calls: Arc<PendingTable<Value>>,
    pending_spawns: Arc<PendingTable<ServerRef>>,
    pending_monitors: Arc<PendingTable<()>>,
    monitors: MonitorRegistry,
    global: GlobalRegistry,
    shutdown: broadcast::Sender<()>,
    stopping: AtomicBool,
}

/// One node of the cluster.
///
/// Construct with [`Cluster::new`], register behaviors in the
/// [`BehaviorCatalogue`], then [`Cluster::start`]. Operations before
/// `start` (or after `stop`) fail with `ClusterNotStarted`.
#[derive(Clone)]
pub struct Cluster {
    shell: Arc<ClusterShell>,
}

impl Cluster {
    /// Validate the configuration and build an idle cluster handle.
    pub fn new(config: ClusterConfig, runtime: Runtime) -> Result<Cluster, ClusterError> {
        config.validate()?;
        Ok(Cluster {
            shell: Arc::new(ClusterShell {
                config,
                runtime,
                catalogue: Arc::new(BehaviorCatalogue::new()),
                status: RwLock::new(ClusterStatus::Idle),
                core: OnceCell::new(),
            }),
        })
    }

    /// The behavior catalogue used by remote spawn.
    pub fn catalogue(&self) -> Arc<BehaviorCatalogue> {
        Arc::clone(&self.shell.catalogue)
    }

    /// The underlying server runtime.
    pub fn runtime(&self) -> &Runtime {
        &self.shell.runtime
    }

    /// Current cluster status.
    pub fn status(&self) -> ClusterStatus {
        *self.shell.status.read()
    }

    /// Bind the listener, dial the seeds, start heartbeats.
    ///
    /// Returns the local node id, with the actually-bound port when the
    /// configured port was `0`.
    pub async fn start(&self) -> Result<NodeId, ClusterError> {
        {
            let mut status = self.shell.status.write();
            if *status != ClusterStatus::Idle {
                return Err(ClusterError::InvalidClusterConfig {
                    reason: format!("cluster cannot start from state {:?}", *status),
                });
            }
            *status = ClusterStatus::Starting;
        }

        let config = self.shell.config.clone();
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        let port = listener.local_addr()?.port();
        let local = NodeId::new(config.node_name.clone(), config.advertised_host(), port)?;

        let settings = TransportSettings {
            secret: config.cluster_secret.clone(),
            max_frame_len: config.max_frame_len,
            reconnect_base: config.reconnect_base_delay(),
            reconnect_max: config.reconnect_max_delay(),
        };
        let (transport, transport_events) = Transport::start(local.clone(), listener, settings);

        let (shutdown_tx, _) = broadcast::channel(1);
        let core = Arc::new(ClusterCore {
            local: local.clone(),
            started_at: Utc::now(),
            runtime: self.shell.runtime.clone(),
            catalogue: Arc::clone(&self.shell.catalogue),
            transport: Arc::clone(&transport),
            membership: Membership::new(local.clone(), config.heartbeat_deadline()),
            pending_calls: PendingTable::new(),
            pending_spawns: PendingTable::new(),
            pending_monitors: PendingTable::new(),
            monitors: MonitorRegistry::new(),
            global: GlobalRegistry::new(local.clone()),
            shutdown: shutdown_tx,
            stopping: AtomicBool::new(false),
            config,
        });
        self.shell
            .core
            .set(Arc::clone(&core))
            .map_err(|_| ClusterError::InvalidClusterConfig {
                reason: "cluster already started".to_string(),
            })?;

        let runtime_events = self.shell.runtime.subscribe();
        tokio::spawn(run_worker(Arc::clone(&core), transport_events, runtime_events));

        for seed in core.config.seed_nodes() {
            core.membership.mark_connecting(&seed);
            core.transport.connect(seed);
        }

        *self.shell.status.write() = ClusterStatus::Running;
        info!(node = %local, "cluster node started");
        Ok(local)
    }

    /// Broadcast a clean departure and tear everything down.
    pub async fn stop(&self) {
        {
            let mut status = self.shell.status.write();
            if *status != ClusterStatus::Running {
                return;
            }
            *status = ClusterStatus::Stopping;
        }
        if let Some(core) = self.shell.core.get() {
            core.stopping.store(true, Ordering::SeqCst);
            core.transport.broadcast(ClusterMessage::NodeDownNotification {
                node: core.local.clone(),
            });
            // Give connection writers a moment to flush the departure
            // notice before the sockets close.
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = core.shutdown.send(());
            core.transport.shutdown();
            core.pending_calls.clear(|_| ClusterError::ClusterNotStarted);
            core.pending_spawns.clear(|_| ClusterError::ClusterNotStarted);
            core.pending_monitors.clear(|_| ClusterError::ClusterNotStarted);
        }
        *self.shell.status.write() = ClusterStatus::Stopped;
        info!("cluster node stopped");
    }

    fn core(&self) -> Result<&Arc<ClusterCore>, ClusterError> {
        if *self.shell.status.read() != ClusterStatus::Running {
            return Err(ClusterError::ClusterNotStarted);
        }
        self.shell.core.get().ok_or(ClusterError::ClusterNotStarted)
    }

    /// This node's identity.
    pub fn local_node(&self) -> Result<NodeId, ClusterError> {
        Ok(self.core()?.local.clone())
    }

    /// Peers currently connected.
    pub fn connected_nodes(&self) -> Vec<NodeInfo> {
        match self.core() {
            Ok(core) => core.membership.connected_nodes(),
            Err(_) => Vec::new(),
        }
    }

    /// Candidate nodes for placement: the local node first, then every
    /// connected peer.
    pub fn placement_candidates(&self) -> Vec<NodeInfo> {
        match self.core() {
            Ok(core) => {
                let mut candidates = vec![core.local_info()];
                candidates.extend(core.membership.connected_nodes());
                candidates
            }
            Err(_) => Vec::new(),
        }
    }

    /// Aggregated introspection across the cluster.
    pub fn stats(&self) -> Result<ClusterStats, ClusterError> {
        let core = self.core()?;
        let local = core.local_info();
        let peers = core.membership.all_nodes();
        let connected_peers = peers
            .iter()
            .filter(|info| info.status == crate::node::PeerStatus::Connected)
            .count();
        let total_processes = local.process_count
            + peers
                .iter()
                .filter(|info| info.status == crate::node::PeerStatus::Connected)
                .map(|info| info.process_count)
                .sum::<usize>();
        Ok(ClusterStats {
            local,
            peers,
            connected_peers,
            total_processes,
            global_names: core.global.len(),
            pending_calls: core.pending_calls.stats(),
            pending_spawns: core.pending_spawns.stats(),
            pending_monitors: core.pending_monitors.stats(),
            outgoing_monitors: core.monitors.outgoing_count(),
            incoming_monitors: core.monitors.incoming_count(),
        })
    }

    // ------------------------------------------------------------------
    // Remote operations
    // ------------------------------------------------------------------

    /// Call a server anywhere in the cluster.
    pub async fn call(
        &self,
        server: &ServerRef,
        msg: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, ClusterError> {
        let core = self.core()?;
        if server.node == core.local {
            return core
                .runtime
                .call(&server.server_id, msg, timeout)
                .await
                .map_err(Into::into);
        }

        let call_id = CallId::new();
        let timeout = timeout.unwrap_or_else(|| core.config.call_timeout());
        let rx = {
            let call_id_for_timeout = call_id.clone();
            let node = server.node.clone();
            core.pending_calls.register(
                call_id.as_str(),
                server.node.clone(),
                timeout,
                move || ClusterError::RemoteCallTimeout {
                    call_id: call_id_for_timeout,
                    node,
                },
            )
        };
        if let Err(err) = core.transport.send(
            &server.node,
            ClusterMessage::CallRequest {
                call_id: call_id.clone(),
                server_id: server.server_id.clone(),
                payload: msg,
                timeout_ms: timeout.as_millis() as u64,
            },
        ) {
            core.pending_calls.reject(call_id.as_str(), err);
        }
        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(ClusterError::ClusterNotStarted),
        }
    }

    /// Cast to a server anywhere in the cluster.
    pub fn cast(&self, server: &ServerRef, msg: Value) -> Result<(), ClusterError> {
        let core = self.core()?;
        if server.node == core.local {
            return core.runtime.cast(&server.server_id, msg).map_err(Into::into);
        }
        core.transport.send(
            &server.node,
            ClusterMessage::Cast {
                server_id: server.server_id.clone(),
                payload: msg,
            },
        )
    }

    /// Stop a server anywhere in the cluster.
    ///
    /// Remote stops are fire-and-forget: the owning node applies its own
    /// graceful-stop semantics; monitors observe the termination.
    pub async fn stop_server(
        &self,
        server: &ServerRef,
        reason: ExitReason,
    ) -> Result<(), ClusterError> {
        let core = self.core()?;
        if server.node == core.local {
            core.runtime
                .stop(&server.server_id, Some(reason))
                .await
                .map_err(ClusterError::from)?;
            return Ok(());
        }
        core.transport.send(
            &server.node,
            ClusterMessage::StopRequest {
                server_id: server.server_id.clone(),
                reason,
            },
        )
    }

    /// Spawn a catalogued behavior on `node` (possibly this node).
    pub async fn spawn(
        &self,
        behavior: &str,
        node: &NodeId,
        options: SpawnOptions,
        timeout: Option<Duration>,
    ) -> Result<ServerRef, ClusterError> {
        let core = self.core()?;
        if node == &core.local {
            let factory =
                core.catalogue
                    .get(behavior)
                    .ok_or_else(|| ClusterError::BehaviorNotFound {
                        name: behavior.to_string(),
                    })?;
            let server_id = core
                .runtime
                .start(factory(), options.to_start_options())
                .await?;
            return Ok(ServerRef::new(server_id, core.local.clone()));
        }

        if !core.transport.is_connected(node) {
            return Err(ClusterError::NodeNotReachable { node: node.clone() });
        }
        let spawn_id = SpawnId::new();
        let timeout = timeout.unwrap_or_else(|| core.config.call_timeout());
        let rx = {
            let spawn_id_for_timeout = spawn_id.clone();
            let target = node.clone();
            core.pending_spawns.register(
                spawn_id.as_str(),
                node.clone(),
                timeout,
                move || ClusterError::RemoteSpawnTimeout {
                    spawn_id: spawn_id_for_timeout,
                    node: target,
                },
            )
        };
        if let Err(err) = core.transport.send(
            node,
            ClusterMessage::SpawnRequest {
                spawn_id: spawn_id.clone(),
                behavior: behavior.to_string(),
                options,
            },
        ) {
            core.pending_spawns.reject(spawn_id.as_str(), err);
        }
        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(ClusterError::ClusterNotStarted),
        }
    }

    /// Monitor a server anywhere in the cluster, with an anonymous
    /// watcher identity.
    pub async fn monitor(
        &self,
        monitored: &ServerRef,
        timeout: Option<Duration>,
    ) -> Result<MonitorId, ClusterError> {
        let watcher = ServerRef::new(ServerId::new(), self.core()?.local.clone());
        self.monitor_as(watcher, monitored, timeout).await
    }

    /// Monitor a server with an explicit watcher identity.
    ///
    /// Duplicate monitors for the same `(watcher, target)` pair are
    /// rejected by the owning node.
    pub async fn monitor_as(
        &self,
        monitoring: ServerRef,
        monitored: &ServerRef,
        timeout: Option<Duration>,
    ) -> Result<MonitorId, ClusterError> {
        let core = self.core()?;
        let monitor_id = MonitorId::new();

        if monitored.node == core.local {
            if core.runtime.is_running(&monitored.server_id) {
                core.monitors
                    .register_incoming(
                        monitor_id.clone(),
                        core.local.clone(),
                        monitoring,
                        monitored.server_id.clone(),
                    )
                    .map_err(|reason| ClusterError::MonitorRejected {
                        monitor_id: monitor_id.clone(),
                        reason,
                    })?;
                core.monitors
                    .register_outgoing(monitor_id.clone(), monitored.clone());
            } else {
                // The server is already gone: deliver noproc immediately.
                core.publish_process_down(&monitor_id, monitored, DownReason::Noproc);
            }
            return Ok(monitor_id);
        }

        core.monitors
            .register_outgoing(monitor_id.clone(), monitored.clone());
        let timeout = timeout.unwrap_or_else(|| core.config.call_timeout());
        let rx = {
            let monitor_id_for_timeout = monitor_id.clone();
            let node = monitored.node.clone();
            core.pending_monitors.register(
                monitor_id.as_str(),
                monitored.node.clone(),
                timeout,
                move || ClusterError::RemoteMonitorTimeout {
                    monitor_id: monitor_id_for_timeout,
                    node,
                },
            )
        };
        if let Err(err) = core.transport.send(
            &monitored.node,
            ClusterMessage::MonitorRequest {
                monitor_id: monitor_id.clone(),
                monitoring,
                monitored: monitored.clone(),
            },
        ) {
            core.pending_monitors.reject(monitor_id.as_str(), err);
        }
        match rx.await {
            Ok(Ok(())) => Ok(monitor_id),
            Ok(Err(err)) => {
                core.monitors.take_outgoing(&monitor_id);
                Err(err)
            }
            Err(_) => {
                core.monitors.take_outgoing(&monitor_id);
                Err(ClusterError::ClusterNotStarted)
            }
        }
    }

    /// Cancel a monitor. Unknown or already-resolved ids are a no-op.
    pub fn demonitor(&self, monitor_id: &MonitorId) -> Result<(), ClusterError> {
        let core = self.core()?;
        if let Some(sref) = core.monitors.take_outgoing(monitor_id) {
            if sref.node == core.local {
                core.monitors.take_incoming(monitor_id);
            } else {
                let _ = core.transport.send(
                    &sref.node,
                    ClusterMessage::DemonitorRequest {
                        monitor_id: monitor_id.clone(),
                    },
                );
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Global registry
    // ------------------------------------------------------------------

    /// Register a local server under a cluster-wide unique name.
    pub fn register_global(
        &self,
        name: &str,
        server_id: &ServerId,
    ) -> Result<(), ClusterError> {
        let core = self.core()?;
        let server = ServerRef::new(server_id.clone(), core.local.clone());
        let entry = core.global.register(name, server)?;
        core.transport.broadcast(ClusterMessage::RegistryUpdate {
            op: RegistryOp::Register,
            entry,
        });
        Ok(())
    }

    /// Remove a global name this node owns.
    pub fn unregister_global(&self, name: &str) -> Result<(), ClusterError> {
        let core = self.core()?;
        let entry = core.global.unregister(name)?;
        core.transport.broadcast(ClusterMessage::RegistryUpdate {
            op: RegistryOp::Unregister,
            entry,
        });
        Ok(())
    }

    /// Resolve a global name to its server.
    pub fn lookup_global(&self, name: &str) -> Result<ServerRef, ClusterError> {
        self.core()?.global.lookup(name)
    }

    /// Resolve a global name, or `None`.
    pub fn whereis_global(&self, name: &str) -> Option<GlobalEntry> {
        self.core().ok().and_then(|core| core.global.whereis(name))
    }
}

impl ClusterCore {
    fn local_info(&self) -> NodeInfo {
        self.membership.local_info(self.runtime.server_count())
    }

    fn publish_process_down(
        &self,
        monitor_id: &MonitorId,
        monitored: &ServerRef,
        reason: DownReason,
    ) {
        self.runtime.events().publish(LifecycleEventKind::ProcessDown {
            monitor_id: monitor_id.clone(),
            server_id: monitored.server_id.clone(),
            node: monitored.node.to_string(),
            reason: reason.to_string(),
        });
    }

    fn send_heartbeats(&self) {
        let peers = self.transport.connected_peers();
        if peers.is_empty() {
            return;
        }
        self.transport.broadcast(ClusterMessage::Heartbeat {
            node: self.local_info(),
            known_nodes: self.membership.known_nodes(),
        });
    }

    fn sweep(self: &Arc<Self>) {
        for node in self.membership.sweep() {
            warn!(node = %node, "peer missed too many heartbeats");
            self.transport.drop_peer(&node);
            self.handle_node_down(&node, NodeDownReason::HeartbeatTimeout);
            // Keep trying to get it back.
            self.transport.connect(node);
        }
    }

    fn handle_node_down(&self, node: &NodeId, reason: NodeDownReason) {
        if !self.membership.on_peer_lost(node) {
            return;
        }
        info!(node = %node, reason = %reason, "node down");
        self.runtime.events().publish(LifecycleEventKind::NodeDown {
            node: node.to_string(),
            reason: reason.to_string(),
        });

        // Fail every inflight operation addressed to the lost node before
        // its own timeout would fire.
        self.pending_calls.reject_all_for_node(node, |_| {
            ClusterError::NodeNotReachable { node: node.clone() }
        });
        self.pending_spawns.reject_all_for_node(node, |_| {
            ClusterError::NodeNotReachable { node: node.clone() }
        });
        self.pending_monitors.reject_all_for_node(node, |_| {
            ClusterError::NodeNotReachable { node: node.clone() }
        });

        // Outgoing monitors resolve with a synthetic noconnection;
        // incoming monitors from the lost node are discarded silently.
        for (monitor_id, monitored) in self.monitors.take_outgoing_for_node(node) {
            self.publish_process_down(&monitor_id, &monitored, DownReason::Noconnection);
        }
        self.monitors.drop_incoming_from(node);

        // Every node performs the same local cleanup; no broadcast.
        let removed = self.global.on_node_down(node);
        if removed > 0 {
            debug!(node = %node, removed, "dropped global names owned by lost node");
        }
    }

    fn handle_transport_event(self: &Arc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::PeerConnected { node } => {
                if self.membership.on_peer_connected(&node) {
                    self.runtime.events().publish(LifecycleEventKind::NodeUp {
                        node: node.to_string(),
                    });
                }
                // Join-time sync: hand the new peer every name we own.
                let entries = self.global.owned_entries();
                if !entries.is_empty() {
                    let _ = self
                        .transport
                        .send(&node, ClusterMessage::RegistrySync { entries });
                }
            }
            TransportEvent::PeerMessage { node, message } => {
                self.handle_message(node, message);
            }
            TransportEvent::PeerLost { node, reason } => {
                self.handle_node_down(&node, reason);
                if !self.stopping.load(Ordering::SeqCst)
                    && reason != NodeDownReason::GracefulShutdown
                {
                    self.transport.connect(node);
                }
            }
        }
    }

    fn handle_message(self: &Arc<Self>, from: NodeId, message: ClusterMessage) {
        match message {
            ClusterMessage::Handshake { .. } => {
                // Consumed by the transport; a late one is harmless.
            }
            ClusterMessage::Heartbeat { node, known_nodes } => {
                if self.membership.on_peer_connected(&from) {
                    self.runtime.events().publish(LifecycleEventKind::NodeUp {
                        node: from.to_string(),
                    });
                }
                for discovered in self.membership.on_heartbeat(&from, node, known_nodes) {
                    self.membership.mark_connecting(&discovered);
                    self.transport.connect(discovered);
                }
            }
            ClusterMessage::CallRequest {
                call_id,
                server_id,
                payload,
                timeout_ms,
            } => {
                let core = Arc::clone(self);
                tokio::spawn(async move {
                    let outcome = match core
                        .runtime
                        .call(&server_id, payload, Some(Duration::from_millis(timeout_ms)))
                        .await
                    {
                        Ok(value) => CallOutcome::Ok { value },
                        Err(err) => {
                            let kind = match &err {
                                ServerError::NotRunning { .. } => {
                                    RemoteCallErrorKind::ServerNotRunning
                                }
                                ServerError::CallTimeout { .. } => RemoteCallErrorKind::Timeout,
                                ServerError::Overloaded { .. } => RemoteCallErrorKind::Overloaded,
                                _ => RemoteCallErrorKind::HandlerError,
                            };
                            CallOutcome::Error {
                                kind,
                                message: err.to_string(),
                            }
                        }
                    };
                    let _ = core.transport.send(
                        &from,
                        ClusterMessage::CallReply {
                            call_id,
                            server_id,
                            outcome,
                        },
                    );
                });
            }
            ClusterMessage::CallReply {
                call_id,
                server_id,
                outcome,
            } => match outcome {
                CallOutcome::Ok { value } => {
                    self.pending_calls.resolve(call_id.as_str(), value);
                }
                CallOutcome::Error { kind, message } => {
                    let err = match kind {
                        RemoteCallErrorKind::ServerNotRunning => {
                            ClusterError::Server(ServerError::NotRunning { server_id })
                        }
                        RemoteCallErrorKind::HandlerError => {
                            ClusterError::Server(ServerError::Handler {
                                server_id,
                                source: BehaviorError::new(message),
                            })
                        }
                        RemoteCallErrorKind::Timeout => ClusterError::RemoteCallTimeout {
                            call_id: call_id.clone(),
                            node: from,
                        },
                        RemoteCallErrorKind::Overloaded => {
                            ClusterError::Server(ServerError::Overloaded {
                                server_id,
                                limit: 0,
                            })
                        }
                    };
                    self.pending_calls.reject(call_id.as_str(), err);
                }
            },
            ClusterMessage::Cast { server_id, payload } => {
                if let Err(err) = self.runtime.cast(&server_id, payload) {
                    debug!(server_id = %server_id, error = %err, "remote cast dropped");
                }
            }
            ClusterMessage::SpawnRequest {
                spawn_id,
                behavior,
                options,
            } => {
                let core = Arc::clone(self);
                tokio::spawn(async move {
                    let reply = handle_spawn_request(
                        &core.runtime,
                        &core.catalogue,
                        &core.local,
                        spawn_id,
                        &behavior,
                        options,
                    )
                    .await;
                    let _ = core.transport.send(&from, reply);
                });
            }
            ClusterMessage::SpawnReply {
                spawn_id,
                server_id,
                node,
            } => {
                self.pending_spawns
                    .resolve(spawn_id.as_str(), ServerRef::new(server_id, node));
            }
            ClusterMessage::SpawnError {
                spawn_id,
                error,
                message,
            } => {
                let err = match error {
                    SpawnErrorKind::BehaviorNotFound => {
                        ClusterError::BehaviorNotFound { name: message }
                    }
                    SpawnErrorKind::InitFailed | SpawnErrorKind::Timeout => {
                        ClusterError::SpawnFailed {
                            node: from,
                            message,
                        }
                    }
                };
                self.pending_spawns.reject(spawn_id.as_str(), err);
            }
            ClusterMessage::MonitorRequest {
                monitor_id,
                monitoring,
                monitored,
            } => {
                let running = self.runtime.is_running(&monitored.server_id);
                let registration = if running {
                    self.monitors.register_incoming(
                        monitor_id.clone(),
                        from.clone(),
                        monitoring,
                        monitored.server_id.clone(),
                    )
                } else {
                    Ok(())
                };
                match registration {
                    Ok(()) => {
                        let _ = self.transport.send(
                            &from,
                            ClusterMessage::MonitorAck {
                                monitor_id: monitor_id.clone(),
                                success: true,
                                reason: None,
                            },
                        );
                        if !running {
                            // Acked, then the immediate noproc delivery.
                            let _ = self.transport.send(
                                &from,
                                ClusterMessage::ProcessDown {
                                    monitor_id,
                                    monitored,
                                    reason: DownReason::Noproc,
                                },
                            );
                        }
                    }
                    Err(reason) => {
                        let _ = self.transport.send(
                            &from,
                            ClusterMessage::MonitorAck {
                                monitor_id,
                                success: false,
                                reason: Some(reason),
                            },
                        );
                    }
                }
            }
            ClusterMessage::MonitorAck {
                monitor_id,
                success,
                reason,
            } => {
                if success {
                    self.pending_monitors.resolve(monitor_id.as_str(), ());
                } else {
                    let reason = reason.unwrap_or_else(|| "rejected".to_string());
                    let err = ClusterError::MonitorRejected {
                        monitor_id: monitor_id.clone(),
                        reason,
                    };
                    self.pending_monitors.reject(monitor_id.as_str(), err);
                }
            }
            ClusterMessage::DemonitorRequest { monitor_id } => {
                self.monitors.take_incoming(&monitor_id);
            }
            ClusterMessage::ProcessDown {
                monitor_id,
                monitored,
                reason,
            } => {
                if self.monitors.take_outgoing(&monitor_id).is_some() {
                    self.publish_process_down(&monitor_id, &monitored, reason);
                }
            }
            ClusterMessage::RegistrySync { entries } => {
                for entry in entries {
                    self.apply_merge(entry);
                }
            }
            ClusterMessage::RegistryUpdate { op, entry } => match op {
                RegistryOp::Register => self.apply_merge(entry),
                RegistryOp::Unregister => {
                    self.global.apply_unregister(&entry);
                }
            },
            ClusterMessage::StopRequest { server_id, reason } => {
                let core = Arc::clone(self);
                tokio::spawn(async move {
                    let result = match reason {
                        ExitReason::Killed => {
                            core.runtime.force_terminate(&server_id, reason).await
                        }
                        other => core.runtime.stop(&server_id, Some(other)).await,
                    };
                    if let Err(err) = result {
                        debug!(server_id = %server_id, error = %err, "remote stop ignored");
                    }
                });
            }
            ClusterMessage::NodeDownNotification { node } => {
                self.transport.forget(&node);
                self.handle_node_down(&node, NodeDownReason::GracefulShutdown);
            }
        }
    }

    fn apply_merge(&self, entry: GlobalEntry) {
        match self.global.merge(entry) {
            MergeOutcome::Inserted => {}
            MergeOutcome::KeptExisting { winner, loser }
            | MergeOutcome::Replaced { winner, loser } => {
                self.runtime
                    .events()
                    .publish(LifecycleEventKind::ConflictResolved {
                        name: winner.name.clone(),
                        winner_node: winner.origin.to_string(),
                        loser_node: loser.origin.to_string(),
                    });
            }
        }
    }

    fn handle_runtime_event(&self, kind: &LifecycleEventKind) {
        let (server_id, reason) = match kind {
            LifecycleEventKind::Terminated {
                server_id, reason, ..
            } => (server_id, DownReason::from(reason)),
            LifecycleEventKind::Crashed { server_id, .. } => (server_id, DownReason::Error),
            _ => return,
        };

        // Notify every monitor watching the terminated server.
        for (monitor_id, monitor) in self.monitors.take_incoming_for_server(server_id) {
            let monitored = ServerRef::new(server_id.clone(), self.local.clone());
            if monitor.origin == self.local {
                if self.monitors.take_outgoing(&monitor_id).is_some() {
                    self.publish_process_down(&monitor_id, &monitored, reason);
                }
            } else {
                let _ = self.transport.send(
                    &monitor.origin,
                    ClusterMessage::ProcessDown {
                        monitor_id,
                        monitored,
                        reason,
                    },
                );
            }
        }

        // Drop (and announce) any global names the server held.
        for entry in self.global.remove_server(server_id) {
            if entry.origin == self.local {
                self.transport.broadcast(ClusterMessage::RegistryUpdate {
                    op: RegistryOp::Unregister,
                    entry,
                });
            }
        }
    }
}

/// The cluster worker: one select loop over transport events, runtime
/// lifecycle events, the heartbeat timer, and the failure sweeper.
async fn run_worker(
    core: Arc<ClusterCore>,
    mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    mut runtime_events: EventSubscription,
) {
    let mut shutdown_rx = core.shutdown.subscribe();
    let mut heartbeat = tokio::time::interval(core.config.heartbeat_interval());
    let mut sweeper = tokio::time::interval(core.config.heartbeat_interval());

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            Some(event) = transport_events.recv() => core.handle_transport_event(event),
            Some(event) = runtime_events.recv() => core.handle_runtime_event(&event.kind),
            _ = heartbeat.tick() => core.send_heartbeats(),
            _ = sweeper.tick() => core.sweep(),
        }
    }
    debug!(node = %core.local, "cluster worker stopped");
}
