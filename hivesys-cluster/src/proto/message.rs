//! The cluster message union.
//!
//! Every message is self-describing (internally tagged by `kind`) and
//! carries the correlation id appropriate to its kind. Recipients treat
//! correlation ids purely as map keys.

// Layer 1: Standard library imports
use std::fmt::{self, Display};
use std::time::Duration;

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};
use serde_json::Value;

// Layer 3: Internal module imports
use crate::node::{NodeId, NodeInfo, ServerRef};
use hivesys_rt::server::{ExitReason, StartOptions};
use hivesys_rt::util::{CallId, MonitorId, ServerId, SpawnId};

/// Messages exchanged between cluster peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClusterMessage {
    /// First frame in both directions after connecting.
    Handshake { node: NodeId },

    /// Periodic liveness plus gossip of known peers.
    Heartbeat {
        node: NodeInfo,
        known_nodes: Vec<NodeId>,
    },

    /// Remote synchronous request.
    CallRequest {
        call_id: CallId,
        server_id: ServerId,
        payload: Value,
        timeout_ms: u64,
    },

    /// Correlated reply to a `CallRequest`.
    CallReply {
        call_id: CallId,
        server_id: ServerId,
        outcome: CallOutcome,
    },

    /// Remote fire-and-forget message.
    Cast { server_id: ServerId, payload: Value },

    /// Ask the receiver to start a catalogued behavior.
    SpawnRequest {
        spawn_id: SpawnId,
        behavior: String,
        options: SpawnOptions,
    },

    /// Successful spawn: where the new server lives.
    SpawnReply {
        spawn_id: SpawnId,
        server_id: ServerId,
        node: NodeId,
    },

    /// Failed spawn, with a typed error kind.
    SpawnError {
        spawn_id: SpawnId,
        error: SpawnErrorKind,
        message: String,
    },

    /// Establish a monitor on a server owned by the receiver.
    MonitorRequest {
        monitor_id: MonitorId,
        monitoring: ServerRef,
        monitored: ServerRef,
    },

    /// Acknowledge (or reject) a monitor request.
    MonitorAck {
        monitor_id: MonitorId,
        success: bool,
        reason: Option<String>,
    },

    /// Cancel a monitor; unknown ids are ignored.
    DemonitorRequest { monitor_id: MonitorId },

    /// Single-shot notification that a monitored server went down.
    ProcessDown {
        monitor_id: MonitorId,
        monitored: ServerRef,
        reason: DownReason,
    },

    /// Join-time exchange of globally-registered names owned by the
    /// sender.
    RegistrySync { entries: Vec<GlobalEntry> },

    /// Incremental global-registry change.
    RegistryUpdate { op: RegistryOp, entry: GlobalEntry },

    /// Ask the receiver to stop one of its servers.
    StopRequest {
        server_id: ServerId,
        reason: ExitReason,
    },

    /// Clean departure announcement, broadcast before closing.
    NodeDownNotification { node: NodeId },
}

impl ClusterMessage {
    /// The wire tag of this message (mirrors the serde tag).
    pub fn kind(&self) -> &'static str {
        match self {
            ClusterMessage::Handshake { .. } => "handshake",
            ClusterMessage::Heartbeat { .. } => "heartbeat",
            ClusterMessage::CallRequest { .. } => "call_request",
            ClusterMessage::CallReply { .. } => "call_reply",
            ClusterMessage::Cast { .. } => "cast",
            ClusterMessage::SpawnRequest { .. } => "spawn_request",
            ClusterMessage::SpawnReply { .. } => "spawn_reply",
            ClusterMessage::SpawnError { .. } => "spawn_error",
            ClusterMessage::MonitorRequest { .. } => "monitor_request",
            ClusterMessage::MonitorAck { .. } => "monitor_ack",
            ClusterMessage::DemonitorRequest { .. } => "demonitor_request",
            ClusterMessage::ProcessDown { .. } => "process_down",
            ClusterMessage::RegistrySync { .. } => "registry_sync",
            ClusterMessage::RegistryUpdate { .. } => "registry_update",
            ClusterMessage::StopRequest { .. } => "stop_request",
            ClusterMessage::NodeDownNotification { .. } => "node_down_notification",
        }
    }
}

/// Result half of a `CallReply`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CallOutcome {
    /// The handler produced a reply.
    Ok { value: Value },
    /// The call failed on the owning node.
    Error {
        kind: RemoteCallErrorKind,
        message: String,
    },
}

/// Why a remote call failed on the owning node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteCallErrorKind {
    /// The target server is not running.
    ServerNotRunning,
    /// `handle_call` returned an error.
    HandlerError,
    /// The owning node's own call bound elapsed.
    Timeout,
    /// The target server's queue bound was hit.
    Overloaded,
}

/// Why a remote spawn failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpawnErrorKind {
    /// The behavior name is not in the receiver's catalogue.
    BehaviorNotFound,
    /// `init` failed or timed out on the receiver.
    InitFailed,
    /// The request itself timed out (caller-side synthesized).
    Timeout,
}

/// Why a monitored server went down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownReason {
    Normal,
    Shutdown,
    Error,
    /// The server did not exist when the monitor was placed.
    Noproc,
    /// The owning node became unreachable first.
    Noconnection,
    Killed,
}

impl From<&ExitReason> for DownReason {
    fn from(reason: &ExitReason) -> Self {
        match reason {
            ExitReason::Normal => DownReason::Normal,
            ExitReason::Shutdown => DownReason::Shutdown,
            ExitReason::Error(_) => DownReason::Error,
            ExitReason::Killed => DownReason::Killed,
        }
    }
}

impl Display for DownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DownReason::Normal => "normal",
            DownReason::Shutdown => "shutdown",
            DownReason::Error => "error",
            DownReason::Noproc => "noproc",
            DownReason::Noconnection => "noconnection",
            DownReason::Killed => "killed",
        };
        write!(f, "{text}")
    }
}

/// Global-registry change kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryOp {
    Register,
    Unregister,
}

/// One globally-registered name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalEntry {
    /// The registered name.
    pub name: String,

    /// The server it resolves to.
    pub server: ServerRef,

    /// Registration time in microseconds since the Unix epoch; the
    /// conflict rule prefers the earlier value.
    pub registered_at_us: i64,

    /// The node that owns the registration.
    pub origin: NodeId,
}

/// Wire-safe subset of server start options used by remote spawn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpawnOptions {
    /// Register the new server under this local-registry name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Arguments passed to `init`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_args: Option<Value>,

    /// Per-server init timeout override, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_timeout_ms: Option<u64>,

    /// Queue back-pressure bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_queue_len: Option<usize>,
}

impl SpawnOptions {
    /// Options with every field unset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arguments handed to `init` on the receiving node.
    pub fn with_init_args(mut self, args: Value) -> Self {
        self.init_args = Some(args);
        self
    }

    /// Register the spawned server under a name on the receiving node.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Convert into runtime start options on the receiving node.
    pub fn to_start_options(&self) -> StartOptions {
        StartOptions {
            name: self.name.clone(),
            registry: None,
            init_args: self.init_args.clone(),
            init_timeout: self.init_timeout_ms.map(Duration::from_millis),
            max_queue_len: self.max_queue_len,
        }
    }
}
