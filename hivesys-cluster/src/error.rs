//! Error types for the cluster layer.
//!
//! Transport-level failures never surface directly to user code: they
//! materialize as `node_down` events and as the typed remote errors below
//! for any inflight operations. Raw stack traces never cross a node
//! boundary, only reason strings.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
use crate::node::{NodeId, NodeIdError};
use crate::proto::ProtoError;
use hivesys_rt::server::ServerError;
use hivesys_rt::supervisor::SupervisorError;
use hivesys_rt::util::{CallId, MonitorId, SpawnId};

/// Errors surfaced by cluster operations.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// No live connection to the target node.
    #[error("node '{node}' is not reachable")]
    NodeNotReachable { node: NodeId },

    /// A remote call received no reply within its timeout.
    #[error("remote call '{call_id}' to node '{node}' timed out")]
    RemoteCallTimeout { call_id: CallId, node: NodeId },

    /// A monitor request was not acknowledged within its timeout.
    #[error("monitor '{monitor_id}' on node '{node}' was not acknowledged in time")]
    RemoteMonitorTimeout { monitor_id: MonitorId, node: NodeId },

    /// A remote spawn received no reply within its timeout.
    #[error("spawn '{spawn_id}' on node '{node}' timed out")]
    RemoteSpawnTimeout { spawn_id: SpawnId, node: NodeId },

    /// The behavior name is not in the catalogue (local or remote).
    #[error("behavior '{name}' is not registered in the catalogue")]
    BehaviorNotFound { name: String },

    /// A behavior with this name is already in the catalogue.
    #[error("behavior '{name}' is already registered")]
    BehaviorAlreadyRegistered { name: String },

    /// The remote node failed to start the requested server.
    #[error("remote spawn on node '{node}' failed: {message}")]
    SpawnFailed { node: NodeId, message: String },

    /// The owning node rejected the monitor request.
    #[error("monitor '{monitor_id}' was rejected: {reason}")]
    MonitorRejected { monitor_id: MonitorId, reason: String },

    /// A local global-registration attempt lost the conflict-resolution
    /// race against an existing entry.
    #[error("global name '{name}' is owned by node '{existing_node}'")]
    GlobalNameConflict { name: String, existing_node: NodeId },

    /// Lookup of an unregistered global name.
    #[error("global name '{name}' is not registered")]
    GlobalNameNotFound { name: String },

    /// Only the owning node may unregister a global name.
    #[error("global name '{name}' is owned by node '{owner}', not this node")]
    NotGlobalOwner { name: String, owner: NodeId },

    /// The node selector produced no usable placement.
    #[error("no node available to place child '{child_id}'")]
    NoAvailableNode { child_id: String },

    /// Configuration failed validation.
    #[error("invalid cluster configuration: {reason}")]
    InvalidClusterConfig { reason: String },

    /// Operation against a cluster that is not running.
    #[error("cluster is not started")]
    ClusterNotStarted,

    /// A frame failed HMAC verification.
    #[error("authentication failed for peer '{node}'")]
    AuthenticationFailed { node: String },

    /// Wire-protocol failure.
    #[error(transparent)]
    Proto(#[from] ProtoError),

    /// Local server-runtime failure (also reconstructed from remote
    /// replies).
    #[error(transparent)]
    Server(#[from] ServerError),

    /// Distributed-supervisor child management failure.
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    /// Invalid node id.
    #[error(transparent)]
    NodeId(#[from] NodeIdError),

    /// Socket-level failure while starting or binding.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_forms() {
        let node = NodeId::parse("a@127.0.0.1:4369").expect("node id");
        let err = ClusterError::NodeNotReachable { node };
        assert!(err.to_string().contains("a@127.0.0.1:4369"));

        assert_eq!(
            ClusterError::ClusterNotStarted.to_string(),
            "cluster is not started"
        );
    }

    #[test]
    fn test_server_error_converts() {
        let err: ClusterError = ServerError::NotRunning {
            server_id: hivesys_rt::util::ServerId::new(),
        }
        .into();
        assert!(matches!(err, ClusterError::Server(_)));
    }
}
