//! Lifecycle event types.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use serde::Serialize;

// Layer 3: Internal module imports
use crate::server::ExitReason;
use crate::util::{MonitorId, ServerId};

/// A timestamped lifecycle event.
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleEvent {
    /// When the event was emitted.
    pub timestamp: DateTime<Utc>,

    /// The specific event.
    pub kind: LifecycleEventKind,
}

impl LifecycleEvent {
    /// Wrap an event kind with the current timestamp.
    pub fn now(kind: LifecycleEventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
        }
    }

    /// The server this event concerns, if any.
    pub fn server_id(&self) -> Option<&ServerId> {
        match &self.kind {
            LifecycleEventKind::Started { server_id, .. }
            | LifecycleEventKind::Terminated { server_id, .. }
            | LifecycleEventKind::Crashed { server_id, .. }
            | LifecycleEventKind::ProcessDown { server_id, .. } => Some(server_id),
            LifecycleEventKind::Restarted { new_server_id, .. } => Some(new_server_id),
            _ => None,
        }
    }
}

/// The set of observable lifecycle transitions.
///
/// Node ids and down reasons appear as strings so the single-node core does
/// not depend on cluster types; the cluster layer publishes into the same
/// stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEventKind {
    /// A server finished `init` and entered `running`.
    Started {
        server_id: ServerId,
        name: Option<String>,
    },

    /// A server stopped deliberately (`stop`, `force_terminate`, shutdown).
    Terminated {
        server_id: ServerId,
        name: Option<String>,
        reason: ExitReason,
    },

    /// A server stopped because `init` or `handle_cast` failed.
    Crashed {
        server_id: ServerId,
        name: Option<String>,
        reason: String,
    },

    /// A supervisor replaced a child's server with a fresh one.
    Restarted {
        supervisor_id: String,
        child_id: String,
        old_server_id: ServerId,
        new_server_id: ServerId,
    },

    /// A monitored server went down (delivered once per monitor).
    ProcessDown {
        monitor_id: MonitorId,
        server_id: ServerId,
        node: String,
        reason: String,
    },

    /// A peer node became reachable.
    NodeUp { node: String },

    /// A peer node became unreachable.
    NodeDown { node: String, reason: String },

    /// A distributed supervisor moved a child to a different node.
    ChildMigrated {
        supervisor_id: String,
        child_id: String,
        from_node: String,
        to_node: String,
    },

    /// A global-registry name conflict was resolved on this node.
    ConflictResolved {
        name: String,
        winner_node: String,
        loser_node: String,
    },
}
