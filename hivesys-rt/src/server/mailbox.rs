//! Mailbox plumbing shared between a server's handle and its pump task.

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;

// Layer 3: Internal module imports
use super::behavior::ExitReason;
use super::error::ServerError;
use crate::util::ServerId;

/// Lifecycle status of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    /// `init` is running; no messages are processed yet.
    Initializing,
    /// Accepting and processing messages.
    Running,
    /// Draining; new operations are rejected.
    Stopping,
    /// Fully stopped; the server id will never be reused.
    Stopped,
}

impl ServerStatus {
    /// `true` only while the server accepts work.
    pub fn is_running(&self) -> bool {
        matches!(self, ServerStatus::Running)
    }
}

/// A queued message, delivered to the behavior in enqueue order.
pub(crate) enum ServerMessage {
    /// Synchronous request; the reply channel resolves the caller.
    Call {
        payload: Value,
        reply: oneshot::Sender<Result<Value, ServerError>>,
    },
    /// Fire-and-forget message.
    Cast { payload: Value },
}

/// Out-of-band control delivered ahead of queued messages.
pub(crate) enum ControlSignal {
    /// Graceful stop: waits for the in-flight handler, then drains.
    Stop {
        reason: ExitReason,
        done: oneshot::Sender<()>,
    },
    /// Forced stop: cancels the in-flight handler.
    Kill {
        reason: ExitReason,
        done: oneshot::Sender<()>,
    },
}

/// State shared between a server's public handle and its pump task.
#[derive(Debug)]
pub(crate) struct ServerShared {
    pub id: ServerId,
    pub name: Option<String>,
    pub status: RwLock<ServerStatus>,
    pub started_at: DateTime<Utc>,
    pub processed: AtomicU64,
    pub queue_len: AtomicUsize,
    pub state_size: AtomicUsize,
}

impl ServerShared {
    pub(crate) fn new(
        id: ServerId,
        name: Option<String>,
        started_at: DateTime<Utc>,
        state_size: usize,
    ) -> Self {
        Self {
            id,
            name,
            status: RwLock::new(ServerStatus::Initializing),
            started_at,
            processed: AtomicU64::new(0),
            queue_len: AtomicUsize::new(0),
            state_size: AtomicUsize::new(state_size),
        }
    }

    /// Snapshot of the server's introspection counters.
    pub(crate) fn stats(&self) -> ServerStats {
        let uptime = (Utc::now() - self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        ServerStats {
            server_id: self.id.clone(),
            name: self.name.clone(),
            status: *self.status.read(),
            started_at: self.started_at,
            uptime,
            queue_len: self.queue_len.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            state_size: self.state_size.load(Ordering::Relaxed),
        }
    }
}

/// Introspection snapshot for a single server.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStats {
    /// The server's id.
    pub server_id: ServerId,

    /// Registered name, if any.
    pub name: Option<String>,

    /// Current lifecycle status.
    pub status: ServerStatus,

    /// When the server was started.
    pub started_at: DateTime<Utc>,

    /// Time since start.
    #[serde(skip)]
    pub uptime: Duration,

    /// Messages currently queued.
    pub queue_len: usize,

    /// Messages processed so far.
    pub processed: u64,

    /// Estimated state memory footprint in bytes.
    pub state_size: usize,
}
