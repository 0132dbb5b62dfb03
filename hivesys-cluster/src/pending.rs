//! Correlation of outbound requests to their replies.
//!
//! One generic table backs remote calls, remote spawns, and monitor acks.
//! Every entry carries its own timeout timer (cancelled on resolution);
//! the membership layer rejects everything addressed to a node when that
//! node goes down.

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

// Layer 3: Internal module imports
use crate::error::ClusterError;
use crate::node::NodeId;

/// Counters exposed through cluster introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PendingStats {
    /// Entries currently awaiting resolution.
    pub pending: usize,

    /// Total requests registered.
    pub initiated: u64,

    /// Resolved with a reply.
    pub resolved: u64,

    /// Rejected with an error (peer loss, explicit rejection).
    pub rejected: u64,

    /// Rejected by their own timer.
    pub timed_out: u64,
}

struct PendingEntry<T> {
    tx: oneshot::Sender<Result<T, ClusterError>>,
    node: NodeId,
    timer: JoinHandle<()>,
}

enum Settled {
    Resolved,
    Rejected,
    TimedOut,
}

/// A table of inflight requests keyed by their correlation id.
pub struct PendingTable<T> {
    entries: DashMap<String, PendingEntry<T>>,
    initiated: AtomicU64,
    resolved: AtomicU64,
    rejected: AtomicU64,
    timed_out: AtomicU64,
}

impl<T: Send + 'static> PendingTable<T> {
    /// Create an empty table.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
            initiated: AtomicU64::new(0),
            resolved: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
        })
    }

    /// Register an inflight request addressed to `node`.
    ///
    /// If nothing resolves it within `timeout`, the entry rejects itself
    /// with `timeout_err()`.
    pub fn register(
        self: &Arc<Self>,
        id: impl Into<String>,
        node: NodeId,
        timeout: Duration,
        timeout_err: impl FnOnce() -> ClusterError + Send + 'static,
    ) -> oneshot::Receiver<Result<T, ClusterError>> {
        let id = id.into();
        let (tx, rx) = oneshot::channel();
        let table = Arc::downgrade(self);
        let timer_id = id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(table) = table.upgrade() {
                table.settle(&timer_id, Err(timeout_err()), Settled::TimedOut);
            }
        });
        self.entries.insert(id, PendingEntry { tx, node, timer });
        self.initiated.fetch_add(1, Ordering::Relaxed);
        rx
    }

    /// Deliver a successful reply. Returns `false` for unknown ids.
    pub fn resolve(&self, id: &str, value: T) -> bool {
        self.settle(id, Ok(value), Settled::Resolved)
    }

    /// Deliver a failure. Returns `false` for unknown ids.
    pub fn reject(&self, id: &str, err: ClusterError) -> bool {
        self.settle(id, Err(err), Settled::Rejected)
    }

    /// Reject every entry addressed to `node` (peer-loss path).
    pub fn reject_all_for_node(
        &self,
        node: &NodeId,
        make_err: impl Fn(&str) -> ClusterError,
    ) -> usize {
        let ids: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| &entry.value().node == node)
            .map(|entry| entry.key().clone())
            .collect();
        let mut count = 0;
        for id in ids {
            if self.settle(&id, Err(make_err(&id)), Settled::Rejected) {
                count += 1;
            }
        }
        count
    }

    /// Reject every entry (cluster shutdown path).
    pub fn clear(&self, make_err: impl Fn(&str) -> ClusterError) -> usize {
        let ids: Vec<String> = self.entries.iter().map(|entry| entry.key().clone()).collect();
        let mut count = 0;
        for id in ids {
            if self.settle(&id, Err(make_err(&id)), Settled::Rejected) {
                count += 1;
            }
        }
        count
    }

    /// Current counters.
    pub fn stats(&self) -> PendingStats {
        PendingStats {
            pending: self.entries.len(),
            initiated: self.initiated.load(Ordering::Relaxed),
            resolved: self.resolved.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
        }
    }

    fn settle(&self, id: &str, result: Result<T, ClusterError>, how: Settled) -> bool {
        let Some((_, entry)) = self.entries.remove(id) else {
            return false;
        };
        entry.timer.abort();
        match how {
            Settled::Resolved => self.resolved.fetch_add(1, Ordering::Relaxed),
            Settled::Rejected => self.rejected.fetch_add(1, Ordering::Relaxed),
            Settled::TimedOut => self.timed_out.fetch_add(1, Ordering::Relaxed),
        };
        // A dropped receiver means the caller went away; nothing to do.
        let _ = entry.tx.send(result);
        true
    }
}
