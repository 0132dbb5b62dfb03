//! Cluster membership: who we know, who is alive.
//!
//! Membership is driven by the cluster worker loop: handshakes mark peers
//! connected, heartbeats refresh liveness and gossip new peers, and the
//! sweeper declares peers down after too much silence.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

// Layer 3: Internal module imports
use crate::node::{NodeId, NodeInfo, PeerStatus};

pub(crate) struct Membership {
    local: NodeId,
    started_at: DateTime<Utc>,
    heartbeat_deadline: Duration,
    nodes: DashMap<NodeId, NodeInfo>,
}

impl Membership {
    pub(crate) fn new(local: NodeId, heartbeat_deadline: Duration) -> Self {
        Self {
            local,
            started_at: Utc::now(),
            heartbeat_deadline,
            nodes: DashMap::new(),
        }
    }

    /// This node's own info, as sent in heartbeats.
    pub(crate) fn local_info(&self, process_count: usize) -> NodeInfo {
        let uptime_ms = (Utc::now() - self.started_at).num_milliseconds().max(0) as u64;
        NodeInfo {
            id: self.local.clone(),
            status: PeerStatus::Connected,
            process_count,
            last_heartbeat_at: Some(Utc::now()),
            uptime_ms,
        }
    }

    /// Every peer we have ever learned about (any status).
    pub(crate) fn known_nodes(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Peers currently marked connected.
    pub(crate) fn connected_nodes(&self) -> Vec<NodeInfo> {
        self.nodes
            .iter()
            .filter(|entry| entry.value().status == PeerStatus::Connected)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Every peer with its current status.
    pub(crate) fn all_nodes(&self) -> Vec<NodeInfo> {
        self.nodes.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Record that a dial for `node` is underway.
    pub(crate) fn mark_connecting(&self, node: &NodeId) {
        self.nodes.entry(node.clone()).or_insert_with(|| NodeInfo {
            id: node.clone(),
            status: PeerStatus::Connecting,
            process_count: 0,
            last_heartbeat_at: None,
            uptime_ms: 0,
        });
    }

    /// Handshake completed. Returns `true` if the peer was not already
    /// connected (a `node_up` should be emitted).
    pub(crate) fn on_peer_connected(&self, node: &NodeId) -> bool {
        let mut entry = self.nodes.entry(node.clone()).or_insert_with(|| NodeInfo {
            id: node.clone(),
            status: PeerStatus::Connecting,
            process_count: 0,
            last_heartbeat_at: None,
            uptime_ms: 0,
        });
        let was_connected = entry.status == PeerStatus::Connected;
        entry.status = PeerStatus::Connected;
        entry.last_heartbeat_at = Some(Utc::now());
        !was_connected
    }

    /// Apply a heartbeat from `from`; returns gossiped nodes we did not
    /// know yet, which the caller should dial.
    pub(crate) fn on_heartbeat(
        &self,
        from: &NodeId,
        info: NodeInfo,
        known_nodes: Vec<NodeId>,
    ) -> Vec<NodeId> {
        {
            let mut entry = self.nodes.entry(from.clone()).or_insert_with(|| NodeInfo {
                id: from.clone(),
                status: PeerStatus::Connected,
                process_count: 0,
                last_heartbeat_at: None,
                uptime_ms: 0,
            });
            entry.status = PeerStatus::Connected;
            entry.last_heartbeat_at = Some(Utc::now());
            entry.process_count = info.process_count;
            entry.uptime_ms = info.uptime_ms;
        }

        let mut discovered = Vec::new();
        for node in known_nodes {
            if node == self.local || self.nodes.contains_key(&node) {
                continue;
            }
            debug!(node = %node, via = %from, "discovered peer via gossip");
            discovered.push(node);
        }
        discovered
    }

    /// Mark a peer disconnected. Returns `true` if it was connected or
    /// connecting before (a `node_down` should be emitted once).
    pub(crate) fn on_peer_lost(&self, node: &NodeId) -> bool {
        match self.nodes.get_mut(node) {
            Some(mut entry) => {
                let was_up = entry.status != PeerStatus::Disconnected;
                entry.status = PeerStatus::Disconnected;
                was_up
            }
            None => false,
        }
    }

    /// Connected peers whose silence exceeds the heartbeat deadline.
    pub(crate) fn sweep(&self) -> Vec<NodeId> {
        let now = Utc::now();
        let Ok(deadline) = chrono::Duration::from_std(self.heartbeat_deadline) else {
            return Vec::new();
        };
        self.nodes
            .iter()
            .filter(|entry| {
                let info = entry.value();
                info.status == PeerStatus::Connected
                    && matches!(info.last_heartbeat_at, Some(at) if now - at > deadline)
            })
            .map(|entry| entry.key().clone())
            .collect()
    }
}
