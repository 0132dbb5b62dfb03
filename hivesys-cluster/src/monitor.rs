//! Two-sided remote monitor registries.
//!
//! The **outgoing** side tracks monitors this node initiated on servers
//! elsewhere; the **incoming** side tracks monitors other nodes placed on
//! servers here. Monitors are single-shot: any delivery (ack failure,
//! `process_down`, or a peer-loss-synthesized `noconnection`) removes the
//! entry from both sides.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use dashmap::DashMap;

// Layer 3: Internal module imports
use crate::node::{NodeId, ServerRef};
use hivesys_rt::util::{MonitorId, ServerId};

/// A monitor another node placed on a local server.
#[derive(Debug, Clone)]
pub(crate) struct IncomingMonitor {
    /// The node that asked for the monitor.
    pub origin: NodeId,

    /// The watcher's identity, used for duplicate rejection.
    pub monitoring: ServerRef,

    /// The watched local server.
    pub monitored: ServerId,
}

#[derive(Default)]
pub(crate) struct MonitorRegistry {
    outgoing: DashMap<MonitorId, ServerRef>,
    incoming: DashMap<MonitorId, IncomingMonitor>,
    pairs: DashMap<(ServerRef, ServerId), MonitorId>,
}

impl MonitorRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Outgoing side
    // ------------------------------------------------------------------

    pub(crate) fn register_outgoing(&self, monitor_id: MonitorId, monitored: ServerRef) {
        self.outgoing.insert(monitor_id, monitored);
    }

    /// Remove and return an outgoing monitor (single-shot delivery).
    pub(crate) fn take_outgoing(&self, monitor_id: &MonitorId) -> Option<ServerRef> {
        self.outgoing.remove(monitor_id).map(|(_, sref)| sref)
    }

    /// Drain every outgoing monitor pointed at `node` (peer loss).
    pub(crate) fn take_outgoing_for_node(&self, node: &NodeId) -> Vec<(MonitorId, ServerRef)> {
        let ids: Vec<MonitorId> = self
            .outgoing
            .iter()
            .filter(|entry| &entry.value().node == node)
            .map(|entry| entry.key().clone())
            .collect();
        ids.into_iter()
            .filter_map(|id| self.outgoing.remove(&id))
            .collect()
    }

    // ------------------------------------------------------------------
    // Incoming side
    // ------------------------------------------------------------------

    /// Register a monitor placed on a local server.
    ///
    /// Rejects a second monitor for the same `(initiator, target)` pair.
    pub(crate) fn register_incoming(
        &self,
        monitor_id: MonitorId,
        origin: NodeId,
        monitoring: ServerRef,
        monitored: ServerId,
    ) -> Result<(), String> {
        let pair = (monitoring.clone(), monitored.clone());
        match self.pairs.entry(pair) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err("duplicate monitor for this pair".to_string())
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(monitor_id.clone());
                self.incoming.insert(
                    monitor_id,
                    IncomingMonitor {
                        origin,
                        monitoring,
                        monitored,
                    },
                );
                Ok(())
            }
        }
    }

    /// Remove and return an incoming monitor (demonitor or delivery).
    pub(crate) fn take_incoming(&self, monitor_id: &MonitorId) -> Option<IncomingMonitor> {
        let (_, monitor) = self.incoming.remove(monitor_id)?;
        self.pairs
            .remove(&(monitor.monitoring.clone(), monitor.monitored.clone()));
        Some(monitor)
    }

    /// Drain every incoming monitor watching `server_id` (it terminated).
    pub(crate) fn take_incoming_for_server(
        &self,
        server_id: &ServerId,
    ) -> Vec<(MonitorId, IncomingMonitor)> {
        let ids: Vec<MonitorId> = self
            .incoming
            .iter()
            .filter(|entry| &entry.value().monitored == server_id)
            .map(|entry| entry.key().clone())
            .collect();
        ids.into_iter()
            .filter_map(|id| self.take_incoming(&id).map(|monitor| (id, monitor)))
            .collect()
    }

    /// Silently discard every incoming monitor from a lost node.
    pub(crate) fn drop_incoming_from(&self, node: &NodeId) -> usize {
        let ids: Vec<MonitorId> = self
            .incoming
            .iter()
            .filter(|entry| &entry.value().origin == node)
            .map(|entry| entry.key().clone())
            .collect();
        ids.iter().filter_map(|id| self.take_incoming(id)).count()
    }

    pub(crate) fn outgoing_count(&self) -> usize {
        self.outgoing.len()
    }

    pub(crate) fn incoming_count(&self) -> usize {
        self.incoming.len()
    }
}
