//! The global registry: cluster-wide name → server mapping.
//!
//! Every node holds its own replica of the map. Registrations are applied
//! locally and broadcast; concurrent registrations of the same name are
//! resolved by a rule every node applies identically, so all replicas
//! converge without coordination:
//!
//! 1. the earlier `registered_at` (microseconds) wins;
//! 2. on a tie, the lower SHA-256 digest of the origin NodeId wins.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use chrono::Utc;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::debug;

// Layer 3: Internal module imports
use crate::error::ClusterError;
use crate::node::{NodeId, ServerRef};
use crate::proto::GlobalEntry;

/// Result of merging a remote entry into the local replica.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum MergeOutcome {
    /// The name was free; the entry was inserted.
    Inserted,
    /// The existing entry won; the incoming one was discarded.
    KeptExisting { winner: GlobalEntry, loser: GlobalEntry },
    /// The incoming entry won; the existing one was removed.
    Replaced { winner: GlobalEntry, loser: GlobalEntry },
}

pub(crate) struct GlobalRegistry {
    local: NodeId,
    entries: DashMap<String, GlobalEntry>,
}

impl GlobalRegistry {
    pub(crate) fn new(local: NodeId) -> Self {
        Self {
            local,
            entries: DashMap::new(),
        }
    }

    /// Register a local server under `name`.
    ///
    /// Fails with `GlobalNameConflict` when an existing entry wins under
    /// the conflict rule. On success the caller must broadcast the
    /// returned entry.
    pub(crate) fn register(
        &self,
        name: &str,
        server: ServerRef,
    ) -> Result<GlobalEntry, ClusterError> {
        let candidate = GlobalEntry {
            name: name.to_string(),
            server,
            registered_at_us: Utc::now().timestamp_micros(),
            origin: self.local.clone(),
        };
        match self.entries.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(candidate.clone());
                Ok(candidate)
            }
            dashmap::mapref::entry::Entry::Occupied(mut slot) => {
                if beats(&candidate, slot.get()) {
                    slot.insert(candidate.clone());
                    Ok(candidate)
                } else {
                    Err(ClusterError::GlobalNameConflict {
                        name: name.to_string(),
                        existing_node: slot.get().origin.clone(),
                    })
                }
            }
        }
    }

    /// Unregister a name this node owns. On success the caller must
    /// broadcast the returned entry.
    pub(crate) fn unregister(&self, name: &str) -> Result<GlobalEntry, ClusterError> {
        let entry = self
            .entries
            .get(name)
            .map(|entry| entry.clone())
            .ok_or_else(|| ClusterError::GlobalNameNotFound {
                name: name.to_string(),
            })?;
        if entry.origin != self.local {
            return Err(ClusterError::NotGlobalOwner {
                name: name.to_string(),
                owner: entry.origin,
            });
        }
        self.entries.remove(name);
        Ok(entry)
    }

    /// Merge a remote entry (from `registry_update` or `registry_sync`).
    pub(crate) fn merge(&self, incoming: GlobalEntry) -> MergeOutcome {
        match self.entries.entry(incoming.name.clone()) {
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(incoming);
                MergeOutcome::Inserted
            }
            dashmap::mapref::entry::Entry::Occupied(mut slot) => {
                if slot.get() == &incoming {
                    return MergeOutcome::Inserted;
                }
                if beats(&incoming, slot.get()) {
                    let loser = slot.insert(incoming.clone());
                    debug!(name = %incoming.name, winner = %incoming.origin, "global name conflict: replaced");
                    MergeOutcome::Replaced {
                        winner: incoming,
                        loser,
                    }
                } else {
                    debug!(name = %incoming.name, winner = %slot.get().origin, "global name conflict: kept");
                    MergeOutcome::KeptExisting {
                        winner: slot.get().clone(),
                        loser: incoming,
                    }
                }
            }
        }
    }

    /// Apply a remote unregistration: remove only if the stored entry
    /// matches the announced one.
    pub(crate) fn apply_unregister(&self, entry: &GlobalEntry) -> bool {
        self.entries
            .remove_if(&entry.name, |_, existing| {
                existing.origin == entry.origin && existing.server == entry.server
            })
            .is_some()
    }

    /// Every entry this node owns (sent in `registry_sync` on join).
    pub(crate) fn owned_entries(&self) -> Vec<GlobalEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.value().origin == self.local)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Resolve a name to its server.
    pub(crate) fn lookup(&self, name: &str) -> Result<ServerRef, ClusterError> {
        self.whereis(name)
            .map(|entry| entry.server)
            .ok_or_else(|| ClusterError::GlobalNameNotFound {
                name: name.to_string(),
            })
    }

    /// Resolve a name, or `None`.
    pub(crate) fn whereis(&self, name: &str) -> Option<GlobalEntry> {
        self.entries.get(name).map(|entry| entry.clone())
    }

    /// Remove every entry referencing `server_id` (local termination).
    pub(crate) fn remove_server(&self, server_id: &hivesys_rt::util::ServerId) -> Vec<GlobalEntry> {
        let names: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| &entry.value().server.server_id == server_id)
            .map(|entry| entry.key().clone())
            .collect();
        names
            .into_iter()
            .filter_map(|name| self.entries.remove(&name).map(|(_, entry)| entry))
            .collect()
    }

    /// Remove every entry owned by a lost node.
    ///
    /// No broadcast is needed: every other node performs the same local
    /// cleanup when it observes the same `node_down`.
    pub(crate) fn on_node_down(&self, node: &NodeId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| &entry.origin != node);
        before - self.entries.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// The deterministic conflict rule.
fn beats(a: &GlobalEntry, b: &GlobalEntry) -> bool {
    if a.registered_at_us != b.registered_at_us {
        return a.registered_at_us < b.registered_at_us;
    }
    node_digest(&a.origin) < node_digest(&b.origin)
}

fn node_digest(node: &NodeId) -> [u8; 32] {
    let digest = Sha256::digest(node.to_string().as_bytes());
    digest.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hivesys_rt::util::ServerId;

    fn node(name: &str) -> NodeId {
        NodeId::parse(&format!("{name}@127.0.0.1:4369")).expect("node id")
    }

    fn entry(name: &str, origin: &NodeId, at_us: i64) -> GlobalEntry {
        GlobalEntry {
            name: name.to_string(),
            server: ServerRef::new(ServerId::new(), origin.clone()),
            registered_at_us: at_us,
            origin: origin.clone(),
        }
    }

    #[test]
    fn test_register_lookup_unregister() {
        let local = node("a");
        let registry = GlobalRegistry::new(local.clone());
        let server = ServerRef::new(ServerId::new(), local);

        registry.register("leader", server.clone()).expect("register");
        assert_eq!(registry.lookup("leader").expect("lookup"), server);

        registry.unregister("leader").expect("unregister");
        assert!(registry.whereis("leader").is_none());
        assert!(matches!(
            registry.lookup("leader"),
            Err(ClusterError::GlobalNameNotFound { .. })
        ));
    }

    #[test]
    fn test_cannot_unregister_foreign_entry() {
        let registry = GlobalRegistry::new(node("a"));
        let outcome = registry.merge(entry("leader", &node("b"), 1));
        assert_eq!(outcome, MergeOutcome::Inserted);

        assert!(matches!(
            registry.unregister("leader"),
            Err(ClusterError::NotGlobalOwner { .. })
        ));
    }

    #[test]
    fn test_earlier_registration_wins() {
        let registry = GlobalRegistry::new(node("a"));
        registry.merge(entry("leader", &node("b"), 200));

        // An earlier remote registration replaces the later one.
        let outcome = registry.merge(entry("leader", &node("c"), 100));
        assert!(matches!(outcome, MergeOutcome::Replaced { .. }));
        assert_eq!(registry.whereis("leader").expect("entry").origin, node("c"));

        // A later one is discarded.
        let outcome = registry.merge(entry("leader", &node("d"), 300));
        assert!(matches!(outcome, MergeOutcome::KeptExisting { .. }));
        assert_eq!(registry.whereis("leader").expect("entry").origin, node("c"));
    }

    #[test]
    fn test_tie_broken_by_origin_digest() {
        let b = node("b");
        let c = node("c");
        let lower = if node_digest(&b) < node_digest(&c) {
            b.clone()
        } else {
            c.clone()
        };

        // Apply in both orders; the same origin must win each time.
        let registry = GlobalRegistry::new(node("a"));
        registry.merge(entry("leader", &b, 100));
        registry.merge(entry("leader", &c, 100));
        assert_eq!(registry.whereis("leader").expect("entry").origin, lower);

        let registry = GlobalRegistry::new(node("a"));
        registry.merge(entry("leader", &c, 100));
        registry.merge(entry("leader", &b, 100));
        assert_eq!(registry.whereis("leader").expect("entry").origin, lower);
    }

    #[test]
    fn test_local_register_loses_to_earlier_entry() {
        let local = node("a");
        let registry = GlobalRegistry::new(local.clone());
        registry.merge(entry("leader", &node("b"), 1));

        let err = registry
            .register("leader", ServerRef::new(ServerId::new(), local))
            .unwrap_err();
        assert!(matches!(err, ClusterError::GlobalNameConflict { .. }));
    }

    #[test]
    fn test_node_down_cleanup() {
        let registry = GlobalRegistry::new(node("a"));
        registry.merge(entry("x", &node("b"), 1));
        registry.merge(entry("y", &node("b"), 2));
        registry.merge(entry("z", &node("c"), 3));

        assert_eq!(registry.on_node_down(&node("b")), 2);
        assert_eq!(registry.len(), 1);
        assert!(registry.whereis("z").is_some());
    }

    #[test]
    fn test_owned_entries_only() {
        let local = node("a");
        let registry = GlobalRegistry::new(local.clone());
        registry
            .register("mine", ServerRef::new(ServerId::new(), local))
            .expect("register");
        registry.merge(entry("theirs", &node("b"), 1));

        let owned = registry.owned_entries();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].name, "mine");
    }

    #[test]
    fn test_apply_unregister_requires_match() {
        let registry = GlobalRegistry::new(node("a"));
        let original = entry("leader", &node("b"), 1);
        registry.merge(original.clone());

        // A mismatched announcement does not remove the entry.
        let stale = entry("leader", &node("c"), 1);
        assert!(!registry.apply_unregister(&stale));
        assert!(registry.whereis("leader").is_some());

        assert!(registry.apply_unregister(&original));
        assert!(registry.whereis("leader").is_none());
    }
}
