//! The behavior catalogue: name → behavior factory.
//!
//! Behaviors cannot cross node boundaries, so remote spawn works by name:
//! every participating node registers the same names for compatible
//! behaviors, and a spawn request is resolved against the receiver's
//! catalogue.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use dashmap::DashMap;

// Layer 3: Internal module imports
use crate::error::ClusterError;
use hivesys_rt::server::BehaviorFactory;

/// Node-local map from behavior name to factory.
///
/// The `Behavior` trait guarantees `init`, `handle_call` and `handle_cast`
/// exist, so registration only validates the name itself.
#[derive(Default)]
pub struct BehaviorCatalogue {
    entries: DashMap<String, BehaviorFactory>,
}

impl BehaviorCatalogue {
    /// Create an empty catalogue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `name`; duplicate names fail.
    pub fn register(
        &self,
        name: impl Into<String>,
        factory: BehaviorFactory,
    ) -> Result<(), ClusterError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ClusterError::InvalidClusterConfig {
                reason: "behavior name must not be empty".to_string(),
            });
        }
        match self.entries.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(ClusterError::BehaviorAlreadyRegistered { name })
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(factory);
                Ok(())
            }
        }
    }

    /// Look up a factory.
    pub fn get(&self, name: &str) -> Option<BehaviorFactory> {
        self.entries.get(name).map(|factory| factory.clone())
    }

    /// `true` if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Remove a registration; returns whether it existed.
    pub fn unregister(&self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }

    /// All registered names.
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of registered behaviors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove everything. Intended for tests.
    pub fn clear(&self) {
        self.entries.clear();
    }
}
