//! The registry table: key → server entries with metadata and queries.

// Layer 1: Standard library imports
use std::sync::Weak;

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use globset::GlobBuilder;
use serde_json::Value;

// Layer 3: Internal module imports
use super::error::RegistryError;
use crate::system::runtime::RuntimeInner;
use crate::util::ServerId;

/// How many entries one key may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryMode {
    /// One entry per key; duplicate registration fails.
    Unique,
    /// Unbounded entries per key.
    Duplicate,
}

/// One registration: a server id plus caller-chosen metadata.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    /// The registered server.
    pub server_id: ServerId,

    /// Opaque metadata supplied at registration time.
    pub metadata: Value,

    /// When the entry was created.
    pub registered_at: DateTime<Utc>,
}

/// A name registry scoped to one runtime.
///
/// The runtime owns a default instance; named instances are fully isolated
/// from each other and from the default. Entries pointing at a terminated
/// or crashed server are removed automatically as part of server teardown.
///
/// Keys are plain strings; glob queries treat `/` as a path separator: `*`
/// matches within one segment, `**` across segments, `?` a single
/// character.
pub struct Registry {
    name: String,
    mode: RegistryMode,
    entries: DashMap<String, Vec<RegistryEntry>>,
    runtime: Weak<RuntimeInner>,
}

impl Registry {
    pub(crate) fn new(
        name: impl Into<String>,
        mode: RegistryMode,
        runtime: Weak<RuntimeInner>,
    ) -> Self {
        Self {
            name: name.into(),
            mode,
            entries: DashMap::new(),
            runtime,
        }
    }

    /// This registry's name (`"default"` for the default instance).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// This registry's key mode.
    pub fn mode(&self) -> RegistryMode {
        self.mode
    }

    /// Register `server_id` under `key`.
    ///
    /// In unique mode a second registration for the same key fails with
    /// `AlreadyRegistered`; in duplicate mode entries accumulate.
    pub fn register(
        &self,
        key: &str,
        server_id: &ServerId,
        metadata: Option<Value>,
    ) -> Result<(), RegistryError> {
        let mut slot = self.entries.entry(key.to_string()).or_default();
        if self.mode == RegistryMode::Unique && !slot.is_empty() {
            return Err(RegistryError::AlreadyRegistered {
                name: key.to_string(),
            });
        }
        slot.push(RegistryEntry {
            server_id: server_id.clone(),
            metadata: metadata.unwrap_or(Value::Null),
            registered_at: Utc::now(),
        });
        Ok(())
    }

    /// Remove all entries under `key`, or only the one for `server` when
    /// given.
    pub fn unregister(
        &self,
        key: &str,
        server: Option<&ServerId>,
    ) -> Result<(), RegistryError> {
        match server {
            None => {
                let removed = self
                    .entries
                    .remove(key)
                    .map(|(_, entries)| !entries.is_empty())
                    .unwrap_or(false);
                if removed {
                    Ok(())
                } else {
                    Err(RegistryError::NotRegistered {
                        name: key.to_string(),
                    })
                }
            }
            Some(id) => {
                let removed = match self.entries.get_mut(key) {
                    Some(mut slot) => {
                        let before = slot.len();
                        slot.retain(|entry| &entry.server_id != id);
                        slot.len() != before
                    }
                    None => false,
                };
                self.entries.remove_if(key, |_, entries| entries.is_empty());
                if removed {
                    Ok(())
                } else {
                    Err(RegistryError::NotRegistered {
                        name: key.to_string(),
                    })
                }
            }
        }
    }

    /// First entry under `key`; errors on a miss.
    pub fn lookup(&self, key: &str) -> Result<RegistryEntry, RegistryError> {
        self.whereis(key).ok_or_else(|| RegistryError::NotRegistered {
            name: key.to_string(),
        })
    }

    /// Every entry under `key`; errors on a miss.
    pub fn lookup_all(&self, key: &str) -> Result<Vec<RegistryEntry>, RegistryError> {
        match self.entries.get(key) {
            Some(slot) if !slot.is_empty() => Ok(slot.clone()),
            _ => Err(RegistryError::NotRegistered {
                name: key.to_string(),
            }),
        }
    }

    /// First entry under `key`, or `None`.
    pub fn whereis(&self, key: &str) -> Option<RegistryEntry> {
        self.entries
            .get(key)
            .and_then(|slot| slot.first().cloned())
    }

    /// `true` if `key` has at least one entry.
    pub fn is_registered(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .map(|slot| !slot.is_empty())
            .unwrap_or(false)
    }

    /// Total entry count across all keys.
    pub fn len(&self) -> usize {
        self.entries.iter().map(|slot| slot.len()).sum()
    }

    /// `true` when no entries exist.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entry count under a single key.
    pub fn count_for_key(&self, key: &str) -> usize {
        self.entries.get(key).map(|slot| slot.len()).unwrap_or(0)
    }

    /// All `(key, entry)` pairs matching the predicate.
    pub fn select<F>(&self, predicate: F) -> Vec<(String, RegistryEntry)>
    where
        F: Fn(&str, &RegistryEntry) -> bool,
    {
        let mut matches = Vec::new();
        for slot in self.entries.iter() {
            for entry in slot.value() {
                if predicate(slot.key(), entry) {
                    matches.push((slot.key().clone(), entry.clone()));
                }
            }
        }
        matches
    }

    /// All `(key, entry)` pairs whose key matches the glob pattern.
    pub fn match_pattern(
        &self,
        pattern: &str,
    ) -> Result<Vec<(String, RegistryEntry)>, RegistryError> {
        self.match_select(pattern, |_, _| true)
    }

    /// Glob match combined with an entry predicate.
    pub fn match_select<F>(
        &self,
        pattern: &str,
        predicate: F,
    ) -> Result<Vec<(String, RegistryEntry)>, RegistryError>
    where
        F: Fn(&str, &RegistryEntry) -> bool,
    {
        let matcher = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|err| RegistryError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: err.to_string(),
            })?
            .compile_matcher();
        Ok(self.select(|key, entry| matcher.is_match(key) && predicate(key, entry)))
    }

    /// Cast `msg` to every server registered under `key`.
    ///
    /// Returns the number of servers the message was enqueued to; servers
    /// that are no longer running are skipped.
    pub fn dispatch(&self, key: &str, msg: &Value) -> usize {
        let ids: Vec<ServerId> = match self.entries.get(key) {
            Some(slot) => slot.iter().map(|entry| entry.server_id.clone()).collect(),
            None => return 0,
        };
        let Some(runtime) = self.runtime.upgrade() else {
            return 0;
        };
        ids.iter()
            .filter(|id| runtime.cast(id, msg.clone()).is_ok())
            .count()
    }

    /// Rewrite the metadata of every entry under `key`.
    ///
    /// Returns the number of entries updated.
    pub fn update_metadata<F>(&self, key: &str, mut update: F) -> Result<usize, RegistryError>
    where
        F: FnMut(Value) -> Value,
    {
        let mut slot = self
            .entries
            .get_mut(key)
            .ok_or_else(|| RegistryError::NotRegistered {
                name: key.to_string(),
            })?;
        let mut updated = 0;
        for entry in slot.iter_mut() {
            let current = std::mem::replace(&mut entry.metadata, Value::Null);
            entry.metadata = update(current);
            updated += 1;
        }
        Ok(updated)
    }

    /// Drop every entry referencing `server_id` (server teardown path).
    pub(crate) fn remove_server(&self, server_id: &ServerId) {
        self.entries.retain(|_, entries| {
            entries.retain(|entry| &entry.server_id != server_id);
            !entries.is_empty()
        });
    }
}
