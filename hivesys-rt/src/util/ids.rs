// Layer 1: Standard library imports
use std::fmt::{self, Display};

// Layer 2: Third-party crate imports
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Layer 3: Internal module imports
// (none)

/// Builds an opaque identifier from a prefix, a millisecond time component,
/// and UUIDv4 randomness.
///
/// The time component makes ids roughly sortable in logs; the random
/// component guarantees process-wide uniqueness. Consumers must treat the
/// result as opaque and only compare or hash it.
fn opaque_id(prefix: &str) -> String {
    format!(
        "{prefix}-{}-{}",
        Utc::now().timestamp_millis(),
        Uuid::new_v4().simple()
    )
}

/// Unique identifier for a server within a process.
///
/// A `ServerId` is never reused within a process: every `start` allocates a
/// fresh one, including restarts of the same supervised child.
///
/// # Example
/// ```rust
/// use hivesys_rt::util::ServerId;
///
/// let id1 = ServerId::new();
/// let id2 = ServerId::new();
/// assert_ne!(id1, id2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(String);

impl ServerId {
    /// Generate a new unique server id.
    pub fn new() -> Self {
        Self(opaque_id("srv"))
    }

    /// Reconstruct a server id from its string form (e.g. off the wire).
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// The underlying opaque string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ServerId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlation id for a call awaiting its reply.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    /// Generate a new unique call id.
    pub fn new() -> Self {
        Self(opaque_id("call"))
    }

    /// Reconstruct a call id from its string form.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// The underlying opaque string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlation id for a monitor; single-shot, removed after delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonitorId(String);

impl MonitorId {
    /// Generate a new unique monitor id.
    pub fn new() -> Self {
        Self(opaque_id("mon"))
    }

    /// Reconstruct a monitor id from its string form.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// The underlying opaque string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MonitorId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for MonitorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlation id for a remote spawn request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpawnId(String);

impl SpawnId {
    /// Generate a new unique spawn id.
    pub fn new() -> Self {
        Self(opaque_id("spawn"))
    }

    /// Reconstruct a spawn id from its string form.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// The underlying opaque string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SpawnId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for SpawnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
