//! Node identity and peer bookkeeping types.

// Layer 1: Standard library imports
use std::cmp::Ordering;
use std::fmt::{self, Display};
use std::net::{Ipv4Addr, Ipv6Addr};

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// Layer 3: Internal module imports
use hivesys_rt::util::ServerId;

#[allow(clippy::unwrap_used)]
static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_-]{0,63}$").unwrap());

#[allow(clippy::unwrap_used)]
static HOSTNAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9-]{0,62})?(\.[A-Za-z0-9]([A-Za-z0-9-]{0,62})?)*$")
        .unwrap()
});

/// Errors from parsing or validating a node id.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeIdError {
    /// Input does not match `name@host:port`.
    #[error("invalid node id '{input}': expected name@host:port")]
    InvalidFormat { input: String },

    /// Name must start with a letter and contain only alphanumerics,
    /// underscores or hyphens (max 64 chars).
    #[error("invalid node name '{name}'")]
    InvalidName { name: String },

    /// Host must be an IPv4 address, a bracketed IPv6 address, or a
    /// hostname.
    #[error("invalid host '{host}'")]
    InvalidHost { host: String },

    /// Port must be in 1..=65535.
    #[error("invalid port '{value}'")]
    InvalidPort { value: String },
}

/// Identity of one cluster node: `name@host:port`.
///
/// Formatting a parsed id reproduces the accepted string exactly:
/// `NodeId::parse(s)?.to_string() == s`. Ordering is lexicographic on the
/// formatted string; the transport's simultaneous-dial tiebreaker relies
/// on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId {
    name: String,
    host: String,
    port: u16,
}

impl NodeId {
    /// Build a node id from validated components.
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Result<Self, NodeIdError> {
        let name = name.into();
        let host = host.into();
        if !Self::is_valid_name(&name) {
            return Err(NodeIdError::InvalidName { name });
        }
        if !Self::is_valid_host(&host) {
            return Err(NodeIdError::InvalidHost { host });
        }
        if port == 0 {
            return Err(NodeIdError::InvalidPort {
                value: port.to_string(),
            });
        }
        Ok(Self { name, host, port })
    }

    /// Parse `name@host:port`.
    pub fn parse(input: &str) -> Result<Self, NodeIdError> {
        let (name, rest) = input.split_once('@').ok_or_else(|| NodeIdError::InvalidFormat {
            input: input.to_string(),
        })?;
        let (host, port_str) = rest.rsplit_once(':').ok_or_else(|| NodeIdError::InvalidFormat {
            input: input.to_string(),
        })?;
        let port: u16 = port_str.parse().map_err(|_| NodeIdError::InvalidPort {
            value: port_str.to_string(),
        })?;
        Self::new(name, host, port)
    }

    /// The node name component.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The host component, as given (IPv6 hosts keep their brackets).
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The host with IPv6 brackets stripped, suitable for dialing.
    pub fn dial_host(&self) -> &str {
        self.host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(&self.host)
    }

    /// The port component.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Validate a node name in isolation (used by config validation).
    pub fn is_valid_name(name: &str) -> bool {
        NAME_RE.is_match(name)
    }

    fn is_valid_host(host: &str) -> bool {
        if let Some(inner) = host.strip_prefix('[') {
            return matches!(inner.strip_suffix(']'), Some(addr) if addr.parse::<Ipv6Addr>().is_ok());
        }
        if host.parse::<Ipv4Addr>().is_ok() {
            return true;
        }
        HOSTNAME_RE.is_match(host)
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.name, self.host, self.port)
    }
}

impl Ord for NodeId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_string().cmp(&other.to_string())
    }
}

impl PartialOrd for NodeId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl TryFrom<String> for NodeId {
    type Error = NodeIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.to_string()
    }
}

/// The only cross-node way to denote a server; no live handle ever crosses
/// a node boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerRef {
    /// The server's id on its owning node.
    pub server_id: ServerId,

    /// The owning node.
    pub node: NodeId,
}

impl ServerRef {
    /// Build a reference from parts.
    pub fn new(server_id: ServerId, node: NodeId) -> Self {
        Self { server_id, node }
    }
}

impl Display for ServerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.server_id, self.node)
    }
}

/// Connection status of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerStatus {
    /// A dial is in progress.
    Connecting,
    /// Handshake completed; heartbeats are flowing.
    Connected,
    /// Declared down; may re-enter `Connecting` via backoff.
    Disconnected,
}

/// What a node knows about one peer (or itself).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    /// The node's identity.
    pub id: NodeId,

    /// Connection status as seen locally.
    pub status: PeerStatus,

    /// Number of servers hosted on that node (from its last heartbeat).
    pub process_count: usize,

    /// When the last heartbeat from this node arrived.
    pub last_heartbeat_at: Option<DateTime<Utc>>,

    /// The node's uptime in milliseconds (from its last heartbeat).
    pub uptime_ms: u64,
}

/// Why a node was declared down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeDownReason {
    /// Too many heartbeats missed.
    HeartbeatTimeout,
    /// The connection dropped.
    ConnectionClosed,
    /// A dial attempt was refused.
    ConnectionRefused,
    /// The node announced a clean departure.
    GracefulShutdown,
}

impl Display for NodeDownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            NodeDownReason::HeartbeatTimeout => "heartbeat_timeout",
            NodeDownReason::ConnectionClosed => "connection_closed",
            NodeDownReason::ConnectionRefused => "connection_refused",
            NodeDownReason::GracefulShutdown => "graceful_shutdown",
        };
        write!(f, "{text}")
    }
}
