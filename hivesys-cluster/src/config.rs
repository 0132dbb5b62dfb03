//! Cluster configuration.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
use crate::error::ClusterError;
use crate::node::NodeId;

/// Holds every setting of one cluster node.
///
/// All fields except `node_name` have serde defaults, so a minimal TOML or
/// JSON document with just the name is a valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// This node's name (the part before `@` in its NodeId). Required.
    pub node_name: String,

    /// Bind address for the TCP listener.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port; `0` picks an ephemeral port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Host announced to peers; defaults to `host`, or `127.0.0.1` when
    /// binding to a wildcard address.
    #[serde(default)]
    pub advertise_host: Option<String>,

    /// Initial peers to dial, as `name@host:port` strings.
    #[serde(default)]
    pub seeds: Vec<String>,

    /// Enables HMAC-SHA256 frame authentication when set.
    #[serde(default)]
    pub cluster_secret: Option<String>,

    /// Heartbeat cadence in milliseconds.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Missed heartbeats before a peer is declared down.
    #[serde(default = "default_heartbeat_miss_threshold")]
    pub heartbeat_miss_threshold: u32,

    /// Reconnect backoff base in milliseconds.
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,

    /// Reconnect backoff ceiling in milliseconds.
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,

    /// Default timeout for remote calls, spawns, and monitor acks, in
    /// milliseconds.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Single-frame size ceiling in bytes; oversized frames are rejected
    /// without partial parsing.
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
}

impl ClusterConfig {
    /// A configuration with the given node name and defaults otherwise.
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            host: default_host(),
            port: default_port(),
            advertise_host: None,
            seeds: Vec::new(),
            cluster_secret: None,
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_miss_threshold: default_heartbeat_miss_threshold(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            call_timeout_ms: default_call_timeout_ms(),
            max_frame_len: default_max_frame_len(),
        }
    }

    /// Bind to a specific host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Bind to a specific port (`0` for ephemeral).
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Add a seed node to dial at startup.
    pub fn with_seed(mut self, seed: impl Into<String>) -> Self {
        self.seeds.push(seed.into());
        self
    }

    /// Enable frame authentication.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.cluster_secret = Some(secret.into());
        self
    }

    /// Set the heartbeat cadence.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the missed-heartbeat threshold.
    pub fn with_heartbeat_miss_threshold(mut self, threshold: u32) -> Self {
        self.heartbeat_miss_threshold = threshold;
        self
    }

    /// Set the default remote-operation timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Validate all settings.
    pub fn validate(&self) -> Result<(), ClusterError> {
        if !NodeId::is_valid_name(&self.node_name) {
            return Err(ClusterError::InvalidClusterConfig {
                reason: format!("invalid node_name '{}'", self.node_name),
            });
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(ClusterError::InvalidClusterConfig {
                reason: "heartbeat_interval_ms must be > 0".to_string(),
            });
        }
        if self.heartbeat_miss_threshold == 0 {
            return Err(ClusterError::InvalidClusterConfig {
                reason: "heartbeat_miss_threshold must be > 0".to_string(),
            });
        }
        if self.reconnect_base_delay_ms == 0
            || self.reconnect_max_delay_ms < self.reconnect_base_delay_ms
        {
            return Err(ClusterError::InvalidClusterConfig {
                reason: "reconnect delays must satisfy 0 < base <= max".to_string(),
            });
        }
        if self.call_timeout_ms == 0 {
            return Err(ClusterError::InvalidClusterConfig {
                reason: "call_timeout_ms must be > 0".to_string(),
            });
        }
        if self.max_frame_len < 1024 {
            return Err(ClusterError::InvalidClusterConfig {
                reason: "max_frame_len must be at least 1024 bytes".to_string(),
            });
        }
        for seed in &self.seeds {
            NodeId::parse(seed).map_err(|err| ClusterError::InvalidClusterConfig {
                reason: format!("invalid seed '{seed}': {err}"),
            })?;
        }
        Ok(())
    }

    /// The host peers should dial to reach this node.
    pub fn advertised_host(&self) -> String {
        if let Some(host) = &self.advertise_host {
            return host.clone();
        }
        if self.host == "0.0.0.0" || self.host == "::" || self.host == "[::]" {
            "127.0.0.1".to_string()
        } else {
            self.host.clone()
        }
    }

    /// Heartbeat cadence.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Silence span after which a peer is declared down.
    pub fn heartbeat_deadline(&self) -> Duration {
        Duration::from_millis(
            self.heartbeat_interval_ms
                .saturating_mul(u64::from(self.heartbeat_miss_threshold)),
        )
    }

    /// Reconnect backoff base.
    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    /// Reconnect backoff ceiling.
    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }

    /// Default remote-operation timeout.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Parsed seed node ids.
    pub fn seed_nodes(&self) -> Vec<NodeId> {
        self.seeds
            .iter()
            .filter_map(|seed| NodeId::parse(seed).ok())
            .collect()
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    4369
}
fn default_heartbeat_interval_ms() -> u64 {
    5000
}
fn default_heartbeat_miss_threshold() -> u32 {
    3
}
fn default_reconnect_base_delay_ms() -> u64 {
    1000
}
fn default_reconnect_max_delay_ms() -> u64 {
    30000
}
fn default_call_timeout_ms() -> u64 {
    5000
}
fn default_max_frame_len() -> usize {
    4 * 1024 * 1024
}
