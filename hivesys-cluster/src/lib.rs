//! # hivesys-cluster - Distribution Layer for hivesys-rt
//!
//! Federates hivesys runtimes into a cluster of peer nodes that can
//! transparently address, spawn, monitor, and supervise each other's
//! servers:
//!
//! - peer-to-peer discovery via seeds and heartbeat gossip
//! - authenticated, length-prefixed TCP framing with reconnection backoff
//! - remote call/cast with correlated replies and typed timeouts
//! - remote spawn via a pre-registered behavior catalogue
//! - cross-node monitors with `noconnection` semantics
//! - a cluster-wide name registry with deterministic conflict resolution
//! - a distributed supervisor that re-places children on node failure
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use hivesys_cluster::prelude::*;
//! use hivesys_rt::system::{Runtime, RuntimeConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = Runtime::new(RuntimeConfig::default());
//! let config = ClusterConfig::new("node1")
//!     .with_port(4369)
//!     .with_seed("node2@10.0.0.2:4369");
//! let cluster = Cluster::new(config, runtime)?;
//! let local = cluster.start().await?;
//! println!("joined as {local}");
//! # Ok(())
//! # }
//! ```
//!
//! # Consistency Notes
//!
//! Message delivery over a single peer connection is FIFO and reliable
//! until the peer is declared down; replies are correlated by id, never by
//! position. The global registry is eventually consistent: nodes may
//! briefly disagree about a name during a conflict, but every node applies
//! the same resolution rule to the same inputs and converges.

pub mod catalogue;
pub mod cluster;
pub mod config;
pub mod dist_supervisor;
pub mod error;
pub(crate) mod global;
pub(crate) mod membership;
pub(crate) mod monitor;
pub mod node;
pub mod pending;
pub mod proto;
pub(crate) mod spawn;
pub(crate) mod transport;

// Re-export commonly used types
pub use catalogue::BehaviorCatalogue;
pub use cluster::{Cluster, ClusterStats, ClusterStatus};
pub use config::ClusterConfig;
pub use dist_supervisor::{
    DistributedChildInfo, DistributedChildSpec, DistributedSupervisor,
    DistributedSupervisorOptions, DistributedSupervisorStats, NodeSelector,
};
pub use error::ClusterError;
pub use node::{NodeDownReason, NodeId, NodeIdError, NodeInfo, PeerStatus, ServerRef};
pub use pending::PendingStats;
pub use proto::{DownReason, GlobalEntry, SpawnOptions};

/// Convenience re-exports for application code.
pub mod prelude {
    pub use crate::catalogue::BehaviorCatalogue;
    pub use crate::cluster::{Cluster, ClusterStatus};
    pub use crate::config::ClusterConfig;
    pub use crate::dist_supervisor::{
        DistributedChildSpec, DistributedSupervisor, DistributedSupervisorOptions, NodeSelector,
    };
    pub use crate::error::ClusterError;
    pub use crate::node::{NodeId, NodeInfo, ServerRef};
    pub use crate::proto::SpawnOptions;
}
