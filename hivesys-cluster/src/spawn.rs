//! Inbound side of remote spawn.
//!
//! The outbound side lives on the `Cluster` facade (it needs the pending
//! table and transport); this module holds the receiver-side handler so it
//! can be exercised without a socket.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use tracing::{debug, warn};

// Layer 3: Internal module imports
use crate::catalogue::BehaviorCatalogue;
use crate::node::NodeId;
use crate::proto::{ClusterMessage, SpawnErrorKind, SpawnOptions};
use hivesys_rt::system::Runtime;
use hivesys_rt::util::SpawnId;

/// Handle a `spawn_request`: resolve the behavior in the catalogue, start
/// it, and produce the reply message.
///
/// On a catalogue miss the error message carries the behavior name
/// verbatim, so the caller can reconstruct a typed `BehaviorNotFound`.
pub(crate) async fn handle_spawn_request(
    runtime: &Runtime,
    catalogue: &BehaviorCatalogue,
    local: &NodeId,
    spawn_id: SpawnId,
    behavior: &str,
    options: SpawnOptions,
) -> ClusterMessage {
    let Some(factory) = catalogue.get(behavior) else {
        debug!(behavior, "spawn request for unknown behavior");
        return ClusterMessage::SpawnError {
            spawn_id,
            error: SpawnErrorKind::BehaviorNotFound,
            message: behavior.to_string(),
        };
    };

    match runtime.start(factory(), options.to_start_options()).await {
        Ok(server_id) => {
            debug!(behavior, server_id = %server_id, "remote spawn succeeded");
            ClusterMessage::SpawnReply {
                spawn_id,
                server_id,
                node: local.clone(),
            }
        }
        Err(err) => {
            warn!(behavior, error = %err, "remote spawn failed");
            ClusterMessage::SpawnError {
                spawn_id,
                error: SpawnErrorKind::InitFailed,
                message: err.to_string(),
            }
        }
    }
}
