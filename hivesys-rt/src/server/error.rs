//! Error types for server operations.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
use super::behavior::BehaviorError;
use crate::registry::RegistryError;
use crate::util::ServerId;

/// Errors surfaced by server operations.
///
/// Every pending call resolves as exactly one of: a reply, `CallTimeout`,
/// `NotRunning`, or (for remote calls) a peer-loss error at the cluster
/// layer. Results are never silently dropped.
#[derive(Debug, Clone, Error)]
pub enum ServerError {
    /// A call did not receive its reply in time.
    ///
    /// The message stays queued: if the handler still reaches it, the reply
    /// is produced and discarded.
    #[error("call to server '{server_id}' timed out after {timeout:?}")]
    CallTimeout {
        server_id: ServerId,
        timeout: Duration,
    },

    /// Operation against a server that is not in the `running` state.
    #[error("server '{server_id}' is not running")]
    NotRunning { server_id: ServerId },

    /// `init` returned an error or exceeded its timeout.
    #[error("server '{server_id}' failed to initialize: {cause}")]
    InitFailed { server_id: ServerId, cause: String },

    /// The server's bounded queue is full.
    #[error("server '{server_id}' is overloaded ({limit} queued messages)")]
    Overloaded { server_id: ServerId, limit: usize },

    /// `handle_call` failed; delivered to the caller as the call outcome.
    #[error("handler error from server '{server_id}': {source}")]
    Handler {
        server_id: ServerId,
        #[source]
        source: BehaviorError,
    },

    /// Registering the server's name failed during start.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}
