//! Error types for supervisor operations.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
use crate::server::error::ServerError;

/// Errors that can occur during supervisor operations.
#[derive(Debug, Clone, Error)]
pub enum SupervisorError {
    /// A child with this id already exists.
    #[error("duplicate child id '{child_id}'")]
    DuplicateChild { child_id: String },

    /// No child with this id.
    #[error("child '{child_id}' not found")]
    ChildNotFound { child_id: String },

    /// Starting a child's server failed.
    #[error("failed to start child '{child_id}': {source}")]
    ChildStartFailed {
        child_id: String,
        #[source]
        source: ServerError,
    },

    /// The restart intensity limit was exceeded; the supervisor stopped.
    #[error(
        "supervisor '{supervisor_id}' exceeded {max_restarts} restarts in {within:?}"
    )]
    MaxRestartsExceeded {
        supervisor_id: String,
        max_restarts: u32,
        within: Duration,
    },

    /// Invalid supervisor configuration.
    #[error("invalid supervisor configuration: {reason}")]
    InvalidConfiguration { reason: String },

    /// A `simple_one_for_one` supervisor only accepts template arguments.
    #[error("supervisor '{supervisor_id}' only accepts template arguments")]
    SpecRejected { supervisor_id: String },

    /// The operation requires a `simple_one_for_one` supervisor.
    #[error("supervisor '{supervisor_id}' has no child template")]
    TemplateRequired { supervisor_id: String },

    /// Operation against a supervisor that is not running.
    #[error("supervisor '{supervisor_id}' is not running")]
    NotRunning { supervisor_id: String },
}
