//! Error types for local registry operations.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
// (none)

/// Errors surfaced by registry operations.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// Unique-mode key already has an entry.
    #[error("name '{name}' is already registered")]
    AlreadyRegistered { name: String },

    /// Lookup or unregister against a missing key.
    #[error("name '{name}' is not registered")]
    NotRegistered { name: String },

    /// A glob pattern failed to compile.
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}
