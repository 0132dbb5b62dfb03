//! Runtime handle, configuration, and introspection.

pub mod config;
pub mod runtime;

pub use config::{RuntimeConfig, RuntimeConfigBuilder};
pub use runtime::Runtime;
