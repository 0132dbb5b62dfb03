//! Shared utilities: opaque identifiers used across the runtime.

pub mod ids;

pub use ids::{CallId, MonitorId, ServerId, SpawnId};
