//! Supervision trees: child specs, restart strategies, intensity limits.
//!
//! A supervisor starts its children in declaration order, stops them in
//! reverse, and restarts them according to its strategy when they crash.
//! Restart intensity bounds how many restarts may happen inside a sliding
//! window before the supervisor gives up.

pub mod error;
pub mod intensity;
pub mod node;
pub mod types;

pub use error::SupervisorError;
pub use intensity::RestartWindow;
pub use node::Supervisor;
pub use types::{
    AutoShutdown, ChildCounts, ChildInfo, ChildSpec, RestartIntensity, RestartPolicy, Strategy,
    SupervisorOptions, SupervisorStats,
};
