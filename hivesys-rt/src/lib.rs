//! # hivesys-rt - OTP-Style Server Runtime
//!
//! Single-node core of the hivesys stack: isolated, serialized
//! message-processing servers, a local name registry, supervision trees
//! with BEAM-inspired restart strategies, and a process-wide lifecycle
//! event stream.
//!
//! # Quick Start
//!
//! ```rust
//! use async_trait::async_trait;
//! use hivesys_rt::prelude::*;
//! use serde_json::{json, Value};
//!
//! struct Counter {
//!     count: i64,
//! }
//!
//! #[async_trait]
//! impl Behavior for Counter {
//!     async fn init(&mut self, _args: Option<Value>) -> Result<(), BehaviorError> {
//!         Ok(())
//!     }
//!
//!     async fn handle_call(&mut self, _msg: Value) -> Result<Value, BehaviorError> {
//!         Ok(json!(self.count))
//!     }
//!
//!     async fn handle_cast(&mut self, _msg: Value) -> Result<(), BehaviorError> {
//!         self.count += 1;
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = Runtime::new(RuntimeConfig::default());
//!     let id = runtime.start(Box::new(Counter { count: 0 }), StartOptions::new()).await?;
//!
//!     runtime.cast(&id, json!("inc"))?;
//!     let count = runtime.call(&id, json!("get"), None).await?;
//!     assert_eq!(count, json!(1));
//!
//!     runtime.stop(&id, None).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Behavioral Contract
//!
//! - A server's messages are delivered to its behavior in enqueue order;
//!   no two handler invocations for the same server ever overlap.
//! - `handle_call` errors travel to the caller; the server keeps running.
//! - `handle_cast` and `init` errors crash the server and emit a `crashed`
//!   lifecycle event.
//! - A call timeout resolves the caller with `CallTimeout` but leaves the
//!   message queued; a late reply is discarded.
//! - Server ids are never reused within a process.
//!
//! # Module Organization
//!
//! - [`server`] - Behavior trait, start options, per-server statistics
//! - [`registry`] - Local name registry (unique/duplicate modes, globs)
//! - [`supervisor`] - Supervision trees and restart strategies
//! - [`events`] - Lifecycle event stream
//! - [`system`] - The `Runtime` handle and its configuration
//! - [`util`] - Opaque identifiers

pub mod events;
pub mod registry;
pub mod server;
pub mod supervisor;
pub mod system;
pub mod util;

// Re-export commonly used types
pub use events::{EventPublisher, EventSubscription, LifecycleEvent, LifecycleEventKind};
pub use registry::{Registry, RegistryEntry, RegistryError, RegistryMode};
pub use server::{
    Behavior, BehaviorError, BehaviorFactory, ExitReason, ServerError, ServerStats, ServerStatus,
    StartOptions,
};
pub use supervisor::{
    AutoShutdown, ChildCounts, ChildInfo, ChildSpec, RestartIntensity, RestartPolicy, Strategy,
    Supervisor, SupervisorError, SupervisorOptions, SupervisorStats,
};
pub use system::{Runtime, RuntimeConfig};
pub use util::{CallId, MonitorId, ServerId, SpawnId};

/// Convenience re-exports for application code.
pub mod prelude {
    pub use crate::events::{LifecycleEvent, LifecycleEventKind};
    pub use crate::server::{Behavior, BehaviorError, ExitReason, ServerError, StartOptions};
    pub use crate::supervisor::{
        ChildSpec, RestartPolicy, Strategy, Supervisor, SupervisorOptions,
    };
    pub use crate::system::{Runtime, RuntimeConfig};
    pub use crate::util::ServerId;
}
