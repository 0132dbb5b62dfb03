//! Process-wide lifecycle event stream.
//!
//! Every server transition (`started`, `terminated`, `crashed`), every
//! supervisor restart, and every cluster-level observation (`node_up`,
//! `node_down`, `process_down`, `child_migrated`, `conflict_resolved`) is
//! published here. Delivery to subscribers is best-effort and never blocks
//! the emitter; events for a single server are observed in the order that
//! server produced them.

pub mod publisher;
pub mod types;

pub use publisher::{EventPublisher, EventSubscription, DEFAULT_EVENT_CAPACITY};
pub use types::{LifecycleEvent, LifecycleEventKind};
