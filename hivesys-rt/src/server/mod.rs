//! The server runtime: serialized message-processing units.
//!
//! A server owns a user behavior and processes its messages strictly one at
//! a time. Multiple servers run concurrently; within one server no two
//! handler invocations ever overlap, and the next message is not dequeued
//! until the current handler (including any I/O it awaits) completes.

pub mod behavior;
pub mod error;
pub mod mailbox;
pub mod options;
pub(crate) mod pump;

pub use behavior::{Behavior, BehaviorError, BehaviorFactory, ExitReason};
pub use error::ServerError;
pub use mailbox::{ServerStats, ServerStatus};
pub use options::StartOptions;
