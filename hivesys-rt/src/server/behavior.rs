//! The `Behavior` trait: what a server does with its messages.

// Layer 1: Standard library imports
use std::fmt::{self, Display};
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// Layer 3: Internal module imports
// (none)

/// Error raised inside a behavior callback.
///
/// Behaviors signal failure by returning `Err`; the runtime never relies on
/// panics. Only the reason string crosses subsystem (and node) boundaries.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct BehaviorError {
    /// Human-readable failure reason.
    pub message: String,
}

impl BehaviorError {
    /// Create a new behavior error with the given reason.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for BehaviorError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for BehaviorError {
    fn from(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

/// Why a server left the `running` state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum ExitReason {
    /// Deliberate stop with no error.
    Normal,

    /// Stopped as part of a supervised or system shutdown.
    Shutdown,

    /// Stopped because a callback failed.
    Error(String),

    /// Force-terminated without waiting for the in-flight handler.
    Killed,
}

impl ExitReason {
    /// `true` for `Normal` and `Shutdown`; transient children are not
    /// restarted after a normal exit.
    pub fn is_normal_exit(&self) -> bool {
        matches!(self, ExitReason::Normal | ExitReason::Shutdown)
    }
}

impl Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Normal => write!(f, "normal"),
            ExitReason::Shutdown => write!(f, "shutdown"),
            ExitReason::Error(cause) => write!(f, "error: {cause}"),
            ExitReason::Killed => write!(f, "killed"),
        }
    }
}

/// The callbacks that define how a server reacts to messages.
///
/// The value implementing `Behavior` *is* the server's state: `init` is
/// invoked exactly once before any message, and after that the runtime
/// guarantees the callbacks see one message at a time, in enqueue order.
/// State therefore needs no synchronization of its own.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use hivesys_rt::server::{Behavior, BehaviorError};
/// use serde_json::{json, Value};
///
/// struct Counter {
///     count: i64,
/// }
///
/// #[async_trait]
/// impl Behavior for Counter {
///     async fn init(&mut self, args: Option<Value>) -> Result<(), BehaviorError> {
///         if let Some(start) = args.and_then(|a| a.as_i64()) {
///             self.count = start;
///         }
///         Ok(())
///     }
///
///     async fn handle_call(&mut self, _msg: Value) -> Result<Value, BehaviorError> {
///         Ok(json!(self.count))
///     }
///
///     async fn handle_cast(&mut self, _msg: Value) -> Result<(), BehaviorError> {
///         self.count += 1;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Behavior: Send + 'static {
    /// Initialize state before the server accepts any message.
    ///
    /// Runs under the configured init timeout; failure or timeout fails the
    /// start and the server is never observable as `running`.
    async fn init(&mut self, args: Option<Value>) -> Result<(), BehaviorError>;

    /// Handle a synchronous request and produce the reply.
    ///
    /// An `Err` is delivered to the caller as the call's outcome; the
    /// server keeps running.
    async fn handle_call(&mut self, msg: Value) -> Result<Value, BehaviorError>;

    /// Handle an asynchronous message.
    ///
    /// An `Err` crashes the server: it transitions to `stopped` and a
    /// `crashed` lifecycle event is emitted.
    async fn handle_cast(&mut self, msg: Value) -> Result<(), BehaviorError>;

    /// Cleanup hook invoked best-effort when the server stops.
    ///
    /// Errors are swallowed after being logged; they never affect the
    /// shutdown itself.
    async fn terminate(&mut self, _reason: &ExitReason) -> Result<(), BehaviorError> {
        Ok(())
    }

    /// Persistence hook: export a snapshot of the state for an external
    /// storage adapter. `None` opts out of persistence entirely.
    ///
    /// The runtime itself never calls this; it is the call point storage
    /// adapters build on.
    fn snapshot(&self) -> Option<Value> {
        None
    }

    /// Persistence hook: restore state from a snapshot previously produced
    /// by [`Behavior::snapshot`].
    async fn restore(&mut self, _snapshot: Value) -> Result<(), BehaviorError> {
        Ok(())
    }

    /// Rough estimate of the state's memory footprint, for introspection.
    fn state_size(&self) -> usize {
        std::mem::size_of_val(self)
    }
}

/// Factory producing fresh behavior instances.
///
/// Supervisors use factories to restart children; the behavior catalogue
/// uses them because behaviors themselves cannot cross node boundaries.
pub type BehaviorFactory = Arc<dyn Fn() -> Box<dyn Behavior> + Send + Sync>;
