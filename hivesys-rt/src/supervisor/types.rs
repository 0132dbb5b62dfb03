//! Type definitions for the supervisor framework.

// Layer 1: Standard library imports
use std::fmt;
use std::time::Duration;

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
use crate::server::behavior::BehaviorFactory;
use crate::server::mailbox::ServerStatus;
use crate::server::options::StartOptions;
use crate::util::ServerId;

/// Default graceful-shutdown bound per child (5 seconds).
pub const DEFAULT_CHILD_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Specification of one supervised child.
///
/// The factory produces a fresh behavior for every (re)start; the child's
/// identity is its `id`, not any particular server id.
#[derive(Clone)]
pub struct ChildSpec {
    /// Unique identifier within the supervisor.
    pub id: String,

    /// Factory producing a fresh behavior instance per (re)start.
    pub factory: BehaviorFactory,

    /// Start options applied to every instance of this child.
    pub options: StartOptions,

    /// When the child should be restarted after termination.
    pub restart: RestartPolicy,

    /// Graceful-stop bound; the child is force-terminated afterwards.
    pub shutdown_timeout: Duration,

    /// Participates in `auto_shutdown` accounting.
    pub significant: bool,
}

impl ChildSpec {
    /// A permanent child with default options.
    pub fn new(id: impl Into<String>, factory: BehaviorFactory) -> Self {
        Self {
            id: id.into(),
            factory,
            options: StartOptions::default(),
            restart: RestartPolicy::Permanent,
            shutdown_timeout: DEFAULT_CHILD_SHUTDOWN_TIMEOUT,
            significant: false,
        }
    }

    /// Start options applied to every instance.
    pub fn with_options(mut self, options: StartOptions) -> Self {
        self.options = options;
        self
    }

    /// Restart policy for this child.
    pub fn with_restart(mut self, restart: RestartPolicy) -> Self {
        self.restart = restart;
        self
    }

    /// Graceful-stop bound.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Mark the child significant for `auto_shutdown`.
    pub fn with_significant(mut self, significant: bool) -> Self {
        self.significant = significant;
        self
    }
}

impl fmt::Debug for ChildSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildSpec")
            .field("id", &self.id)
            .field("restart", &self.restart)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("significant", &self.significant)
            .finish_non_exhaustive()
    }
}

/// Restart policy for supervised children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    /// Always restart, regardless of exit reason.
    Permanent,

    /// Restart only after an abnormal exit (not `normal`/`shutdown`).
    Transient,

    /// Never restart; the child is removed from the set on termination.
    Temporary,
}

impl RestartPolicy {
    /// Whether this policy restarts a child that exited the given way.
    pub fn should_restart(&self, is_normal_exit: bool) -> bool {
        match self {
            RestartPolicy::Permanent => true,
            RestartPolicy::Transient => !is_normal_exit,
            RestartPolicy::Temporary => false,
        }
    }
}

/// Restart strategy applied when a child fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Restart only the failed child.
    OneForOne,

    /// Stop all children (reverse order), then start all (original order).
    OneForAll,

    /// Stop the failed child and every later one, then start them again.
    RestForOne,

    /// Template-based dynamic children; restarts replace only the failed
    /// child.
    SimpleOneForOne,
}

/// Sliding-window restart limit.
///
/// More than `max_restarts` restarts within `within` stops the supervisor
/// with `MaxRestartsExceeded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartIntensity {
    /// Maximum restarts tolerated inside the window.
    pub max_restarts: u32,

    /// Window length.
    pub within: Duration,
}

impl Default for RestartIntensity {
    fn default() -> Self {
        Self {
            max_restarts: 3,
            within: Duration::from_secs(5),
        }
    }
}

/// When a supervisor stops itself because significant children terminated.
///
/// Inapplicable to `SimpleOneForOne` supervisors, where it is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoShutdown {
    /// Never auto-stop (default).
    #[default]
    Never,

    /// Stop when any significant child terminates without restart.
    AnySignificant,

    /// Stop when every significant child has terminated.
    AllSignificant,
}

/// Supervisor-level configuration.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Restart strategy.
    pub strategy: Strategy,

    /// Sliding-window restart limit.
    pub intensity: RestartIntensity,

    /// Auto-shutdown policy for significant children.
    pub auto_shutdown: AutoShutdown,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            strategy: Strategy::OneForOne,
            intensity: RestartIntensity::default(),
            auto_shutdown: AutoShutdown::Never,
        }
    }
}

impl SupervisorOptions {
    /// Options with the given strategy and defaults otherwise.
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    /// Set the restart intensity.
    pub fn with_intensity(mut self, max_restarts: u32, within: Duration) -> Self {
        self.intensity = RestartIntensity {
            max_restarts,
            within,
        };
        self
    }

    /// Set the auto-shutdown policy.
    pub fn with_auto_shutdown(mut self, auto_shutdown: AutoShutdown) -> Self {
        self.auto_shutdown = auto_shutdown;
        self
    }
}

/// Public view of one child's current state.
#[derive(Debug, Clone, Serialize)]
pub struct ChildInfo {
    /// The child's id within its supervisor.
    pub id: String,

    /// Current server id, when running.
    pub server_id: Option<ServerId>,

    /// Whether the child's server is currently running.
    pub running: bool,

    /// Restarts performed for this child.
    pub restart_count: u32,

    /// Whether the child is marked significant.
    pub significant: bool,
}

/// Aggregate child counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChildCounts {
    /// Number of child specifications.
    pub specs: usize,

    /// Number of currently running children.
    pub active: usize,
}

/// Introspection snapshot for a supervisor.
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorStats {
    /// The supervisor's id.
    pub id: String,

    /// Current lifecycle status.
    pub status: ServerStatus,

    /// When the supervisor was started.
    pub started_at: DateTime<Utc>,

    /// Per-child state.
    pub children: Vec<ChildInfo>,

    /// Restarts currently inside the intensity window.
    pub restarts_in_window: usize,
}
