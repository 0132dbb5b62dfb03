//! The supervisor implementation.
//!
//! A supervisor does not process messages of its own; its job is to keep a
//! set of children alive according to its strategy. It watches the runtime
//! lifecycle stream: when a tracked server terminates or crashes, the
//! supervisor applies the child's restart policy, the restart strategy, and
//! the intensity window, in that order.

// Layer 1: Standard library imports
use std::sync::{Arc, Weak};
use std::time::Duration;

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

// Layer 3: Internal module imports
use super::error::SupervisorError;
use super::intensity::RestartWindow;
use super::types::{
    AutoShutdown, ChildCounts, ChildInfo, ChildSpec, RestartIntensity, Strategy,
    SupervisorOptions, SupervisorStats,
};
use crate::events::{EventSubscription, LifecycleEventKind};
use crate::server::behavior::ExitReason;
use crate::server::mailbox::ServerStatus;
use crate::system::runtime::Runtime;
use crate::util::ServerId;

/// Runtime record of one supervised child.
struct ChildRecord {
    spec: ChildSpec,
    server_id: Option<ServerId>,
    running: bool,
    restart_count: u32,
}

impl ChildRecord {
    fn info(&self) -> ChildInfo {
        ChildInfo {
            id: self.spec.id.clone(),
            server_id: self.server_id.clone(),
            running: self.running,
            restart_count: self.restart_count,
            significant: self.spec.significant,
        }
    }
}

/// Mutable supervisor state, guarded by one async lock.
struct SupState {
    children: Vec<ChildRecord>,
    window: RestartWindow,
    failure: Option<SupervisorError>,
    dyn_counter: u64,
}

/// Shared core behind `Supervisor` handles and the watcher task.
pub struct SupervisorInner {
    id: String,
    runtime: Runtime,
    strategy: Strategy,
    intensity: RestartIntensity,
    auto_shutdown: AutoShutdown,
    template: Option<ChildSpec>,
    started_at: DateTime<Utc>,
    status: RwLock<ServerStatus>,
    state: Mutex<SupState>,
    watcher: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

/// A supervision-tree node.
///
/// # Example
///
/// ```rust,no_run
/// use hivesys_rt::supervisor::{ChildSpec, Supervisor, SupervisorOptions, Strategy};
/// use hivesys_rt::system::{Runtime, RuntimeConfig};
/// use std::sync::Arc;
///
/// # use async_trait::async_trait;
/// # use hivesys_rt::server::{Behavior, BehaviorError};
/// # use serde_json::Value;
/// # struct Worker;
/// # #[async_trait]
/// # impl Behavior for Worker {
/// #     async fn init(&mut self, _: Option<Value>) -> Result<(), BehaviorError> { Ok(()) }
/// #     async fn handle_call(&mut self, _: Value) -> Result<Value, BehaviorError> { Ok(Value::Null) }
/// #     async fn handle_cast(&mut self, _: Value) -> Result<(), BehaviorError> { Ok(()) }
/// # }
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let runtime = Runtime::new(RuntimeConfig::default());
/// let supervisor = Supervisor::start(
///     &runtime,
///     "workers",
///     SupervisorOptions::new(Strategy::OneForOne),
///     vec![ChildSpec::new("worker-1", Arc::new(|| Box::new(Worker)))],
/// )
/// .await?;
/// assert_eq!(supervisor.count_children().await.active, 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<SupervisorInner>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("id", &self.inner.id)
            .finish()
    }
}

impl Supervisor {
    /// Start a supervisor and its children, in declaration order.
    ///
    /// If any child fails to start, already-started children are stopped in
    /// reverse order and the start fails.
    ///
    /// For `Strategy::SimpleOneForOne` exactly one spec must be given; it
    /// becomes the template and no child is started until
    /// [`Supervisor::start_child_with_args`] is called.
    pub async fn start(
        runtime: &Runtime,
        id: impl Into<String>,
        options: SupervisorOptions,
        children: Vec<ChildSpec>,
    ) -> Result<Supervisor, SupervisorError> {
        let id = id.into();
        let simple = options.strategy == Strategy::SimpleOneForOne;

        if simple {
            if children.len() != 1 {
                return Err(SupervisorError::InvalidConfiguration {
                    reason: "simple_one_for_one requires exactly one template spec".into(),
                });
            }
        } else {
            for (i, spec) in children.iter().enumerate() {
                if children[..i].iter().any(|other| other.id == spec.id) {
                    return Err(SupervisorError::DuplicateChild {
                        child_id: spec.id.clone(),
                    });
                }
            }
        }

        let inner = Arc::new(SupervisorInner {
            template: simple.then(|| children[0].clone()),
            id,
            runtime: runtime.clone(),
            strategy: options.strategy,
            intensity: options.intensity,
            auto_shutdown: options.auto_shutdown,
            started_at: Utc::now(),
            status: RwLock::new(ServerStatus::Initializing),
            state: Mutex::new(SupState {
                children: Vec::new(),
                window: RestartWindow::new(
                    options.intensity.max_restarts,
                    options.intensity.within,
                ),
                failure: None,
                dyn_counter: 0,
            }),
            watcher: parking_lot::Mutex::new(None),
        });

        // Subscribe before starting children so no termination is missed.
        let subscription = runtime.subscribe();

        if !simple {
            let mut state = inner.state.lock().await;
            for spec in children {
                match inner.spawn_child(&spec, None).await {
                    Ok(server_id) => state.children.push(ChildRecord {
                        spec,
                        server_id: Some(server_id),
                        running: true,
                        restart_count: 0,
                    }),
                    Err(err) => {
                        warn!(supervisor_id = %inner.id, error = %err, "startup rollback");
                        for record in state.children.iter_mut().rev() {
                            if let Some(server_id) = record.server_id.take() {
                                record.running = false;
                                inner
                                    .stop_server(&server_id, record.spec.shutdown_timeout)
                                    .await;
                            }
                        }
                        *inner.status.write() = ServerStatus::Stopped;
                        return Err(err);
                    }
                }
            }
        }

        *inner.status.write() = ServerStatus::Running;
        let watcher = tokio::spawn(watch(Arc::downgrade(&inner), subscription));
        *inner.watcher.lock() = Some(watcher);
        runtime
            .inner
            .supervisors
            .insert(inner.id.clone(), Arc::downgrade(&inner));
        info!(supervisor_id = %inner.id, strategy = ?inner.strategy, "supervisor started");
        Ok(Supervisor { inner })
    }

    /// The supervisor's id.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Current lifecycle status.
    pub fn status(&self) -> ServerStatus {
        *self.inner.status.read()
    }

    /// The terminal error, once the supervisor has given up.
    pub async fn failure(&self) -> Option<SupervisorError> {
        self.inner.state.lock().await.failure.clone()
    }

    /// Add and start a new child from a full spec.
    ///
    /// Rejected by `simple_one_for_one` supervisors, which accept only
    /// template arguments.
    pub async fn start_child(&self, spec: ChildSpec) -> Result<ServerId, SupervisorError> {
        self.inner.ensure_running()?;
        if self.inner.strategy == Strategy::SimpleOneForOne {
            return Err(SupervisorError::SpecRejected {
                supervisor_id: self.inner.id.clone(),
            });
        }
        let mut state = self.inner.state.lock().await;
        if state.children.iter().any(|c| c.spec.id == spec.id) {
            return Err(SupervisorError::DuplicateChild {
                child_id: spec.id.clone(),
            });
        }
        let server_id = self.inner.spawn_child(&spec, None).await?;
        state.children.push(ChildRecord {
            spec,
            server_id: Some(server_id.clone()),
            running: true,
            restart_count: 0,
        });
        Ok(server_id)
    }

    /// Start a dynamic child from the template with the given init args.
    ///
    /// Only valid on `simple_one_for_one` supervisors.
    pub async fn start_child_with_args(
        &self,
        args: Option<Value>,
    ) -> Result<ServerId, SupervisorError> {
        self.inner.ensure_running()?;
        let template =
            self.inner
                .template
                .as_ref()
                .ok_or_else(|| SupervisorError::TemplateRequired {
                    supervisor_id: self.inner.id.clone(),
                })?;
        let mut state = self.inner.state.lock().await;
        state.dyn_counter += 1;
        let mut spec = template.clone();
        spec.id = format!("{}-{}", template.id, state.dyn_counter);
        let server_id = self.inner.spawn_child(&spec, args).await?;
        state.children.push(ChildRecord {
            spec,
            server_id: Some(server_id.clone()),
            running: true,
            restart_count: 0,
        });
        Ok(server_id)
    }

    /// Stop a child. Dynamic and temporary children are removed from the
    /// set; others keep their spec and can be restarted.
    pub async fn terminate_child(&self, child_id: &str) -> Result<(), SupervisorError> {
        self.inner.ensure_running()?;
        let mut state = self.inner.state.lock().await;
        let idx = state
            .children
            .iter()
            .position(|c| c.spec.id == child_id)
            .ok_or_else(|| SupervisorError::ChildNotFound {
                child_id: child_id.to_string(),
            })?;
        let record = &mut state.children[idx];
        let timeout = record.spec.shutdown_timeout;
        record.running = false;
        if let Some(server_id) = record.server_id.take() {
            self.inner.stop_server(&server_id, timeout).await;
        }
        let remove = self.inner.strategy == Strategy::SimpleOneForOne
            || state.children[idx].spec.restart
                == super::types::RestartPolicy::Temporary;
        if remove {
            state.children.remove(idx);
        }
        Ok(())
    }

    /// Manually restart a child (stopping it first if running).
    ///
    /// Manual restarts do not count toward restart intensity.
    pub async fn restart_child(&self, child_id: &str) -> Result<ServerId, SupervisorError> {
        self.inner.ensure_running()?;
        let mut state = self.inner.state.lock().await;
        let idx = state
            .children
            .iter()
            .position(|c| c.spec.id == child_id)
            .ok_or_else(|| SupervisorError::ChildNotFound {
                child_id: child_id.to_string(),
            })?;

        let timeout = state.children[idx].spec.shutdown_timeout;
        let old_id = state.children[idx].server_id.take();
        let was_running = state.children[idx].running;
        state.children[idx].running = false;
        if was_running {
            if let Some(old) = &old_id {
                self.inner.stop_server(old, timeout).await;
            }
        }

        let spec = state.children[idx].spec.clone();
        let server_id = self.inner.spawn_child(&spec, None).await?;
        state.children[idx].server_id = Some(server_id.clone());
        state.children[idx].running = true;
        state.children[idx].restart_count += 1;
        if let Some(old) = old_id {
            self.inner.runtime.events().publish(LifecycleEventKind::Restarted {
                supervisor_id: self.inner.id.clone(),
                child_id: child_id.to_string(),
                old_server_id: old,
                new_server_id: server_id.clone(),
            });
        }
        Ok(server_id)
    }

    /// Current state of every child, in insertion order.
    pub async fn get_children(&self) -> Vec<ChildInfo> {
        let state = self.inner.state.lock().await;
        state.children.iter().map(ChildRecord::info).collect()
    }

    /// Current state of one child.
    pub async fn get_child(&self, child_id: &str) -> Option<ChildInfo> {
        let state = self.inner.state.lock().await;
        state
            .children
            .iter()
            .find(|c| c.spec.id == child_id)
            .map(ChildRecord::info)
    }

    /// Aggregate child counts.
    pub async fn count_children(&self) -> ChildCounts {
        let state = self.inner.state.lock().await;
        ChildCounts {
            specs: state.children.len(),
            active: state.children.iter().filter(|c| c.running).count(),
        }
    }

    /// Introspection snapshot.
    pub async fn stats(&self) -> SupervisorStats {
        self.inner.stats().await
    }

    /// Stop every child in reverse order and stop the supervisor.
    pub async fn shutdown(&self) {
        self.inner.shutdown().await;
    }
}

impl SupervisorInner {
    fn ensure_running(&self) -> Result<(), SupervisorError> {
        if self.status.read().is_running() {
            Ok(())
        } else {
            Err(SupervisorError::NotRunning {
                supervisor_id: self.id.clone(),
            })
        }
    }

    async fn spawn_child(
        &self,
        spec: &ChildSpec,
        args_override: Option<Value>,
    ) -> Result<ServerId, SupervisorError> {
        let behavior = (spec.factory)();
        let mut options = spec.options.clone();
        if args_override.is_some() {
            options.init_args = args_override;
        }
        self.runtime
            .start(behavior, options)
            .await
            .map_err(|source| SupervisorError::ChildStartFailed {
                child_id: spec.id.clone(),
                source,
            })
    }

    /// Graceful stop bounded by `timeout`, then force-terminate.
    async fn stop_server(&self, server_id: &ServerId, timeout: Duration) {
        let graceful = tokio::time::timeout(
            timeout,
            self.runtime.stop(server_id, Some(ExitReason::Shutdown)),
        )
        .await;
        if graceful.is_err() {
            debug!(server_id = %server_id, "graceful stop timed out; killing");
            let _ = self
                .runtime
                .force_terminate(server_id, ExitReason::Killed)
                .await;
        }
    }

    /// React to a tracked server leaving the `running` state.
    async fn on_child_exit(self: &Arc<Self>, server_id: &ServerId, is_normal: bool) {
        {
            let status = *self.status.read();
            if matches!(status, ServerStatus::Stopping | ServerStatus::Stopped) {
                return;
            }
        }

        let mut state = self.state.lock().await;
        let Some(idx) = state
            .children
            .iter()
            .position(|c| c.running && c.server_id.as_ref() == Some(server_id))
        else {
            // Not ours, or a stop we initiated ourselves.
            return;
        };

        let policy = state.children[idx].spec.restart;
        let significant = state.children[idx].spec.significant;
        let old_failed = state.children[idx].server_id.clone();
        state.children[idx].running = false;
        state.children[idx].server_id = None;

        if !policy.should_restart(is_normal) {
            debug!(
                supervisor_id = %self.id,
                child_id = %state.children[idx].spec.id,
                "child terminated without restart"
            );
            if policy == super::types::RestartPolicy::Temporary
                || self.strategy == Strategy::SimpleOneForOne
            {
                state.children.remove(idx);
            }
            if significant {
                self.maybe_auto_shutdown(&mut state).await;
            }
            return;
        }

        // Which children take part in the restart, in insertion order.
        let indices: Vec<usize> = match self.strategy {
            Strategy::OneForOne | Strategy::SimpleOneForOne => vec![idx],
            Strategy::OneForAll => (0..state.children.len()).collect(),
            Strategy::RestForOne => (idx..state.children.len()).collect(),
        };

        // Old ids, captured before the stop phase for restart events.
        let plan: Vec<(usize, Option<ServerId>)> = indices
            .iter()
            .map(|&i| {
                let old = if i == idx {
                    old_failed.clone()
                } else {
                    state.children[i].server_id.clone()
                };
                (i, old)
            })
            .collect();

        // Stop phase: every other affected running child, reverse order.
        for &(i, _) in plan.iter().rev() {
            if i == idx {
                continue;
            }
            let timeout = state.children[i].spec.shutdown_timeout;
            if let Some(sid) = state.children[i].server_id.take() {
                state.children[i].running = false;
                self.stop_server(&sid, timeout).await;
            }
        }

        self.restart_cycle(&mut state, &plan).await;
    }

    /// One restart cycle per intensity record; retried while child starts
    /// fail, until the window is exceeded.
    async fn restart_cycle(
        self: &Arc<Self>,
        state: &mut SupState,
        plan: &[(usize, Option<ServerId>)],
    ) {
        'cycle: loop {
            state.window.record();
            if state.window.is_exceeded() {
                self.give_up(state).await;
                return;
            }

            let mut started: Vec<usize> = Vec::new();
            for &(i, ref old) in plan {
                let spec = state.children[i].spec.clone();
                match self.spawn_child(&spec, None).await {
                    Ok(new_id) => {
                        state.children[i].server_id = Some(new_id.clone());
                        state.children[i].running = true;
                        state.children[i].restart_count += 1;
                        if let Some(old) = old {
                            self.runtime.events().publish(LifecycleEventKind::Restarted {
                                supervisor_id: self.id.clone(),
                                child_id: spec.id.clone(),
                                old_server_id: old.clone(),
                                new_server_id: new_id,
                            });
                        }
                        started.push(i);
                    }
                    Err(err) => {
                        warn!(
                            supervisor_id = %self.id,
                            child_id = %spec.id,
                            error = %err,
                            "restart attempt failed"
                        );
                        // Unwind this cycle's starts, then try again.
                        for &j in started.iter().rev() {
                            let timeout = state.children[j].spec.shutdown_timeout;
                            if let Some(sid) = state.children[j].server_id.take() {
                                state.children[j].running = false;
                                self.stop_server(&sid, timeout).await;
                            }
                        }
                        continue 'cycle;
                    }
                }
            }
            return;
        }
    }

    /// The intensity window was exceeded: stop everything and give up.
    async fn give_up(&self, state: &mut SupState) {
        error!(
            supervisor_id = %self.id,
            max_restarts = self.intensity.max_restarts,
            within = ?self.intensity.within,
            "restart intensity exceeded; stopping supervisor"
        );
        state.failure = Some(SupervisorError::MaxRestartsExceeded {
            supervisor_id: self.id.clone(),
            max_restarts: self.intensity.max_restarts,
            within: self.intensity.within,
        });
        *self.status.write() = ServerStatus::Stopping;
        self.stop_all_children(state).await;
        *self.status.write() = ServerStatus::Stopped;
    }

    async fn maybe_auto_shutdown(&self, state: &mut SupState) {
        if self.strategy == Strategy::SimpleOneForOne {
            return;
        }
        let trigger = match self.auto_shutdown {
            AutoShutdown::Never => false,
            AutoShutdown::AnySignificant => true,
            AutoShutdown::AllSignificant => state
                .children
                .iter()
                .filter(|c| c.spec.significant)
                .all(|c| !c.running),
        };
        if trigger {
            info!(supervisor_id = %self.id, "auto-shutdown triggered");
            *self.status.write() = ServerStatus::Stopping;
            self.stop_all_children(state).await;
            *self.status.write() = ServerStatus::Stopped;
        }
    }

    async fn stop_all_children(&self, state: &mut SupState) {
        for record in state.children.iter_mut().rev() {
            let timeout = record.spec.shutdown_timeout;
            record.running = false;
            if let Some(server_id) = record.server_id.take() {
                self.stop_server(&server_id, timeout).await;
            }
        }
    }

    pub(crate) async fn shutdown(&self) {
        {
            let mut status = self.status.write();
            if matches!(*status, ServerStatus::Stopping | ServerStatus::Stopped) {
                return;
            }
            *status = ServerStatus::Stopping;
        }
        if let Some(handle) = self.watcher.lock().take() {
            handle.abort();
        }
        let mut state = self.state.lock().await;
        self.stop_all_children(&mut state).await;
        *self.status.write() = ServerStatus::Stopped;
        info!(supervisor_id = %self.id, "supervisor shut down");
    }

    pub(crate) async fn stats(&self) -> SupervisorStats {
        let state = self.state.lock().await;
        SupervisorStats {
            id: self.id.clone(),
            status: *self.status.read(),
            started_at: self.started_at,
            children: state.children.iter().map(ChildRecord::info).collect(),
            restarts_in_window: state.window.count(),
        }
    }
}

/// Watcher task: feeds lifecycle events into the supervisor.
async fn watch(weak: Weak<SupervisorInner>, mut subscription: EventSubscription) {
    while let Some(event) = subscription.recv().await {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        match &event.kind {
            LifecycleEventKind::Terminated {
                server_id, reason, ..
            } => {
                inner
                    .on_child_exit(server_id, reason.is_normal_exit())
                    .await;
            }
            LifecycleEventKind::Crashed { server_id, .. } => {
                inner.on_child_exit(server_id, false).await;
            }
            _ => {}
        }
    }
}
