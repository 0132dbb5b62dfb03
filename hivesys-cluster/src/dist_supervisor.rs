//! The distributed supervisor: children placed across the cluster.
//!
//! Configuration mirrors the local supervisor plus a node selector. A
//! restart means "select a node again and spawn there": children survive
//! both their own crashes and the failure of their host node, in which
//! case the lost node is excluded from the candidate set until it comes
//! back. Every child is tracked through a monitor, so local and remote
//! terminations arrive uniformly as `process_down` events.

// Layer 1: Standard library imports
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

// Layer 3: Internal module imports
use crate::cluster::Cluster;
use crate::error::ClusterError;
use crate::node::{NodeId, NodeInfo, ServerRef};
use crate::proto::SpawnOptions;
use hivesys_rt::events::{EventSubscription, LifecycleEventKind};
use hivesys_rt::server::{ExitReason, ServerStatus};
use hivesys_rt::supervisor::{
    AutoShutdown, RestartIntensity, RestartPolicy, RestartWindow, Strategy, SupervisorError,
};
use hivesys_rt::util::MonitorId;

/// Default graceful-shutdown bound per distributed child (5 seconds).
pub const DEFAULT_DIST_CHILD_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Specification of one distributed child.
///
/// Instead of a factory, a distributed child names a behavior that must be
/// registered in the catalogue of every node it may be placed on.
#[derive(Debug, Clone)]
pub struct DistributedChildSpec {
    /// Unique identifier within the supervisor.
    pub id: String,

    /// Catalogue name resolved on the chosen node.
    pub behavior: String,

    /// Arguments handed to `init` on every (re)start.
    pub args: Option<Value>,

    /// When the child should be restarted after termination.
    pub restart: RestartPolicy,

    /// Graceful-stop bound applied on the owning node.
    pub shutdown_timeout: Duration,

    /// Participates in `auto_shutdown` accounting.
    pub significant: bool,
}

impl DistributedChildSpec {
    /// A permanent child with defaults.
    pub fn new(id: impl Into<String>, behavior: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            behavior: behavior.into(),
            args: None,
            restart: RestartPolicy::Permanent,
            shutdown_timeout: DEFAULT_DIST_CHILD_SHUTDOWN_TIMEOUT,
            significant: false,
        }
    }

    /// Arguments handed to `init`.
    pub fn with_args(mut self, args: Value) -> Self {
        self.args = Some(args);
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

/// How the supervisor picks a node for each child.
#[derive(Clone)]
pub enum NodeSelector {
    /// Prefer the local node while it is eligible.
    LocalFirst,

    /// Rotate over eligible nodes in NodeId order.
    RoundRobin,

    /// Pick the eligible node with the fewest servers.
    LeastLoaded,

    /// Pick an eligible node uniformly at random.
    Random,

    /// Always use this node; fails when it is unreachable.
    Pinned(NodeId),

    /// Caller-supplied placement; returning `None` or an ineligible node
    /// fails the start for that child.
    Custom(Arc<dyn Fn(&[NodeInfo], &str) -> Option<NodeId> + Send + Sync>),
}

impl fmt::Debug for NodeSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeSelector::LocalFirst => write!(f, "LocalFirst"),
            NodeSelector::RoundRobin => write!(f, "RoundRobin"),
            NodeSelector::LeastLoaded => write!(f, "LeastLoaded"),
            NodeSelector::Random => write!(f, "Random"),
            NodeSelector::Pinned(node) => write!(f, "Pinned({node})"),
            NodeSelector::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Distributed-supervisor configuration.
#[derive(Debug, Clone)]
pub struct DistributedSupervisorOptions {
    /// Restart strategy, as in the local supervisor.
    pub strategy: Strategy,

    /// Sliding-window restart limit. Host-node failures count the same as
    /// crashes.
    pub intensity: RestartIntensity,

    /// Auto-shutdown policy for significant children.
    pub auto_shutdown: AutoShutdown,

    /// Placement strategy.
    pub selector: NodeSelector,
}

impl Default for DistributedSupervisorOptions {
    fn default() -> Self {
        Self {
            strategy: Strategy::OneForOne,
            intensity: RestartIntensity::default(),
            auto_shutdown: AutoShutdown::Never,
            selector: NodeSelector::LocalFirst,
        }
    }
}

impl DistributedSupervisorOptions {
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

    /// Set the node selector.
    pub fn with_selector(mut self, selector: NodeSelector) -> Self {
        self.selector = selector;
        self
    }

    /// Set the auto-shutdown policy.
    pub fn with_auto_shutdown(mut self, auto_shutdown: AutoShutdown) -> Self {
        self.auto_shutdown = auto_shutdown;
        self
    }
}

/// Public view of one distributed child.
#[derive(Debug, Clone, Serialize)]
pub struct DistributedChildInfo {
    /// The child's id within its supervisor.
    pub id: String,

    /// Where the child currently runs.
    pub placement: Option<ServerRef>,

    /// Whether the child is currently running.
    pub running: bool,

    /// Restarts performed for this child.
    pub restart_count: u32,

    /// Whether the child is marked significant.
    pub significant: bool,
}

/// Introspection snapshot for a distributed supervisor.
#[derive(Debug, Clone, Serialize)]
pub struct DistributedSupervisorStats {
    /// The supervisor's id.
    pub id: String,

    /// Current lifecycle status.
    pub status: ServerStatus,

    /// When the supervisor was started.
    pub started_at: DateTime<Utc>,

    /// Per-child state.
    pub children: Vec<DistributedChildInfo>,

    /// Running children grouped by hosting node.
    pub children_by_node: HashMap<String, usize>,

    /// Restarts caused by host-node failure.
    pub node_failure_restarts: u64,

    /// Restarts currently inside the intensity window.
    pub restarts_in_window: usize,
}

struct DistChild {
    spec: DistributedChildSpec,
    placement: Option<ServerRef>,
    monitor_id: Option<MonitorId>,
    running: bool,
    restart_count: u32,
}

impl DistChild {
    fn info(&self) -> DistributedChildInfo {
        DistributedChildInfo {
            id: self.spec.id.clone(),
            placement: self.placement.clone(),
            running: self.running,
            restart_count: self.restart_count,
            significant: self.spec.significant,
        }
    }
}

struct DistState {
    children: Vec<DistChild>,
    window: RestartWindow,
    failure: Option<SupervisorError>,
    rr_cursor: usize,
    node_failure_restarts: u64,
    dyn_counter: u64,
}

struct DistSupInner {
    id: String,
    cluster: Cluster,
    strategy: Strategy,
    intensity: RestartIntensity,
    auto_shutdown: AutoShutdown,
    selector: NodeSelector,
    template: Option<DistributedChildSpec>,
    started_at: DateTime<Utc>,
    status: RwLock<ServerStatus>,
    state: Mutex<DistState>,
    watcher: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

/// A supervisor whose children may run on any cluster node.
#[derive(Clone)]
pub struct DistributedSupervisor {
    inner: Arc<DistSupInner>,
}

impl fmt::Debug for DistributedSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedSupervisor")
            .field("id", &self.inner.id)
            .finish()
    }
}

impl DistributedSupervisor {
    /// Start the supervisor and place its children, in declaration order.
    ///
    /// For `Strategy::SimpleOneForOne` exactly one spec must be given; it
    /// becomes the template for
    /// [`DistributedSupervisor::start_child_with_args`].
    pub async fn start(
        cluster: &Cluster,
        id: impl Into<String>,
        options: DistributedSupervisorOptions,
        children: Vec<DistributedChildSpec>,
    ) -> Result<DistributedSupervisor, ClusterError> {
        cluster.local_node()?;
        let id = id.into();
        let simple = options.strategy == Strategy::SimpleOneForOne;

        if simple {
            if children.len() != 1 {
                return Err(SupervisorError::InvalidConfiguration {
                    reason: "simple_one_for_one requires exactly one template spec".into(),
                }
                .into());
            }
        } else {
            for (i, spec) in children.iter().enumerate() {
                if children[..i].iter().any(|other| other.id == spec.id) {
                    return Err(SupervisorError::DuplicateChild {
                        child_id: spec.id.clone(),
                    }
                    .into());
                }
            }
        }

        let inner = Arc::new(DistSupInner {
            template: simple.then(|| children[0].clone()),
            id,
            cluster: cluster.clone(),
            strategy: options.strategy,
            intensity: options.intensity,
            auto_shutdown: options.auto_shutdown,
            selector: options.selector,
            started_at: Utc::now(),
            status: RwLock::new(ServerStatus::Initializing),
            state: Mutex::new(DistState {
                children: Vec::new(),
                window: RestartWindow::new(
                    options.intensity.max_restarts,
                    options.intensity.within,
                ),
                failure: None,
                rr_cursor: 0,
                node_failure_restarts: 0,
                dyn_counter: 0,
            }),
            watcher: parking_lot::Mutex::new(None),
        });

        let subscription = cluster.runtime().subscribe();

        if !simple {
            let mut state = inner.state.lock().await;
            for spec in children {
                let mut cursor = state.rr_cursor;
                let placed = inner
                    .spawn_child(&mut cursor, &spec, &HashSet::new())
                    .await;
                state.rr_cursor = cursor;
                match placed {
                    Ok((placement, monitor_id)) => state.children.push(DistChild {
                        spec,
                        placement: Some(placement),
                        monitor_id: Some(monitor_id),
                        running: true,
                        restart_count: 0,
                    }),
                    Err(err) => {
                        warn!(supervisor_id = %inner.id, error = %err, "startup rollback");
                        for i in (0..state.children.len()).rev() {
                            inner.stop_placement(&mut state.children[i]).await;
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
        info!(supervisor_id = %inner.id, strategy = ?inner.strategy, "distributed supervisor started");
        Ok(DistributedSupervisor { inner })
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

    /// Add and place a new child from a full spec.
    pub async fn start_child(
        &self,
        spec: DistributedChildSpec,
    ) -> Result<ServerRef, ClusterError> {
        self.inner.ensure_running()?;
        if self.inner.strategy == Strategy::SimpleOneForOne {
            return Err(SupervisorError::SpecRejected {
                supervisor_id: self.inner.id.clone(),
            }
            .into());
        }
        let mut state = self.inner.state.lock().await;
        if state.children.iter().any(|c| c.spec.id == spec.id) {
            return Err(SupervisorError::DuplicateChild {
                child_id: spec.id.clone(),
            }
            .into());
        }
        let mut cursor = state.rr_cursor;
        let placed = self
            .inner
            .spawn_child(&mut cursor, &spec, &HashSet::new())
            .await;
        state.rr_cursor = cursor;
        let (placement, monitor_id) = placed?;
        state.children.push(DistChild {
            spec,
            placement: Some(placement.clone()),
            monitor_id: Some(monitor_id),
            running: true,
            restart_count: 0,
        });
        Ok(placement)
    }

    /// Place a dynamic child from the template with the given init args.
    pub async fn start_child_with_args(
        &self,
        args: Option<Value>,
    ) -> Result<ServerRef, ClusterError> {
        self.inner.ensure_running()?;
        let template = self
            .inner
            .template
            .as_ref()
            .ok_or_else(|| SupervisorError::TemplateRequired {
                supervisor_id: self.inner.id.clone(),
            })?;
        let mut state = self.inner.state.lock().await;
        state.dyn_counter += 1;
        let mut spec = template.clone();
        spec.id = format!("{}-{}", template.id, state.dyn_counter);
        if args.is_some() {
            spec.args = args;
        }
        let mut cursor = state.rr_cursor;
        let placed = self
            .inner
            .spawn_child(&mut cursor, &spec, &HashSet::new())
            .await;
        state.rr_cursor = cursor;
        let (placement, monitor_id) = placed?;
        state.children.push(DistChild {
            spec,
            placement: Some(placement.clone()),
            monitor_id: Some(monitor_id),
            running: true,
            restart_count: 0,
        });
        Ok(placement)
    }

    /// Stop a child wherever it runs.
    pub async fn terminate_child(&self, child_id: &str) -> Result<(), ClusterError> {
        self.inner.ensure_running()?;
        let mut state = self.inner.state.lock().await;
        let idx = state
            .children
            .iter()
            .position(|c| c.spec.id == child_id)
            .ok_or_else(|| SupervisorError::ChildNotFound {
                child_id: child_id.to_string(),
            })?;
        self.inner.stop_placement(&mut state.children[idx]).await;
        let remove = self.inner.strategy == Strategy::SimpleOneForOne
            || state.children[idx].spec.restart == RestartPolicy::Temporary;
        if remove {
            state.children.remove(idx);
        }
        Ok(())
    }

    /// Manually restart a child (re-placing it via the selector). Manual
    /// restarts do not count toward restart intensity.
    pub async fn restart_child(&self, child_id: &str) -> Result<ServerRef, ClusterError> {
        self.inner.ensure_running()?;
        let mut state = self.inner.state.lock().await;
        let idx = state
            .children
            .iter()
            .position(|c| c.spec.id == child_id)
            .ok_or_else(|| SupervisorError::ChildNotFound {
                child_id: child_id.to_string(),
            })?;

        let old_placement = state.children[idx].placement.clone();
        self.inner.stop_placement(&mut state.children[idx]).await;

        let spec = state.children[idx].spec.clone();
        let mut cursor = state.rr_cursor;
        let placed = self
            .inner
            .spawn_child(&mut cursor, &spec, &HashSet::new())
            .await;
        state.rr_cursor = cursor;
        let (placement, monitor_id) = placed?;
        state.children[idx].placement = Some(placement.clone());
        state.children[idx].monitor_id = Some(monitor_id);
        state.children[idx].running = true;
        state.children[idx].restart_count += 1;
        self.inner.emit_restart_events(&spec.id, old_placement.as_ref(), &placement);
        Ok(placement)
    }

    /// Current state of every child, in insertion order.
    pub async fn get_children(&self) -> Vec<DistributedChildInfo> {
        let state = self.inner.state.lock().await;
        state.children.iter().map(DistChild::info).collect()
    }

    /// Current state of one child.
    pub async fn get_child(&self, child_id: &str) -> Option<DistributedChildInfo> {
        let state = self.inner.state.lock().await;
        state
            .children
            .iter()
            .find(|c| c.spec.id == child_id)
            .map(DistChild::info)
    }

    /// Aggregate child counts: `(specs, active)`.
    pub async fn count_children(&self) -> (usize, usize) {
        let state = self.inner.state.lock().await;
        let active = state.children.iter().filter(|c| c.running).count();
        (state.children.len(), active)
    }

    /// Introspection snapshot, including per-node placement.
    pub async fn stats(&self) -> DistributedSupervisorStats {
        let state = self.inner.state.lock().await;
        let mut children_by_node: HashMap<String, usize> = HashMap::new();
        for child in state.children.iter().filter(|c| c.running) {
            if let Some(placement) = &child.placement {
                *children_by_node.entry(placement.node.to_string()).or_insert(0) += 1;
            }
        }
        DistributedSupervisorStats {
            id: self.inner.id.clone(),
            status: *self.inner.status.read(),
            started_at: self.inner.started_at,
            children: state.children.iter().map(DistChild::info).collect(),
            children_by_node,
            node_failure_restarts: state.node_failure_restarts,
            restarts_in_window: state.window.count(),
        }
    }

    /// Stop every child in reverse order and stop the supervisor.
    pub async fn shutdown(&self) {
        {
            let mut status = self.inner.status.write();
            if matches!(*status, ServerStatus::Stopping | ServerStatus::Stopped) {
                return;
            }
            *status = ServerStatus::Stopping;
        }
        if let Some(handle) = self.inner.watcher.lock().take() {
            handle.abort();
        }
        let mut state = self.inner.state.lock().await;
        for i in (0..state.children.len()).rev() {
            self.inner.stop_placement(&mut state.children[i]).await;
        }
        *self.inner.status.write() = ServerStatus::Stopped;
        info!(supervisor_id = %self.inner.id, "distributed supervisor shut down");
    }
}

impl DistSupInner {
    fn ensure_running(&self) -> Result<(), ClusterError> {
        if self.status.read().is_running() {
            Ok(())
        } else {
            Err(SupervisorError::NotRunning {
                supervisor_id: self.id.clone(),
            }
            .into())
        }
    }

    fn select_node(
        &self,
        rr_cursor: &mut usize,
        child_id: &str,
        exclude: &HashSet<NodeId>,
    ) -> Result<NodeId, ClusterError> {
        let mut candidates: Vec<NodeInfo> = self
            .cluster
            .placement_candidates()
            .into_iter()
            .filter(|info| !exclude.contains(&info.id))
            .collect();
        let no_node = || ClusterError::NoAvailableNode {
            child_id: child_id.to_string(),
        };
        if candidates.is_empty() {
            return Err(no_node());
        }
        let chosen = match &self.selector {
            // Candidates always list the local node first when eligible.
            NodeSelector::LocalFirst => candidates[0].id.clone(),
            NodeSelector::RoundRobin => {
                candidates.sort_by(|a, b| a.id.cmp(&b.id));
                let pick = candidates[*rr_cursor % candidates.len()].id.clone();
                *rr_cursor = rr_cursor.wrapping_add(1);
                pick
            }
            NodeSelector::LeastLoaded => candidates
                .iter()
                .min_by_key(|info| info.process_count)
                .map(|info| info.id.clone())
                .ok_or_else(no_node)?,
            NodeSelector::Random => {
                let idx = rand::thread_rng().gen_range(0..candidates.len());
                candidates[idx].id.clone()
            }
            NodeSelector::Pinned(node) => {
                if candidates.iter().any(|info| &info.id == node) {
                    node.clone()
                } else {
                    return Err(no_node());
                }
            }
            NodeSelector::Custom(select) => match select(&candidates, child_id) {
                Some(node) if candidates.iter().any(|info| info.id == node) => node,
                _ => return Err(no_node()),
            },
        };
        Ok(chosen)
    }

    /// Place and start one child, then monitor it.
    async fn spawn_child(
        &self,
        rr_cursor: &mut usize,
        spec: &DistributedChildSpec,
        exclude: &HashSet<NodeId>,
    ) -> Result<(ServerRef, MonitorId), ClusterError> {
        let node = self.select_node(rr_cursor, &spec.id, exclude)?;
        let mut options = SpawnOptions::new();
        options.init_args = spec.args.clone();
        let placement = self
            .cluster
            .spawn(&spec.behavior, &node, options, None)
            .await?;
        match self.cluster.monitor(&placement, None).await {
            Ok(monitor_id) => {
                debug!(
                    supervisor_id = %self.id,
                    child_id = %spec.id,
                    node = %placement.node,
                    "child placed"
                );
                Ok((placement, monitor_id))
            }
            Err(err) => {
                let _ = self
                    .cluster
                    .stop_server(&placement, ExitReason::Shutdown)
                    .await;
                Err(err)
            }
        }
    }

    /// Intentionally stop a child's current server (no restart follows).
    async fn stop_placement(&self, child: &mut DistChild) {
        child.running = false;
        if let Some(monitor_id) = child.monitor_id.take() {
            let _ = self.cluster.demonitor(&monitor_id);
        }
        if let Some(placement) = child.placement.take() {
            if let Err(err) = self
                .cluster
                .stop_server(&placement, ExitReason::Shutdown)
                .await
            {
                debug!(server = %placement, error = %err, "stop of placed child failed");
            }
        }
    }

    fn emit_restart_events(
        &self,
        child_id: &str,
        old: Option<&ServerRef>,
        new: &ServerRef,
    ) {
        let events = self.cluster.runtime().events();
        if let Some(old) = old {
            events.publish(LifecycleEventKind::Restarted {
                supervisor_id: self.id.clone(),
                child_id: child_id.to_string(),
                old_server_id: old.server_id.clone(),
                new_server_id: new.server_id.clone(),
            });
            if old.node != new.node {
                events.publish(LifecycleEventKind::ChildMigrated {
                    supervisor_id: self.id.clone(),
                    child_id: child_id.to_string(),
                    from_node: old.node.to_string(),
                    to_node: new.node.to_string(),
                });
            }
        }
    }

    /// React to a monitored child going down.
    async fn on_child_down(
        self: &Arc<Self>,
        monitor_id: &MonitorId,
        is_normal: bool,
        node_failed: Option<NodeId>,
    ) {
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
            .position(|c| c.running && c.monitor_id.as_ref() == Some(monitor_id))
        else {
            return;
        };

        let policy = state.children[idx].spec.restart;
        let significant = state.children[idx].spec.significant;
        let old_placement = state.children[idx].placement.take();
        state.children[idx].running = false;
        state.children[idx].monitor_id = None;

        if !policy.should_restart(is_normal) {
            debug!(
                supervisor_id = %self.id,
                child_id = %state.children[idx].spec.id,
                "child terminated without restart"
            );
            if policy == RestartPolicy::Temporary || self.strategy == Strategy::SimpleOneForOne {
                state.children.remove(idx);
            }
            if significant {
                self.maybe_auto_shutdown(&mut state).await;
            }
            return;
        }

        let indices: Vec<usize> = match self.strategy {
            Strategy::OneForOne | Strategy::SimpleOneForOne => vec![idx],
            Strategy::OneForAll => (0..state.children.len()).collect(),
            Strategy::RestForOne => (idx..state.children.len()).collect(),
        };

        let plan: Vec<(usize, Option<ServerRef>)> = indices
            .iter()
            .map(|&i| {
                let old = if i == idx {
                    old_placement.clone()
                } else {
                    state.children[i].placement.clone()
                };
                (i, old)
            })
            .collect();

        for &(i, _) in plan.iter().rev() {
            if i == idx {
                continue;
            }
            if state.children[i].running {
                self.stop_placement(&mut state.children[i]).await;
            }
        }

        let mut exclude = HashSet::new();
        if let Some(node) = &node_failed {
            exclude.insert(node.clone());
        }
        self.restart_cycle(&mut state, &plan, &exclude, node_failed.is_some())
            .await;
    }

    async fn restart_cycle(
        self: &Arc<Self>,
        state: &mut DistState,
        plan: &[(usize, Option<ServerRef>)],
        exclude: &HashSet<NodeId>,
        node_failure: bool,
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
                let mut cursor = state.rr_cursor;
                let placed = self.spawn_child(&mut cursor, &spec, exclude).await;
                state.rr_cursor = cursor;
                match placed {
                    Ok((placement, monitor_id)) => {
                        if node_failure {
                            state.node_failure_restarts += 1;
                        }
                        state.children[i].placement = Some(placement.clone());
                        state.children[i].monitor_id = Some(monitor_id);
                        state.children[i].running = true;
                        state.children[i].restart_count += 1;
                        self.emit_restart_events(&spec.id, old.as_ref(), &placement);
                        started.push(i);
                    }
                    Err(err) => {
                        warn!(
                            supervisor_id = %self.id,
                            child_id = %spec.id,
                            error = %err,
                            "restart attempt failed"
                        );
                        for &j in started.iter().rev() {
                            self.stop_placement(&mut state.children[j]).await;
                        }
                        continue 'cycle;
                    }
                }
            }
            return;
        }
    }

    async fn give_up(&self, state: &mut DistState) {
        error!(
            supervisor_id = %self.id,
            max_restarts = self.intensity.max_restarts,
            within = ?self.intensity.within,
            "restart intensity exceeded; stopping distributed supervisor"
        );
        state.failure = Some(SupervisorError::MaxRestartsExceeded {
            supervisor_id: self.id.clone(),
            max_restarts: self.intensity.max_restarts,
            within: self.intensity.within,
        });
        *self.status.write() = ServerStatus::Stopping;
        for i in (0..state.children.len()).rev() {
            self.stop_placement(&mut state.children[i]).await;
        }
        *self.status.write() = ServerStatus::Stopped;
    }

    async fn maybe_auto_shutdown(&self, state: &mut DistState) {
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
            for i in (0..state.children.len()).rev() {
                self.stop_placement(&mut state.children[i]).await;
            }
            *self.status.write() = ServerStatus::Stopped;
        }
    }

    /// Host-node failure: re-place every running child from the lost
    /// node according to its restart policy.
    async fn on_node_down(self: &Arc<Self>, node: &NodeId) {
        let affected: Vec<MonitorId> = {
            let state = self.state.lock().await;
            state
                .children
                .iter()
                .filter(|c| {
                    c.running
                        && c.placement
                            .as_ref()
                            .map(|p| &p.node == node)
                            .unwrap_or(false)
                })
                .filter_map(|c| c.monitor_id.clone())
                .collect()
        };
        for monitor_id in affected {
            self.on_child_down(&monitor_id, false, Some(node.clone()))
                .await;
        }
    }
}

/// Watcher task: feeds lifecycle events into the distributed supervisor.
async fn watch(weak: Weak<DistSupInner>, mut subscription: EventSubscription) {
    while let Some(event) = subscription.recv().await {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        match &event.kind {
            LifecycleEventKind::ProcessDown {
                monitor_id,
                reason,
                node,
                ..
            } => {
                let is_normal = reason == "normal" || reason == "shutdown";
                let node_failed = if reason == "noconnection" {
                    NodeId::parse(node).ok()
                } else {
                    None
                };
                inner.on_child_down(monitor_id, is_normal, node_failed).await;
            }
            LifecycleEventKind::NodeDown { node, .. } => {
                if let Ok(node) = NodeId::parse(node) {
                    inner.on_node_down(&node).await;
                }
            }
            _ => {}
        }
    }
}
