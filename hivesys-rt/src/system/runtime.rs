//! The `Runtime`: process-wide handle owning servers, events, registries.

// Layer 1: Standard library
use std::sync::{Arc, Weak};
use std::time::Duration;

// Layer 2: Third-party
use chrono::Utc;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

// Layer 3: Internal
use super::config::RuntimeConfig;
use crate::events::{EventPublisher, EventSubscription, LifecycleEventKind};
use crate::registry::{Registry, RegistryMode};
use crate::server::behavior::{Behavior, ExitReason};
use crate::server::error::ServerError;
use crate::server::mailbox::{
    ControlSignal, ServerMessage, ServerShared, ServerStats, ServerStatus,
};
use crate::server::options::StartOptions;
use crate::server::pump::run_server;
use crate::supervisor::node::SupervisorInner;
use crate::supervisor::types::SupervisorStats;
use crate::util::ServerId;

static GLOBAL_RUNTIME: Lazy<Runtime> = Lazy::new(|| Runtime::new(RuntimeConfig::default()));

/// A live server's bookkeeping inside the runtime table.
pub(crate) struct ServerEntry {
    shared: Arc<ServerShared>,
    inbox: mpsc::UnboundedSender<ServerMessage>,
    control: mpsc::UnboundedSender<ControlSignal>,
    max_queue_len: Option<usize>,
}

/// Shared core behind every `Runtime` clone.
pub struct RuntimeInner {
    config: RuntimeConfig,
    servers: DashMap<ServerId, ServerEntry>,
    events: EventPublisher,
    registries: DashMap<String, Arc<Registry>>,
    default_registry: Arc<Registry>,
    pub(crate) supervisors: DashMap<String, Weak<SupervisorInner>>,
}

/// Process-wide runtime handle.
///
/// Ownership of every server lives in the runtime's table; registries and
/// supervisors hold server ids (pure values) and look servers up here.
/// Cloning the handle is cheap and all clones share the same state.
///
/// `Runtime::global()` exposes a default instance for short call sites;
/// applications that want isolation construct their own with
/// [`Runtime::new`].
#[derive(Clone)]
pub struct Runtime {
    pub(crate) inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Create a runtime with the given configuration.
    pub fn new(config: RuntimeConfig) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<RuntimeInner>| RuntimeInner {
            events: EventPublisher::new(config.event_capacity),
            default_registry: Arc::new(Registry::new(
                "default",
                RegistryMode::Unique,
                weak.clone(),
            )),
            config,
            servers: DashMap::new(),
            registries: DashMap::new(),
            supervisors: DashMap::new(),
        });
        Self { inner }
    }

    /// The process-wide default runtime.
    pub fn global() -> Runtime {
        GLOBAL_RUNTIME.clone()
    }

    /// The runtime configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// A handle to the lifecycle event publisher.
    pub fn events(&self) -> EventPublisher {
        self.inner.events.clone()
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> EventSubscription {
        self.inner.events.subscribe()
    }

    /// The default (unique-mode) registry.
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.inner.default_registry)
    }

    /// Get or create an isolated named registry.
    ///
    /// The mode applies on first creation; later callers get the existing
    /// instance regardless of the mode they pass.
    pub fn registry_named(&self, name: &str, mode: RegistryMode) -> Arc<Registry> {
        Arc::clone(
            &self
                .inner
                .registries
                .entry(name.to_string())
                .or_insert_with(|| {
                    Arc::new(Registry::new(name, mode, Arc::downgrade(&self.inner)))
                }),
        )
    }

    /// Start a server from `behavior`.
    ///
    /// `init` runs under the init timeout before the server goes live; on
    /// failure or timeout the start fails with `InitFailed` and the server
    /// is never observable in `running`.
    pub async fn start(
        &self,
        behavior: Box<dyn Behavior>,
        options: StartOptions,
    ) -> Result<ServerId, ServerError> {
        let id = ServerId::new();
        let mut behavior = behavior;
        let started_at = Utc::now();
        let init_timeout = options.init_timeout.unwrap_or(self.inner.config.init_timeout);

        match tokio::time::timeout(init_timeout, behavior.init(options.init_args.clone())).await
        {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                self.inner.events.publish(LifecycleEventKind::Crashed {
                    server_id: id.clone(),
                    name: options.name.clone(),
                    reason: format!("init failed: {err}"),
                });
                return Err(ServerError::InitFailed {
                    server_id: id,
                    cause: err.message,
                });
            }
            Err(_) => {
                self.inner.events.publish(LifecycleEventKind::Crashed {
                    server_id: id.clone(),
                    name: options.name.clone(),
                    reason: format!("init timed out after {init_timeout:?}"),
                });
                return Err(ServerError::InitFailed {
                    server_id: id,
                    cause: format!("init timed out after {init_timeout:?}"),
                });
            }
        }

        // Claim the name before the server goes live, so a conflicting
        // start never becomes observable.
        if let Some(name) = &options.name {
            let registry = match &options.registry {
                Some(registry) => self.registry_named(registry, RegistryMode::Unique),
                None => self.registry(),
            };
            if let Err(err) = registry.register(name, &id, None) {
                let _ = behavior.terminate(&ExitReason::Shutdown).await;
                return Err(err.into());
            }
        }

        let shared = Arc::new(ServerShared::new(
            id.clone(),
            options.name.clone(),
            started_at,
            behavior.state_size(),
        ));
        *shared.status.write() = ServerStatus::Running;

        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        self.inner.servers.insert(
            id.clone(),
            ServerEntry {
                shared: Arc::clone(&shared),
                inbox: inbox_tx,
                control: control_tx,
                max_queue_len: options.max_queue_len,
            },
        );

        tokio::spawn(run_server(
            behavior,
            shared,
            inbox_rx,
            control_rx,
            self.inner.events.clone(),
            Arc::downgrade(&self.inner),
        ));

        info!(server_id = %id, name = ?options.name, "server started");
        self.inner.events.publish(LifecycleEventKind::Started {
            server_id: id.clone(),
            name: options.name,
        });
        Ok(id)
    }

    /// Synchronous request; awaits the reply or times out.
    pub async fn call(
        &self,
        id: &ServerId,
        msg: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, ServerError> {
        self.inner.call(id, msg, timeout).await
    }

    /// Fire-and-forget message.
    pub fn cast(&self, id: &ServerId, msg: Value) -> Result<(), ServerError> {
        self.inner.cast(id, msg)
    }

    /// Graceful stop: waits for the in-flight handler, drains queued
    /// callers with `NotRunning`, runs the terminate hook.
    pub async fn stop(
        &self,
        id: &ServerId,
        reason: Option<ExitReason>,
    ) -> Result<(), ServerError> {
        self.inner
            .signal(id, |reason, done| ControlSignal::Stop { reason, done }, reason)
            .await
    }

    /// Forced stop: cancels the in-flight handler instead of waiting.
    pub async fn force_terminate(
        &self,
        id: &ServerId,
        reason: ExitReason,
    ) -> Result<(), ServerError> {
        self.inner
            .signal(id, |reason, done| ControlSignal::Kill { reason, done }, Some(reason))
            .await
    }

    /// `true` while the server accepts messages.
    pub fn is_running(&self, id: &ServerId) -> bool {
        self.inner
            .servers
            .get(id)
            .map(|entry| entry.shared.status.read().is_running())
            .unwrap_or(false)
    }

    /// Introspection snapshot for one server; `None` once it is gone.
    pub fn server_stats(&self, id: &ServerId) -> Option<ServerStats> {
        self.inner.servers.get(id).map(|entry| entry.shared.stats())
    }

    /// Stats for every live server.
    pub fn list_servers(&self) -> Vec<ServerStats> {
        self.inner
            .servers
            .iter()
            .map(|entry| entry.shared.stats())
            .collect()
    }

    /// Number of live servers.
    pub fn server_count(&self) -> usize {
        self.inner.servers.len()
    }

    /// Supervision-tree view: every live supervisor with its children.
    pub async fn process_tree(&self) -> Vec<SupervisorStats> {
        let inners: Vec<Arc<SupervisorInner>> = self
            .inner
            .supervisors
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .collect();
        self.inner
            .supervisors
            .retain(|_, weak| weak.strong_count() > 0);

        let mut stats = Vec::with_capacity(inners.len());
        for inner in inners {
            stats.push(inner.stats().await);
        }
        stats
    }

    /// Stop everything: supervisors first (so nothing restarts), then the
    /// remaining servers, gracefully within the configured shutdown
    /// timeout and forcibly afterwards.
    pub async fn shutdown(&self) {
        let supervisors: Vec<Arc<SupervisorInner>> = self
            .inner
            .supervisors
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .collect();
        for supervisor in supervisors {
            supervisor.shutdown().await;
        }

        let ids: Vec<ServerId> = self
            .inner
            .servers
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        let grace = self.inner.config.shutdown_timeout;
        for id in ids {
            let stopped =
                tokio::time::timeout(grace, self.stop(&id, Some(ExitReason::Shutdown))).await;
            if stopped.is_err() {
                let _ = self.force_terminate(&id, ExitReason::Killed).await;
            }
        }
        info!("runtime shut down");
    }
}

impl RuntimeInner {
    pub(crate) async fn call(
        &self,
        id: &ServerId,
        msg: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, ServerError> {
        let (inbox, shared) = {
            let entry = self.servers.get(id).ok_or_else(|| ServerError::NotRunning {
                server_id: id.clone(),
            })?;
            if !entry.shared.status.read().is_running() {
                return Err(ServerError::NotRunning {
                    server_id: id.clone(),
                });
            }
            if let Some(limit) = entry.max_queue_len {
                if entry.shared.queue_len.load(std::sync::atomic::Ordering::Relaxed) >= limit {
                    return Err(ServerError::Overloaded {
                        server_id: id.clone(),
                        limit,
                    });
                }
            }
            (entry.inbox.clone(), Arc::clone(&entry.shared))
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        shared
            .queue_len
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        if inbox
            .send(ServerMessage::Call {
                payload: msg,
                reply: reply_tx,
            })
            .is_err()
        {
            shared
                .queue_len
                .fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
            return Err(ServerError::NotRunning {
                server_id: id.clone(),
            });
        }

        let timeout = timeout.unwrap_or(self.config.call_timeout);
        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(outcome)) => outcome,
            // Reply channel dropped: the server stopped before replying.
            Ok(Err(_)) => Err(ServerError::NotRunning {
                server_id: id.clone(),
            }),
            Err(_) => Err(ServerError::CallTimeout {
                server_id: id.clone(),
                timeout,
            }),
        }
    }

    pub(crate) fn cast(&self, id: &ServerId, msg: Value) -> Result<(), ServerError> {
        let entry = self.servers.get(id).ok_or_else(|| ServerError::NotRunning {
            server_id: id.clone(),
        })?;
        if !entry.shared.status.read().is_running() {
            return Err(ServerError::NotRunning {
                server_id: id.clone(),
            });
        }
        if let Some(limit) = entry.max_queue_len {
            if entry.shared.queue_len.load(std::sync::atomic::Ordering::Relaxed) >= limit {
                return Err(ServerError::Overloaded {
                    server_id: id.clone(),
                    limit,
                });
            }
        }
        entry
            .shared
            .queue_len
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        if entry
            .inbox
            .send(ServerMessage::Cast { payload: msg })
            .is_err()
        {
            entry
                .shared
                .queue_len
                .fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
            return Err(ServerError::NotRunning {
                server_id: id.clone(),
            });
        }
        Ok(())
    }

    async fn signal<F>(
        &self,
        id: &ServerId,
        make: F,
        reason: Option<ExitReason>,
    ) -> Result<(), ServerError>
    where
        F: FnOnce(ExitReason, oneshot::Sender<()>) -> ControlSignal,
    {
        let control = {
            let entry = self.servers.get(id).ok_or_else(|| ServerError::NotRunning {
                server_id: id.clone(),
            })?;
            let mut status = entry.shared.status.write();
            if !status.is_running() {
                return Err(ServerError::NotRunning {
                    server_id: id.clone(),
                });
            }
            *status = ServerStatus::Stopping;
            entry.control.clone()
        };

        let (done_tx, done_rx) = oneshot::channel();
        let reason = reason.unwrap_or(ExitReason::Normal);
        if control.send(make(reason, done_tx)).is_err() {
            return Err(ServerError::NotRunning {
                server_id: id.clone(),
            });
        }
        let _ = done_rx.await;
        Ok(())
    }

    /// Drop the table entry and scrub registrations (server teardown).
    pub(crate) fn remove_server(&self, id: &ServerId) {
        self.servers.remove(id);
        self.default_registry.remove_server(id);
        for registry in self.registries.iter() {
            registry.value().remove_server(id);
        }
        debug!(server_id = %id, "server removed from runtime table");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::behavior::{Behavior, BehaviorError};
    use async_trait::async_trait;
    use serde_json::json;

    struct Counter {
        count: i64,
    }

    #[async_trait]
    impl Behavior for Counter {
        async fn init(&mut self, args: Option<Value>) -> Result<(), BehaviorError> {
            if let Some(start) = args.and_then(|a| a.as_i64()) {
                self.count = start;
            }
            Ok(())
        }

        async fn handle_call(&mut self, _msg: Value) -> Result<Value, BehaviorError> {
            Ok(json!(self.count))
        }

        async fn handle_cast(&mut self, _msg: Value) -> Result<(), BehaviorError> {
            self.count += 1;
            Ok(())
        }
    }

    struct FailingInit;

    #[async_trait]
    impl Behavior for FailingInit {
        async fn init(&mut self, _args: Option<Value>) -> Result<(), BehaviorError> {
            Err(BehaviorError::new("refused"))
        }

        async fn handle_call(&mut self, _msg: Value) -> Result<Value, BehaviorError> {
            Ok(Value::Null)
        }

        async fn handle_cast(&mut self, _msg: Value) -> Result<(), BehaviorError> {
            Ok(())
        }
    }

    struct SlowInit;

    #[async_trait]
    impl Behavior for SlowInit {
        async fn init(&mut self, _args: Option<Value>) -> Result<(), BehaviorError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }

        async fn handle_call(&mut self, _msg: Value) -> Result<Value, BehaviorError> {
            Ok(Value::Null)
        }

        async fn handle_cast(&mut self, _msg: Value) -> Result<(), BehaviorError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_start_call_stop() {
        let runtime = Runtime::new(RuntimeConfig::default());
        let id = runtime
            .start(Box::new(Counter { count: 0 }), StartOptions::new())
            .await
            .expect("start");
        assert!(runtime.is_running(&id));

        let value = runtime.call(&id, json!("get"), None).await.expect("call");
        assert_eq!(value, json!(0));

        runtime.stop(&id, None).await.expect("stop");
        assert!(!runtime.is_running(&id));
        assert!(matches!(
            runtime.call(&id, json!("get"), None).await,
            Err(ServerError::NotRunning { .. })
        ));
    }

    #[tokio::test]
    async fn test_init_args_seed_state() {
        let runtime = Runtime::new(RuntimeConfig::default());
        let id = runtime
            .start(
                Box::new(Counter { count: 0 }),
                StartOptions::new().with_init_args(json!(42)),
            )
            .await
            .expect("start");
        let value = runtime.call(&id, json!("get"), None).await.expect("call");
        assert_eq!(value, json!(42));
    }

    #[tokio::test]
    async fn test_init_failure_fails_start() {
        let runtime = Runtime::new(RuntimeConfig::default());
        let err = runtime
            .start(Box::new(FailingInit), StartOptions::new())
            .await
            .unwrap_err();
        match err {
            ServerError::InitFailed { cause, .. } => assert!(cause.contains("refused")),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(runtime.server_count(), 0);
    }

    #[tokio::test]
    async fn test_init_timeout_fails_start() {
        let runtime = Runtime::new(RuntimeConfig::default());
        let err = runtime
            .start(
                Box::new(SlowInit),
                StartOptions::new().with_init_timeout(Duration::from_millis(20)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::InitFailed { .. }));
        // Never observable as running.
        assert_eq!(runtime.server_count(), 0);
    }

    #[tokio::test]
    async fn test_named_start_and_registry_cleanup() {
        let runtime = Runtime::new(RuntimeConfig::default());
        let id = runtime
            .start(
                Box::new(Counter { count: 0 }),
                StartOptions::new().with_name("counter"),
            )
            .await
            .expect("start");
        assert!(runtime.registry().is_registered("counter"));

        // Second start under the same name fails.
        let err = runtime
            .start(
                Box::new(Counter { count: 0 }),
                StartOptions::new().with_name("counter"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Registry(_)));

        runtime.stop(&id, None).await.expect("stop");
        assert!(!runtime.registry().is_registered("counter"));
    }

    #[tokio::test]
    async fn test_serialized_counter_scenario() {
        let runtime = Runtime::new(RuntimeConfig::default());
        let id = runtime
            .start(Box::new(Counter { count: 0 }), StartOptions::new())
            .await
            .expect("start");

        for _ in 0..1000 {
            runtime.cast(&id, json!("inc")).expect("cast");
        }
        let value = runtime
            .call(&id, json!("get"), Some(Duration::from_secs(10)))
            .await
            .expect("call");
        assert_eq!(value, json!(1000));

        let stats = runtime.server_stats(&id).expect("stats");
        assert_eq!(stats.processed, 1001);
    }

    #[tokio::test]
    async fn test_overloaded_cast() {
        let runtime = Runtime::new(RuntimeConfig::default());

        struct Stuck;

        #[async_trait]
        impl Behavior for Stuck {
            async fn init(&mut self, _args: Option<Value>) -> Result<(), BehaviorError> {
                Ok(())
            }
            async fn handle_call(&mut self, _msg: Value) -> Result<Value, BehaviorError> {
                Ok(Value::Null)
            }
            async fn handle_cast(&mut self, _msg: Value) -> Result<(), BehaviorError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }
        }

        let id = runtime
            .start(Box::new(Stuck), StartOptions::new().with_max_queue_len(2))
            .await
            .expect("start");

        // First cast is dequeued into the handler; two more fill the bound.
        runtime.cast(&id, json!(0)).expect("first");
        tokio::time::sleep(Duration::from_millis(50)).await;
        runtime.cast(&id, json!(1)).expect("second");
        runtime.cast(&id, json!(2)).expect("third");
        let err = runtime.cast(&id, json!(3)).unwrap_err();
        assert!(matches!(err, ServerError::Overloaded { .. }));
    }

    #[tokio::test]
    async fn test_global_runtime_is_shared() {
        let a = Runtime::global();
        let b = Runtime::global();
        assert!(Arc::ptr_eq(&a.inner, &b.inner));
    }
}
