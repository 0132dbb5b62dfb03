//! Integration tests for supervision trees.
//!
//! Coverage:
//! - one_for_one / one_for_all / rest_for_one restart behavior
//! - simple_one_for_one dynamic children
//! - Restart intensity limits (including max_restarts = 0)
//! - auto_shutdown on significant children
//! - Dynamic child management

#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::sleep;

use hivesys_rt::events::LifecycleEventKind;
use hivesys_rt::server::{Behavior, BehaviorError, ServerStatus};
use hivesys_rt::supervisor::{
    AutoShutdown, ChildSpec, RestartPolicy, Strategy, Supervisor, SupervisorError,
    SupervisorOptions,
};
use hivesys_rt::system::{Runtime, RuntimeConfig};

// ============================================================================
// Test behaviors
// ============================================================================

/// Crashes on the first cast it receives; counts its own starts.
struct Brittle {
    starts: Arc<AtomicU32>,
}

#[async_trait]
impl Behavior for Brittle {
    async fn init(&mut self, _args: Option<Value>) -> Result<(), BehaviorError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn handle_call(&mut self, _msg: Value) -> Result<Value, BehaviorError> {
        Ok(json!("ok"))
    }

    async fn handle_cast(&mut self, _msg: Value) -> Result<(), BehaviorError> {
        Err(BehaviorError::new("boom"))
    }
}

/// Never fails; counts its own starts.
struct Steady {
    starts: Arc<AtomicU32>,
}

#[async_trait]
impl Behavior for Steady {
    async fn init(&mut self, _args: Option<Value>) -> Result<(), BehaviorError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn handle_call(&mut self, _msg: Value) -> Result<Value, BehaviorError> {
        Ok(json!("ok"))
    }

    async fn handle_cast(&mut self, _msg: Value) -> Result<(), BehaviorError> {
        Ok(())
    }
}

/// Fails init after the first successful start.
struct FailsOnRestart {
    attempts: Arc<AtomicU32>,
}

#[async_trait]
impl Behavior for FailsOnRestart {
    async fn init(&mut self, _args: Option<Value>) -> Result<(), BehaviorError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt == 0 {
            Ok(())
        } else {
            Err(BehaviorError::new("refusing restart"))
        }
    }

    async fn handle_call(&mut self, _msg: Value) -> Result<Value, BehaviorError> {
        Ok(Value::Null)
    }

    async fn handle_cast(&mut self, _msg: Value) -> Result<(), BehaviorError> {
        Err(BehaviorError::new("boom"))
    }
}

fn brittle_spec(id: &str, starts: &Arc<AtomicU32>) -> ChildSpec {
    let starts = Arc::clone(starts);
    ChildSpec::new(
        id,
        Arc::new(move || {
            Box::new(Brittle {
                starts: Arc::clone(&starts),
            })
        }),
    )
}

fn steady_spec(id: &str, starts: &Arc<AtomicU32>) -> ChildSpec {
    let starts = Arc::clone(starts);
    ChildSpec::new(
        id,
        Arc::new(move || {
            Box::new(Steady {
                starts: Arc::clone(&starts),
            })
        }),
    )
}

async fn settle() {
    sleep(Duration::from_millis(150)).await;
}

// ============================================================================
// one_for_one
// ============================================================================

#[tokio::test]
async fn test_one_for_one_restarts_only_failed_child() {
    let runtime = Runtime::new(RuntimeConfig::default());
    let a_starts = Arc::new(AtomicU32::new(0));
    let b_starts = Arc::new(AtomicU32::new(0));

    let supervisor = Supervisor::start(
        &runtime,
        "pair",
        SupervisorOptions::new(Strategy::OneForOne),
        vec![
            brittle_spec("a", &a_starts),
            steady_spec("b", &b_starts),
        ],
    )
    .await
    .unwrap();

    let a = supervisor.get_child("a").await.unwrap();
    runtime.cast(a.server_id.as_ref().unwrap(), json!("die")).unwrap();
    settle().await;

    assert_eq!(a_starts.load(Ordering::SeqCst), 2, "a restarted once");
    assert_eq!(b_starts.load(Ordering::SeqCst), 1, "b untouched");

    // The restarted child got a fresh server id and serves calls.
    let a_after = supervisor.get_child("a").await.unwrap();
    assert!(a_after.running);
    assert_ne!(a_after.server_id, a.server_id);
    let reply = runtime
        .call(a_after.server_id.as_ref().unwrap(), json!("ping"), None)
        .await
        .unwrap();
    assert_eq!(reply, json!("ok"));
}

#[tokio::test]
async fn test_crash_then_start_events_for_same_child() {
    let runtime = Runtime::new(RuntimeConfig::default());
    let starts = Arc::new(AtomicU32::new(0));
    let mut events = runtime.subscribe();

    let supervisor = Supervisor::start(
        &runtime,
        "events",
        SupervisorOptions::new(Strategy::OneForOne),
        vec![brittle_spec("a", &starts)],
    )
    .await
    .unwrap();

    let original = supervisor.get_child("a").await.unwrap().server_id.unwrap();
    runtime.cast(&original, json!("die")).unwrap();
    settle().await;

    // Expect: started(original), crashed(original), started(new), restarted.
    let mut saw_crash_for_original = false;
    let mut saw_start_of_new = false;
    while let Some(event) = events.try_recv() {
        match event.kind {
            LifecycleEventKind::Crashed { server_id, .. } if server_id == original => {
                saw_crash_for_original = true;
            }
            LifecycleEventKind::Started { server_id, .. } if server_id != original => {
                // second started event belongs to the replacement
                if saw_crash_for_original {
                    saw_start_of_new = true;
                }
            }
            _ => {}
        }
    }
    assert!(saw_crash_for_original);
    assert!(saw_start_of_new);
}

// ============================================================================
// one_for_all / rest_for_one
// ============================================================================

#[tokio::test]
async fn test_one_for_all_restarts_every_child() {
    let runtime = Runtime::new(RuntimeConfig::default());
    let a_starts = Arc::new(AtomicU32::new(0));
    let b_starts = Arc::new(AtomicU32::new(0));

    let supervisor = Supervisor::start(
        &runtime,
        "all",
        SupervisorOptions::new(Strategy::OneForAll),
        vec![
            steady_spec("a", &a_starts),
            brittle_spec("b", &b_starts),
        ],
    )
    .await
    .unwrap();

    let b = supervisor.get_child("b").await.unwrap();
    runtime.cast(b.server_id.as_ref().unwrap(), json!("die")).unwrap();
    settle().await;

    assert_eq!(a_starts.load(Ordering::SeqCst), 2, "sibling restarted");
    assert_eq!(b_starts.load(Ordering::SeqCst), 2, "failed child restarted");
    assert_eq!(supervisor.count_children().await.active, 2);
}

#[tokio::test]
async fn test_rest_for_one_restarts_failed_and_later_children() {
    let runtime = Runtime::new(RuntimeConfig::default());
    let first = Arc::new(AtomicU32::new(0));
    let middle = Arc::new(AtomicU32::new(0));
    let last = Arc::new(AtomicU32::new(0));

    let supervisor = Supervisor::start(
        &runtime,
        "rest",
        SupervisorOptions::new(Strategy::RestForOne),
        vec![
            steady_spec("first", &first),
            brittle_spec("middle", &middle),
            steady_spec("last", &last),
        ],
    )
    .await
    .unwrap();

    let mid = supervisor.get_child("middle").await.unwrap();
    runtime.cast(mid.server_id.as_ref().unwrap(), json!("die")).unwrap();
    settle().await;

    assert_eq!(first.load(Ordering::SeqCst), 1, "earlier child untouched");
    assert_eq!(middle.load(Ordering::SeqCst), 2, "failed child restarted");
    assert_eq!(last.load(Ordering::SeqCst), 2, "later child restarted");
}

// ============================================================================
// Restart policies
// ============================================================================

#[tokio::test]
async fn test_temporary_child_is_removed_on_crash() {
    let runtime = Runtime::new(RuntimeConfig::default());
    let starts = Arc::new(AtomicU32::new(0));

    let supervisor = Supervisor::start(
        &runtime,
        "temp",
        SupervisorOptions::new(Strategy::OneForOne),
        vec![brittle_spec("t", &starts).with_restart(RestartPolicy::Temporary)],
    )
    .await
    .unwrap();

    let t = supervisor.get_child("t").await.unwrap();
    runtime.cast(t.server_id.as_ref().unwrap(), json!("die")).unwrap();
    settle().await;

    assert_eq!(starts.load(Ordering::SeqCst), 1, "never restarted");
    assert!(supervisor.get_child("t").await.is_none(), "removed from set");
}

#[tokio::test]
async fn test_transient_child_not_restarted_on_normal_stop() {
    let runtime = Runtime::new(RuntimeConfig::default());
    let starts = Arc::new(AtomicU32::new(0));

    let supervisor = Supervisor::start(
        &runtime,
        "transient",
        SupervisorOptions::new(Strategy::OneForOne),
        vec![steady_spec("t", &starts).with_restart(RestartPolicy::Transient)],
    )
    .await
    .unwrap();

    let t = supervisor.get_child("t").await.unwrap();
    runtime
        .stop(t.server_id.as_ref().unwrap(), None)
        .await
        .unwrap();
    settle().await;

    assert_eq!(starts.load(Ordering::SeqCst), 1);
    let t = supervisor.get_child("t").await.unwrap();
    assert!(!t.running, "kept in the set but not running");
}

// ============================================================================
// Restart intensity
// ============================================================================

#[tokio::test]
async fn test_intensity_exceeded_stops_supervisor() {
    let runtime = Runtime::new(RuntimeConfig::default());
    let attempts = Arc::new(AtomicU32::new(0));
    let attempts_clone = Arc::clone(&attempts);

    let supervisor = Supervisor::start(
        &runtime,
        "limited",
        SupervisorOptions::new(Strategy::OneForOne).with_intensity(2, Duration::from_secs(1)),
        vec![ChildSpec::new(
            "c",
            Arc::new(move || {
                Box::new(FailsOnRestart {
                    attempts: Arc::clone(&attempts_clone),
                })
            }),
        )],
    )
    .await
    .unwrap();

    let c = supervisor.get_child("c").await.unwrap();
    runtime.cast(c.server_id.as_ref().unwrap(), json!("die")).unwrap();
    settle().await;

    // Initial start plus exactly two failed restart attempts.
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(supervisor.status(), ServerStatus::Stopped);
    match supervisor.failure().await {
        Some(SupervisorError::MaxRestartsExceeded { max_restarts, .. }) => {
            assert_eq!(max_restarts, 2);
        }
        other => panic!("unexpected failure: {other:?}"),
    }
}

#[tokio::test]
async fn test_zero_intensity_stops_on_first_crash() {
    let runtime = Runtime::new(RuntimeConfig::default());
    let starts = Arc::new(AtomicU32::new(0));

    let supervisor = Supervisor::start(
        &runtime,
        "zero",
        SupervisorOptions::new(Strategy::OneForOne).with_intensity(0, Duration::from_secs(1)),
        vec![brittle_spec("c", &starts)],
    )
    .await
    .unwrap();

    let c = supervisor.get_child("c").await.unwrap();
    runtime.cast(c.server_id.as_ref().unwrap(), json!("die")).unwrap();
    settle().await;

    assert_eq!(starts.load(Ordering::SeqCst), 1, "no restart attempted");
    assert_eq!(supervisor.status(), ServerStatus::Stopped);
    assert!(matches!(
        supervisor.failure().await,
        Some(SupervisorError::MaxRestartsExceeded { .. })
    ));
}

// ============================================================================
// simple_one_for_one
// ============================================================================

#[tokio::test]
async fn test_simple_one_for_one_dynamic_children() {
    let runtime = Runtime::new(RuntimeConfig::default());
    let starts = Arc::new(AtomicU32::new(0));

    let supervisor = Supervisor::start(
        &runtime,
        "pool",
        SupervisorOptions::new(Strategy::SimpleOneForOne),
        vec![steady_spec("worker", &starts)],
    )
    .await
    .unwrap();

    // No children until args are supplied.
    assert_eq!(supervisor.count_children().await.specs, 0);

    supervisor.start_child_with_args(Some(json!(1))).await.unwrap();
    supervisor.start_child_with_args(Some(json!(2))).await.unwrap();
    assert_eq!(supervisor.count_children().await.active, 2);

    // Full specs are rejected.
    let err = supervisor
        .start_child(steady_spec("other", &starts))
        .await
        .unwrap_err();
    assert!(matches!(err, SupervisorError::SpecRejected { .. }));
}

#[tokio::test]
async fn test_simple_one_for_one_restarts_only_failed_instance() {
    let runtime = Runtime::new(RuntimeConfig::default());
    let starts = Arc::new(AtomicU32::new(0));

    let supervisor = Supervisor::start(
        &runtime,
        "pool",
        SupervisorOptions::new(Strategy::SimpleOneForOne),
        vec![brittle_spec("worker", &starts)],
    )
    .await
    .unwrap();

    supervisor.start_child_with_args(None).await.unwrap();
    supervisor.start_child_with_args(None).await.unwrap();
    assert_eq!(starts.load(Ordering::SeqCst), 2);

    let children = supervisor.get_children().await;
    runtime
        .cast(children[0].server_id.as_ref().unwrap(), json!("die"))
        .unwrap();
    settle().await;

    assert_eq!(starts.load(Ordering::SeqCst), 3, "one restart");
    assert_eq!(supervisor.count_children().await.active, 2);
}

// ============================================================================
// auto_shutdown
// ============================================================================

#[tokio::test]
async fn test_auto_shutdown_any_significant() {
    let runtime = Runtime::new(RuntimeConfig::default());
    let starts = Arc::new(AtomicU32::new(0));

    let supervisor = Supervisor::start(
        &runtime,
        "auto",
        SupervisorOptions::new(Strategy::OneForOne)
            .with_auto_shutdown(AutoShutdown::AnySignificant),
        vec![
            steady_spec("keeper", &starts),
            steady_spec("marker", &starts)
                .with_restart(RestartPolicy::Transient)
                .with_significant(true),
        ],
    )
    .await
    .unwrap();

    let marker = supervisor.get_child("marker").await.unwrap();
    runtime
        .stop(marker.server_id.as_ref().unwrap(), None)
        .await
        .unwrap();
    settle().await;

    assert_eq!(supervisor.status(), ServerStatus::Stopped);
    // The sibling was stopped as part of auto-shutdown.
    assert_eq!(supervisor.count_children().await.active, 0);
}

// ============================================================================
// Dynamic management and startup rollback
// ============================================================================

#[tokio::test]
async fn test_startup_failure_rolls_back_started_children() {
    let runtime = Runtime::new(RuntimeConfig::default());
    let starts = Arc::new(AtomicU32::new(0));

    struct NeverStarts;

    #[async_trait]
    impl Behavior for NeverStarts {
        async fn init(&mut self, _args: Option<Value>) -> Result<(), BehaviorError> {
            Err(BehaviorError::new("no"))
        }
        async fn handle_call(&mut self, _msg: Value) -> Result<Value, BehaviorError> {
            Ok(Value::Null)
        }
        async fn handle_cast(&mut self, _msg: Value) -> Result<(), BehaviorError> {
            Ok(())
        }
    }

    let err = Supervisor::start(
        &runtime,
        "rollback",
        SupervisorOptions::new(Strategy::OneForOne),
        vec![
            steady_spec("ok", &starts),
            ChildSpec::new("bad", Arc::new(|| Box::new(NeverStarts))),
        ],
    )
    .await
    .unwrap_err();

    assert!(matches!(err, SupervisorError::ChildStartFailed { .. }));
    settle().await;
    assert_eq!(runtime.server_count(), 0, "started children were stopped");
}

#[tokio::test]
async fn test_dynamic_child_management() {
    let runtime = Runtime::new(RuntimeConfig::default());
    let starts = Arc::new(AtomicU32::new(0));

    let supervisor = Supervisor::start(
        &runtime,
        "dyn",
        SupervisorOptions::new(Strategy::OneForOne),
        vec![steady_spec("a", &starts)],
    )
    .await
    .unwrap();

    supervisor
        .start_child(steady_spec("b", &starts))
        .await
        .unwrap();
    assert!(matches!(
        supervisor.start_child(steady_spec("b", &starts)).await,
        Err(SupervisorError::DuplicateChild { .. })
    ));

    supervisor.terminate_child("b").await.unwrap();
    let b = supervisor.get_child("b").await.unwrap();
    assert!(!b.running);

    let new_id = supervisor.restart_child("b").await.unwrap();
    let b = supervisor.get_child("b").await.unwrap();
    assert_eq!(b.server_id.as_ref(), Some(&new_id));
    assert!(b.running);

    assert!(matches!(
        supervisor.terminate_child("missing").await,
        Err(SupervisorError::ChildNotFound { .. })
    ));

    supervisor.shutdown().await;
    assert_eq!(supervisor.status(), ServerStatus::Stopped);
    settle().await;
    assert_eq!(runtime.server_count(), 0);
}
