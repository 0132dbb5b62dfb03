//! Integration tests for the server runtime.
//!
//! Coverage:
//! - Serialized message processing (enqueue order, no overlap)
//! - Call/cast/stop semantics, timeouts, crash isolation
//! - Lifecycle event emission and ordering
//! - Registry interaction and cleanup

#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::sleep;

use hivesys_rt::events::LifecycleEventKind;
use hivesys_rt::server::{Behavior, BehaviorError, ExitReason, ServerError, StartOptions};
use hivesys_rt::system::{Runtime, RuntimeConfig};

// ============================================================================
// Test behaviors
// ============================================================================

/// Records every message it sees, in order.
struct Recorder {
    seen: Vec<Value>,
}

#[async_trait]
impl Behavior for Recorder {
    async fn init(&mut self, _args: Option<Value>) -> Result<(), BehaviorError> {
        Ok(())
    }

    async fn handle_call(&mut self, msg: Value) -> Result<Value, BehaviorError> {
        if msg == json!("seen") {
            return Ok(json!(self.seen.clone()));
        }
        self.seen.push(msg);
        Ok(Value::Null)
    }

    async fn handle_cast(&mut self, msg: Value) -> Result<(), BehaviorError> {
        if msg == json!("crash") {
            return Err(BehaviorError::new("asked to crash"));
        }
        self.seen.push(msg);
        Ok(())
    }
}

/// Sleeps inside the handler to expose serialization and timeouts.
struct Sleeper {
    delay: Duration,
    overlap_guard: Arc<AtomicBool>,
    overlapped: Arc<AtomicBool>,
}

#[async_trait]
impl Behavior for Sleeper {
    async fn init(&mut self, _args: Option<Value>) -> Result<(), BehaviorError> {
        Ok(())
    }

    async fn handle_call(&mut self, _msg: Value) -> Result<Value, BehaviorError> {
        if self.overlap_guard.swap(true, Ordering::SeqCst) {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        sleep(self.delay).await;
        self.overlap_guard.store(false, Ordering::SeqCst);
        Ok(json!("done"))
    }

    async fn handle_cast(&mut self, _msg: Value) -> Result<(), BehaviorError> {
        if self.overlap_guard.swap(true, Ordering::SeqCst) {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        sleep(self.delay).await;
        self.overlap_guard.store(false, Ordering::SeqCst);
        Ok(())
    }
}

struct FailingCall;

#[async_trait]
impl Behavior for FailingCall {
    async fn init(&mut self, _args: Option<Value>) -> Result<(), BehaviorError> {
        Ok(())
    }

    async fn handle_call(&mut self, _msg: Value) -> Result<Value, BehaviorError> {
        Err(BehaviorError::new("call rejected"))
    }

    async fn handle_cast(&mut self, _msg: Value) -> Result<(), BehaviorError> {
        Ok(())
    }
}

struct TerminateProbe {
    flag: Arc<AtomicBool>,
}

#[async_trait]
impl Behavior for TerminateProbe {
    async fn init(&mut self, _args: Option<Value>) -> Result<(), BehaviorError> {
        Ok(())
    }

    async fn handle_call(&mut self, _msg: Value) -> Result<Value, BehaviorError> {
        Ok(Value::Null)
    }

    async fn handle_cast(&mut self, _msg: Value) -> Result<(), BehaviorError> {
        Ok(())
    }

    async fn terminate(&mut self, _reason: &ExitReason) -> Result<(), BehaviorError> {
        self.flag.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Ordering and serialization
// ============================================================================

#[tokio::test]
async fn test_messages_processed_in_enqueue_order() {
    let runtime = Runtime::new(RuntimeConfig::default());
    let id = runtime
        .start(Box::new(Recorder { seen: Vec::new() }), StartOptions::new())
        .await
        .unwrap();

    for i in 0..100 {
        runtime.cast(&id, json!(i)).unwrap();
    }
    let seen = runtime.call(&id, json!("seen"), None).await.unwrap();
    let expected: Vec<Value> = (0..100).map(|i| json!(i)).collect();
    assert_eq!(seen, json!(expected));
}

#[tokio::test]
async fn test_handlers_never_overlap() {
    let runtime = Runtime::new(RuntimeConfig::default());
    let overlap_guard = Arc::new(AtomicBool::new(false));
    let overlapped = Arc::new(AtomicBool::new(false));
    let id = runtime
        .start(
            Box::new(Sleeper {
                delay: Duration::from_millis(5),
                overlap_guard: Arc::clone(&overlap_guard),
                overlapped: Arc::clone(&overlapped),
            }),
            StartOptions::new(),
        )
        .await
        .unwrap();

    for _ in 0..20 {
        runtime.cast(&id, json!("tick")).unwrap();
    }
    // Wait for the queue to drain.
    runtime
        .call(&id, json!("probe"), Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert!(!overlapped.load(Ordering::SeqCst));
}

// ============================================================================
// Call semantics
// ============================================================================

#[tokio::test]
async fn test_call_timeout_leaves_server_running() {
    let runtime = Runtime::new(RuntimeConfig::default());
    let id = runtime
        .start(
            Box::new(Sleeper {
                delay: Duration::from_millis(200),
                overlap_guard: Arc::new(AtomicBool::new(false)),
                overlapped: Arc::new(AtomicBool::new(false)),
            }),
            StartOptions::new(),
        )
        .await
        .unwrap();

    let err = runtime
        .call(&id, json!("slow"), Some(Duration::from_millis(20)))
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::CallTimeout { .. }));

    // The server is still running and serves later calls.
    assert!(runtime.is_running(&id));
    let reply = runtime
        .call(&id, json!("again"), Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(reply, json!("done"));
}

#[tokio::test]
async fn test_handle_call_error_goes_to_caller() {
    let runtime = Runtime::new(RuntimeConfig::default());
    let id = runtime
        .start(Box::new(FailingCall), StartOptions::new())
        .await
        .unwrap();

    let err = runtime.call(&id, json!("x"), None).await.unwrap_err();
    match err {
        ServerError::Handler { source, .. } => assert_eq!(source.message, "call rejected"),
        other => panic!("unexpected error: {other}"),
    }
    // Call errors do not crash the server.
    assert!(runtime.is_running(&id));
}

#[tokio::test]
async fn test_call_to_stopped_server_fails() {
    let runtime = Runtime::new(RuntimeConfig::default());
    let id = runtime
        .start(Box::new(FailingCall), StartOptions::new())
        .await
        .unwrap();
    runtime.stop(&id, None).await.unwrap();

    let err = runtime.call(&id, json!("x"), None).await.unwrap_err();
    assert!(matches!(err, ServerError::NotRunning { .. }));
    let err = runtime.cast(&id, json!("x")).unwrap_err();
    assert!(matches!(err, ServerError::NotRunning { .. }));
}

// ============================================================================
// Crash isolation and lifecycle events
// ============================================================================

#[tokio::test]
async fn test_cast_error_crashes_server_and_emits_event() {
    let runtime = Runtime::new(RuntimeConfig::default());
    let mut events = runtime.subscribe();
    let id = runtime
        .start(Box::new(Recorder { seen: Vec::new() }), StartOptions::new())
        .await
        .unwrap();

    runtime.cast(&id, json!("crash")).unwrap();

    // started, then crashed
    let first = events.recv().await.unwrap();
    assert!(matches!(first.kind, LifecycleEventKind::Started { .. }));
    let second = events.recv().await.unwrap();
    match second.kind {
        LifecycleEventKind::Crashed {
            server_id, reason, ..
        } => {
            assert_eq!(server_id, id);
            assert!(reason.contains("asked to crash"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(!runtime.is_running(&id));
}

#[tokio::test]
async fn test_stop_emits_terminated_and_runs_terminate_hook() {
    let runtime = Runtime::new(RuntimeConfig::default());
    let flag = Arc::new(AtomicBool::new(false));
    let mut events = runtime.subscribe();
    let id = runtime
        .start(
            Box::new(TerminateProbe {
                flag: Arc::clone(&flag),
            }),
            StartOptions::new(),
        )
        .await
        .unwrap();

    runtime
        .stop(&id, Some(ExitReason::Normal))
        .await
        .unwrap();
    assert!(flag.load(Ordering::SeqCst));

    let _started = events.recv().await.unwrap();
    let terminated = events.recv().await.unwrap();
    match terminated.kind {
        LifecycleEventKind::Terminated { reason, .. } => {
            assert_eq!(reason, ExitReason::Normal);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_force_terminate_cancels_in_flight_handler() {
    let runtime = Runtime::new(RuntimeConfig::default());
    let id = runtime
        .start(
            Box::new(Sleeper {
                delay: Duration::from_secs(60),
                overlap_guard: Arc::new(AtomicBool::new(false)),
                overlapped: Arc::new(AtomicBool::new(false)),
            }),
            StartOptions::new(),
        )
        .await
        .unwrap();

    // Get the handler stuck.
    runtime.cast(&id, json!("stall")).unwrap();
    sleep(Duration::from_millis(50)).await;

    // Kill returns promptly even though the handler would sleep a minute.
    tokio::time::timeout(
        Duration::from_secs(1),
        runtime.force_terminate(&id, ExitReason::Killed),
    )
    .await
    .expect("force_terminate timed out")
    .unwrap();
    assert!(!runtime.is_running(&id));
}

#[tokio::test]
async fn test_pending_callers_rejected_on_stop() {
    let runtime = Runtime::new(RuntimeConfig::default());
    let id = runtime
        .start(
            Box::new(Sleeper {
                delay: Duration::from_millis(300),
                overlap_guard: Arc::new(AtomicBool::new(false)),
                overlapped: Arc::new(AtomicBool::new(false)),
            }),
            StartOptions::new(),
        )
        .await
        .unwrap();

    // First call occupies the handler; the second waits in the queue.
    let rt2 = runtime.clone();
    let id2 = id.clone();
    let queued = tokio::spawn(async move {
        rt2.call(&id2, json!("queued"), Some(Duration::from_secs(5))).await
    });
    sleep(Duration::from_millis(50)).await;

    runtime.stop(&id, None).await.unwrap();
    let outcome = queued.await.unwrap();
    assert!(matches!(outcome, Err(ServerError::NotRunning { .. })));
}

// ============================================================================
// Introspection
// ============================================================================

#[tokio::test]
async fn test_stats_track_queue_and_processed() {
    let runtime = Runtime::new(RuntimeConfig::default());
    let id = runtime
        .start(Box::new(Recorder { seen: Vec::new() }), StartOptions::new())
        .await
        .unwrap();

    for i in 0..10 {
        runtime.cast(&id, json!(i)).unwrap();
    }
    runtime.call(&id, json!("probe"), None).await.unwrap();

    let stats = runtime.server_stats(&id).unwrap();
    assert_eq!(stats.processed, 11);
    assert_eq!(stats.queue_len, 0);
    assert!(stats.state_size > 0);
    assert!(stats.status.is_running());
    assert_eq!(runtime.list_servers().len(), 1);
}
