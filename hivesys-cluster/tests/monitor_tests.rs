//! Integration tests for remote monitors.
//!
//! Coverage:
//! - process_down on termination, with reason mapping
//! - Immediate noproc for missing servers
//! - Single-shot delivery and demonitor idempotence
//! - Synthetic noconnection on peer loss
//! - Duplicate (initiator, target) rejection

#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::sleep;

use hivesys_cluster::prelude::*;
use hivesys_rt::events::{EventSubscription, LifecycleEventKind};
use hivesys_rt::server::{Behavior, BehaviorError, ExitReason, StartOptions};
use hivesys_rt::system::{Runtime, RuntimeConfig};
use hivesys_rt::util::{MonitorId, ServerId};

struct Idle;

#[async_trait]
impl Behavior for Idle {
    async fn init(&mut self, _args: Option<Value>) -> Result<(), BehaviorError> {
        Ok(())
    }
    async fn handle_call(&mut self, _msg: Value) -> Result<Value, BehaviorError> {
        Ok(Value::Null)
    }
    async fn handle_cast(&mut self, _msg: Value) -> Result<(), BehaviorError> {
        Err(BehaviorError::new("crash requested"))
    }
}

fn fast_config(name: &str) -> ClusterConfig {
    ClusterConfig::new(name)
        .with_host("127.0.0.1")
        .with_port(0)
        .with_heartbeat_interval(Duration::from_millis(150))
}

async fn start_node(name: &str, seeds: &[NodeId]) -> (Cluster, NodeId, Runtime) {
    let runtime = Runtime::new(RuntimeConfig::default());
    let mut config = fast_config(name);
    for seed in seeds {
        config = config.with_seed(seed.to_string());
    }
    let cluster = Cluster::new(config, runtime.clone()).unwrap();
    let local = cluster.start().await.unwrap();
    (cluster, local, runtime)
}

async fn connected_pair() -> (Cluster, Runtime, Cluster, Runtime) {
    let (a, a_id, rt_a) = start_node("a", &[]).await;
    let (b, _b_id, rt_b) = start_node("b", &[a_id]).await;
    let start = Instant::now();
    while a.connected_nodes().is_empty() || b.connected_nodes().is_empty() {
        assert!(start.elapsed() < Duration::from_secs(5));
        sleep(Duration::from_millis(25)).await;
    }
    (a, rt_a, b, rt_b)
}

async fn expect_process_down(
    events: &mut EventSubscription,
    monitor_id: &MonitorId,
    expected_reason: &str,
) -> ServerId {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        assert!(!remaining.is_zero(), "no process_down for {monitor_id}");
        let event = tokio::time::timeout(remaining, events.recv())
            .await
            .expect("event stream timed out")
            .expect("event stream closed");
        if let LifecycleEventKind::ProcessDown {
            monitor_id: got,
            reason,
            server_id,
            ..
        } = event.kind
        {
            if &got == monitor_id {
                assert_eq!(reason, expected_reason);
                return server_id;
            }
        }
    }
}

#[tokio::test]
async fn test_process_down_on_remote_stop() {
    let (a, rt_a, b, rt_b) = connected_pair().await;
    let mut events = rt_a.subscribe();

    let server = rt_b
        .start(Box::new(Idle), StartOptions::new())
        .await
        .unwrap();
    let target = ServerRef::new(server.clone(), b.local_node().unwrap());

    let monitor_id = a.monitor(&target, None).await.unwrap();
    rt_b.stop(&server, Some(ExitReason::Normal)).await.unwrap();

    let down_server = expect_process_down(&mut events, &monitor_id, "normal").await;
    assert_eq!(down_server, server);

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_process_down_reason_error_on_crash() {
    let (a, rt_a, b, rt_b) = connected_pair().await;
    let mut events = rt_a.subscribe();

    let server = rt_b
        .start(Box::new(Idle), StartOptions::new())
        .await
        .unwrap();
    let target = ServerRef::new(server.clone(), b.local_node().unwrap());
    let monitor_id = a.monitor(&target, None).await.unwrap();

    // Idle crashes on any cast.
    rt_b.cast(&server, Value::Null).unwrap();
    expect_process_down(&mut events, &monitor_id, "error").await;

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_noproc_for_missing_server() {
    let (a, rt_a, b, _rt_b) = connected_pair().await;
    let mut events = rt_a.subscribe();

    let target = ServerRef::new(ServerId::new(), b.local_node().unwrap());
    let monitor_id = a.monitor(&target, None).await.unwrap();

    expect_process_down(&mut events, &monitor_id, "noproc").await;

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_noconnection_on_peer_loss() {
    let (a, rt_a, b, rt_b) = connected_pair().await;
    let mut events = rt_a.subscribe();

    let server = rt_b
        .start(Box::new(Idle), StartOptions::new())
        .await
        .unwrap();
    let target = ServerRef::new(server, b.local_node().unwrap());
    let monitor_id = a.monitor(&target, None).await.unwrap();

    // The monitored server never terminates; its node goes away instead.
    b.stop().await;
    expect_process_down(&mut events, &monitor_id, "noconnection").await;

    a.stop().await;
}

#[tokio::test]
async fn test_demonitor_suppresses_delivery_and_is_idempotent() {
    let (a, rt_a, b, rt_b) = connected_pair().await;
    let mut events = rt_a.subscribe();

    let server = rt_b
        .start(Box::new(Idle), StartOptions::new())
        .await
        .unwrap();
    let target = ServerRef::new(server.clone(), b.local_node().unwrap());
    let monitor_id = a.monitor(&target, None).await.unwrap();

    a.demonitor(&monitor_id).unwrap();
    // Demonitor of an unknown or already-resolved id is a no-op.
    a.demonitor(&monitor_id).unwrap();
    a.demonitor(&MonitorId::new()).unwrap();

    // Give the demonitor a moment to reach B, then stop the server.
    sleep(Duration::from_millis(200)).await;
    rt_b.stop(&server, None).await.unwrap();
    sleep(Duration::from_millis(400)).await;

    while let Some(event) = events.try_recv() {
        if let LifecycleEventKind::ProcessDown { monitor_id: got, .. } = event.kind {
            assert_ne!(got, monitor_id, "demonitored monitor still fired");
        }
    }

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_duplicate_monitor_pair_rejected() {
    let (a, _rt_a, b, rt_b) = connected_pair().await;

    let server = rt_b
        .start(Box::new(Idle), StartOptions::new())
        .await
        .unwrap();
    let target = ServerRef::new(server, b.local_node().unwrap());

    // Same watcher identity twice: the second request is rejected.
    let watcher = ServerRef::new(ServerId::new(), a.local_node().unwrap());
    a.monitor_as(watcher.clone(), &target, None).await.unwrap();
    let err = a.monitor_as(watcher, &target, None).await.unwrap_err();
    assert!(matches!(err, ClusterError::MonitorRejected { .. }));

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_local_monitor_through_cluster() {
    let (a, rt_a, b, _rt_b) = connected_pair().await;
    let mut events = rt_a.subscribe();

    // Monitoring a server on the local node works the same way.
    let server = rt_a
        .start(Box::new(Idle), StartOptions::new())
        .await
        .unwrap();
    let target = ServerRef::new(server.clone(), a.local_node().unwrap());
    let monitor_id = a.monitor(&target, None).await.unwrap();

    rt_a.stop(&server, None).await.unwrap();
    expect_process_down(&mut events, &monitor_id, "normal").await;

    a.stop().await;
    b.stop().await;
}
