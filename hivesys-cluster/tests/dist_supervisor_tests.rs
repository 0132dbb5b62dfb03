//! Integration tests for the distributed supervisor.
//!
//! Coverage:
//! - Placement via node selectors
//! - Restart after a child crash
//! - Re-placement (migration) on host-node failure
//! - Intensity accounting and stats

#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::sleep;

use hivesys_cluster::prelude::*;
use hivesys_rt::server::{Behavior, BehaviorError, ServerStatus};
use hivesys_rt::supervisor::{RestartPolicy, Strategy, SupervisorError};
use hivesys_rt::system::{Runtime, RuntimeConfig};

struct Worker;

#[async_trait]
impl Behavior for Worker {
    async fn init(&mut self, _args: Option<Value>) -> Result<(), BehaviorError> {
        Ok(())
    }
    async fn handle_call(&mut self, _msg: Value) -> Result<Value, BehaviorError> {
        Ok(json!("ok"))
    }
    async fn handle_cast(&mut self, msg: Value) -> Result<(), BehaviorError> {
        if msg == json!("crash") {
            return Err(BehaviorError::new("boom"));
        }
        Ok(())
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
    cluster
        .catalogue()
        .register("worker", Arc::new(|| Box::new(Worker)))
        .unwrap();
    let local = cluster.start().await.unwrap();
    (cluster, local, runtime)
}

async fn connected_pair() -> (Cluster, NodeId, Cluster, NodeId) {
    let (a, a_id, _rt_a) = start_node("a", &[]).await;
    let (b, b_id, _rt_b) = start_node("b", &[a_id.clone()]).await;
    let start = Instant::now();
    while a.connected_nodes().is_empty() || b.connected_nodes().is_empty() {
        assert!(start.elapsed() < Duration::from_secs(5));
        sleep(Duration::from_millis(25)).await;
    }
    (a, a_id, b, b_id)
}

#[tokio::test]
async fn test_local_first_places_locally() {
    let (a, a_id, b, _b_id) = connected_pair().await;

    let supervisor = DistributedSupervisor::start(
        &a,
        "dist",
        DistributedSupervisorOptions::new(Strategy::OneForOne)
            .with_selector(NodeSelector::LocalFirst),
        vec![DistributedChildSpec::new("w1", "worker")],
    )
    .await
    .unwrap();

    let child = supervisor.get_child("w1").await.unwrap();
    assert_eq!(child.placement.as_ref().unwrap().node, a_id);
    assert!(child.running);

    supervisor.shutdown().await;
    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_round_robin_spreads_children() {
    let (a, a_id, b, b_id) = connected_pair().await;

    let supervisor = DistributedSupervisor::start(
        &a,
        "dist",
        DistributedSupervisorOptions::new(Strategy::OneForOne)
            .with_selector(NodeSelector::RoundRobin),
        vec![
            DistributedChildSpec::new("w1", "worker"),
            DistributedChildSpec::new("w2", "worker"),
        ],
    )
    .await
    .unwrap();

    let stats = supervisor.stats().await;
    assert_eq!(stats.children_by_node.len(), 2, "children on distinct nodes");
    assert_eq!(*stats.children_by_node.get(&a_id.to_string()).unwrap(), 1);
    assert_eq!(*stats.children_by_node.get(&b_id.to_string()).unwrap(), 1);

    supervisor.shutdown().await;
    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_pinned_selector() {
    let (a, _a_id, b, b_id) = connected_pair().await;

    let supervisor = DistributedSupervisor::start(
        &a,
        "dist",
        DistributedSupervisorOptions::new(Strategy::OneForOne)
            .with_selector(NodeSelector::Pinned(b_id.clone())),
        vec![DistributedChildSpec::new("w1", "worker")],
    )
    .await
    .unwrap();

    let child = supervisor.get_child("w1").await.unwrap();
    assert_eq!(child.placement.as_ref().unwrap().node, b_id);

    // A pinned-but-unknown node fails the start for that child.
    let err = supervisor
        .start_child(DistributedChildSpec::new("w2", "worker"))
        .await;
    // w2 uses the same pinned selector, which is still reachable here, so
    // this succeeds; unreachable pins are covered below.
    assert!(err.is_ok());

    supervisor.shutdown().await;
    let ghost = NodeId::parse("ghost@127.0.0.1:1").unwrap();
    let err = DistributedSupervisor::start(
        &a,
        "dist2",
        DistributedSupervisorOptions::new(Strategy::OneForOne)
            .with_selector(NodeSelector::Pinned(ghost)),
        vec![DistributedChildSpec::new("w1", "worker")],
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ClusterError::NoAvailableNode { .. }));

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_child_crash_triggers_restart() {
    let (a, _a_id, b, _b_id) = connected_pair().await;

    let supervisor = DistributedSupervisor::start(
        &a,
        "dist",
        DistributedSupervisorOptions::new(Strategy::OneForOne)
            .with_selector(NodeSelector::LocalFirst),
        vec![DistributedChildSpec::new("w1", "worker")],
    )
    .await
    .unwrap();

    let before = supervisor.get_child("w1").await.unwrap();
    let placement = before.placement.clone().unwrap();
    a.cast(&placement, json!("crash")).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let child = supervisor.get_child("w1").await;
        if child
            .as_ref()
            .map(|c| c.running && c.restart_count == 1)
            .unwrap_or(false)
        {
            break;
        }
        assert!(Instant::now() < deadline, "child never restarted");
        sleep(Duration::from_millis(50)).await;
    }

    let after = supervisor.get_child("w1").await.unwrap();
    assert_ne!(
        after.placement.as_ref().unwrap().server_id,
        placement.server_id,
        "fresh server id after restart"
    );

    supervisor.shutdown().await;
    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_child_migrates_on_node_failure() {
    let (a, a_id, b, b_id) = connected_pair().await;
    let a_for_selector = a_id.clone();

    // Prefer the remote node while it is up.
    let selector = NodeSelector::Custom(Arc::new(move |candidates, _| {
        candidates
            .iter()
            .find(|info| info.id != a_for_selector)
            .or_else(|| candidates.first())
            .map(|info| info.id.clone())
    }));

    let supervisor = DistributedSupervisor::start(
        &a,
        "dist",
        DistributedSupervisorOptions::new(Strategy::OneForOne).with_selector(selector),
        vec![DistributedChildSpec::new("w1", "worker")],
    )
    .await
    .unwrap();

    let before = supervisor.get_child("w1").await.unwrap();
    assert_eq!(before.placement.as_ref().unwrap().node, b_id);

    // Kill the hosting node; the child must be re-placed on A.
    b.stop().await;

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let placed_on_a = supervisor
            .get_child("w1")
            .await
            .and_then(|c| c.placement)
            .map(|p| p.node == a_id)
            .unwrap_or(false);
        if placed_on_a {
            break;
        }
        assert!(Instant::now() < deadline, "child never migrated to a");
        sleep(Duration::from_millis(50)).await;
    }

    let stats = supervisor.stats().await;
    assert_eq!(stats.node_failure_restarts, 1);

    supervisor.shutdown().await;
    a.stop().await;
}

#[tokio::test]
async fn test_temporary_child_dropped_on_node_failure() {
    let (a, a_id, b, b_id) = connected_pair().await;

    let supervisor = DistributedSupervisor::start(
        &a,
        "dist",
        DistributedSupervisorOptions::new(Strategy::OneForOne)
            .with_selector(NodeSelector::Pinned(b_id.clone())),
        vec![DistributedChildSpec::new("w1", "worker")
            .with_restart(RestartPolicy::Temporary)],
    )
    .await
    .unwrap();

    b.stop().await;

    let deadline = Instant::now() + Duration::from_secs(5);
    while supervisor.get_child("w1").await.is_some() {
        assert!(Instant::now() < deadline, "temporary child never dropped");
        sleep(Duration::from_millis(50)).await;
    }

    let _ = a_id;
    supervisor.shutdown().await;
    a.stop().await;
}

#[tokio::test]
async fn test_dynamic_children_and_template_rules() {
    let (a, _a_id, b, _b_id) = connected_pair().await;

    let supervisor = DistributedSupervisor::start(
        &a,
        "pool",
        DistributedSupervisorOptions::new(Strategy::SimpleOneForOne)
            .with_selector(NodeSelector::LocalFirst),
        vec![DistributedChildSpec::new("worker", "worker")],
    )
    .await
    .unwrap();

    assert_eq!(supervisor.count_children().await, (0, 0));
    supervisor.start_child_with_args(None).await.unwrap();
    supervisor.start_child_with_args(Some(json!(1))).await.unwrap();
    assert_eq!(supervisor.count_children().await, (2, 2));

    let err = supervisor
        .start_child(DistributedChildSpec::new("other", "worker"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ClusterError::Supervisor(SupervisorError::SpecRejected { .. })
    ));

    supervisor.shutdown().await;
    assert_eq!(supervisor.status(), ServerStatus::Stopped);
    a.stop().await;
    b.stop().await;
}
