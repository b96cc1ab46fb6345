//! Integration tests for a single node: command application through the
//! public `apply(op, value)` entry point, snapshots on disk, and startup
//! validation.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use raft3d::leadership::LeadershipConfig;
use raft3d::metrics::Metrics;
use raft3d::model::JobStatus;
use raft3d::snapshot::{latest_snapshot, SnapshotConfig};
use raft3d::{FleetStateMachine, Node, NodeConfig};
use serde_json::json;
use tempfile::TempDir;

const CLUSTER: &str = "nodes=raft3d-node1:9090,raft3d-node2:9090,raft3d-node3:9090";

/// A config whose background loops stay out of the way unless a test asks otherwise.
fn quiet_config(node_id: &str, dir: &Path) -> NodeConfig {
    let mut config = NodeConfig::new(node_id, dir, CLUSTER);
    config.leadership = LeadershipConfig {
        claim_probability: 0.0,
        ..LeadershipConfig::default()
    };
    config.snapshot = SnapshotConfig {
        interval: Duration::from_secs(3600),
    };
    config
}

async fn wait_for<F: Fn() -> bool>(what: &str, timeout: Duration, check: F) -> Result<()> {
    let start = tokio::time::Instant::now();
    while !check() {
        if start.elapsed() > timeout {
            anyhow::bail!("timeout waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

#[tokio::test]
async fn printer_filament_job_lifecycle() -> Result<()> {
    let dir = TempDir::new()?;
    let node = Node::start(quiet_config("node1", dir.path()), Metrics::new()).await?;

    assert!(node.apply(
        "add_printer",
        json!({"id": "p1", "company": "Acme", "model": "X1"})
    ));
    assert!(node.apply(
        "add_filament",
        json!({
            "id": "f1",
            "type": "PLA",
            "color": "Blue",
            "total_weight": 1000,
            "remaining_weight": 1000
        })
    ));
    assert!(node.apply(
        "add_print_job",
        json!({
            "id": "j1",
            "printer_id": "p1",
            "filament_id": "f1",
            "filepath": "/a.gcode",
            "print_weight": 200,
            "status": "Queued"
        })
    ));
    assert!(node.apply(
        "update_print_job_status",
        json!({"job_id": "j1", "status": "Running"})
    ));
    assert!(node.apply(
        "update_print_job_status",
        json!({"job_id": "j1", "status": "Done"})
    ));
    assert_eq!(node.filaments()["f1"].remaining_weight, 800);

    assert!(!node.apply(
        "update_print_job_status",
        json!({"job_id": "j1", "status": "Cancelled"})
    ));
    assert_eq!(node.filaments()["f1"].remaining_weight, 800);
    assert_eq!(node.print_jobs(Some(JobStatus::Done)).len(), 1);
    assert!(node.print_jobs(Some(JobStatus::Cancelled)).is_empty());

    node.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn added_entities_read_back_unchanged() -> Result<()> {
    let dir = TempDir::new()?;
    let node = Node::start(quiet_config("node1", dir.path()), Metrics::new()).await?;

    let printer = json!({"id": "p7", "company": "Prusa", "model": "MK4"});
    let filament = json!({
        "id": "f7",
        "type": "TPU",
        "color": "Clear",
        "total_weight": 500,
        "remaining_weight": 120
    });
    let job = json!({
        "id": "j7",
        "printer_id": "p7",
        "filament_id": "f7",
        "filepath": "/parts/bracket.gcode",
        "print_weight": 35,
        "status": "Running"
    });
    assert!(node.apply("add_printer", printer.clone()));
    assert!(node.apply("add_filament", filament.clone()));
    assert!(node.apply("add_print_job", job.clone()));

    assert_eq!(serde_json::to_value(&node.printers()["p7"])?, printer);
    assert_eq!(serde_json::to_value(&node.filaments()["f7"])?, filament);
    assert_eq!(serde_json::to_value(&node.print_jobs(None)["j7"])?, job);

    node.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn rejected_commands_do_not_mutate_state() -> Result<()> {
    let dir = TempDir::new()?;
    let node = Node::start(quiet_config("node1", dir.path()), Metrics::new()).await?;

    assert!(!node.apply("rename_printer", json!({"id": "p1"})));
    assert!(!node.apply("add_printer", json!({"id": "p1", "company": "Acme"})));
    assert!(!node.apply(
        "add_filament",
        json!({
            "id": "f1",
            "type": "PLA",
            "color": "Blue",
            "total_weight": 100,
            "remaining_weight": 200
        })
    ));
    assert!(!node.apply(
        "update_print_job_status",
        json!({"job_id": "ghost", "status": "Running"})
    ));

    assert!(node.printers().is_empty());
    assert!(node.filaments().is_empty());
    assert!(node.print_jobs(None).is_empty());

    node.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn bad_cluster_descriptor_aborts_startup() -> Result<()> {
    let dir = TempDir::new()?;
    for cluster in ["", "nodes=", "raft3d-node1:9090"] {
        let mut config = quiet_config("node1", dir.path());
        config.cluster = cluster.to_string();
        assert!(
            Node::start(config, Metrics::new()).await.is_err(),
            "cluster {cluster:?} should be fatal"
        );
    }

    let mut config = quiet_config("", dir.path());
    config.cluster = CLUSTER.to_string();
    assert!(Node::start(config, Metrics::new()).await.is_err());
    Ok(())
}

#[tokio::test]
async fn status_reports_peers_in_order() -> Result<()> {
    let dir = TempDir::new()?;
    let node = Node::start(quiet_config("node2", dir.path()), Metrics::new()).await?;

    let status = node.status();
    assert_eq!(status.node_id, "node2");
    assert_eq!(
        status.peers,
        ["raft3d-node1:9090", "raft3d-node2:9090", "raft3d-node3:9090"]
    );
    assert!(!status.is_leader);
    assert_eq!(status.term, 0);

    node.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn scheduler_writes_restorable_snapshots() -> Result<()> {
    let dir = TempDir::new()?;
    let metrics = Metrics::new();
    let mut config = quiet_config("node1", dir.path());
    config.snapshot.interval = Duration::from_millis(20);
    let node = Node::start(config, metrics.clone()).await?;

    assert!(node.apply(
        "add_printer",
        json!({"id": "p1", "company": "Acme", "model": "X1"})
    ));
    wait_for("two snapshots", Duration::from_secs(5), || {
        metrics.snapshots_total() >= 2
    })
    .await?;
    let expected = node.fsm().state();
    node.shutdown().await;

    let path = latest_snapshot(dir.path())
        .await?
        .expect("a snapshot file should exist");
    let restored = FleetStateMachine::new();
    restored.restore(&tokio::fs::read(&path).await?)?;
    assert_eq!(restored.state(), expected);
    Ok(())
}

#[tokio::test]
async fn restore_latest_recovers_previous_state() -> Result<()> {
    let dir = TempDir::new()?;
    let first = Node::start(quiet_config("node1", dir.path()), Metrics::new()).await?;
    assert!(first.apply(
        "add_printer",
        json!({"id": "p1", "company": "Acme", "model": "X1"})
    ));
    let snapshot = first.fsm().snapshot()?;
    tokio::fs::write(dir.path().join("snapshot_1000.snap"), snapshot).await?;
    first.shutdown().await;

    let mut config = quiet_config("node1", dir.path());
    config.restore_latest = true;
    let second = Node::start(config, Metrics::new()).await?;
    assert!(second.printers().contains_key("p1"));
    second.shutdown().await;

    // Without the flag a node starts empty even with snapshots on disk.
    let third = Node::start(quiet_config("node1", dir.path()), Metrics::new()).await?;
    assert!(third.printers().is_empty());
    third.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn shutdown_does_not_wait_out_long_intervals() -> Result<()> {
    let dir = TempDir::new()?;
    let node = Node::start(quiet_config("node1", dir.path()), Metrics::new()).await?;
    tokio::time::timeout(Duration::from_secs(2), node.shutdown()).await?;
    Ok(())
}
