//! Composition root for one node.
//!
//! A [`Node`] owns the state machine and starts the leadership and snapshot
//! loops next to it. Writes go straight to the local state machine whatever
//! the leadership flag says, and nothing is forwarded to peers: each node
//! keeps its own copy of the fleet.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use serde_json::Value;
use tracing::{info, warn};

use crate::cluster::ClusterPeers;
use crate::command::{Command, CommandEnvelope};
use crate::fsm::FleetStateMachine;
use crate::leadership::{LeadershipConfig, LeadershipCoordinator};
use crate::metrics::Metrics;
use crate::model::{Filament, JobStatus, PrintJob, Printer};
use crate::snapshot::{SnapshotConfig, SnapshotScheduler, SnapshotWriter};

/// Everything needed to bring a node up.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub node_id: String,
    /// Holds snapshots and the leadership marker. Nodes that should compete
    /// for leadership must share it.
    pub data_dir: PathBuf,
    /// `nodes=host:port,...`
    pub cluster: String,
    pub leadership: LeadershipConfig,
    pub snapshot: SnapshotConfig,
    /// Load the newest snapshot from `data_dir` before starting.
    pub restore_latest: bool,
}

impl NodeConfig {
    pub fn new(
        node_id: impl Into<String>,
        data_dir: impl Into<PathBuf>,
        cluster: impl Into<String>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            data_dir: data_dir.into(),
            cluster: cluster.into(),
            leadership: LeadershipConfig::default(),
            snapshot: SnapshotConfig::default(),
            restore_latest: false,
        }
    }
}

/// Point-in-time view of a node's identity and leadership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    pub node_id: String,
    pub peers: Vec<String>,
    pub is_leader: bool,
    pub term: u64,
}

pub struct Node {
    node_id: String,
    peers: ClusterPeers,
    fsm: Arc<FleetStateMachine>,
    leadership: LeadershipCoordinator,
    snapshots: SnapshotScheduler,
}

impl Node {
    /// Validates the configuration, builds the components and starts the
    /// leadership and snapshot loops. Must be called inside a Tokio runtime.
    ///
    /// A missing node id or a bad cluster descriptor fails here and nowhere
    /// later.
    pub async fn start(config: NodeConfig, metrics: Metrics) -> Result<Self> {
        let NodeConfig {
            node_id,
            data_dir,
            cluster,
            leadership,
            snapshot,
            restore_latest,
        } = config;
        ensure!(!node_id.trim().is_empty(), "node id must not be empty");

        let peers = ClusterPeers::parse(&cluster)
            .with_context(|| format!("failed to parse cluster for node {node_id}"))?;
        info!(node_id = %node_id, peers = ?peers.addresses(), "parsed cluster peers");

        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;

        let fsm = Arc::new(FleetStateMachine::new());
        let writer = SnapshotWriter::new(Arc::clone(&fsm), data_dir.clone(), metrics.clone());
        if restore_latest {
            match writer.restore_latest().await? {
                Some(path) => info!(node_id = %node_id, path = %path.display(), "recovered state"),
                None => info!(node_id = %node_id, "no snapshot to recover from"),
            }
        }

        let mut leadership =
            LeadershipCoordinator::new(node_id.clone(), &data_dir, leadership, metrics.clone())?;
        let mut snapshots = SnapshotScheduler::new(writer, snapshot)?;
        metrics.set_leader(&node_id, false);

        leadership.start()?;
        snapshots.start()?;
        info!(node_id = %node_id, data_dir = %data_dir.display(), "node started");

        Ok(Self {
            node_id,
            peers,
            fsm,
            leadership,
            snapshots,
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn peers(&self) -> &[String] {
        self.peers.addresses()
    }

    pub fn fsm(&self) -> &Arc<FleetStateMachine> {
        &self.fsm
    }

    /// Wraps `(op, value)` into an envelope and applies it locally.
    ///
    /// Returns whether the command was accepted. Why a command was refused
    /// is logged, not returned.
    pub fn apply(&self, op: &str, value: Value) -> bool {
        match CommandEnvelope::new(op, value).encode() {
            Ok(entry) => self.apply_entry(op, &entry),
            Err(err) => {
                warn!(node_id = %self.node_id, op, error = ?err, "failed to encode command");
                false
            }
        }
    }

    /// Typed counterpart of [`Node::apply`]; takes the same encoded path.
    pub fn apply_command(&self, command: &Command) -> bool {
        match command.encode() {
            Ok(entry) => self.apply_entry(command.op(), &entry),
            Err(err) => {
                warn!(
                    node_id = %self.node_id,
                    op = command.op(),
                    error = ?err,
                    "failed to encode command"
                );
                false
            }
        }
    }

    fn apply_entry(&self, op: &str, entry: &[u8]) -> bool {
        match self.fsm.apply(entry) {
            Ok(report) => {
                info!(node_id = %self.node_id, op = report.op, id = %report.id, "applied command");
                true
            }
            Err(err) => {
                warn!(node_id = %self.node_id, op, error = %err, "rejected command");
                false
            }
        }
    }

    /// Copies of the printers, so callers never hold the state lock.
    pub fn printers(&self) -> BTreeMap<String, Printer> {
        self.fsm.printers()
    }

    pub fn filaments(&self) -> BTreeMap<String, Filament> {
        self.fsm.filaments()
    }

    pub fn print_jobs(&self, status: Option<JobStatus>) -> BTreeMap<String, PrintJob> {
        self.fsm.print_jobs(status)
    }

    pub fn is_leader(&self) -> bool {
        self.leadership.is_leader()
    }

    pub fn term(&self) -> u64 {
        self.leadership.term()
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            node_id: self.node_id.clone(),
            peers: self.peers.addresses().to_vec(),
            is_leader: self.is_leader(),
            term: self.term(),
        }
    }

    /// Stops both loops and gives up leadership.
    ///
    /// Dropping a node without calling this also ends the loops, but leaves
    /// any marker it holds to be evicted as stale.
    pub async fn shutdown(mut self) {
        self.leadership.stop().await;
        self.snapshots.stop().await;
        info!(node_id = %self.node_id, "node stopped");
    }
}
