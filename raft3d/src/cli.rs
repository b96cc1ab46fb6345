use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::leadership::LeadershipConfig;
use crate::node::NodeConfig;
use crate::snapshot::SnapshotConfig;

/// Run one printer-fleet node: HTTP API, leadership signaling and snapshots.
///
/// Every option can also be set through the environment variable shown.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Unique id of this node; written into the leadership marker.
    #[arg(long, env = "NODE_ID")]
    pub node_id: String,

    /// Peer port, reported at startup only.
    #[arg(long, env = "RAFT_PORT", default_value_t = 9090)]
    pub raft_port: u16,

    /// Port the HTTP API listens on.
    #[arg(long, env = "HTTP_PORT", default_value_t = 8080)]
    pub http_port: u16,

    /// Directory for snapshots and the shared leadership marker.
    #[arg(long, env = "RAFT_DIR")]
    pub raft_dir: PathBuf,

    /// Cluster descriptor: nodes=host:port,host:port,...
    #[arg(long, env = "CLUSTER")]
    pub cluster: String,

    /// Seconds between snapshots.
    #[arg(long, env = "SNAPSHOT_INTERVAL_SECS", default_value_t = 300)]
    pub snapshot_interval_secs: u64,

    /// Milliseconds between leadership ticks.
    #[arg(long, env = "LEADER_TICK_MS", default_value_t = 1000)]
    pub leader_tick_ms: u64,

    /// Restore the newest snapshot in --raft-dir before starting.
    #[arg(long, env = "RESTORE_LATEST")]
    pub restore_latest: bool,
}

impl Cli {
    pub fn node_config(&self) -> NodeConfig {
        NodeConfig {
            node_id: self.node_id.clone(),
            data_dir: self.raft_dir.clone(),
            cluster: self.cluster.clone(),
            leadership: LeadershipConfig {
                tick: Duration::from_millis(self.leader_tick_ms),
                ..LeadershipConfig::default()
            },
            snapshot: SnapshotConfig {
                interval: Duration::from_secs(self.snapshot_interval_secs),
            },
            restore_latest: self.restore_latest,
        }
    }
}
