//! Periodic full-state snapshots.
//!
//! Every interval the scheduler serializes the whole state machine and writes
//! it to a fresh `snapshot_<unix-millis>.snap` file. Files are never rewritten
//! or compacted.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{bail, ensure, Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tracing::{error, info};

use crate::fsm::FleetStateMachine;
use crate::metrics::Metrics;
use crate::task::{pause, BackgroundTask};

const SNAPSHOT_PREFIX: &str = "snapshot_";
const SNAPSHOT_SUFFIX: &str = ".snap";

#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    pub interval: Duration,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
        }
    }
}

pub fn snapshot_file_name(at: SystemTime) -> String {
    let millis = at
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis();
    format!("{SNAPSHOT_PREFIX}{millis}{SNAPSHOT_SUFFIX}")
}

fn snapshot_timestamp(file_name: &str) -> Option<u128> {
    file_name
        .strip_prefix(SNAPSHOT_PREFIX)?
        .strip_suffix(SNAPSHOT_SUFFIX)?
        .parse()
        .ok()
}

/// Newest snapshot file in `dir`, judged by the timestamp in its name.
pub async fn latest_snapshot(dir: impl AsRef<Path>) -> Result<Option<PathBuf>> {
    let dir = dir.as_ref();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to list {}", dir.display()));
        }
    };

    let mut newest: Option<(u128, PathBuf)> = None;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(stamp) = name.to_str().and_then(snapshot_timestamp) else {
            continue;
        };
        let is_newer = match &newest {
            Some((best, _)) => stamp > *best,
            None => true,
        };
        if is_newer {
            newest = Some((stamp, entry.path()));
        }
    }
    Ok(newest.map(|(_, path)| path))
}

/// Serializes the state machine into the snapshot directory.
#[derive(Debug)]
pub struct SnapshotWriter {
    fsm: Arc<FleetStateMachine>,
    dir: PathBuf,
    metrics: Metrics,
}

impl SnapshotWriter {
    pub fn new(fsm: Arc<FleetStateMachine>, dir: impl Into<PathBuf>, metrics: Metrics) -> Self {
        Self {
            fsm,
            dir: dir.into(),
            metrics,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes one snapshot and returns its path.
    pub async fn take_snapshot(&self) -> Result<PathBuf> {
        let data = self.fsm.snapshot().context("failed to serialize state")?;
        let path = self.dir.join(snapshot_file_name(SystemTime::now()));

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .with_context(|| format!("failed to create {}", path.display()))?;
        file.write_all(&data)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        file.flush().await?;

        self.metrics.inc_snapshots();
        info!(path = %path.display(), bytes = data.len(), "snapshot saved");
        Ok(path)
    }

    /// Loads the newest snapshot in the directory into the state machine.
    /// Returns the file used, or `None` when there was nothing to restore.
    pub async fn restore_latest(&self) -> Result<Option<PathBuf>> {
        let Some(path) = latest_snapshot(&self.dir).await? else {
            return Ok(None);
        };
        let data = tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        self.fsm
            .restore(&data)
            .with_context(|| format!("failed to restore {}", path.display()))?;
        info!(path = %path.display(), "restored state from snapshot");
        Ok(Some(path))
    }

    async fn run(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        loop {
            if pause(interval, &mut shutdown).await {
                break;
            }
            if let Err(err) = self.take_snapshot().await {
                error!(error = ?err, "failed to take snapshot");
            }
        }
    }
}

/// Owns the background snapshot loop for one node.
pub struct SnapshotScheduler {
    writer: Arc<SnapshotWriter>,
    config: SnapshotConfig,
    task: Option<BackgroundTask>,
}

impl SnapshotScheduler {
    pub fn new(writer: SnapshotWriter, config: SnapshotConfig) -> Result<Self> {
        ensure!(
            !config.interval.is_zero(),
            "snapshot interval must be non-zero"
        );
        Ok(Self {
            writer: Arc::new(writer),
            config,
            task: None,
        })
    }

    pub fn writer(&self) -> &SnapshotWriter {
        &self.writer
    }

    /// Spawns the snapshot loop. Must be called inside a Tokio runtime.
    pub fn start(&mut self) -> Result<()> {
        if self.task.is_some() {
            bail!("snapshot scheduler already running");
        }
        let writer = Arc::clone(&self.writer);
        let interval = self.config.interval;
        self.task = Some(BackgroundTask::spawn("snapshot", move |shutdown| {
            writer.run(interval, shutdown)
        }));
        info!(interval = ?interval, dir = %self.writer.dir.display(), "snapshot scheduler started");
        Ok(())
    }

    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.stop().await;
            info!("snapshot scheduler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }
}
