//! Best-effort leadership signaling through a shared marker file.
//!
//! Nodes that share a data directory take turns writing their id into
//! `leader.txt`. A follower evicts a marker whose mtime is older than the
//! staleness threshold, and on a coin flip claims the marker when nobody else
//! holds it. The claim is a plain read-then-write, not an atomic
//! create-if-absent, so two nodes can both believe they lead for a moment.
//! This is a liveness hint only: nothing here gates writes or orders them
//! across nodes.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{bail, ensure, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::metrics::Metrics;
use crate::task::{pause, BackgroundTask};

pub const MARKER_FILE: &str = "leader.txt";

#[derive(Debug, Clone)]
pub struct LeadershipConfig {
    /// Delay between follower ticks.
    pub tick: Duration,
    /// A marker older than this is treated as left behind by a dead leader.
    pub stale_after: Duration,
    /// Bounds of the randomized leadership hold.
    pub hold_min: Duration,
    pub hold_max: Duration,
    /// Chance that a follower tries to claim an unowned marker on a tick.
    pub claim_probability: f64,
}

impl Default for LeadershipConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            stale_after: Duration::from_secs(10),
            hold_min: Duration::from_secs(5),
            hold_max: Duration::from_secs(10),
            claim_probability: 0.5,
        }
    }
}

impl LeadershipConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.tick.is_zero(), "leadership tick must be non-zero");
        ensure!(
            self.hold_min <= self.hold_max,
            "leadership hold range {:?}..{:?} is empty",
            self.hold_min,
            self.hold_max
        );
        ensure!(
            (0.0..=1.0).contains(&self.claim_probability),
            "claim probability {} is outside [0, 1]",
            self.claim_probability
        );
        Ok(())
    }

    fn hold_duration(&self, rng: &mut impl Rng) -> Duration {
        rng.gen_range(self.hold_min..=self.hold_max)
    }
}

/// Result of trying to write our id into the marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    Won,
    HeldBy(String),
}

/// The shared `leader.txt` file.
#[derive(Debug, Clone)]
pub struct LeaderMarker {
    path: PathBuf,
}

impl LeaderMarker {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(MARKER_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Id written in the marker, `None` if there is no marker or it is blank.
    pub async fn owner(&self) -> io::Result<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let owner = contents.trim();
                Ok((!owner.is_empty()).then(|| owner.to_string()))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Time since the marker was last written. A clock that runs behind the
    /// file's mtime reads as zero age.
    pub async fn age(&self) -> io::Result<Option<Duration>> {
        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };
        let modified = metadata.modified()?;
        Ok(Some(
            SystemTime::now()
                .duration_since(modified)
                .unwrap_or(Duration::ZERO),
        ))
    }

    /// Deletes the marker if it is older than `stale_after`.
    pub async fn evict_if_stale(&self, stale_after: Duration) -> io::Result<bool> {
        match self.age().await? {
            Some(age) if age > stale_after => {
                remove_if_present(&self.path).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Writes `node_id` unless another node's id is already there.
    ///
    /// Check and write are separate filesystem calls; another node can slip in
    /// between them.
    pub async fn try_claim(&self, node_id: &str) -> io::Result<Claim> {
        if let Some(owner) = self.owner().await? {
            if owner != node_id {
                return Ok(Claim::HeldBy(owner));
            }
        }
        tokio::fs::write(&self.path, node_id).await?;
        Ok(Claim::Won)
    }

    /// Removes the marker if it names `node_id`. Returns whether it did.
    pub async fn release(&self, node_id: &str) -> io::Result<bool> {
        match self.owner().await? {
            Some(owner) if owner == node_id => {
                remove_if_present(&self.path).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

async fn remove_if_present(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

/// Leadership flag and term counter for one node, shared with its readers.
#[derive(Debug, Default)]
pub struct LeadershipState {
    is_leader: AtomicBool,
    term: AtomicU64,
}

impl LeadershipState {
    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }

    pub fn term(&self) -> u64 {
        self.term.load(Ordering::SeqCst)
    }

    fn promote(&self) -> u64 {
        let term = self.term.fetch_add(1, Ordering::SeqCst) + 1;
        self.is_leader.store(true, Ordering::SeqCst);
        term
    }

    fn demote(&self) -> bool {
        self.is_leader.swap(false, Ordering::SeqCst)
    }
}

/// What a single coordinator tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Already leader; the tick made no election attempt.
    Leading,
    /// Another node holds the marker.
    Following(String),
    /// The coin flip said not this time.
    Skipped,
    /// We claimed the marker and should lead for `hold`.
    Elected { term: u64, hold: Duration },
    /// A filesystem error cut the tick short.
    Failed,
}

/// One node's view of the election: the per-tick decision logic without the loop.
#[derive(Debug)]
pub struct Elector {
    node_id: String,
    marker: LeaderMarker,
    config: LeadershipConfig,
    state: Arc<LeadershipState>,
    metrics: Metrics,
}

impl Elector {
    pub fn new(
        node_id: impl Into<String>,
        data_dir: impl AsRef<Path>,
        config: LeadershipConfig,
        metrics: Metrics,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            node_id: node_id.into(),
            marker: LeaderMarker::in_dir(data_dir),
            config,
            state: Arc::new(LeadershipState::default()),
            metrics,
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn marker(&self) -> &LeaderMarker {
        &self.marker
    }

    pub fn state(&self) -> &Arc<LeadershipState> {
        &self.state
    }

    pub async fn tick(&self, rng: &mut impl Rng) -> TickOutcome {
        let node_id = self.node_id.as_str();
        if self.state.is_leader() {
            return TickOutcome::Leading;
        }

        match self.marker.evict_if_stale(self.config.stale_after).await {
            Ok(true) => info!(node_id, "removed stale leader marker"),
            Ok(false) => {}
            Err(err) => {
                log_marker_error(node_id, "stale marker check", &err);
                return TickOutcome::Failed;
            }
        }

        match self.marker.owner().await {
            Ok(Some(owner)) if owner != node_id => {
                debug!(node_id, leader = %owner, "sees leader");
                return TickOutcome::Following(owner);
            }
            Ok(_) => {}
            Err(err) => {
                log_marker_error(node_id, "leader check", &err);
                return TickOutcome::Failed;
            }
        }

        debug!(node_id, "attempting leader election");
        if !rng.gen_bool(self.config.claim_probability) {
            debug!(node_id, "skipped election attempt");
            return TickOutcome::Skipped;
        }

        match self.marker.try_claim(node_id).await {
            Ok(Claim::Won) => {
                let term = self.state.promote();
                self.metrics.set_leader(node_id, true);
                self.metrics.set_term(node_id, term);
                info!(node_id, term, "elected leader");
                TickOutcome::Elected {
                    term,
                    hold: self.config.hold_duration(rng),
                }
            }
            Ok(Claim::HeldBy(owner)) => {
                info!(node_id, leader = %owner, "cannot become leader; marker already claimed");
                TickOutcome::Following(owner)
            }
            Err(err) => {
                log_marker_error(node_id, "election", &err);
                TickOutcome::Failed
            }
        }
    }

    /// Gives up leadership, deleting the marker if it still names this node.
    ///
    /// If the marker is gone or names someone else we are no longer leader
    /// either way. On a filesystem error the flag is left as it was.
    pub async fn resign(&self) {
        let node_id = self.node_id.as_str();
        match self.marker.release(node_id).await {
            Ok(released) => {
                if self.state.demote() {
                    self.metrics.set_leader(node_id, false);
                    if released {
                        info!(node_id, "resigned as leader");
                    } else {
                        info!(node_id, "resigned as leader (marker no longer ours)");
                    }
                }
            }
            Err(err) => log_marker_error(node_id, "resign", &err),
        }
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut rng = StdRng::from_entropy();
        loop {
            match self.tick(&mut rng).await {
                TickOutcome::Elected { hold, .. } => {
                    if pause(hold, &mut shutdown).await {
                        break;
                    }
                    self.resign().await;
                }
                // A previous resignation failed; try again.
                TickOutcome::Leading => self.resign().await,
                TickOutcome::Following(_) | TickOutcome::Skipped | TickOutcome::Failed => {}
            }
            if pause(self.config.tick, &mut shutdown).await {
                break;
            }
        }
    }
}

fn log_marker_error(node_id: &str, step: &str, err: &io::Error) {
    match err.kind() {
        io::ErrorKind::PermissionDenied => {
            error!(node_id, step, error = %err, "leader marker permission error")
        }
        kind => error!(node_id, step, ?kind, error = %err, "leader marker I/O error"),
    }
}

/// Owns the background election loop for one node.
pub struct LeadershipCoordinator {
    elector: Arc<Elector>,
    task: Option<BackgroundTask>,
}

impl LeadershipCoordinator {
    pub fn new(
        node_id: impl Into<String>,
        data_dir: impl AsRef<Path>,
        config: LeadershipConfig,
        metrics: Metrics,
    ) -> Result<Self> {
        Ok(Self {
            elector: Arc::new(Elector::new(node_id, data_dir, config, metrics)?),
            task: None,
        })
    }

    /// Spawns the election loop. Must be called inside a Tokio runtime.
    pub fn start(&mut self) -> Result<()> {
        if self.task.is_some() {
            bail!(
                "leadership coordinator for {} already running",
                self.elector.node_id
            );
        }
        let elector = Arc::clone(&self.elector);
        self.task = Some(BackgroundTask::spawn("leadership", move |shutdown| {
            elector.run(shutdown)
        }));
        info!(node_id = %self.elector.node_id, "leadership coordinator started");
        Ok(())
    }

    /// Stops the loop, waits for it, then gives up leadership if held.
    ///
    /// Resigning after the join means the loop cannot re-claim the marker
    /// behind our back.
    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.stop().await;
        }
        self.elector.resign().await;
        info!(node_id = %self.elector.node_id, "leadership coordinator stopped");
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    pub fn is_leader(&self) -> bool {
        self.elector.state.is_leader()
    }

    pub fn term(&self) -> u64 {
        self.elector.state.term()
    }

    pub fn state(&self) -> Arc<LeadershipState> {
        Arc::clone(&self.elector.state)
    }
}
