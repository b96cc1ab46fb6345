//! Integration tests for marker-file leadership with real background loops
//! sharing one directory.

use std::fs::File;
use std::path::Path;
use std::time::{Duration, SystemTime};

use anyhow::Result;
use raft3d::leadership::{
    Elector, LeaderMarker, LeadershipConfig, LeadershipCoordinator, TickOutcome, MARKER_FILE,
};
use raft3d::metrics::Metrics;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::TempDir;

fn fast_config() -> LeadershipConfig {
    LeadershipConfig {
        tick: Duration::from_millis(10),
        stale_after: Duration::from_secs(10),
        hold_min: Duration::from_secs(3600),
        hold_max: Duration::from_secs(3600),
        claim_probability: 1.0,
    }
}

fn write_marker(dir: &Path, owner: &str, age: Duration) -> Result<()> {
    let path = dir.join(MARKER_FILE);
    std::fs::write(&path, owner)?;
    File::options()
        .write(true)
        .open(&path)?
        .set_modified(SystemTime::now() - age)?;
    Ok(())
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
async fn stale_marker_is_evicted_on_next_tick() -> Result<()> {
    let dir = TempDir::new()?;
    write_marker(dir.path(), "node9", Duration::from_secs(60))?;
    let config = LeadershipConfig {
        claim_probability: 0.0,
        ..fast_config()
    };
    let elector = Elector::new("node1", dir.path(), config, Metrics::new())?;

    let outcome = elector.tick(&mut StdRng::seed_from_u64(1)).await;
    assert_eq!(outcome, TickOutcome::Skipped);
    assert!(!dir.path().join(MARKER_FILE).exists());
    Ok(())
}

#[tokio::test]
async fn fresh_marker_of_another_node_is_respected() -> Result<()> {
    let dir = TempDir::new()?;
    write_marker(dir.path(), "node9", Duration::from_secs(2))?;
    let elector = Elector::new("node1", dir.path(), fast_config(), Metrics::new())?;

    let outcome = elector.tick(&mut StdRng::seed_from_u64(1)).await;
    assert_eq!(outcome, TickOutcome::Following("node9".to_string()));
    assert!(!elector.state().is_leader());
    assert_eq!(
        LeaderMarker::in_dir(dir.path()).owner().await?,
        Some("node9".to_string())
    );
    Ok(())
}

#[tokio::test]
async fn second_node_follows_the_first_claimant() -> Result<()> {
    let dir = TempDir::new()?;
    let first = Elector::new("node1", dir.path(), fast_config(), Metrics::new())?;
    let second = Elector::new("node2", dir.path(), fast_config(), Metrics::new())?;
    let mut rng = StdRng::seed_from_u64(3);

    assert!(matches!(
        first.tick(&mut rng).await,
        TickOutcome::Elected { term: 1, .. }
    ));
    assert_eq!(
        second.tick(&mut rng).await,
        TickOutcome::Following("node1".to_string())
    );

    first.resign().await;
    assert!(matches!(
        second.tick(&mut rng).await,
        TickOutcome::Elected { term: 1, .. }
    ));
    Ok(())
}

#[tokio::test]
async fn term_grows_with_each_claim() -> Result<()> {
    let dir = TempDir::new()?;
    let elector = Elector::new("node1", dir.path(), fast_config(), Metrics::new())?;
    let mut rng = StdRng::seed_from_u64(5);

    for expected in 1..=3 {
        let outcome = elector.tick(&mut rng).await;
        assert!(
            matches!(outcome, TickOutcome::Elected { term, .. } if term == expected),
            "unexpected outcome {outcome:?}"
        );
        elector.resign().await;
    }
    assert_eq!(elector.state().term(), 3);
    assert!(!elector.state().is_leader());
    Ok(())
}

#[tokio::test]
async fn unreadable_marker_fails_the_tick_without_changing_state() -> Result<()> {
    let dir = TempDir::new()?;
    // A directory where the marker file should be makes every read fail.
    std::fs::create_dir(dir.path().join(MARKER_FILE))?;
    let elector = Elector::new("node1", dir.path(), fast_config(), Metrics::new())?;

    assert_eq!(
        elector.tick(&mut StdRng::seed_from_u64(1)).await,
        TickOutcome::Failed
    );
    assert!(!elector.state().is_leader());
    assert_eq!(elector.state().term(), 0);
    Ok(())
}

#[tokio::test]
async fn coordinator_claims_and_releases_on_stop() -> Result<()> {
    let dir = TempDir::new()?;
    let metrics = Metrics::new();
    let mut coordinator =
        LeadershipCoordinator::new("node1", dir.path(), fast_config(), metrics.clone())?;
    coordinator.start()?;
    assert!(coordinator.start().is_err(), "second start must be refused");

    wait_for("leadership", Duration::from_secs(5), || coordinator.is_leader()).await?;
    assert_eq!(coordinator.term(), 1);
    assert_eq!(metrics.is_leader("node1"), Some(true));

    // The hold is an hour long; stop must cut it short.
    tokio::time::timeout(Duration::from_secs(2), coordinator.stop()).await?;
    assert!(!coordinator.is_running());
    assert!(!coordinator.is_leader());
    assert!(!dir.path().join(MARKER_FILE).exists());
    assert_eq!(metrics.is_leader("node1"), Some(false));
    Ok(())
}

#[tokio::test]
async fn coordinator_survives_marker_errors() -> Result<()> {
    let dir = TempDir::new()?;
    std::fs::create_dir(dir.path().join(MARKER_FILE))?;
    let mut coordinator =
        LeadershipCoordinator::new("node1", dir.path(), fast_config(), Metrics::new())?;
    coordinator.start()?;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!coordinator.is_leader());

    // Once the obstruction is gone the next tick can claim.
    std::fs::remove_dir(dir.path().join(MARKER_FILE))?;
    wait_for("leadership", Duration::from_secs(5), || coordinator.is_leader()).await?;

    coordinator.stop().await;
    Ok(())
}

#[tokio::test]
async fn coordinator_steps_down_after_its_hold() -> Result<()> {
    let dir = TempDir::new()?;
    let config = LeadershipConfig {
        hold_min: Duration::from_millis(30),
        hold_max: Duration::from_millis(30),
        ..fast_config()
    };
    let mut leader = LeadershipCoordinator::new("node1", dir.path(), config, Metrics::new())?;
    leader.start()?;

    // Each hold ends in a resignation, and the next successful claim bumps the term.
    wait_for("a second term", Duration::from_secs(5), || leader.term() >= 2).await?;
    leader.stop().await;
    assert!(!leader.is_leader());
    Ok(())
}
