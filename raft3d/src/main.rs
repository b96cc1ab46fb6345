use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use raft3d::{
    api::{self, ApiState},
    cli::Cli,
    metrics::Metrics,
    node::Node,
};

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = ?err, "failed to install ctrl-c handler");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let metrics = Metrics::new();
    let node = Arc::new(Node::start(cli.node_config(), metrics.clone()).await?);

    let status = node.status();
    info!(
        node_id = %status.node_id,
        is_leader = status.is_leader,
        peers = ?status.peers,
        raft_port = cli.raft_port,
        http_port = cli.http_port,
        "starting raft3d node"
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], cli.http_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    let app = api::router(ApiState {
        node: Arc::clone(&node),
        metrics,
    });
    info!("http api listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    match Arc::try_unwrap(node) {
        Ok(node) => node.shutdown().await,
        Err(_) => warn!("node still referenced after server exit; skipping clean shutdown"),
    }
    Ok(())
}
