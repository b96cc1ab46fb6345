use std::fmt;
use std::str::FromStr;

use anyhow::{bail, ensure, Context, Error, Result};

const NODES_KEY: &str = "nodes";

/// Peer list parsed from a `nodes=host:port,host:port` descriptor.
///
/// Peers are only recorded and logged; nothing in this crate connects to them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterPeers {
    peers: Vec<String>,
}

impl ClusterPeers {
    pub fn parse(descriptor: &str) -> Result<Self> {
        let descriptor = descriptor.trim();
        let Some((key, list)) = descriptor.split_once('=') else {
            bail!("invalid cluster descriptor '{descriptor}': expected {NODES_KEY}=host:port,...");
        };
        ensure!(
            key.trim() == NODES_KEY,
            "invalid cluster descriptor '{descriptor}': unknown key '{}'",
            key.trim()
        );

        let peers = list
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                validate_peer(entry)
                    .with_context(|| format!("invalid peer in cluster descriptor '{descriptor}'"))
                    .map(|()| entry.to_string())
            })
            .collect::<Result<Vec<_>>>()?;
        ensure!(
            !peers.is_empty(),
            "cluster descriptor '{descriptor}' lists no peers"
        );

        Ok(Self { peers })
    }

    pub fn addresses(&self) -> &[String] {
        &self.peers
    }
}

fn validate_peer(entry: &str) -> Result<()> {
    let Some((host, port)) = entry.rsplit_once(':') else {
        bail!("peer '{entry}' is not host:port");
    };
    ensure!(!host.is_empty(), "peer '{entry}' has an empty host");
    port.parse::<u16>()
        .with_context(|| format!("peer '{entry}' has an invalid port"))?;
    Ok(())
}

impl FromStr for ClusterPeers {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ClusterPeers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{NODES_KEY}={}", self.peers.join(","))
    }
}
