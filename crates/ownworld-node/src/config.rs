//! Node configuration from environment variables.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Peer admission policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeeringMode {
    /// Admit any peer with a matching genesis hash.
    Promiscuous,
    /// Admit only UUIDs on the static allowlist.
    Strict,
}

/// Configuration for an OwnWorld node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// HTTP listen address (federation + client API)
    pub bind_addr: SocketAddr,

    /// Base URL advertised to peers, e.g. `http://10.0.0.2:8080`
    pub public_url: String,

    /// Seed node URLs to handshake with at startup; empty = genesis node
    pub seed_nodes: Vec<String>,

    /// Admission policy
    pub peering_mode: PeeringMode,

    /// UUIDs admitted in strict mode
    pub peer_allowlist: HashSet<String>,

    /// false disables the client-API surface (infrastructure-only node)
    pub command_control: bool,

    /// Persistent store location
    pub database_file: PathBuf,

    /// Reputation enforcement sweep cadence, in ticks
    pub enforce_every_ticks: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl NodeConfig {
    /// Create config from environment variables with sensible defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any variable lookup. Split out so tests don't have to
    /// mutate the process environment.
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(var: F) -> Self {
        let bind_addr = var("OWNWORLD_BIND_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8080".to_string())
            .parse()
            .expect("Invalid OWNWORLD_BIND_ADDR");

        let public_url = var("OWNWORLD_PUBLIC_URL")
            .unwrap_or_else(|| format!("http://{}", bind_addr));

        let seed_nodes = var("OWNWORLD_SEED_NODES")
            .map(|s| {
                s.split(',')
                    .map(|p| p.trim().trim_end_matches('/').to_string())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let peering_mode = match var("OWNWORLD_PEERING_MODE").as_deref() {
            Some("strict") => PeeringMode::Strict,
            _ => PeeringMode::Promiscuous,
        };

        let peer_allowlist = var("OWNWORLD_PEER_ALLOWLIST")
            .map(|s| {
                s.split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let command_control = !matches!(
            var("OWNWORLD_COMMAND_CONTROL").as_deref(),
            Some("false") | Some("0")
        );

        let database_file = var("OWNWORLD_DATABASE_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./ownworld-data/ownworld.db"));

        let enforce_every_ticks = var("OWNWORLD_ENFORCE_EVERY_TICKS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(100);

        Self {
            bind_addr,
            public_url,
            seed_nodes,
            peering_mode,
            peer_allowlist,
            command_control,
            database_file,
            enforce_every_ticks,
        }
    }

    /// True when no seed nodes were configured: this node starts its own
    /// federation lineage.
    pub fn is_genesis(&self) -> bool {
        self.seed_nodes.is_empty()
    }
}
