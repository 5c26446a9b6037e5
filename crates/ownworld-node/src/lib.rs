//! OwnWorld Node - Federated Simulation Server
//!
//! A peer-to-peer network of equal servers advancing a shared discrete-time
//! world in lock-step. This crate is the federation core: peer discovery
//! and admission, cryptographic peer identity, leader election,
//! TDMA-staggered tick scheduling, clock slewing and hard resync, heartbeat
//! liveness, reputation-driven ostracism, fork detection on hash-chained
//! ledgers, and authenticated inter-peer transaction ingress.
//!
//! # Architecture
//!
//! - **Identity**: persisted Ed25519 keypair and genesis lineage
//! - **Registry**: in-memory peer records behind a readers-writer lock
//! - **Immigration**: bounded intake queue with a single admission worker
//! - **Heartbeat**: periodic signed fan-out, pruning, clock sampling
//! - **Reputation**: grievances plus transitive trust, enforced locally
//! - **Scheduler**: election, TDMA offsets, the tick loop, the ledger chain
//! - **Federation**: axum ingress for the `/federation/*` surface
//!
//! # Example
//!
//! ```no_run
//! use ownworld_node::{NodeConfig, OwnWorldNode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = NodeConfig::from_env();
//!     let node = OwnWorldNode::new(config)?;
//!     node.run().await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod federation;
pub mod heartbeat;
pub mod identity;
pub mod immigration;
pub mod node;
pub mod ratelimit;
pub mod registry;
pub mod reputation;
pub mod scheduler;
pub mod simulation;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::{NodeConfig, PeeringMode};
pub use context::{Action, NodeContext};
pub use error::{Error, Result};
pub use node::OwnWorldNode;
pub use registry::{Peer, PeerRegistry, Relation};
pub use simulation::{BaselineWorld, Simulation};
