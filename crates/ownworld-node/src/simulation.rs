//! The seam to the external simulation component.
//!
//! The federation core never interprets world state. It advances the world
//! once per tick under the state lock, asks for a deterministic digest to
//! anchor into the ledger, and moves whole-world blobs around for daily
//! snapshots. Transactions the core does not consume itself (everything but
//! grievances) are handed over via `deliver`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the simulation component. Tick failures are logged
/// and the tick is still finalized; they never abort the scheduler.
#[derive(Debug, Error)]
#[error("simulation error: {0}")]
pub struct SimulationError(pub String);

/// The world the federation keeps in lock-step.
pub trait Simulation: Send {
    /// Advance the world by one tick.
    fn advance(&mut self, tick: u64) -> Result<(), SimulationError>;

    /// Digest over a canonical serialization of the current state. Must be
    /// deterministic across nodes holding identical state.
    fn state_digest(&self) -> [u8; 32];

    /// Serialize the whole world for a daily snapshot.
    fn export_state(&self) -> Vec<u8>;

    /// Replace the world from a snapshot blob (hard resync path).
    fn import_state(&mut self, blob: &[u8]) -> Result<(), SimulationError>;

    /// Hand over a typed transaction payload for processing at the next
    /// tick.
    fn deliver(&mut self, kind: &str, payload: &[u8]);
}

#[derive(Debug, Serialize, Deserialize)]
struct BaselineState {
    tick: u64,
    digest: String,
}

/// Minimal deterministic world: a blake3 chain over ticks and delivered
/// payloads. Stands in for the galaxy simulation in tests and on
/// infrastructure-only nodes.
pub struct BaselineWorld {
    tick: u64,
    digest: [u8; 32],
    inbox: Vec<(String, Vec<u8>)>,
}

impl BaselineWorld {
    pub fn new() -> Self {
        Self { tick: 0, digest: [0u8; 32], inbox: Vec::new() }
    }
}

impl Default for BaselineWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulation for BaselineWorld {
    fn advance(&mut self, tick: u64) -> Result<(), SimulationError> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.digest);
        hasher.update(&tick.to_be_bytes());
        for (kind, payload) in self.inbox.drain(..) {
            hasher.update(kind.as_bytes());
            hasher.update(&payload);
        }
        self.digest = *hasher.finalize().as_bytes();
        self.tick = tick;
        Ok(())
    }

    fn state_digest(&self) -> [u8; 32] {
        self.digest
    }

    fn export_state(&self) -> Vec<u8> {
        let state = BaselineState { tick: self.tick, digest: hex::encode(self.digest) };
        serde_json::to_vec(&state).unwrap_or_default()
    }

    fn import_state(&mut self, blob: &[u8]) -> Result<(), SimulationError> {
        let state: BaselineState =
            serde_json::from_slice(blob).map_err(|e| SimulationError(e.to_string()))?;
        let digest = hex::decode(&state.digest)
            .ok()
            .and_then(|b| <[u8; 32]>::try_from(b.as_slice()).ok())
            .ok_or_else(|| SimulationError("bad digest in snapshot".into()))?;
        self.tick = state.tick;
        self.digest = digest;
        self.inbox.clear();
        Ok(())
    }

    fn deliver(&mut self, kind: &str, payload: &[u8]) {
        self.inbox.push((kind.to_string(), payload.to_vec()));
    }
}
