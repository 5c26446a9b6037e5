//! Federation message bodies.
//!
//! Payload bytes (transactions, snapshot blobs) are hex-encoded in JSON so
//! bodies stay printable; the envelope compression recovers the overhead.

use serde::{Deserialize, Serialize};

/// Handshake request: the only unsigned message. It carries the public key
/// that will be pinned for the sender's UUID on admission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub uuid: String,
    pub genesis_hash: String,
    /// Ed25519 verifying key, hex.
    pub public_key: String,
    /// Reachable base URL of the sender, e.g. `http://10.0.0.2:8080`.
    pub address: String,
}

/// Handshake response: the responder's own identity, so the joining node can
/// pin the responder symmetrically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeAck {
    pub uuid: String,
    pub genesis_hash: String,
    pub public_key: String,
    pub address: String,
    pub peer_count: u64,
}

/// Peer advertisement piggybacked on heartbeats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipPeer {
    pub uuid: String,
    pub address: String,
}

/// Periodic liveness beacon. Signature covers the canonical `"uuid:tick"`
/// string under the sender's pinned key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub uuid: String,
    pub tick: u64,
    pub peer_count: u64,
    pub gen_hash: String,
    /// Sender's current ledger head hash, hex.
    pub last_hash: String,
    /// Hex Ed25519 signature over `"uuid:tick"`.
    pub signature: String,
    /// Optional peer advertisements for discovery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gossip: Option<Vec<GossipPeer>>,
}

/// Ledger head announcement: the sender's latest chain position. Signed like
/// a heartbeat (canonical string scheme).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerAnnounce {
    pub uuid: String,
    pub tick: u64,
    /// Hash of the entry preceding `final_hash`, hex.
    pub prev_hash: String,
    /// Head hash after `tick`, hex.
    pub final_hash: String,
    pub signature: String,
}

/// Authenticated inter-peer transaction. Signature covers the raw payload
/// bytes (before hex encoding).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub uuid: String,
    pub tick: u64,
    /// Selects downstream processing, e.g. `grievance`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Opaque payload bytes, hex.
    pub payload: String,
    /// Hex Ed25519 signature over the payload bytes.
    pub signature: String,
}

impl Transaction {
    /// Decode the hex payload.
    pub fn payload_bytes(&self) -> Result<Vec<u8>, hex::FromHexError> {
        hex::decode(&self.payload)
    }
}

/// Grievance carried as a `grievance`-typed transaction payload. The
/// reporter is implied by the authenticated channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrievanceReport {
    pub offender: String,
    pub damage: f64,
}

/// One persisted day of world state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub day_id: u64,
    /// LZ4-compressed world-state blob, hex.
    pub blob: String,
    /// Final hash of the last tick of that day, hex.
    pub final_hash: String,
}

/// A page of daily snapshots returned by `/federation/sync`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotPage {
    pub snapshots: Vec<SnapshotRecord>,
    /// Tick of the serving node, so callers know how far behind they are.
    pub tick: u64,
}

/// Peer list entry served by `/federation/map`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerSummary {
    pub uuid: String,
    pub address: String,
    pub last_tick: u64,
    pub relation: String,
}
