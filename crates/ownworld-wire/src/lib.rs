//! Wire format for OwnWorld federation traffic.
//!
//! Every message between federation peers travels as an LZ4-compressed JSON
//! body with the content type `application/x-ownworld-fed`, carrying a
//! detached Ed25519 signature. Two signing schemes exist:
//!
//! - **Canonical string**: heartbeats and ledger announcements sign the
//!   string `"<uuid>:<tick>"`.
//! - **Raw payload**: transactions sign the opaque payload bytes.
//!
//! Verification is mandatory for every message except the handshake, which
//! is the message that carries the public key to be pinned. A failed
//! verification is fail-closed: the message is discarded and the sender gets
//! a 401-equivalent response.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use thiserror::Error;

pub mod messages;

pub use messages::{
    GossipPeer, GrievanceReport, HandshakeAck, HandshakeRequest, Heartbeat, LedgerAnnounce,
    PeerSummary, SnapshotPage, SnapshotRecord, Transaction,
};

/// Content type carried by every federation request.
pub const CONTENT_TYPE: &str = "application/x-ownworld-fed";

/// Errors from wire encoding, decoding, and signature checks.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("decompression failed: {0}")]
    Decompression(String),

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("signature verification failed")]
    BadSignature,
}

/// Result alias for wire operations.
pub type Result<T> = std::result::Result<T, WireError>;

/// Compress a message body for transmission.
///
/// LZ4 block format with a prepended size header; the original size is
/// stored so decompression can pre-allocate the output buffer.
#[inline]
pub fn seal(data: &[u8]) -> Vec<u8> {
    lz4_flex::compress_prepend_size(data)
}

/// Decompress a received message body.
#[inline]
pub fn open(data: &[u8]) -> Result<Vec<u8>> {
    lz4_flex::decompress_size_prepended(data).map_err(|e| WireError::Decompression(e.to_string()))
}

/// Serialize and seal a message in one step.
pub fn seal_json<T: serde::Serialize>(msg: &T) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(msg).map_err(|e| WireError::Malformed(e.to_string()))?;
    Ok(seal(&body))
}

/// Open and deserialize a message in one step.
pub fn open_json<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
    let body = open(data)?;
    serde_json::from_slice(&body).map_err(|e| WireError::Malformed(e.to_string()))
}

/// The canonical string signed by heartbeats and ledger announcements.
#[inline]
pub fn canonical_string(uuid: &str, tick: u64) -> String {
    format!("{}:{}", uuid, tick)
}

/// Sign the canonical `"uuid:tick"` string; returns the signature hex.
pub fn sign_canonical(key: &SigningKey, uuid: &str, tick: u64) -> String {
    let sig = key.sign(canonical_string(uuid, tick).as_bytes());
    hex::encode(sig.to_bytes())
}

/// Verify a canonical-string signature against a pinned key.
pub fn verify_canonical(
    key: &VerifyingKey,
    uuid: &str,
    tick: u64,
    signature_hex: &str,
) -> Result<()> {
    let sig = decode_signature(signature_hex)?;
    key.verify(canonical_string(uuid, tick).as_bytes(), &sig)
        .map_err(|_| WireError::BadSignature)
}

/// Sign raw payload bytes (transactions); returns the signature hex.
pub fn sign_payload(key: &SigningKey, payload: &[u8]) -> String {
    hex::encode(key.sign(payload).to_bytes())
}

/// Verify a raw-payload signature against a pinned key.
pub fn verify_payload(key: &VerifyingKey, payload: &[u8], signature_hex: &str) -> Result<()> {
    let sig = decode_signature(signature_hex)?;
    key.verify(payload, &sig).map_err(|_| WireError::BadSignature)
}

/// Bytes signed by an authenticated reputation query.
pub fn reputation_query_message(target: &str) -> Vec<u8> {
    format!("rep:{}", target).into_bytes()
}

/// Bytes signed by an authenticated snapshot-sync request.
pub fn sync_query_message(since_day: u64, limit: u64) -> Vec<u8> {
    format!("sync:{}:{}", since_day, limit).into_bytes()
}

/// Encode a verifying key as hex for wire transport.
pub fn encode_verifying_key(key: &VerifyingKey) -> String {
    hex::encode(key.as_bytes())
}

/// Decode a hex verifying key received on the wire.
pub fn decode_verifying_key(key_hex: &str) -> Result<VerifyingKey> {
    let bytes = hex::decode(key_hex).map_err(|e| WireError::InvalidKey(e.to_string()))?;
    let arr: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| WireError::InvalidKey(format!("bad key length {}", bytes.len())))?;
    VerifyingKey::from_bytes(&arr).map_err(|e| WireError::InvalidKey(e.to_string()))
}

fn decode_signature(signature_hex: &str) -> Result<Signature> {
    let bytes = hex::decode(signature_hex).map_err(|e| WireError::Malformed(e.to_string()))?;
    let arr: [u8; 64] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| WireError::Malformed(format!("bad signature length {}", bytes.len())))?;
    Ok(Signature::from_bytes(&arr))
}
