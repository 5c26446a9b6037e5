//! Node identity: long-lived keypair, UUID, and genesis lineage.
//!
//! Created exactly once on first boot and immutable thereafter. Losing the
//! identity means permanent ejection from the federation, so a partial or
//! corrupted record is fatal at startup rather than silently regenerated.

use crate::error::{Error, Result};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use ownworld_store::{Store, StoreError};
use rand::RngCore;
use std::time::{SystemTime, UNIX_EPOCH};

const META_UUID: &str = "identity:uuid";
const META_GENESIS: &str = "identity:genesis_hash";
const META_SIGNING_KEY: &str = "identity:signing_key";
const META_CREATED_AT: &str = "identity:created_at_ms";

/// The node's persisted identity.
pub struct NodeIdentity {
    uuid: String,
    genesis_hash: String,
    signing_key: SigningKey,
    created_at_ms: u64,
}

impl NodeIdentity {
    /// Load the identity, creating it on first boot.
    ///
    /// First boot derives the UUID from a genesis blob of wall-clock
    /// nanoseconds, 128 bits of CSPRNG output, and the fresh public key;
    /// the genesis hash equals the UUID at birth. All four values are
    /// persisted in one transaction. On later boots a missing value is
    /// fatal.
    pub fn load_or_create(store: &Store) -> Result<Self> {
        let existing = (
            store.get_meta(META_UUID)?,
            store.get_meta(META_GENESIS)?,
            store.get_meta(META_SIGNING_KEY)?,
            store.get_meta(META_CREATED_AT)?,
        );

        match existing {
            (Some(uuid), Some(genesis_hash), Some(key_hex), Some(created)) => {
                let key_bytes: [u8; 32] = hex::decode(&key_hex)
                    .ok()
                    .and_then(|b| b.as_slice().try_into().ok())
                    .ok_or_else(|| {
                        StoreError::IdentityCorrupted("unreadable signing key".into())
                    })?;
                let created_at_ms = created.parse().map_err(|_| {
                    StoreError::IdentityCorrupted("unreadable creation timestamp".into())
                })?;
                Ok(Self {
                    uuid,
                    genesis_hash,
                    signing_key: SigningKey::from_bytes(&key_bytes),
                    created_at_ms,
                })
            }
            (None, None, None, None) => Self::create(store),
            _ => Err(Error::Store(StoreError::IdentityCorrupted(
                "partial identity record".into(),
            ))),
        }
    }

    fn create(store: &Store) -> Result<Self> {
        let signing_key = SigningKey::generate(&mut rand::thread_rng());

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let mut entropy = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut entropy);

        let mut hasher = blake3::Hasher::new();
        hasher.update(&(now.as_nanos() as u64).to_le_bytes());
        hasher.update(&entropy);
        hasher.update(signing_key.verifying_key().as_bytes());
        let uuid = hex::encode(hasher.finalize().as_bytes());

        let created_at_ms = now.as_millis() as u64;
        store.put_meta_batch(&[
            (META_UUID, &uuid),
            (META_GENESIS, &uuid),
            (META_SIGNING_KEY, &hex::encode(signing_key.to_bytes())),
            (META_CREATED_AT, &created_at_ms.to_string()),
        ])?;

        tracing::info!(uuid = %uuid, "node identity created");

        Ok(Self {
            genesis_hash: uuid.clone(),
            uuid,
            signing_key,
            created_at_ms,
        })
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Federation lineage identifier. Equals the UUID at birth but is
    /// semantically distinct: peers with different genesis hashes never
    /// federate.
    pub fn genesis_hash(&self) -> &str {
        &self.genesis_hash
    }

    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    /// Sign the canonical `"uuid:tick"` string for this node.
    pub fn sign_canonical(&self, tick: u64) -> String {
        ownworld_wire::sign_canonical(&self.signing_key, &self.uuid, tick)
    }

    /// Sign raw payload bytes for this node.
    pub fn sign_payload(&self, payload: &[u8]) -> String {
        ownworld_wire::sign_payload(&self.signing_key, payload)
    }
}
