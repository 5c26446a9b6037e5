//! In-memory peer registry: the source of truth for federation membership.

use ed25519_dalek::VerifyingKey;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Standing of a peer in the federation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Neutral,
    Federated,
    /// Ostracized. Excluded from election, gossip fan-out, and grievance
    /// weighting; the record is retained so later messages drop early.
    Hostile,
}

impl Relation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::Neutral => "neutral",
            Relation::Federated => "federated",
            Relation::Hostile => "hostile",
        }
    }
}

/// One federation peer, keyed by UUID.
#[derive(Debug, Clone)]
pub struct Peer {
    pub uuid: String,
    pub url: String,
    /// Pinned at admission; every later message must verify under it.
    pub public_key: VerifyingKey,
    pub genesis_hash: String,
    /// Highest tick observed from this peer.
    pub last_tick: u64,
    /// Latest ledger head hash claimed by this peer, hex.
    pub last_hash: String,
    /// Wall-clock millis of the last valid message.
    pub last_seen: u64,
    /// Peer's advertised membership size.
    pub peer_count: u64,
    pub reputation: f64,
    pub relation: Relation,
}

impl Peer {
    pub fn is_hostile(&self) -> bool {
        self.relation == Relation::Hostile
    }
}

/// Registry of known peers behind a readers-writer lock. All mutations hold
/// the exclusive lock for the minimum span; reputation and relation updates
/// are last-writer-wins.
pub struct PeerRegistry {
    peers: RwLock<HashMap<String, Peer>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self { peers: RwLock::new(HashMap::new()) }
    }

    /// Cheap copy of all peer records under the read lock.
    pub async fn snapshot(&self) -> Vec<Peer> {
        self.peers.read().await.values().cloned().collect()
    }

    pub async fn get(&self, uuid: &str) -> Option<Peer> {
        self.peers.read().await.get(uuid).cloned()
    }

    pub async fn contains(&self, uuid: &str) -> bool {
        self.peers.read().await.contains_key(uuid)
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn add(&self, peer: Peer) {
        self.peers.write().await.insert(peer.uuid.clone(), peer);
    }

    pub async fn remove(&self, uuid: &str) -> Option<Peer> {
        self.peers.write().await.remove(uuid)
    }

    /// Apply `f` to the peer under the write lock. Returns false when the
    /// UUID is unknown.
    pub async fn mutate<F: FnOnce(&mut Peer)>(&self, uuid: &str, f: F) -> bool {
        let mut peers = self.peers.write().await;
        match peers.get_mut(uuid) {
            Some(peer) => {
                f(peer);
                true
            }
            None => false,
        }
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
