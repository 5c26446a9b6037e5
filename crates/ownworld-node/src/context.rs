//! Shared node context.
//!
//! The peer map, current tick, leader, and phase offset all live here with
//! synchronization encapsulated in methods; nothing is ambient global
//! state. The tick counter is an atomic because it is read lock-free from
//! every handler; the simulation world sits behind the state lock that
//! serializes "advance tick + append ledger entry".

use crate::client::FederationClient;
use crate::config::NodeConfig;
use crate::error::Result;
use crate::identity::NodeIdentity;
use crate::immigration::ImmigrationQueue;
use crate::registry::PeerRegistry;
use crate::scheduler;
use crate::simulation::Simulation;
use ownworld_store::Store;
use ownworld_wire::HandshakeRequest;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Side effects deferred past lock release. Lock-holding paths (enforcement
/// sweep, fork eviction) must not recursively recalculate the leader, so
/// they enqueue here instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    RecalcLeader,
    RebuildFromSnapshots,
}

/// Shared state of one federation node.
pub struct NodeContext {
    pub config: NodeConfig,
    pub identity: NodeIdentity,
    pub registry: PeerRegistry,
    pub store: Store,
    pub client: FederationClient,
    pub immigration: ImmigrationQueue,
    /// The state lock: exclusive across "advance tick + append entry".
    pub world: tokio::sync::Mutex<Box<dyn Simulation>>,

    current_tick: AtomicU64,
    head_hash: RwLock<String>,
    leader: RwLock<String>,
    is_leader: AtomicBool,
    phase_offset_ms: AtomicU64,
    tick_len_ms: AtomicU64,
    authoritative: AtomicBool,
    actions: mpsc::UnboundedSender<Action>,
}

impl NodeContext {
    /// Build the context. The ledger head (or the genesis hash for a fresh
    /// node) seeds the tick counter and chain position.
    pub fn new(
        config: NodeConfig,
        identity: NodeIdentity,
        store: Store,
        client: FederationClient,
        immigration: ImmigrationQueue,
        world: Box<dyn Simulation>,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<Action>)> {
        let (actions, actions_rx) = mpsc::unbounded_channel();

        let (tick, head) = match store.head()? {
            Some(entry) => (entry.tick, entry.final_hash),
            None => (0, identity.genesis_hash().to_string()),
        };

        let leader = identity.uuid().to_string();
        let ctx = Arc::new(Self {
            config,
            identity,
            registry: PeerRegistry::new(),
            store,
            client,
            immigration,
            world: tokio::sync::Mutex::new(world),
            current_tick: AtomicU64::new(tick),
            head_hash: RwLock::new(head),
            leader: RwLock::new(leader),
            is_leader: AtomicBool::new(true),
            phase_offset_ms: AtomicU64::new(0),
            tick_len_ms: AtomicU64::new(scheduler::TICK_MS),
            authoritative: AtomicBool::new(true),
            actions,
        });
        Ok((ctx, actions_rx))
    }

    // --- Clock & chain position ---

    pub fn current_tick(&self) -> u64 {
        self.current_tick.load(Ordering::Acquire)
    }

    pub fn set_current_tick(&self, tick: u64) {
        self.current_tick.store(tick, Ordering::Release);
    }

    pub fn head_hash(&self) -> String {
        self.head_hash.read().unwrap().clone()
    }

    pub fn set_head_hash(&self, hash: &str) {
        *self.head_hash.write().unwrap() = hash.to_string();
    }

    /// Advance the authoritative chain position after a ledger append.
    pub fn set_head(&self, tick: u64, hash: &str) {
        self.set_head_hash(hash);
        self.set_current_tick(tick);
    }

    pub fn tick_len_ms(&self) -> u64 {
        self.tick_len_ms.load(Ordering::Acquire)
    }

    pub fn set_tick_len_ms(&self, len: u64) {
        self.tick_len_ms.store(len, Ordering::Release);
    }

    pub fn is_authoritative(&self) -> bool {
        self.authoritative.load(Ordering::Acquire)
    }

    pub fn set_authoritative(&self, value: bool) {
        self.authoritative.store(value, Ordering::Release);
    }

    // --- Leadership ---

    pub fn leader_uuid(&self) -> String {
        self.leader.read().unwrap().clone()
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::Acquire)
    }

    pub fn phase_offset_ms(&self) -> u64 {
        self.phase_offset_ms.load(Ordering::Acquire)
    }

    /// Re-run leader election and TDMA slot assignment over the current
    /// membership. Called after every tick and on membership change.
    pub async fn recalc_leader(&self) {
        let peers = self.registry.snapshot().await;

        let mut candidates: Vec<(String, u64)> = peers
            .iter()
            .filter(|p| !p.is_hostile())
            .map(|p| {
                (
                    p.uuid.clone(),
                    scheduler::election_score(p.last_tick, p.reputation, false),
                )
            })
            .collect();
        candidates.push((
            self.identity.uuid().to_string(),
            scheduler::election_score(self.current_tick(), 0.0, false),
        ));

        // Candidates always include self, so elect() cannot come up empty.
        let leader = scheduler::elect(&candidates).unwrap_or_else(|| self.identity.uuid().into());

        let uuids: Vec<String> = candidates.into_iter().map(|(uuid, _)| uuid).collect();
        let offset = scheduler::phase_offset_ms(self.identity.uuid(), &uuids);

        let was_leader = self.is_leader();
        let is_leader = leader == self.identity.uuid();
        {
            let mut slot = self.leader.write().unwrap();
            if *slot != leader {
                info!(leader = %leader, is_self = is_leader, "leader changed");
            }
            *slot = leader;
        }
        self.is_leader.store(is_leader, Ordering::Release);
        self.phase_offset_ms.store(offset, Ordering::Release);

        if was_leader != is_leader {
            info!(is_leader, phase_offset_ms = offset, "role changed");
        }
    }

    // --- Deferred actions ---

    /// Enqueue a side effect to run outside any currently-held lock.
    pub fn schedule(&self, action: Action) {
        self.actions.send(action).ok();
    }

    /// Our own handshake payload, sent to seeds and gossiped peers.
    pub fn handshake_request(&self) -> HandshakeRequest {
        HandshakeRequest {
            uuid: self.identity.uuid().to_string(),
            genesis_hash: self.identity.genesis_hash().to_string(),
            public_key: ownworld_wire::encode_verifying_key(&self.identity.verifying_key()),
            address: self.config.public_url.clone(),
        }
    }
}

/// Drain the deferred-action queue.
pub fn spawn_action_worker(
    ctx: Arc<NodeContext>,
    mut rx: mpsc::UnboundedReceiver<Action>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(action) = rx.recv().await {
            match action {
                Action::RecalcLeader => ctx.recalc_leader().await,
                Action::RebuildFromSnapshots => scheduler::rebuild_from_snapshots(&ctx).await,
            }
        }
    })
}
