//! Immigration pipeline: bounded intake of handshake requests, drained by a
//! single worker that decides admission.
//!
//! The handshake handler never blocks on a full queue; it drops with a
//! 503-equivalent and lets the applicant retry.

use crate::config::PeeringMode;
use crate::context::{now_ms, Action, NodeContext};
use crate::registry::{Peer, Relation};
use ownworld_wire::HandshakeRequest;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Intake channel capacity.
pub const QUEUE_CAPACITY: usize = 50;
/// Per-request admission throttle.
const ADMISSION_THROTTLE: Duration = Duration::from_millis(250);

/// Returned by [`ImmigrationQueue::try_enqueue`] when the intake is full.
#[derive(Debug)]
pub struct QueueFull;

/// Cloneable handle to the intake channel.
#[derive(Clone)]
pub struct ImmigrationQueue {
    tx: mpsc::Sender<HandshakeRequest>,
}

impl ImmigrationQueue {
    pub fn try_enqueue(&self, req: HandshakeRequest) -> Result<(), QueueFull> {
        self.tx.try_send(req).map_err(|_| QueueFull)
    }
}

/// Build the bounded intake channel.
pub fn channel() -> (ImmigrationQueue, mpsc::Receiver<HandshakeRequest>) {
    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
    (ImmigrationQueue { tx }, rx)
}

/// Spawn the single immigration worker.
pub fn spawn_worker(
    ctx: Arc<NodeContext>,
    mut rx: mpsc::Receiver<HandshakeRequest>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(req) = rx.recv().await {
            tokio::time::sleep(ADMISSION_THROTTLE).await;
            admit(&ctx, req).await;
        }
    })
}

/// Decide one handshake request.
pub async fn admit(ctx: &NodeContext, req: HandshakeRequest) -> bool {
    if req.uuid == ctx.identity.uuid() {
        return false;
    }

    if ctx.config.peering_mode == PeeringMode::Strict
        && !ctx.config.peer_allowlist.contains(&req.uuid)
    {
        // Strict mode rejects silently; the applicant learns nothing.
        debug!(uuid = %req.uuid, "handshake outside allowlist");
        return false;
    }

    if ctx.registry.contains(&req.uuid).await {
        debug!(uuid = %req.uuid, "handshake from known peer, skipping");
        return false;
    }

    if req.genesis_hash != ctx.identity.genesis_hash() {
        warn!(uuid = %req.uuid, "handshake from foreign federation rejected");
        return false;
    }

    let public_key = match ownworld_wire::decode_verifying_key(&req.public_key) {
        Ok(key) => key,
        Err(e) => {
            warn!(uuid = %req.uuid, error = %e, "handshake with unusable public key");
            return false;
        }
    };

    ctx.registry
        .add(Peer {
            uuid: req.uuid.clone(),
            url: req.address.trim_end_matches('/').to_string(),
            public_key,
            genesis_hash: req.genesis_hash,
            last_tick: 0,
            last_hash: String::new(),
            last_seen: now_ms(),
            peer_count: 0,
            reputation: 0.0,
            relation: Relation::Federated,
        })
        .await;

    info!(uuid = %req.uuid, address = %req.address, "peer admitted");
    ctx.schedule(Action::RecalcLeader);
    true
}
