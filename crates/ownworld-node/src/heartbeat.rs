//! Heartbeat fan-out, liveness pruning, and heartbeat ingestion.
//!
//! Heartbeats double as the peer clock sampling channel: a beat from the
//! current leader feeds the scheduler's clock discipline.

use crate::config::PeeringMode;
use crate::context::{now_ms, Action, NodeContext};
use crate::error::{Error, Result};
use crate::reputation;
use crate::scheduler;
use ownworld_wire::{GossipPeer, Heartbeat};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Two ticks between beats.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
/// Peers silent past this are pruned.
pub const LIVENESS_TTL_MS: u64 = 300_000;
/// Peer advertisements attached to each beat.
const GOSSIP_FANOUT: usize = 8;

/// Spawn the periodic heartbeat timer.
pub fn spawn_heartbeat_timer(ctx: Arc<NodeContext>) -> JoinHandle<()> {
    // The enforcement cadence is configured in ticks; a firing covers two.
    let enforce_every_firings = (ctx.config.enforce_every_ticks / 2).max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut firing: u64 = 0;
        loop {
            interval.tick().await;
            firing += 1;
            beat(&ctx).await;
            if firing % enforce_every_firings == 0 {
                reputation::enforcement_sweep(&ctx).await;
            }
        }
    })
}

/// One firing: fan out a signed heartbeat to every non-hostile peer, then
/// prune the silent ones.
pub async fn beat(ctx: &Arc<NodeContext>) {
    let peers = ctx.registry.snapshot().await;
    let targets: Vec<_> = peers.iter().filter(|p| !p.is_hostile()).cloned().collect();

    if !targets.is_empty() {
        let tick = ctx.current_tick();
        let gossip: Vec<GossipPeer> = targets
            .iter()
            .take(GOSSIP_FANOUT)
            .map(|p| GossipPeer { uuid: p.uuid.clone(), address: p.url.clone() })
            .collect();
        let heartbeat = Heartbeat {
            uuid: ctx.identity.uuid().to_string(),
            tick,
            peer_count: targets.len() as u64,
            gen_hash: ctx.identity.genesis_hash().to_string(),
            last_hash: ctx.head_hash(),
            signature: ctx.identity.sign_canonical(tick),
            gossip: Some(gossip),
        };

        let sends = targets.iter().map(|peer| {
            let heartbeat = heartbeat.clone();
            async move {
                if let Err(e) = ctx.client.send_heartbeat(&peer.url, &heartbeat).await {
                    debug!(peer = %peer.uuid, error = %e, "heartbeat send failed");
                }
            }
        });
        futures::future::join_all(sends).await;
    }

    prune_silent(ctx).await;
}

/// Remove peers whose last valid message is older than the liveness TTL.
async fn prune_silent(ctx: &NodeContext) {
    let now = now_ms();
    let stale: Vec<String> = ctx
        .registry
        .snapshot()
        .await
        .into_iter()
        .filter(|p| now.saturating_sub(p.last_seen) > LIVENESS_TTL_MS)
        .map(|p| p.uuid)
        .collect();

    for uuid in stale {
        if ctx.registry.remove(&uuid).await.is_some() {
            info!(peer = %uuid, "pruned silent peer");
            ctx.schedule(Action::RecalcLeader);
        }
    }
}

/// Ingest a heartbeat from an admitted peer. The signature must verify
/// under the key pinned at admission; a beat from the current leader also
/// disciplines our clock.
pub async fn ingest(ctx: &Arc<NodeContext>, heartbeat: &Heartbeat) -> Result<()> {
    let peer = ctx
        .registry
        .get(&heartbeat.uuid)
        .await
        .ok_or_else(|| Error::Protocol(format!("heartbeat from unknown peer {}", heartbeat.uuid)))?;

    ownworld_wire::verify_canonical(
        &peer.public_key,
        &heartbeat.uuid,
        heartbeat.tick,
        &heartbeat.signature,
    )?;

    ctx.registry
        .mutate(&heartbeat.uuid, |p| {
            p.last_tick = heartbeat.tick;
            p.last_hash = heartbeat.last_hash.clone();
            p.peer_count = heartbeat.peer_count;
            p.last_seen = now_ms();
        })
        .await;

    if heartbeat.uuid == ctx.leader_uuid() {
        scheduler::sync_clock(ctx, heartbeat.tick);
    }

    if let Some(gossip) = &heartbeat.gossip {
        follow_gossip(ctx, gossip).await;
    }

    Ok(())
}

/// Handshake with gossiped peers we don't know yet. Only in promiscuous
/// mode; strict nodes admit through the allowlist alone.
async fn follow_gossip(ctx: &Arc<NodeContext>, gossip: &[GossipPeer]) {
    if ctx.config.peering_mode != PeeringMode::Promiscuous {
        return;
    }
    for entry in gossip {
        if entry.uuid == ctx.identity.uuid() || ctx.registry.contains(&entry.uuid).await {
            continue;
        }
        let ctx = Arc::clone(ctx);
        let address = entry.address.clone();
        let uuid = entry.uuid.clone();
        tokio::spawn(async move {
            match ctx.client.handshake(&address, &ctx.handshake_request()).await {
                Ok(ack) => {
                    let req = ownworld_wire::HandshakeRequest {
                        uuid: ack.uuid,
                        genesis_hash: ack.genesis_hash,
                        public_key: ack.public_key,
                        address: ack.address,
                    };
                    if ctx.immigration.try_enqueue(req).is_err() {
                        debug!(peer = %uuid, "immigration queue full, gossip dropped");
                    }
                }
                Err(e) => debug!(peer = %uuid, error = %e, "gossip handshake failed"),
            }
        });
    }
}
