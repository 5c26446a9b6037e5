//! Consensus and tick scheduling: leader election by score, TDMA phase
//! offsets, the wall-clock-aligned tick loop, clock slewing and hard
//! resync, ledger chain continuation, and fork detection.

use crate::context::{now_ms, Action, NodeContext};
use crate::error::Result;
use ownworld_store::{DailySnapshot, LedgerEntry};
use ownworld_wire::LedgerAnnounce;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Nominal tick length: the federation-wide slot size.
pub const TICK_MS: u64 = 5000;
/// Slew floor.
pub const MIN_TICK_MS: u64 = 4000;
/// Slew ceiling.
pub const MAX_TICK_MS: u64 = 6000;
/// Slew adjustment per tick of skew.
pub const SLEW_STEP_MS: u64 = 50;
/// Skew beyond this many ticks snaps instead of slewing.
pub const SNAP_TICKS: i64 = 10;
/// A ledger announcement this far ahead of us triggers a resync.
pub const FUTURE_SYNC_TICKS: u64 = 5;
/// Transactions older than this many ticks are expired.
pub const TX_PAST_TICKS: u64 = 5;
/// Transactions newer than this many ticks are clock skew.
pub const TX_FUTURE_TICKS: u64 = 2;
/// 24 hours of 5-second ticks.
pub const TICKS_PER_DAY: u64 = 17_280;
/// Hard cap on snapshots per sync page.
pub const SNAPSHOT_BATCH_CAP: u64 = 7;

/// Election score: tick height in the high bits, a bounded trust component
/// in the low 16. Reputation is clamped to [0, 100] and scaled by 655 so it
/// stays inside 16 bits; tick height strictly dominates.
pub fn election_score(tick: u64, reputation: f64, hostile: bool) -> u64 {
    let trust = if hostile {
        0
    } else {
        (reputation.clamp(0.0, 100.0) as u64) * 655
    };
    (tick << 16) | trust
}

/// Pick the leader: maximum score, ties broken by the lexicographically
/// greater UUID. Deterministic across nodes given identical candidates.
pub fn elect(candidates: &[(String, u64)]) -> Option<String> {
    candidates
        .iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)))
        .map(|(uuid, _)| uuid.clone())
}

/// TDMA slot assignment: rank of `self_uuid` in the lexicographic sort of
/// all candidate UUIDs, spread evenly over the tick window. Staggers each
/// node's tick execution so gossip doesn't collide.
pub fn phase_offset_ms(self_uuid: &str, uuids: &[String]) -> u64 {
    if uuids.is_empty() {
        return 0;
    }
    let mut sorted: Vec<&String> = uuids.iter().collect();
    sorted.sort();
    sorted.dedup();
    let rank = sorted.iter().position(|u| *u == self_uuid).unwrap_or(0) as u64;
    TICK_MS / sorted.len() as u64 * rank
}

/// Adjusted tick duration while slewing toward the leader's clock.
/// Positive delta (we are behind) shortens the tick; negative lengthens it.
pub fn slewed_tick_len_ms(delta: i64) -> u64 {
    let adjusted = TICK_MS as i64 - delta * SLEW_STEP_MS as i64;
    adjusted.clamp(MIN_TICK_MS as i64, MAX_TICK_MS as i64) as u64
}

/// Which day a tick belongs to.
pub fn day_id(tick: u64) -> u64 {
    tick / TICKS_PER_DAY
}

/// Discipline the local clock against a heartbeat from the leader.
pub fn sync_clock(ctx: &NodeContext, leader_tick: u64) {
    let local = ctx.current_tick();
    let delta = leader_tick as i64 - local as i64;

    if delta == 0 {
        ctx.set_tick_len_ms(TICK_MS);
    } else if delta > SNAP_TICKS {
        warn!(local, leader_tick, "clock far behind leader, snapping");
        ctx.set_current_tick(leader_tick);
        ctx.set_authoritative(false);
        ctx.set_tick_len_ms(TICK_MS);
        ctx.schedule(Action::RebuildFromSnapshots);
    } else {
        let len = slewed_tick_len_ms(delta);
        debug!(local, leader_tick, tick_len_ms = len, "slewing clock");
        ctx.set_tick_len_ms(len);
    }
}

/// Outcome of a ledger head announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerOutcome {
    Accepted,
    /// The sender's history diverged from what we recorded: evicted.
    ForkDetected,
    UnknownPeer,
}

/// Ingest a peer's ledger head announcement.
///
/// The Highlander rule: if the peer claims the entry after the one we last
/// recorded for it, but chains it onto a different hash, its view of its
/// own history diverges from ours. Either it rewrote history or we missed
/// entries; both are fatal for the relationship. Eviction is unilateral and
/// immediate.
pub async fn process_ledger_announce(ctx: &NodeContext, msg: &LedgerAnnounce) -> LedgerOutcome {
    let Some(peer) = ctx.registry.get(&msg.uuid).await else {
        return LedgerOutcome::UnknownPeer;
    };

    if msg.tick == peer.last_tick + 1
        && !peer.last_hash.is_empty()
        && msg.prev_hash != peer.last_hash
    {
        ctx.registry.remove(&msg.uuid).await;
        warn!(
            peer = %msg.uuid,
            tick = msg.tick,
            "fork detected: announced prev_hash disagrees with recorded head; peer evicted"
        );
        ctx.schedule(Action::RecalcLeader);
        return LedgerOutcome::ForkDetected;
    }

    if msg.tick > ctx.current_tick() + FUTURE_SYNC_TICKS {
        info!(peer = %msg.uuid, tick = msg.tick, "peer far ahead, adopting its head");
        ctx.set_current_tick(msg.tick);
        ctx.set_head_hash(&msg.final_hash);
        ctx.set_authoritative(false);
        ctx.schedule(Action::RebuildFromSnapshots);
    }

    ctx.registry
        .mutate(&msg.uuid, |p| {
            p.last_tick = msg.tick;
            p.last_hash = msg.final_hash.clone();
            p.last_seen = now_ms();
        })
        .await;

    LedgerOutcome::Accepted
}

/// Execute one tick under the state lock: advance the simulation, anchor
/// the resulting state into the ledger, snapshot on day boundaries.
///
/// Returns the head announcement to broadcast, or `None` while the node is
/// rebuilding and not authoritative.
pub async fn run_single_tick(ctx: &NodeContext) -> Result<Option<LedgerAnnounce>> {
    let mut world = ctx.world.lock().await;
    let tick = ctx.current_tick() + 1;

    if !ctx.is_authoritative() {
        // Keep counting so the clock stays in step, but publish nothing
        // until the snapshot rebuild completes.
        ctx.set_current_tick(tick);
        return Ok(None);
    }

    if let Err(e) = world.advance(tick) {
        // A failed tick body is still finalized; the digest captures the
        // resulting, possibly incomplete, state.
        warn!(tick, error = %e, "simulation tick failed");
    }
    let state_digest = world.state_digest();

    let prev_hash = ctx.head_hash();
    let entry = LedgerEntry::chain(tick, now_ms(), &prev_hash, &state_digest);
    ctx.store.append_entry(&entry)?;
    ctx.set_head(tick, &entry.final_hash);

    if tick % TICKS_PER_DAY == 0 {
        let blob = ownworld_wire::seal(&world.export_state());
        ctx.store.put_snapshot(&DailySnapshot {
            day_id: day_id(tick),
            blob,
            final_hash: entry.final_hash.clone(),
        })?;
        info!(day = day_id(tick), tick, "daily snapshot persisted");
    }

    debug!(tick, head = %entry.final_hash, "tick finalized");

    Ok(Some(LedgerAnnounce {
        uuid: ctx.identity.uuid().to_string(),
        tick,
        prev_hash,
        final_hash: entry.final_hash,
        signature: ctx.identity.sign_canonical(tick),
    }))
}

/// Broadcast our new head to every non-hostile peer. Fire-and-forget with
/// the short heartbeat timeout; unreachable peers are a neutral outcome.
pub async fn broadcast_head(ctx: &Arc<NodeContext>, announce: LedgerAnnounce) {
    let peers = ctx.registry.snapshot().await;
    for peer in peers.into_iter().filter(|p| !p.is_hostile()) {
        let ctx = Arc::clone(ctx);
        let announce = announce.clone();
        tokio::spawn(async move {
            if let Err(e) = ctx.client.announce_ledger(&peer.url, &announce).await {
                debug!(peer = %peer.uuid, error = %e, "head announce failed");
            }
        });
    }
}

/// The tick loop. At the nominal rate, ticks execute at wall-clock-aligned
/// slot boundaries plus our TDMA phase offset; while slewing, the loop
/// free-runs at the adjusted duration until the leader's clock is matched.
pub async fn run_tick_loop(ctx: Arc<NodeContext>) {
    info!(phase_offset_ms = ctx.phase_offset_ms(), "tick loop starting");
    loop {
        let tick_len = ctx.tick_len_ms();
        let now = now_ms();
        let target = if tick_len == TICK_MS {
            (now / TICK_MS + 1) * TICK_MS + ctx.phase_offset_ms()
        } else {
            now + tick_len
        };
        tokio::time::sleep(Duration::from_millis(target.saturating_sub(now))).await;

        match run_single_tick(&ctx).await {
            Ok(Some(announce)) => broadcast_head(&ctx, announce).await,
            Ok(None) => {}
            Err(e) => error!(error = %e, "tick finalization failed"),
        }
        ctx.recalc_leader().await;
    }
}

/// Rebuild missing world state from daily snapshots after a hard resync.
///
/// Downloads pages from the leader (or the most advanced peer) until a
/// short or empty page, imports the newest blob, adopts its hash as our
/// chain position, and marks the node authoritative again.
pub async fn rebuild_from_snapshots(ctx: &NodeContext) {
    let peers = ctx.registry.snapshot().await;
    let leader = ctx.leader_uuid();
    let source = peers
        .iter()
        .filter(|p| !p.is_hostile())
        .find(|p| p.uuid == leader)
        .or_else(|| {
            peers
                .iter()
                .filter(|p| !p.is_hostile())
                .max_by_key(|p| p.last_tick)
        });

    let Some(source) = source else {
        warn!("no peer available for snapshot rebuild; resuming with local state");
        ctx.set_authoritative(true);
        return;
    };

    let mut since_day = ctx
        .store
        .latest_snapshot()
        .ok()
        .flatten()
        .map(|s| s.day_id + 1)
        .unwrap_or(0);

    info!(source = %source.uuid, since_day, "snapshot rebuild starting");

    loop {
        let signature = ctx
            .identity
            .sign_payload(&ownworld_wire::sync_query_message(since_day, SNAPSHOT_BATCH_CAP));
        let page = match ctx
            .client
            .fetch_snapshots(
                &source.url,
                since_day,
                SNAPSHOT_BATCH_CAP,
                ctx.identity.uuid(),
                &signature,
            )
            .await
        {
            Ok(page) => page,
            Err(e) => {
                warn!(source = %source.uuid, error = %e, "snapshot page fetch failed");
                break;
            }
        };

        let count = page.snapshots.len() as u64;
        for record in page.snapshots {
            let blob = match hex::decode(&record.blob) {
                Ok(blob) => blob,
                Err(e) => {
                    warn!(day = record.day_id, error = %e, "unreadable snapshot blob");
                    continue;
                }
            };
            if let Err(e) = ctx.store.put_snapshot(&DailySnapshot {
                day_id: record.day_id,
                blob,
                final_hash: record.final_hash,
            }) {
                warn!(day = record.day_id, error = %e, "snapshot persist failed");
            }
            since_day = record.day_id + 1;
        }

        if count < SNAPSHOT_BATCH_CAP {
            break;
        }
    }

    if let Ok(Some(latest)) = ctx.store.latest_snapshot() {
        match ownworld_wire::open(&latest.blob) {
            Ok(state) => {
                let mut world = ctx.world.lock().await;
                if let Err(e) = world.import_state(&state) {
                    warn!(day = latest.day_id, error = %e, "snapshot import failed");
                } else {
                    ctx.set_head_hash(&latest.final_hash);
                    info!(day = latest.day_id, "world state rebuilt from snapshot");
                }
            }
            Err(e) => warn!(day = latest.day_id, error = %e, "snapshot blob corrupt"),
        }
    }

    ctx.set_authoritative(true);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{admit_test_peer, test_context};

    fn uuids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn tick_height_dominates_reputation() {
        assert!(election_score(2, 0.0, false) > election_score(1, 100.0, false));
    }

    #[test]
    fn hostile_peers_score_no_trust() {
        assert_eq!(election_score(5, 90.0, true), 5 << 16);
    }

    #[test]
    fn trust_component_stays_in_low_bits() {
        let score = election_score(0, 100.0, false);
        assert!(score <= 0xFFFF);
        assert_eq!(score, 65_500);
    }

    #[test]
    fn negative_reputation_clamps_to_zero() {
        assert_eq!(election_score(3, -40.0, false), 3 << 16);
    }

    #[test]
    fn election_is_deterministic_across_orderings() {
        let a = vec![
            ("aaa".to_string(), election_score(10, 5.0, false)),
            ("bbb".to_string(), election_score(10, 5.0, false)),
            ("ccc".to_string(), election_score(9, 90.0, false)),
        ];
        let mut b = a.clone();
        b.reverse();
        assert_eq!(elect(&a), elect(&b));
        // Equal scores: lexicographically greater UUID wins.
        assert_eq!(elect(&a).unwrap(), "bbb");
    }

    #[test]
    fn highest_tick_wins_election() {
        let candidates = vec![
            ("zzz".to_string(), election_score(4, 100.0, false)),
            ("aaa".to_string(), election_score(5, 0.0, false)),
        ];
        assert_eq!(elect(&candidates).unwrap(), "aaa");
    }

    #[test]
    fn phase_offsets_partition_the_window() {
        let members = uuids(&["ccc", "aaa", "ddd", "bbb"]);
        let offsets: Vec<u64> = ["aaa", "bbb", "ccc", "ddd"]
            .iter()
            .map(|u| phase_offset_ms(u, &members))
            .collect();
        assert_eq!(offsets, vec![0, 1250, 2500, 3750]);
    }

    #[test]
    fn phase_offset_depends_only_on_sorted_set() {
        let shuffled = uuids(&["bbb", "aaa"]);
        let ordered = uuids(&["aaa", "bbb"]);
        assert_eq!(phase_offset_ms("bbb", &shuffled), phase_offset_ms("bbb", &ordered));
        assert_eq!(phase_offset_ms("bbb", &ordered), 2500);
        assert_eq!(phase_offset_ms("aaa", &ordered), 0);
    }

    #[test]
    fn lone_node_sits_at_offset_zero() {
        assert_eq!(phase_offset_ms("only", &uuids(&["only"])), 0);
    }

    #[test]
    fn slew_values() {
        assert_eq!(slewed_tick_len_ms(0), 5000);
        assert_eq!(slewed_tick_len_ms(1), 4950);
        assert_eq!(slewed_tick_len_ms(-1), 5050);
        assert_eq!(slewed_tick_len_ms(10), 4500);
        // Clamped at the floor and ceiling.
        assert_eq!(slewed_tick_len_ms(50), MIN_TICK_MS);
        assert_eq!(slewed_tick_len_ms(-50), MAX_TICK_MS);
    }

    #[tokio::test]
    async fn lagging_one_tick_slews_faster() {
        let ctx = test_context().await;
        ctx.set_current_tick(10);
        sync_clock(&ctx, 11);
        assert_eq!(ctx.tick_len_ms(), 4950);
        // Caught up: back to nominal.
        sync_clock(&ctx, 10);
        assert_eq!(ctx.tick_len_ms(), 5000);
    }

    #[tokio::test]
    async fn far_behind_snaps_to_leader() {
        let ctx = test_context().await;
        ctx.set_current_tick(80);
        sync_clock(&ctx, 100);
        assert_eq!(ctx.current_tick(), 100);
        assert!(!ctx.is_authoritative());
    }

    #[tokio::test]
    async fn ahead_of_leader_slews_slower() {
        let ctx = test_context().await;
        ctx.set_current_tick(12);
        sync_clock(&ctx, 10);
        assert_eq!(ctx.tick_len_ms(), 5100);
        assert_eq!(ctx.current_tick(), 12);
    }

    #[tokio::test]
    async fn ticks_chain_in_the_ledger() {
        let ctx = test_context().await;
        for _ in 0..3 {
            run_single_tick(&ctx).await.unwrap().unwrap();
        }
        assert_eq!(ctx.current_tick(), 3);
        ctx.store.verify_chain().unwrap();

        let first = ctx.store.entry(1).unwrap().unwrap();
        let second = ctx.store.entry(2).unwrap().unwrap();
        assert_eq!(second.prev_hash, first.final_hash);
        assert_eq!(first.prev_hash, ctx.identity.genesis_hash());
        assert_eq!(ctx.head_hash(), ctx.store.head().unwrap().unwrap().final_hash);
    }

    #[tokio::test]
    async fn non_authoritative_ticks_skip_the_ledger() {
        let ctx = test_context().await;
        ctx.set_authoritative(false);
        assert!(run_single_tick(&ctx).await.unwrap().is_none());
        assert_eq!(ctx.current_tick(), 1);
        assert_eq!(ctx.store.entry_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn day_boundary_writes_a_snapshot() {
        let ctx = test_context().await;
        ctx.set_current_tick(TICKS_PER_DAY - 1);
        run_single_tick(&ctx).await.unwrap().unwrap();
        let snapshot = ctx.store.latest_snapshot().unwrap().unwrap();
        assert_eq!(snapshot.day_id, 1);
        assert_eq!(snapshot.final_hash, ctx.head_hash());
    }

    #[tokio::test]
    async fn fork_detection_evicts_the_peer() {
        let ctx = test_context().await;
        admit_test_peer(&ctx, "forker").await;
        ctx.registry
            .mutate("forker", |p| {
                p.last_tick = 50;
                p.last_hash = "real-head".to_string();
            })
            .await;

        let announce = LedgerAnnounce {
            uuid: "forker".to_string(),
            tick: 51,
            prev_hash: "rewritten-head".to_string(),
            final_hash: "whatever".to_string(),
            signature: String::new(),
        };
        assert_eq!(process_ledger_announce(&ctx, &announce).await, LedgerOutcome::ForkDetected);
        assert!(!ctx.registry.contains("forker").await);

        // Idempotent: the evicted peer is now simply unknown.
        assert_eq!(process_ledger_announce(&ctx, &announce).await, LedgerOutcome::UnknownPeer);
    }

    #[tokio::test]
    async fn consistent_announce_updates_the_record() {
        let ctx = test_context().await;
        admit_test_peer(&ctx, "honest").await;
        ctx.registry
            .mutate("honest", |p| {
                p.last_tick = 50;
                p.last_hash = "head-50".to_string();
            })
            .await;
        ctx.set_current_tick(50);

        let announce = LedgerAnnounce {
            uuid: "honest".to_string(),
            tick: 51,
            prev_hash: "head-50".to_string(),
            final_hash: "head-51".to_string(),
            signature: String::new(),
        };
        assert_eq!(process_ledger_announce(&ctx, &announce).await, LedgerOutcome::Accepted);
        let peer = ctx.registry.get("honest").await.unwrap();
        assert_eq!(peer.last_tick, 51);
        assert_eq!(peer.last_hash, "head-51");
    }

    #[tokio::test]
    async fn far_future_announce_triggers_resync() {
        let ctx = test_context().await;
        admit_test_peer(&ctx, "ahead").await;
        ctx.set_current_tick(10);

        let announce = LedgerAnnounce {
            uuid: "ahead".to_string(),
            tick: 40,
            prev_hash: "head-39".to_string(),
            final_hash: "head-40".to_string(),
            signature: String::new(),
        };
        assert_eq!(process_ledger_announce(&ctx, &announce).await, LedgerOutcome::Accepted);
        assert_eq!(ctx.current_tick(), 40);
        assert_eq!(ctx.head_hash(), "head-40");
        assert!(!ctx.is_authoritative());
    }
}
