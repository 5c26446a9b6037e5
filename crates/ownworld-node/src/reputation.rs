//! Local reputation, grievance processing, and transitive trust.
//!
//! Enforcement is purely local: each node decides independently whom to
//! shun. A malicious majority can refuse to gossip with an honest node but
//! cannot force anyone else to ban it.

use crate::context::{Action, NodeContext};
use ownworld_wire::GrievanceReport;
use tracing::{info, warn};

/// Crossing this score turns a peer hostile.
pub const OSTRACISM_THRESHOLD: f64 = -50.0;

/// Damage scaled by the reporter's standing, with a floor so even
/// zero-reputation reporters leave a mark.
pub fn grievance_impact(damage: f64, reporter_reputation: f64) -> f64 {
    ((damage / 100.0) * (reporter_reputation / 10.0)).max(1.0)
}

/// Apply a grievance filed by `reporter_uuid` against `report.offender`.
/// Returns false when the grievance was ignored.
pub async fn process_grievance(
    ctx: &NodeContext,
    report: &GrievanceReport,
    reporter_uuid: &str,
) -> bool {
    let Some(reporter) = ctx.registry.get(reporter_uuid).await else {
        return false;
    };
    if reporter.is_hostile() {
        // Hostile peers get no grievance weighting.
        return false;
    }

    let impact = grievance_impact(report.damage, reporter.reputation);

    let mut ostracized = false;
    let found = ctx
        .registry
        .mutate(&report.offender, |peer| {
            peer.reputation -= impact;
            if peer.reputation <= OSTRACISM_THRESHOLD && !peer.is_hostile() {
                peer.relation = crate::registry::Relation::Hostile;
                ostracized = true;
            }
        })
        .await;

    if !found {
        return false;
    }

    info!(
        offender = %report.offender,
        reporter = %reporter_uuid,
        impact,
        "grievance applied"
    );

    if ostracized {
        warn!(peer = %report.offender, "peer ostracized by grievances");
        ctx.schedule(Action::RecalcLeader);
    }
    true
}

/// EigenTrust-style aggregation for one target: half our direct score, half
/// the reputation-weighted opinions of peers we trust. Unreachable or
/// malformed responses contribute the neutral zero and never bias the
/// target.
pub async fn transitive_score(ctx: &NodeContext, target: &str) -> f64 {
    let direct = match ctx.registry.get(target).await {
        Some(peer) => peer.reputation,
        None => return 0.0,
    };

    let raters: Vec<_> = ctx
        .registry
        .snapshot()
        .await
        .into_iter()
        .filter(|p| !p.is_hostile() && p.reputation > 0.0 && p.uuid != target)
        .collect();

    if raters.is_empty() {
        return direct;
    }

    let signature = ctx
        .identity
        .sign_payload(&ownworld_wire::reputation_query_message(target));

    let polls = raters.iter().map(|rater| {
        let signature = signature.clone();
        async move {
            let opinion = ctx
                .client
                .fetch_reputation(&rater.url, target, ctx.identity.uuid(), &signature)
                .await
                .unwrap_or(0.0);
            (rater.reputation, opinion)
        }
    });
    let opinions = futures::future::join_all(polls).await;

    let weight_sum: f64 = opinions.iter().map(|(rep, _)| rep).sum();
    if weight_sum <= 0.0 {
        return direct;
    }
    let weighted: f64 = opinions.iter().map(|(rep, opinion)| rep * opinion).sum();

    0.5 * direct + 0.5 * (weighted / weight_sum)
}

/// Periodic enforcement: replace each peer's direct score with the
/// aggregated one and ostracize anyone at or below the threshold. Mutation
/// decisions happen under the registry lock; the leader recalculation runs
/// afterwards through the action queue.
pub async fn enforcement_sweep(ctx: &NodeContext) {
    let peers = ctx.registry.snapshot().await;
    let mut any_ostracized = false;

    for peer in peers.into_iter().filter(|p| !p.is_hostile()) {
        let aggregated = transitive_score(ctx, &peer.uuid).await;
        let mut ostracized = false;
        ctx.registry
            .mutate(&peer.uuid, |p| {
                p.reputation = aggregated;
                if aggregated <= OSTRACISM_THRESHOLD && !p.is_hostile() {
                    p.relation = crate::registry::Relation::Hostile;
                    ostracized = true;
                }
            })
            .await;
        if ostracized {
            warn!(peer = %peer.uuid, score = aggregated, "peer ostracized by enforcement sweep");
            any_ostracized = true;
        }
    }

    if any_ostracized {
        ctx.schedule(Action::RecalcLeader);
    }
}
