//! Federation ingress: the `/federation/*` HTTP surface.
//!
//! Every handler runs the same gauntlet: per-source-IP rate limit (localhost
//! exempt), content-type check for body-carrying requests, known-sender
//! requirement for everything but the handshake, decompress + parse, then
//! mandatory signature verification against the sender's pinned key.
//! Internal failures never cross the network boundary; they translate to
//! status codes.

use crate::client::{HEADER_SIGNATURE, HEADER_UUID};
use crate::context::NodeContext;
use crate::heartbeat;
use crate::ratelimit::RateLimiter;
use crate::registry::Peer;
use crate::reputation;
use crate::scheduler::{self, LedgerOutcome, SNAPSHOT_BATCH_CAP, TX_FUTURE_TICKS, TX_PAST_TICKS};
use axum::body::Bytes;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use ownworld_wire::{
    GrievanceReport, HandshakeAck, HandshakeRequest, Heartbeat, LedgerAnnounce, PeerSummary,
    SnapshotPage, SnapshotRecord, Transaction,
};
use serde::Deserialize;
use serde_json::json;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

/// Peer-list cache horizon for `/federation/map`.
const MAP_CACHE_TTL: Duration = Duration::from_secs(60);
/// Whole-request deadline; with bounded bodies this caps slow-loris writers.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared state behind the router.
pub struct ApiState {
    pub ctx: Arc<NodeContext>,
    limiter: RateLimiter,
    map_cache: Mutex<Option<(Instant, serde_json::Value)>>,
}

type SharedState = Arc<ApiState>;

/// Build the HTTP router. The federation surface is always mounted; the
/// client surface only when command-control is enabled.
pub fn build_router(ctx: Arc<NodeContext>) -> Router {
    let command_control = ctx.config.command_control;
    let state = Arc::new(ApiState {
        ctx,
        limiter: RateLimiter::new(),
        map_cache: Mutex::new(None),
    });

    let mut router = Router::new()
        .route("/federation/handshake", post(handshake))
        .route("/federation/heartbeat", post(heartbeat_ingress))
        .route("/federation/ledger", post(ledger_ingress))
        .route("/federation/transaction", post(transaction_ingress))
        .route("/federation/sync", get(sync_snapshots))
        .route("/federation/reputation", get(reputation_query))
        .route("/federation/map", get(map_view))
        .route("/health", get(health));

    if command_control {
        router = router.route("/api/v1/status", get(status));
    }

    router
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// --- Gate helpers ---

fn reject(status: StatusCode, code: &str) -> Response {
    (status, Json(json!({ "error": code }))).into_response()
}

fn client_ip(info: &Option<ConnectInfo<SocketAddr>>) -> IpAddr {
    info.as_ref()
        .map(|c| c.0.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

fn check_rate(state: &ApiState, ip: IpAddr) -> Result<(), Response> {
    if state.limiter.allow(ip) {
        Ok(())
    } else {
        Err(reject(StatusCode::TOO_MANY_REQUESTS, "rate-limited"))
    }
}

fn check_content_type(headers: &HeaderMap) -> Result<(), Response> {
    let ok = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == ownworld_wire::CONTENT_TYPE)
        .unwrap_or(false);
    if ok {
        Ok(())
    } else {
        Err(reject(StatusCode::BAD_REQUEST, "wrong-content-type"))
    }
}

/// Known, non-banned sender or a 403. Hostile records are kept around
/// exactly so this drop happens early.
async fn known_sender(ctx: &NodeContext, uuid: &str) -> Result<Peer, Response> {
    match ctx.registry.get(uuid).await {
        None => Err(reject(StatusCode::FORBIDDEN, "unknown-peer")),
        Some(peer) if peer.is_hostile() => Err(reject(StatusCode::FORBIDDEN, "banned")),
        Some(peer) => Ok(peer),
    }
}

/// Authenticate a GET via the uuid/signature headers; `message` is the
/// canonical byte string the caller signed.
async fn authenticated_get(
    ctx: &NodeContext,
    headers: &HeaderMap,
    message: &[u8],
) -> Result<Peer, Response> {
    let uuid = headers
        .get(HEADER_UUID)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| reject(StatusCode::FORBIDDEN, "unknown-peer"))?;
    let signature = headers
        .get(HEADER_SIGNATURE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| reject(StatusCode::UNAUTHORIZED, "bad-signature"))?;

    let peer = known_sender(ctx, uuid).await?;
    ownworld_wire::verify_payload(&peer.public_key, message, signature)
        .map_err(|_| reject(StatusCode::UNAUTHORIZED, "bad-signature"))?;
    Ok(peer)
}

fn sealed_response<T: serde::Serialize>(status: StatusCode, body: &T) -> Response {
    match ownworld_wire::seal_json(body) {
        Ok(bytes) => (
            status,
            [(header::CONTENT_TYPE, ownworld_wire::CONTENT_TYPE)],
            bytes,
        )
            .into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

// --- Federation handlers ---

async fn handshake(
    State(state): State<SharedState>,
    info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(r) = check_rate(&state, client_ip(&info)) {
        return r;
    }
    if let Err(r) = check_content_type(&headers) {
        return r;
    }
    let req: HandshakeRequest = match ownworld_wire::open_json(&body) {
        Ok(req) => req,
        Err(_) => return reject(StatusCode::BAD_REQUEST, "malformed"),
    };

    let ctx = &state.ctx;
    if req.uuid == ctx.identity.uuid() {
        return reject(StatusCode::BAD_REQUEST, "self-handshake");
    }
    if ctx.immigration.try_enqueue(req).is_err() {
        return reject(StatusCode::SERVICE_UNAVAILABLE, "queue-full");
    }

    let ack = HandshakeAck {
        uuid: ctx.identity.uuid().to_string(),
        genesis_hash: ctx.identity.genesis_hash().to_string(),
        public_key: ownworld_wire::encode_verifying_key(&ctx.identity.verifying_key()),
        address: ctx.config.public_url.clone(),
        peer_count: ctx.registry.len().await as u64,
    };
    sealed_response(StatusCode::ACCEPTED, &ack)
}

async fn heartbeat_ingress(
    State(state): State<SharedState>,
    info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(r) = check_rate(&state, client_ip(&info)) {
        return r;
    }
    if let Err(r) = check_content_type(&headers) {
        return r;
    }
    let hb: Heartbeat = match ownworld_wire::open_json(&body) {
        Ok(hb) => hb,
        Err(_) => return reject(StatusCode::BAD_REQUEST, "malformed"),
    };

    let ctx = &state.ctx;
    if let Err(r) = known_sender(ctx, &hb.uuid).await {
        return r;
    }
    if hb.gen_hash != ctx.identity.genesis_hash() {
        return reject(StatusCode::FORBIDDEN, "genesis-mismatch");
    }

    match heartbeat::ingest(ctx, &hb).await {
        Ok(()) => (StatusCode::OK, "ok").into_response(),
        Err(crate::error::Error::Wire(_)) => reject(StatusCode::UNAUTHORIZED, "bad-signature"),
        Err(_) => reject(StatusCode::FORBIDDEN, "unknown-peer"),
    }
}

async fn ledger_ingress(
    State(state): State<SharedState>,
    info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(r) = check_rate(&state, client_ip(&info)) {
        return r;
    }
    if let Err(r) = check_content_type(&headers) {
        return r;
    }
    let announce: LedgerAnnounce = match ownworld_wire::open_json(&body) {
        Ok(a) => a,
        Err(_) => return reject(StatusCode::BAD_REQUEST, "malformed"),
    };

    let ctx = &state.ctx;
    let peer = match known_sender(ctx, &announce.uuid).await {
        Ok(peer) => peer,
        Err(r) => return r,
    };
    if ownworld_wire::verify_canonical(
        &peer.public_key,
        &announce.uuid,
        announce.tick,
        &announce.signature,
    )
    .is_err()
    {
        return reject(StatusCode::UNAUTHORIZED, "bad-signature");
    }

    match scheduler::process_ledger_announce(ctx, &announce).await {
        LedgerOutcome::Accepted => (StatusCode::OK, "ok").into_response(),
        LedgerOutcome::ForkDetected => reject(StatusCode::FORBIDDEN, "fork-detected"),
        LedgerOutcome::UnknownPeer => reject(StatusCode::FORBIDDEN, "unknown-peer"),
    }
}

async fn transaction_ingress(
    State(state): State<SharedState>,
    info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(r) = check_rate(&state, client_ip(&info)) {
        return r;
    }
    if let Err(r) = check_content_type(&headers) {
        return r;
    }
    let tx: Transaction = match ownworld_wire::open_json(&body) {
        Ok(tx) => tx,
        Err(_) => return reject(StatusCode::BAD_REQUEST, "malformed"),
    };

    let ctx = &state.ctx;
    let peer = match known_sender(ctx, &tx.uuid).await {
        Ok(peer) => peer,
        Err(r) => return r,
    };

    let payload = match tx.payload_bytes() {
        Ok(payload) => payload,
        Err(_) => return reject(StatusCode::BAD_REQUEST, "malformed"),
    };
    if ownworld_wire::verify_payload(&peer.public_key, &payload, &tx.signature).is_err() {
        return reject(StatusCode::UNAUTHORIZED, "bad-signature");
    }

    // Tick window: stale transactions expire, future-dated ones are skew.
    let local = ctx.current_tick();
    if tx.tick + TX_PAST_TICKS < local {
        return reject(StatusCode::REQUEST_TIMEOUT, "expired");
    }
    if tx.tick > local + TX_FUTURE_TICKS {
        return reject(StatusCode::BAD_REQUEST, "clock-skew");
    }

    match tx.kind.as_str() {
        "grievance" => {
            let report: GrievanceReport = match serde_json::from_slice(&payload) {
                Ok(report) => report,
                Err(_) => return reject(StatusCode::BAD_REQUEST, "malformed"),
            };
            reputation::process_grievance(ctx, &report, &tx.uuid).await;
            (StatusCode::OK, "processed").into_response()
        }
        kind => {
            ctx.world.lock().await.deliver(kind, &payload);
            (StatusCode::ACCEPTED, "accepted").into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct SyncParams {
    #[serde(default)]
    since_day: u64,
    limit: Option<u64>,
}

async fn sync_snapshots(
    State(state): State<SharedState>,
    info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Query(params): Query<SyncParams>,
) -> Response {
    if let Err(r) = check_rate(&state, client_ip(&info)) {
        return r;
    }
    let ctx = &state.ctx;
    let limit = params.limit.unwrap_or(SNAPSHOT_BATCH_CAP).min(SNAPSHOT_BATCH_CAP);
    let message = ownworld_wire::sync_query_message(params.since_day, limit);
    if let Err(r) = authenticated_get(ctx, &headers, &message).await {
        return r;
    }

    let snapshots = match ctx.store.snapshots_since(params.since_day, limit) {
        Ok(snapshots) => snapshots,
        Err(e) => {
            warn!(error = %e, "snapshot read failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    let page = SnapshotPage {
        snapshots: snapshots
            .into_iter()
            .map(|s| SnapshotRecord {
                day_id: s.day_id,
                blob: hex::encode(&s.blob),
                final_hash: s.final_hash,
            })
            .collect(),
        tick: ctx.current_tick(),
    };
    sealed_response(StatusCode::OK, &page)
}

#[derive(Debug, Deserialize)]
struct ReputationParams {
    uuid: String,
}

async fn reputation_query(
    State(state): State<SharedState>,
    info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Query(params): Query<ReputationParams>,
) -> Response {
    if let Err(r) = check_rate(&state, client_ip(&info)) {
        return r;
    }
    let ctx = &state.ctx;
    let message = ownworld_wire::reputation_query_message(&params.uuid);
    if let Err(r) = authenticated_get(ctx, &headers, &message).await {
        return r;
    }

    let score = ctx
        .registry
        .get(&params.uuid)
        .await
        .map(|p| p.reputation)
        .unwrap_or(0.0);
    Json(json!({ "score": score })).into_response()
}

async fn map_view(
    State(state): State<SharedState>,
    info: Option<ConnectInfo<SocketAddr>>,
) -> Response {
    if let Err(r) = check_rate(&state, client_ip(&info)) {
        return r;
    }

    {
        let cache = state.map_cache.lock().unwrap();
        if let Some((built, value)) = cache.as_ref() {
            if built.elapsed() < MAP_CACHE_TTL {
                return Json(value.clone()).into_response();
            }
        }
    }

    // Rebuild outside the cache lock from an atomic registry snapshot.
    let peers: Vec<PeerSummary> = state
        .ctx
        .registry
        .snapshot()
        .await
        .into_iter()
        .map(|p| PeerSummary {
            uuid: p.uuid,
            address: p.url,
            last_tick: p.last_tick,
            relation: p.relation.as_str().to_string(),
        })
        .collect();
    let value = json!({
        "self": state.ctx.identity.uuid(),
        "tick": state.ctx.current_tick(),
        "peers": peers,
    });

    *state.map_cache.lock().unwrap() = Some((Instant::now(), value.clone()));
    Json(value).into_response()
}

// --- Client surface ---

async fn health() -> &'static str {
    "OK"
}

async fn status(State(state): State<SharedState>) -> Response {
    let ctx = &state.ctx;
    Json(json!({
        "uuid": ctx.identity.uuid(),
        "tick": ctx.current_tick(),
        "leader": ctx.leader_uuid(),
        "is_leader": ctx.is_leader(),
        "phase_offset_ms": ctx.phase_offset_ms(),
        "authoritative": ctx.is_authoritative(),
        "peer_count": ctx.registry.len().await,
    }))
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{admit_test_peer, test_context, test_node_parts};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use ownworld_store::DailySnapshot;
    use tower::ServiceExt;

    async fn request(
        router: Router,
        method: &str,
        uri: &str,
        content_type: Option<&str>,
        headers: &[(&str, String)],
        body: Vec<u8>,
    ) -> (StatusCode, Vec<u8>) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(ct) = content_type {
            builder = builder.header(header::CONTENT_TYPE, ct);
        }
        for (name, value) in headers {
            builder = builder.header(*name, value.as_str());
        }
        let response = router
            .oneshot(builder.body(Body::from(body)).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes.to_vec())
    }

    async fn post_fed(router: Router, uri: &str, body: Vec<u8>) -> (StatusCode, Vec<u8>) {
        request(router, "POST", uri, Some(ownworld_wire::CONTENT_TYPE), &[], body).await
    }

    #[tokio::test]
    async fn handshake_acks_and_enqueues() {
        let (ctx, mut immigration_rx, _actions) = test_node_parts(|_| {}).await;
        let router = build_router(Arc::clone(&ctx));

        let req = HandshakeRequest {
            uuid: "applicant".to_string(),
            genesis_hash: ctx.identity.genesis_hash().to_string(),
            public_key: "ab".repeat(32),
            address: "http://applicant.test:8080".to_string(),
        };
        let (status, body) = post_fed(
            router,
            "/federation/handshake",
            ownworld_wire::seal_json(&req).unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::ACCEPTED);
        let ack: HandshakeAck = ownworld_wire::open_json(&body).unwrap();
        assert_eq!(ack.uuid, ctx.identity.uuid());

        let queued = immigration_rx.recv().await.unwrap();
        assert_eq!(queued.uuid, "applicant");
    }

    #[tokio::test]
    async fn handshake_requires_content_type() {
        let ctx = test_context().await;
        let router = build_router(ctx);
        let (status, _) = request(
            router,
            "POST",
            "/federation/handshake",
            Some("application/json"),
            &[],
            b"{}".to_vec(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn heartbeat_from_stranger_is_403() {
        let ctx = test_context().await;
        let gen = ctx.identity.genesis_hash().to_string();
        let router = build_router(ctx);
        let hb = Heartbeat {
            uuid: "stranger".to_string(),
            tick: 1,
            peer_count: 0,
            gen_hash: gen,
            last_hash: String::new(),
            signature: "00".repeat(64),
            gossip: None,
        };
        let (status, _) = post_fed(
            router,
            "/federation/heartbeat",
            ownworld_wire::seal_json(&hb).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn heartbeat_with_bad_signature_is_401() {
        let ctx = test_context().await;
        admit_test_peer(&ctx, "peer-a").await;
        let forger = ed25519_dalek::SigningKey::generate(&mut rand::thread_rng());
        let hb = Heartbeat {
            uuid: "peer-a".to_string(),
            tick: 3,
            peer_count: 0,
            gen_hash: ctx.identity.genesis_hash().to_string(),
            last_hash: String::new(),
            signature: ownworld_wire::sign_canonical(&forger, "peer-a", 3),
            gossip: None,
        };
        let router = build_router(ctx);
        let (status, _) = post_fed(
            router,
            "/federation/heartbeat",
            ownworld_wire::seal_json(&hb).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn signed_heartbeat_is_accepted() {
        let ctx = test_context().await;
        let key = admit_test_peer(&ctx, "peer-a").await;
        let hb = Heartbeat {
            uuid: "peer-a".to_string(),
            tick: 3,
            peer_count: 1,
            gen_hash: ctx.identity.genesis_hash().to_string(),
            last_hash: "head".to_string(),
            signature: ownworld_wire::sign_canonical(&key, "peer-a", 3),
            gossip: None,
        };
        let router = build_router(Arc::clone(&ctx));
        let (status, _) = post_fed(
            router,
            "/federation/heartbeat",
            ownworld_wire::seal_json(&hb).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ctx.registry.get("peer-a").await.unwrap().last_tick, 3);
    }

    fn signed_transaction(
        key: &ed25519_dalek::SigningKey,
        uuid: &str,
        tick: u64,
        kind: &str,
        payload: &[u8],
    ) -> Transaction {
        Transaction {
            uuid: uuid.to_string(),
            tick,
            kind: kind.to_string(),
            payload: hex::encode(payload),
            signature: ownworld_wire::sign_payload(key, payload),
        }
    }

    #[tokio::test]
    async fn stale_transaction_expires() {
        let ctx = test_context().await;
        let key = admit_test_peer(&ctx, "sender").await;
        ctx.set_current_tick(100);
        let tx = signed_transaction(&key, "sender", 94, "trade", b"cargo");
        let router = build_router(Arc::clone(&ctx));
        let (status, _) = post_fed(
            router,
            "/federation/transaction",
            ownworld_wire::seal_json(&tx).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
    }

    #[tokio::test]
    async fn future_transaction_is_clock_skew() {
        let ctx = test_context().await;
        let key = admit_test_peer(&ctx, "sender").await;
        ctx.set_current_tick(100);
        let tx = signed_transaction(&key, "sender", 103, "trade", b"cargo");
        let router = build_router(Arc::clone(&ctx));
        let (status, body) = post_fed(
            router,
            "/federation/transaction",
            ownworld_wire::seal_json(&tx).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(String::from_utf8_lossy(&body).contains("clock-skew"));
    }

    #[tokio::test]
    async fn window_edges_are_inclusive() {
        let ctx = test_context().await;
        let key = admit_test_peer(&ctx, "sender").await;
        ctx.set_current_tick(100);
        for tick in [95u64, 102] {
            let tx = signed_transaction(&key, "sender", tick, "trade", b"cargo");
            let router = build_router(Arc::clone(&ctx));
            let (status, _) = post_fed(
                router,
                "/federation/transaction",
                ownworld_wire::seal_json(&tx).unwrap(),
            )
            .await;
            assert_eq!(status, StatusCode::ACCEPTED, "tick {} should pass", tick);
        }
    }

    #[tokio::test]
    async fn grievance_transaction_is_processed() {
        let ctx = test_context().await;
        let key = admit_test_peer(&ctx, "reporter").await;
        admit_test_peer(&ctx, "offender").await;
        ctx.registry.mutate("reporter", |p| p.reputation = 20.0).await;
        ctx.set_current_tick(10);

        let payload = serde_json::to_vec(&GrievanceReport {
            offender: "offender".to_string(),
            damage: 500.0,
        })
        .unwrap();
        let tx = signed_transaction(&key, "reporter", 10, "grievance", &payload);
        let router = build_router(Arc::clone(&ctx));
        let (status, _) = post_fed(
            router,
            "/federation/transaction",
            ownworld_wire::seal_json(&tx).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ctx.registry.get("offender").await.unwrap().reputation, -10.0);
    }

    #[tokio::test]
    async fn forked_peer_is_evicted_then_unknown() {
        let ctx = test_context().await;
        let key = admit_test_peer(&ctx, "forker").await;
        ctx.registry
            .mutate("forker", |p| {
                p.last_tick = 50;
                p.last_hash = "Y".to_string();
            })
            .await;

        let announce = LedgerAnnounce {
            uuid: "forker".to_string(),
            tick: 51,
            prev_hash: "X".to_string(),
            final_hash: "Z".to_string(),
            signature: ownworld_wire::sign_canonical(&key, "forker", 51),
        };
        let router = build_router(Arc::clone(&ctx));
        let (status, body) = post_fed(
            router.clone(),
            "/federation/ledger",
            ownworld_wire::seal_json(&announce).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(String::from_utf8_lossy(&body).contains("fork-detected"));
        assert!(!ctx.registry.contains("forker").await);

        // Follow-up traffic from the evicted peer: unknown-peer.
        let hb = Heartbeat {
            uuid: "forker".to_string(),
            tick: 52,
            peer_count: 0,
            gen_hash: ctx.identity.genesis_hash().to_string(),
            last_hash: String::new(),
            signature: ownworld_wire::sign_canonical(&key, "forker", 52),
            gossip: None,
        };
        let (status, body) = post_fed(
            router,
            "/federation/heartbeat",
            ownworld_wire::seal_json(&hb).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(String::from_utf8_lossy(&body).contains("unknown-peer"));
    }

    #[tokio::test]
    async fn reputation_query_requires_auth() {
        let ctx = test_context().await;
        admit_test_peer(&ctx, "target").await;
        let router = build_router(ctx);
        let (status, _) = request(
            router,
            "GET",
            "/federation/reputation?uuid=target",
            None,
            &[],
            Vec::new(),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn reputation_query_returns_score() {
        let ctx = test_context().await;
        let key = admit_test_peer(&ctx, "asker").await;
        admit_test_peer(&ctx, "target").await;
        ctx.registry.mutate("target", |p| p.reputation = -7.5).await;

        let signature = ownworld_wire::sign_payload(
            &key,
            &ownworld_wire::reputation_query_message("target"),
        );
        let router = build_router(ctx);
        let (status, body) = request(
            router,
            "GET",
            "/federation/reputation?uuid=target",
            None,
            &[
                (HEADER_UUID, "asker".to_string()),
                (HEADER_SIGNATURE, signature),
            ],
            Vec::new(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["score"], -7.5);
    }

    #[tokio::test]
    async fn sync_serves_sealed_pages() {
        let ctx = test_context().await;
        let key = admit_test_peer(&ctx, "cold-start").await;
        for day in 0..3u64 {
            ctx.store
                .put_snapshot(&DailySnapshot {
                    day_id: day,
                    blob: vec![day as u8; 8],
                    final_hash: format!("{:02x}", day),
                })
                .unwrap();
        }

        let signature =
            ownworld_wire::sign_payload(&key, &ownworld_wire::sync_query_message(1, 7));
        let router = build_router(ctx);
        let (status, body) = request(
            router,
            "GET",
            "/federation/sync?since_day=1",
            None,
            &[
                (HEADER_UUID, "cold-start".to_string()),
                (HEADER_SIGNATURE, signature),
            ],
            Vec::new(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let page: SnapshotPage = ownworld_wire::open_json(&body).unwrap();
        assert_eq!(page.snapshots.len(), 2);
        assert_eq!(page.snapshots[0].day_id, 1);
        assert_eq!(hex::decode(&page.snapshots[0].blob).unwrap(), vec![1u8; 8]);
    }

    #[tokio::test]
    async fn map_lists_peers() {
        let ctx = test_context().await;
        admit_test_peer(&ctx, "visible").await;
        let router = build_router(ctx);
        let (status, body) = request(router, "GET", "/federation/map", None, &[], Vec::new()).await;
        assert_eq!(status, StatusCode::OK);
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["peers"][0]["uuid"], "visible");
    }

    #[tokio::test]
    async fn infrastructure_only_node_hides_client_surface() {
        let ctx = test_context().await;
        let router = build_router(ctx);
        let (status, _) = request(router, "GET", "/api/v1/status", None, &[], Vec::new()).await;
        assert_eq!(status, StatusCode::OK);

        let bare = crate::testutil::test_context_with(|config| config.command_control = false).await;
        let router = build_router(bare);
        let (status, _) = request(router, "GET", "/api/v1/status", None, &[], Vec::new()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
