//! Outbound federation client.
//!
//! One shared reqwest client for all peers; every call carries its own
//! timeout, and a timeout is a neutral outcome (the peer is unreachable,
//! not hostile).

use crate::error::{Error, Result};
use ownworld_wire::{HandshakeAck, HandshakeRequest, Heartbeat, LedgerAnnounce, SnapshotPage};
use serde::Deserialize;
use std::time::Duration;

pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(2);
pub const REPUTATION_TIMEOUT: Duration = Duration::from_secs(1);
pub const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(10);

/// Header carrying the requester UUID on authenticated GETs.
pub const HEADER_UUID: &str = "x-ownworld-uuid";
/// Header carrying the requester signature on authenticated GETs.
pub const HEADER_SIGNATURE: &str = "x-ownworld-signature";

#[derive(Debug, Deserialize)]
struct ScoreBody {
    score: f64,
}

/// HTTP client for the `/federation/*` surface of other nodes.
pub struct FederationClient {
    http: reqwest::Client,
}

impl FederationClient {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .build()?;
        Ok(Self { http })
    }

    async fn post_sealed<T: serde::Serialize>(
        &self,
        url: String,
        msg: &T,
        timeout: Duration,
    ) -> Result<reqwest::Response> {
        let body = ownworld_wire::seal_json(msg)?;
        let response = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, ownworld_wire::CONTENT_TYPE)
            .body(body)
            .timeout(timeout)
            .send()
            .await?;
        Ok(response)
    }

    /// Introduce ourselves to a peer. Returns the peer's own identity so it
    /// can be pinned symmetrically.
    pub async fn handshake(&self, base: &str, req: &HandshakeRequest) -> Result<HandshakeAck> {
        let response = self
            .post_sealed(format!("{}/federation/handshake", base), req, HANDSHAKE_TIMEOUT)
            .await?;
        if !response.status().is_success() {
            return Err(Error::Http(format!(
                "handshake to {} rejected: {}",
                base,
                response.status()
            )));
        }
        let bytes = response.bytes().await?;
        Ok(ownworld_wire::open_json(&bytes)?)
    }

    pub async fn send_heartbeat(&self, base: &str, heartbeat: &Heartbeat) -> Result<()> {
        let response = self
            .post_sealed(format!("{}/federation/heartbeat", base), heartbeat, HEARTBEAT_TIMEOUT)
            .await?;
        if !response.status().is_success() {
            return Err(Error::Http(format!(
                "heartbeat to {} rejected: {}",
                base,
                response.status()
            )));
        }
        Ok(())
    }

    pub async fn announce_ledger(&self, base: &str, announce: &LedgerAnnounce) -> Result<()> {
        let response = self
            .post_sealed(format!("{}/federation/ledger", base), announce, HEARTBEAT_TIMEOUT)
            .await?;
        if !response.status().is_success() {
            return Err(Error::Http(format!(
                "ledger announce to {} rejected: {}",
                base,
                response.status()
            )));
        }
        Ok(())
    }

    /// Ask a peer for its opinion of `target`. Unreachable or malformed
    /// responses yield `None`, which aggregation treats as neutral.
    pub async fn fetch_reputation(
        &self,
        base: &str,
        target: &str,
        self_uuid: &str,
        signature: &str,
    ) -> Option<f64> {
        let response = self
            .http
            .get(format!("{}/federation/reputation", base))
            .query(&[("uuid", target)])
            .header(HEADER_UUID, self_uuid)
            .header(HEADER_SIGNATURE, signature)
            .timeout(REPUTATION_TIMEOUT)
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let body: ScoreBody = response.json().await.ok()?;
        body.score.is_finite().then_some(body.score)
    }

    /// Fetch one page of daily snapshots.
    pub async fn fetch_snapshots(
        &self,
        base: &str,
        since_day: u64,
        limit: u64,
        self_uuid: &str,
        signature: &str,
    ) -> Result<SnapshotPage> {
        let response = self
            .http
            .get(format!("{}/federation/sync", base))
            .query(&[("since_day", since_day), ("limit", limit)])
            .header(HEADER_UUID, self_uuid)
            .header(HEADER_SIGNATURE, signature)
            .timeout(SNAPSHOT_TIMEOUT)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::Http(format!(
                "snapshot sync from {} rejected: {}",
                base,
                response.status()
            )));
        }
        let bytes = response.bytes().await?;
        Ok(ownworld_wire::open_json(&bytes)?)
    }
}
