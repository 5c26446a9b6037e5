//! Shared fixtures for unit tests.

use crate::client::FederationClient;
use crate::config::NodeConfig;
use crate::context::{now_ms, Action, NodeContext};
use crate::identity::NodeIdentity;
use crate::immigration;
use crate::registry::{Peer, Relation};
use crate::simulation::BaselineWorld;
use ed25519_dalek::SigningKey;
use ownworld_store::Store;
use ownworld_wire::HandshakeRequest;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A fresh in-memory node context plus the raw channel ends, for tests that
/// observe queued work.
pub(crate) async fn test_node_parts<F: FnOnce(&mut NodeConfig)>(
    configure: F,
) -> (
    Arc<NodeContext>,
    mpsc::Receiver<HandshakeRequest>,
    mpsc::UnboundedReceiver<Action>,
) {
    let mut config = NodeConfig::from_lookup(|_| None);
    configure(&mut config);

    let store = Store::in_memory().unwrap();
    let identity = NodeIdentity::load_or_create(&store).unwrap();
    let client = FederationClient::new().unwrap();
    let (queue, immigration_rx) = immigration::channel();
    let (ctx, actions_rx) = NodeContext::new(
        config,
        identity,
        store,
        client,
        queue,
        Box::new(BaselineWorld::new()),
    )
    .unwrap();
    (ctx, immigration_rx, actions_rx)
}

/// A context with both queues silently drained.
pub(crate) async fn test_context_with<F: FnOnce(&mut NodeConfig)>(configure: F) -> Arc<NodeContext> {
    let (ctx, mut immigration_rx, mut actions_rx) = test_node_parts(configure).await;
    tokio::spawn(async move { while immigration_rx.recv().await.is_some() {} });
    tokio::spawn(async move { while actions_rx.recv().await.is_some() {} });
    ctx
}

pub(crate) async fn test_context() -> Arc<NodeContext> {
    test_context_with(|_| {}).await
}

/// Insert a federated peer directly and return its signing key, so tests
/// can produce messages under the pinned identity.
pub(crate) async fn admit_test_peer(ctx: &NodeContext, uuid: &str) -> SigningKey {
    let key = SigningKey::generate(&mut rand::thread_rng());
    ctx.registry
        .add(Peer {
            uuid: uuid.to_string(),
            url: format!("http://{}.invalid:8080", uuid),
            public_key: key.verifying_key(),
            genesis_hash: ctx.identity.genesis_hash().to_string(),
            last_tick: 0,
            last_hash: String::new(),
            last_seen: now_ms(),
            peer_count: 0,
            reputation: 0.0,
            relation: Relation::Federated,
        })
        .await;
    key
}
