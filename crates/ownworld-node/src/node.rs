//! OwnWorld node: wiring and lifecycle.
//!
//! One daemon process running, concurrently: the tick loop, the heartbeat
//! timer, the immigration worker, the deferred-action worker, and the axum
//! ingress pool. All shared state lives in [`NodeContext`].

use crate::client::FederationClient;
use crate::config::NodeConfig;
use crate::context::{self, Action, NodeContext};
use crate::error::Result;
use crate::federation;
use crate::heartbeat;
use crate::identity::NodeIdentity;
use crate::immigration;
use crate::scheduler;
use crate::simulation::{BaselineWorld, Simulation};
use ownworld_store::Store;
use ownworld_wire::HandshakeRequest;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A federation node instance.
pub struct OwnWorldNode {
    ctx: Arc<NodeContext>,
    immigration_rx: mpsc::Receiver<HandshakeRequest>,
    actions_rx: mpsc::UnboundedReceiver<Action>,
}

impl OwnWorldNode {
    /// Create a node with the deterministic baseline world.
    pub fn new(config: NodeConfig) -> Result<Self> {
        Self::with_world(config, Box::new(BaselineWorld::new()))
    }

    /// Create a node around an externally supplied simulation.
    pub fn with_world(config: NodeConfig, world: Box<dyn Simulation>) -> Result<Self> {
        let store = Store::open(&config.database_file)?;
        let identity = NodeIdentity::load_or_create(&store)?;
        let client = FederationClient::new()?;
        let (queue, immigration_rx) = immigration::channel();
        let (ctx, actions_rx) = NodeContext::new(config, identity, store, client, queue, world)?;
        Ok(Self { ctx, immigration_rx, actions_rx })
    }

    /// Shared context (for embedding and tests).
    pub fn context(&self) -> Arc<NodeContext> {
        Arc::clone(&self.ctx)
    }

    /// Run the node: background engines plus the HTTP server.
    pub async fn run(self) -> Result<()> {
        let ctx = self.ctx;

        tracing::info!(uuid = %ctx.identity.uuid(), "OwnWorld node starting");
        tracing::info!("  HTTP: http://{}", ctx.config.bind_addr);
        tracing::info!("  Public URL: {}", ctx.config.public_url);
        tracing::info!("  Database: {:?}", ctx.config.database_file);
        tracing::info!(
            "  Mode: {:?}, command-control: {}",
            ctx.config.peering_mode,
            ctx.config.command_control
        );

        // A genesis node (empty seed list) is immediately its own leader at
        // phase offset zero.
        ctx.recalc_leader().await;

        context::spawn_action_worker(Arc::clone(&ctx), self.actions_rx);
        immigration::spawn_worker(Arc::clone(&ctx), self.immigration_rx);
        heartbeat::spawn_heartbeat_timer(Arc::clone(&ctx));
        tokio::spawn(scheduler::run_tick_loop(Arc::clone(&ctx)));

        for seed in ctx.config.seed_nodes.clone() {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move {
                join_via_seed(&ctx, &seed).await;
            });
        }

        let app = federation::build_router(Arc::clone(&ctx));
        let listener = tokio::net::TcpListener::bind(ctx.config.bind_addr).await?;
        tracing::info!("HTTP server listening on {}", ctx.config.bind_addr);

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;

        Ok(())
    }
}

/// Handshake with a seed node and enqueue its identity for admission.
async fn join_via_seed(ctx: &NodeContext, seed: &str) {
    match ctx.client.handshake(seed, &ctx.handshake_request()).await {
        Ok(ack) => {
            tracing::info!(seed = %seed, uuid = %ack.uuid, "seed node answered handshake");
            let req = HandshakeRequest {
                uuid: ack.uuid,
                genesis_hash: ack.genesis_hash,
                public_key: ack.public_key,
                address: ack.address,
            };
            if ctx.immigration.try_enqueue(req).is_err() {
                tracing::warn!(seed = %seed, "immigration queue full, seed dropped");
            }
        }
        Err(e) => {
            tracing::warn!(seed = %seed, error = %e, "seed handshake failed");
        }
    }
}
