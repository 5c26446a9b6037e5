//! OwnWorld node binary
//!
//! A federated simulation server: equal peers advance a shared world in
//! lock-step and police each other with signatures, hash chains, and local
//! reputation.

use ownworld_node::{NodeConfig, OwnWorldNode};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ownworld_node=info,ownworld=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting OwnWorld node");

    let config = NodeConfig::from_env();

    // Identity or storage failure here is fatal: without its identity the
    // node cannot participate in the federation safely.
    let node = OwnWorldNode::new(config)?;
    node.run().await?;

    Ok(())
}
