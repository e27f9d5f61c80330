//! # crdtsync agent
//!
//! Hosts the configured CRDT instances, reconciles them with every peer on
//! a fixed interval, and snapshots them to `SQLite`.

use anyhow::Result;
use crdtsync_agent::{Agent, AgentConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting crdtsync agent");

    let config = AgentConfig::from_env()?;
    tracing::info!(replica = %config.replica_id, "Configuration loaded");

    let agent = Agent::new(config)?;
    agent.run().await?;

    Ok(())
}
