//! wst client - tunnel client component.
//!
//! Accepts local TCP connections and carries each one to the tunnel server
//! over its own authenticated WebSocket.

mod config;
mod tunnel;

use anyhow::Result;
use clap::Parser;
use config::ClientConfig;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use wst_core::shutdown::{GracefulShutdown, DEFAULT_SHUTDOWN_TIMEOUT_SECS};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse configuration
    let config = ClientConfig::parse();

    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(if config.debug {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .with_target(false)
        .init();

    info!("Starting wst-client v{}", env!("CARGO_PKG_VERSION"));
    config.validate()?;

    let shutdown = GracefulShutdown::new(DEFAULT_SHUTDOWN_TIMEOUT_SECS);
    let listener = tunnel::run_listener(Arc::new(config), shutdown.signal());

    tokio::select! {
        result = listener => result?,
        _ = shutdown.wait_for_signal() => {}
    }

    if !shutdown.shutdown().await {
        warn!("Exiting with connections still open");
    }
    info!("Client stopped");
    Ok(())
}
