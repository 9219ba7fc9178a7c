//! wst server - tunnel server component.
//!
//! Accepts authenticated WebSockets from wst clients and relays each one to
//! the configured TCP target.

mod config;
mod tunnel;

use anyhow::Result;
use clap::Parser;
use config::ServerConfig;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use wst_core::GracefulShutdown;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse configuration
    let config = ServerConfig::parse();

    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(if config.debug {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .with_target(true)
        .with_thread_ids(true)
        .init();

    info!("Starting wst-server v{}", env!("CARGO_PKG_VERSION"));
    config.validate()?;

    let shutdown = GracefulShutdown::new(config.shutdown_timeout);
    let listener = TcpListener::bind(&config.listen).await?;
    let server = tunnel::serve(listener, Arc::new(config), shutdown.signal());

    tokio::select! {
        result = server => result?,
        _ = shutdown.wait_for_signal() => {}
    }

    if !shutdown.shutdown().await {
        warn!("Exiting with connections still open");
    }
    info!("Server stopped");
    Ok(())
}
