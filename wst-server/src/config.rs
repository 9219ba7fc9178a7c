//! Server configuration.

use clap::Parser;
use wst_core::config::{TimingArgs, TimingConfig};
use wst_core::shutdown::DEFAULT_SHUTDOWN_TIMEOUT_SECS;

/// wst server - accept authenticated WebSockets and relay them to a TCP target.
#[derive(Parser, Debug, Clone)]
#[command(name = "wst-server")]
#[command(author, version, about, long_about = None)]
pub struct ServerConfig {
    /// Address to serve the WebSocket endpoint on
    #[arg(short, long, env = "WST_LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: String,

    /// TCP address every tunneled connection is forwarded to
    #[arg(short, long, env = "WST_TARGET")]
    pub target: String,

    /// Shared secret; must match the client
    #[arg(short, long, env = "WST_KEY", hide_env_values = true)]
    pub key: String,

    /// Seconds to wait for open connections on shutdown
    #[arg(long, env = "WST_SHUTDOWN_TIMEOUT", default_value_t = DEFAULT_SHUTDOWN_TIMEOUT_SECS)]
    pub shutdown_timeout: u64,

    #[command(flatten)]
    pub timing: TimingArgs,

    /// Enable debug logging
    #[arg(long, env = "WST_DEBUG")]
    pub debug: bool,
}

impl ServerConfig {
    pub fn timing(&self) -> TimingConfig {
        self.timing.timing()
    }

    /// Reject settings that would make every connection fail.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.key.is_empty() {
            anyhow::bail!("a shared key is required (--key or WST_KEY)");
        }
        if self.target.is_empty() {
            anyhow::bail!("a target address is required (--target or WST_TARGET)");
        }
        Ok(())
    }
}
