//! Client configuration.

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio_tungstenite::tungstenite::http::Uri;
use wst_core::config::{TimingArgs, TimingConfig};
use wst_core::protocol::WS_PATH;

/// wst client - forward local TCP connections over authenticated WebSockets.
#[derive(Parser, Debug, Clone)]
#[command(name = "wst-client")]
#[command(author, version, about, long_about = None)]
pub struct ClientConfig {
    /// Local address to accept TCP connections on
    #[arg(short, long, env = "WST_LISTEN", default_value = "127.0.0.1:1080")]
    pub listen: String,

    /// Tunnel server address (host:port or ws(s)://host:port)
    #[arg(short, long, env = "WST_SERVER", default_value = "localhost:8080")]
    pub server: String,

    /// Use TLS when the server is given as host:port
    #[arg(long, env = "WST_TLS")]
    pub tls: bool,

    /// Shared secret; must match the server
    #[arg(short, long, env = "WST_KEY", hide_env_values = true)]
    pub key: String,

    #[command(flatten)]
    pub timing: TimingArgs,

    /// Enable debug logging
    #[arg(long, env = "WST_DEBUG")]
    pub debug: bool,
}

impl ClientConfig {
    /// Get the WebSocket URL for the tunnel server.
    pub fn ws_url(&self) -> String {
        let server = &self.server;

        if server.starts_with("ws://") || server.starts_with("wss://") {
            let base = server.trim_end_matches('/');
            if base.ends_with(WS_PATH) {
                return base.to_string();
            }
            return format!("{}{}", base, WS_PATH);
        }

        let scheme = if self.tls { "wss" } else { "ws" };
        format!("{}://{}{}", scheme, server, WS_PATH)
    }

    pub fn timing(&self) -> TimingConfig {
        self.timing.timing()
    }

    /// Local bind address, without an optional `tcp://` prefix.
    pub fn listen_addr(&self) -> &str {
        self.listen.strip_prefix("tcp://").unwrap_or(&self.listen)
    }

    /// Reject settings that would make every connection fail.
    pub fn validate(&self) -> Result<()> {
        if self.key.is_empty() {
            bail!("a shared key is required (--key or WST_KEY)");
        }

        if let Some((scheme, _)) = self.listen.split_once("://") {
            if scheme != "tcp" {
                bail!(
                    "listen address must be tcp://host:port or host:port, got {}",
                    self.listen
                );
            }
        }
        let valid_listen = self
            .listen_addr()
            .rsplit_once(':')
            .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
        if !valid_listen {
            bail!("invalid listen address: {}", self.listen);
        }

        if let Some((scheme, _)) = self.server.split_once("://") {
            if scheme != "ws" && scheme != "wss" {
                bail!("server must be ws://, wss:// or host:port, got {}", self.server);
            }
        }
        let uri: Uri = self
            .ws_url()
            .parse()
            .with_context(|| format!("invalid server address: {}", self.server))?;
        if uri.host().map_or(true, str::is_empty) {
            bail!("server address has no host: {}", self.server);
        }

        Ok(())
    }
}
