//! TCP accept loop and the per-connection WebSocket leg.
//!
//! Every accepted socket gets its own WebSocket to the server; nothing is
//! multiplexed. The connection is torn down as soon as either leg fails.

use crate::config::ClientConfig;
use anyhow::Result;
use futures_util::{future, SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{protocol::Message as TungsteniteMessage, Error as WsError};
use tracing::{debug, info, info_span, warn, Instrument};
use wst_core::error::ResultExt;
use wst_core::{
    Connection, ErrorCategory, Role, ShutdownSignal, TunnelError, TunnelResult, WsFrame,
};

/// Accept local TCP connections until shutdown.
pub async fn run_listener(config: Arc<ClientConfig>, shutdown: ShutdownSignal) -> Result<()> {
    let listener = TcpListener::bind(config.listen_addr()).await?;
    let url = config.ws_url();
    info!("Listening on {}", listener.local_addr()?);
    info!("Tunneling to {}", url);

    loop {
        tokio::select! {
            _ = shutdown.token().cancelled() => {
                info!("Listener stopped");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (socket, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        continue;
                    }
                };

                let conn = Connection::new(
                    Role::TcpListener,
                    &config.key,
                    config.timing(),
                    shutdown.token(),
                )?;
                let span = info_span!("conn", id = %conn.id().short(), %peer);
                let guard = shutdown.register_connection();
                let url = url.clone();
                let shutdown = shutdown.clone();

                tokio::spawn(
                    async move {
                        let _guard = guard;
                        debug!("Accepted connection");
                        match handle_connection(conn, socket, &url, &shutdown).await {
                            Ok(()) => debug!("Connection closed"),
                            Err(e) if e.is_quiet() => debug!("Connection ended: {}", e),
                            Err(e) => warn!("Connection failed: {}", e),
                        }
                    }
                    .instrument(span),
                );
            }
        }
    }
}

/// Open the WebSocket leg for one accepted socket and relay until done.
async fn handle_connection(
    conn: Connection,
    socket: TcpStream,
    url: &str,
    shutdown: &ShutdownSignal,
) -> TunnelResult<()> {
    socket.set_nodelay(true)?;

    let (ws_stream, _) = conn.connect(shutdown.token(), connect_async(url)).await?;
    debug!("WebSocket connected");

    let (ws_tx, ws_rx) = ws_stream.split();
    let ws_tx = ws_tx
        .sink_map_err(|e| TunnelError::connection("websocket send failed").with_cause(e))
        .with(|frame: WsFrame| future::ready(Ok::<_, TunnelError>(to_message(frame))));
    let ws_rx = ws_rx.map(inbound);

    conn.run(socket, ws_tx, ws_rx).await
}

fn to_message(frame: WsFrame) -> TungsteniteMessage {
    match frame {
        WsFrame::Binary(data) => TungsteniteMessage::Binary(data),
        WsFrame::Close => TungsteniteMessage::Close(None),
        WsFrame::Text => TungsteniteMessage::Text(String::new()),
        WsFrame::Control => TungsteniteMessage::Pong(Vec::new()),
    }
}

fn inbound(msg: Result<TungsteniteMessage, WsError>) -> TunnelResult<WsFrame> {
    msg.map(from_message).with_category(ErrorCategory::Connection)
}

fn from_message(msg: TungsteniteMessage) -> WsFrame {
    match msg {
        TungsteniteMessage::Binary(data) => WsFrame::Binary(data),
        TungsteniteMessage::Text(_) => WsFrame::Text,
        TungsteniteMessage::Close(_) => WsFrame::Close,
        TungsteniteMessage::Ping(_) | TungsteniteMessage::Pong(_) | TungsteniteMessage::Frame(_) => {
            WsFrame::Control
        }
    }
}
