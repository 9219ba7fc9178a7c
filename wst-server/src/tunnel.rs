//! WebSocket endpoint and the per-connection TCP leg.

use crate::config::ServerConfig;
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures_util::{future, SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, info_span, warn, Instrument};
use wst_core::error::ResultExt;
use wst_core::protocol::WS_PATH;
use wst_core::{
    Connection, ErrorCategory, Role, ShutdownSignal, TunnelError, TunnelResult, WsFrame,
};

/// Shared state for the handlers.
#[derive(Clone)]
struct ServerState {
    config: Arc<ServerConfig>,
    shutdown: ShutdownSignal,
}

/// Serve the tunnel endpoint on `listener` until shutdown.
pub async fn serve(
    listener: TcpListener,
    config: Arc<ServerConfig>,
    shutdown: ShutdownSignal,
) -> Result<()> {
    info!("Listening on {}", listener.local_addr()?);
    info!("Forwarding to {}", config.target);

    let token = shutdown.token().clone();
    let app = router(ServerState { config, shutdown });

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { token.cancelled().await })
    .await?;
    Ok(())
}

fn router(state: ServerState) -> Router {
    Router::new()
        .route(WS_PATH, get(websocket_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<ServerState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "Shutting down").into_response();
    }

    let conn = match Connection::new(
        Role::WsListener,
        &state.config.key,
        state.config.timing(),
        state.shutdown.token(),
    ) {
        Ok(conn) => conn,
        Err(e) => {
            error!("Cannot create connection: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Misconfigured").into_response();
        }
    };

    let span = info_span!("conn", id = %conn.id().short(), %peer);
    let guard = state.shutdown.register_connection();

    ws.on_upgrade(move |socket| {
        async move {
            let _guard = guard;
            debug!("WebSocket accepted");
            match handle_connection(conn, socket, &state).await {
                Ok(()) => debug!("Connection closed"),
                Err(e) if e.is_quiet() => debug!("Connection ended: {}", e),
                Err(e) => warn!("Connection failed: {}", e),
            }
        }
        .instrument(span)
    })
}

/// Open the TCP leg for one WebSocket and relay until done.
async fn handle_connection(
    conn: Connection,
    socket: WebSocket,
    state: &ServerState,
) -> TunnelResult<()> {
    let target = state.config.target.as_str();
    let stream = conn
        .connect(state.shutdown.token(), TcpStream::connect(target))
        .await?;
    stream.set_nodelay(true)?;
    debug!("Connected to target {}", target);

    let (ws_tx, ws_rx) = socket.split();
    let ws_tx = ws_tx
        .sink_map_err(|e| TunnelError::connection("websocket send failed").with_cause(e))
        .with(|frame: WsFrame| future::ready(Ok::<_, TunnelError>(to_message(frame))));
    let ws_rx = ws_rx.map(inbound);

    conn.run(stream, ws_tx, ws_rx).await
}

fn to_message(frame: WsFrame) -> WsMessage {
    match frame {
        WsFrame::Binary(data) => WsMessage::Binary(data),
        WsFrame::Close => WsMessage::Close(None),
        WsFrame::Text => WsMessage::Text(String::new()),
        WsFrame::Control => WsMessage::Pong(Vec::new()),
    }
}

fn inbound(msg: Result<WsMessage, axum::Error>) -> TunnelResult<WsFrame> {
    msg.map(from_message).with_category(ErrorCategory::Connection)
}

fn from_message(msg: WsMessage) -> WsFrame {
    match msg {
        WsMessage::Binary(data) => WsFrame::Binary(data),
        WsMessage::Text(_) => WsFrame::Text,
        WsMessage::Close(_) => WsFrame::Close,
        WsMessage::Ping(_) | WsMessage::Pong(_) => WsFrame::Control,
    }
}
