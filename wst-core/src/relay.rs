//! Per-connection handshake and byte pump.
//!
//! A [`Connection`] pairs one [`Codec`] with one [`SocketTiming`]. The
//! binaries create it when a connection arrives, use it to bound dialing the
//! other leg, then hand it both legs with [`Connection::run`]. It is driven
//! by a single task, so the codec is never shared.

use crate::codec::{Codec, Role};
use crate::config::TimingConfig;
use crate::error::{CodecError, TunnelError, TunnelResult};
use crate::protocol::{ConnectionId, WsFrame, READ_BUFFER_SIZE};
use crate::timing::{Scope, SocketTiming};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::future::Future;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// One tunneled connection: codec, scopes and an id for logging.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    codec: Codec,
    timing: SocketTiming,
}

impl Connection {
    /// Create the connection state; fails on an empty secret.
    pub fn new(
        role: Role,
        secret: &str,
        config: TimingConfig,
        shutdown: &CancellationToken,
    ) -> Result<Self, CodecError> {
        Ok(Self {
            id: ConnectionId::new(),
            codec: Codec::new(role, secret)?,
            timing: SocketTiming::new(config, shutdown),
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Dial the other leg under the connect scope.
    pub async fn connect<F, T, E>(&self, external: &CancellationToken, dial: F) -> TunnelResult<T>
    where
        F: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let scope = self.timing.connect_scope(external);
        match scope.run(dial).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(TunnelError::connection(format!("connect failed: {}", e))
                .with_cause(e)
                .with_context("conn", self.id.short())),
            Err(_) if external.is_cancelled() => {
                Err(TunnelError::cancelled("connect cancelled").with_context("conn", self.id.short()))
            }
            Err(_) => Err(self.scope_error("connect")),
        }
    }

    /// Run the handshake, then relay until either side closes or fails.
    pub async fn run<T, Tx, Rx>(mut self, tcp: T, ws_tx: Tx, ws_rx: Rx) -> TunnelResult<()>
    where
        T: AsyncRead + AsyncWrite + Unpin,
        Tx: Sink<WsFrame, Error = TunnelError>,
        Rx: Stream<Item = TunnelResult<WsFrame>>,
    {
        let mut ws_tx = std::pin::pin!(ws_tx);
        let mut ws_rx = std::pin::pin!(ws_rx);
        let (mut tcp_rd, mut tcp_wr) = tokio::io::split(tcp);

        self.handshake(&mut ws_tx, &mut ws_rx).await?;
        debug!(conn = %self.id.short(), "handshake complete");

        let result = self
            .pump(&mut tcp_rd, &mut tcp_wr, &mut ws_tx, &mut ws_rx)
            .await;
        self.timing.cancel();
        result
    }

    async fn handshake<Tx, Rx>(&mut self, ws_tx: &mut Tx, ws_rx: &mut Rx) -> TunnelResult<()>
    where
        Tx: Sink<WsFrame, Error = TunnelError> + Unpin,
        Rx: Stream<Item = TunnelResult<WsFrame>> + Unpin,
    {
        let mut buf = [0u8; Codec::TAG_SIZE];
        let hello = self.codec.begin_handshake(&mut buf)?.to_vec();
        self.send_ws(ws_tx, WsFrame::Binary(hello)).await?;

        loop {
            let scope = self.timing.idle_scope();
            let next = scope
                .run(ws_rx.next())
                .await
                .map_err(|_| self.scope_error("handshake"))?;

            match next {
                Some(Ok(WsFrame::Binary(msg))) => {
                    self.codec.complete_handshake(&msg)?;
                    return Ok(());
                }
                Some(Ok(WsFrame::Control)) => continue,
                Some(Ok(WsFrame::Text)) => {
                    return Err(TunnelError::protocol("text message during handshake"));
                }
                Some(Ok(WsFrame::Close)) | None => {
                    return Err(TunnelError::connection("closed during handshake"));
                }
                Some(Err(e)) => return Err(e),
            }
        }
    }

    async fn pump<R, W, Tx, Rx>(
        &mut self,
        tcp_rd: &mut R,
        tcp_wr: &mut W,
        ws_tx: &mut Tx,
        ws_rx: &mut Rx,
    ) -> TunnelResult<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
        Tx: Sink<WsFrame, Error = TunnelError> + Unpin,
        Rx: Stream<Item = TunnelResult<WsFrame>> + Unpin,
    {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut tcp_open = true;
        // Set once the TCP side has closed; bounds how long we keep
        // delivering what the peer still has in flight.
        let mut drain: Option<Scope> = None;

        loop {
            let idle = self.timing.idle_scope();
            let lingering = async {
                match &drain {
                    Some(scope) => scope.cancelled().await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = idle.cancelled() => {
                    return Err(self.scope_error("idle"));
                }
                _ = lingering => {
                    debug!(conn = %self.id.short(), "linger delay elapsed");
                    return Ok(());
                }
                read = tcp_rd.read(&mut buf), if tcp_open => {
                    let n = read?;
                    if n == 0 {
                        trace!(conn = %self.id.short(), "tcp side closed");
                        tcp_open = false;
                        self.send_ws(ws_tx, WsFrame::Close).await?;
                    } else {
                        let wire = self.codec.authenticate(buf[..n].to_vec())?;
                        self.send_ws(ws_tx, WsFrame::Binary(wire)).await?;
                    }
                }
                next = ws_rx.next() => {
                    match next {
                        Some(Ok(WsFrame::Binary(msg))) => {
                            let payload = self.codec.verify(msg)?;
                            self.write_tcp(tcp_wr, &payload).await?;
                        }
                        Some(Ok(WsFrame::Control)) => {}
                        Some(Ok(WsFrame::Text)) => {
                            return Err(TunnelError::protocol("unexpected text message"));
                        }
                        Some(Ok(WsFrame::Close)) | None => {
                            trace!(conn = %self.id.short(), "websocket side closed");
                            self.shutdown_tcp(tcp_wr).await;
                            self.linger().await;
                            return Ok(());
                        }
                        Some(Err(e)) => return Err(e),
                    }
                }
            }

            if !tcp_open && drain.is_none() {
                drain = Some(self.timing.scope(self.timing.linger_delay()));
            }
        }
    }

    /// Half-close the TCP side. The peer may already be gone, so failures
    /// only end the write direction early.
    async fn shutdown_tcp<W>(&self, tcp_wr: &mut W)
    where
        W: AsyncWrite + Unpin,
    {
        let scope = self.timing.send_scope();
        match scope.run(tcp_wr.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => trace!(conn = %self.id.short(), "tcp shutdown failed: {}", e),
            Err(_) => trace!(conn = %self.id.short(), "tcp shutdown timed out"),
        }
    }

    /// Keep the half-closed socket around so in-flight bytes can drain.
    async fn linger(&self) {
        let scope = self.timing.scope(self.timing.linger_delay());
        scope.cancelled().await;
    }

    async fn send_ws<Tx>(&self, ws_tx: &mut Tx, frame: WsFrame) -> TunnelResult<()>
    where
        Tx: Sink<WsFrame, Error = TunnelError> + Unpin,
    {
        let scope = self.timing.send_scope();
        scope
            .run(ws_tx.send(frame))
            .await
            .map_err(|_| self.scope_error("websocket send"))?
    }

    async fn write_tcp<W>(&self, tcp_wr: &mut W, data: &[u8]) -> TunnelResult<()>
    where
        W: AsyncWrite + Unpin,
    {
        let scope = self.timing.send_scope();
        scope
            .run(tcp_wr.write_all(data))
            .await
            .map_err(|_| self.scope_error("tcp write"))??;
        Ok(())
    }

    /// A fired scope means shutdown if the master went down, else a timeout.
    fn scope_error(&self, what: &str) -> TunnelError {
        let err = if self.timing.is_cancelled() {
            TunnelError::cancelled(format!("{} cancelled", what))
        } else {
            TunnelError::timeout(format!("{} timed out", what))
        };
        err.with_context("conn", self.id.short())
    }
}
