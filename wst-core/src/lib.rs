//! Core of the wst tunnel: authenticated framing and per-connection plumbing.
//!
//! This crate provides the functionality shared by the tunnel client and
//! server: the HMAC-chained message codec, cancellation scopes, the relay
//! that moves bytes between a TCP socket and a WebSocket, and shutdown
//! coordination.

pub mod auth;
pub mod codec;
pub mod config;
pub mod error;
pub mod frame;
pub mod protocol;
pub mod relay;
pub mod shutdown;
pub mod timing;

pub use codec::{Codec, CodecState, Role};
pub use config::{TimingArgs, TimingConfig};
pub use error::{CodecError, ErrorCategory, TunnelError, TunnelResult};
pub use protocol::{ConnectionId, WsFrame};
pub use relay::Connection;
pub use shutdown::{GracefulShutdown, ShutdownSignal};
pub use timing::{Scope, SocketTiming};
