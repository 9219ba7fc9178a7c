//! Wire-level types shared by the client and the server.
//!
//! Every WebSocket message on a tunnel leg is binary:
//! - handshake: 64 random bytes, sent once by each side;
//! - data: `payload ∥ 64-byte tag`, one message per TCP read.

use std::fmt;
use uuid::Uuid;

/// Size of a relayed TCP read.
pub const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Path of the tunnel endpoint on the server.
pub const WS_PATH: &str = "/ws";

/// Unique identifier for a tunneled connection, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Generate a new random connection ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First 8 characters, enough to tell connections apart in logs.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A WebSocket message as seen by the relay.
///
/// Both WebSocket libraries used by the binaries convert into this type, so
/// the relay does not depend on either of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsFrame {
    /// Handshake or authenticated data.
    Binary(Vec<u8>),
    /// Text is never valid on a tunnel leg.
    Text,
    /// Ping, pong and raw frames; ignored.
    Control,
    /// The peer closed the leg.
    Close,
}
