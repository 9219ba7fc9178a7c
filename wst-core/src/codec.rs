//! Authenticated message codec.
//!
//! Each tunnel leg owns one [`Codec`]. After a handshake both ends hold two
//! chain accumulators: `auth` for what they send and `verify` for what they
//! receive. Every message carries a tag equal to
//! `HMAC(key, payload ∥ previous accumulator)`, which then becomes the new
//! accumulator. Reordering, dropping or replaying a message breaks the chain
//! for the rest of the connection.
//!
//! The handshake message is 64 random bytes. Only its length is checked;
//! its contents are not mixed into the accumulators.

use crate::auth::{constant_time_eq, derive_key, fill_random, hmac, Digest64, HASH_SIZE};
use crate::error::CodecError;
use crate::frame::Frame;
use tracing::trace;

/// Which end of the tunnel a codec sits on.
///
/// The two role bytes are bitwise complements of each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Role {
    /// Accepts TCP connections and dials the WebSocket (client).
    TcpListener = 0x01,
    /// Accepts WebSockets and dials the TCP target (server).
    WsListener = 0xFE,
}

impl Role {
    pub fn byte(self) -> u8 {
        self as u8
    }

    /// The role of the opposite end.
    pub fn peer(self) -> Role {
        match self {
            Role::TcpListener => Role::WsListener,
            Role::WsListener => Role::TcpListener,
        }
    }
}

/// Codec lifecycle. `Error` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecState {
    Init,
    Handshake,
    Active,
    Error,
}

/// Per-connection authentication state machine.
pub struct Codec {
    key: Digest64,
    role: u8,
    auth: Digest64,
    verify: Digest64,
    scratch: Digest64,
    state: CodecState,
}

impl std::fmt::Debug for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codec")
            .field("role", &self.role)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Codec {
    /// Size of the handshake message and of every tag.
    pub const TAG_SIZE: usize = HASH_SIZE;

    /// Create a codec for `role`, keyed by `secret`.
    pub fn new(role: Role, secret: &str) -> Result<Self, CodecError> {
        Self::with_role_byte(role.byte(), secret)
    }

    /// Create a codec with an arbitrary role byte.
    pub fn with_role_byte(role: u8, secret: &str) -> Result<Self, CodecError> {
        if secret.is_empty() {
            return Err(CodecError::Configuration("key required".to_string()));
        }

        Ok(Self {
            key: derive_key(secret),
            role,
            auth: [0u8; HASH_SIZE],
            verify: [0u8; HASH_SIZE],
            scratch: [0u8; HASH_SIZE],
            state: CodecState::Init,
        })
    }

    pub fn state(&self) -> CodecState {
        self.state
    }

    /// Fill the front of `buf` with a random handshake message and return it.
    pub fn begin_handshake<'b>(&mut self, buf: &'b mut [u8]) -> Result<&'b [u8], CodecError> {
        let result = self.transition(CodecState::Init, CodecState::Handshake).and_then(|()| {
            if buf.len() < Self::TAG_SIZE {
                return Err(CodecError::Protocol(format!(
                    "handshake buffer too small: {} < {}",
                    buf.len(),
                    Self::TAG_SIZE
                )));
            }
            Ok(())
        });
        self.guard(result)?;

        let msg = &mut buf[..Self::TAG_SIZE];
        fill_random(msg);
        Ok(msg)
    }

    /// Accept the peer's handshake message and seed both accumulators.
    pub fn complete_handshake(&mut self, msg: &[u8]) -> Result<(), CodecError> {
        let result = self.seed(msg);
        self.guard(result)
    }

    /// Append a chained tag to an outbound payload.
    pub fn authenticate(&mut self, payload: Vec<u8>) -> Result<Vec<u8>, CodecError> {
        let result = self
            .check_state(CodecState::Active)
            .and_then(|()| self.auth_msg(payload));
        self.guard(result)
    }

    /// Check and strip the tag of an inbound message.
    pub fn verify(&mut self, msg: Vec<u8>) -> Result<Vec<u8>, CodecError> {
        let result = self
            .check_state(CodecState::Active)
            .and_then(|()| self.verify_msg(msg));
        self.guard(result)
    }

    fn seed(&mut self, msg: &[u8]) -> Result<(), CodecError> {
        self.transition(CodecState::Handshake, CodecState::Active)?;

        if msg.len() != Self::TAG_SIZE {
            return Err(CodecError::Protocol(
                "wrong size for init handshake message".to_string(),
            ));
        }

        // Both right-hand sides read the accumulators before either is replaced.
        let auth = hmac(&self.key, &[&[self.role][..], &self.auth[..], &self.verify[..]])?;
        let verify = hmac(&self.key, &[&[!self.role][..], &self.verify[..], &self.auth[..]])?;
        self.auth = auth;
        self.verify = verify;

        trace!(role = self.role, "handshake complete");
        Ok(())
    }

    fn auth_msg(&mut self, mut payload: Vec<u8>) -> Result<Vec<u8>, CodecError> {
        let mut frame = Frame::extend(&mut payload, Self::TAG_SIZE);

        frame.tag_mut().copy_from_slice(&self.auth);
        self.auth = hmac(&self.key, &[frame.complete()])?;
        frame.tag_mut().copy_from_slice(&self.auth);

        Ok(payload)
    }

    fn verify_msg(&mut self, mut msg: Vec<u8>) -> Result<Vec<u8>, CodecError> {
        let mut frame = Frame::trailing(&mut msg, Self::TAG_SIZE)?;

        self.scratch.copy_from_slice(frame.tag());
        frame.tag_mut().copy_from_slice(&self.verify);
        self.verify = hmac(&self.key, &[frame.complete()])?;

        if !constant_time_eq(&self.verify, &self.scratch) {
            return Err(CodecError::Authentication("invalid HMAC".to_string()));
        }

        let len = frame.message_len();
        msg.truncate(len);
        Ok(msg)
    }

    fn check_state(&self, expected: CodecState) -> Result<(), CodecError> {
        if self.state != expected {
            return Err(CodecError::Protocol(format!(
                "invalid codec state: expected {:?}, found {:?}",
                expected, self.state
            )));
        }
        Ok(())
    }

    fn transition(&mut self, expected: CodecState, next: CodecState) -> Result<(), CodecError> {
        self.check_state(expected)?;
        self.state = next;
        Ok(())
    }

    /// Force the terminal state on any failure.
    fn guard<T>(&mut self, result: Result<T, CodecError>) -> Result<T, CodecError> {
        if result.is_err() {
            self.state = CodecState::Error;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "s3cr3t";

    fn handshake_pair() -> (Codec, Codec) {
        let mut a = Codec::new(Role::TcpListener, SECRET).unwrap();
        let mut b = Codec::new(Role::WsListener, SECRET).unwrap();

        let mut buf_a = [0u8; Codec::TAG_SIZE];
        let mut buf_b = [0u8; Codec::TAG_SIZE];
        let msg_a = a.begin_handshake(&mut buf_a).unwrap().to_vec();
        let msg_b = b.begin_handshake(&mut buf_b).unwrap().to_vec();

        a.complete_handshake(&msg_b).unwrap();
        b.complete_handshake(&msg_a).unwrap();

        (a, b)
    }

    #[test]
    fn test_role_bytes_are_complements() {
        assert_eq!(Role::TcpListener.byte(), !Role::WsListener.byte());
        assert_eq!(Role::TcpListener.peer(), Role::WsListener);
        assert_eq!(Role::WsListener.peer(), Role::TcpListener);
    }

    #[test]
    fn test_empty_secret_rejected() {
        let err = Codec::new(Role::TcpListener, "").unwrap_err();
        assert!(matches!(err, CodecError::Configuration(_)));
    }

    #[test]
    fn test_begin_handshake_random_message() {
        let mut a = Codec::new(Role::TcpListener, SECRET).unwrap();
        let mut b = Codec::new(Role::TcpListener, SECRET).unwrap();

        let mut buf_a = [0u8; 100];
        let mut buf_b = [0u8; 100];
        let msg_a = a.begin_handshake(&mut buf_a).unwrap().to_vec();
        let msg_b = b.begin_handshake(&mut buf_b).unwrap().to_vec();

        assert_eq!(msg_a.len(), Codec::TAG_SIZE);
        assert_ne!(msg_a, msg_b);
        assert_eq!(a.state(), CodecState::Handshake);
    }

    #[test]
    fn test_handshake_accumulators_cross() {
        let (a, b) = handshake_pair();

        assert_eq!(a.state(), CodecState::Active);
        assert_eq!(b.state(), CodecState::Active);
        assert_eq!(a.auth, b.verify);
        assert_eq!(a.verify, b.auth);
        assert_ne!(a.auth, a.verify);
    }

    #[test]
    fn test_handshake_contents_ignored() {
        let mut a = Codec::new(Role::TcpListener, SECRET).unwrap();
        let mut b = Codec::new(Role::TcpListener, SECRET).unwrap();

        let mut buf = [0u8; Codec::TAG_SIZE];
        a.begin_handshake(&mut buf).unwrap();
        b.begin_handshake(&mut buf).unwrap();

        a.complete_handshake(&[0x00; Codec::TAG_SIZE]).unwrap();
        b.complete_handshake(&[0xFF; Codec::TAG_SIZE]).unwrap();

        assert_eq!(a.auth, b.auth);
        assert_eq!(a.verify, b.verify);
    }

    #[test]
    fn test_hello_world_scenario() {
        let (mut a, mut b) = handshake_pair();

        let hello = a.authenticate(b"hello".to_vec()).unwrap();
        assert_eq!(hello.len(), 5 + Codec::TAG_SIZE);
        assert_eq!(b.verify(hello.clone()).unwrap(), b"hello");

        let world = a.authenticate(b"world".to_vec()).unwrap();
        assert_eq!(b.verify(world).unwrap(), b"world");

        let err = b.verify(hello).unwrap_err();
        assert!(matches!(err, CodecError::Authentication(_)));
        assert_eq!(b.state(), CodecState::Error);
    }

    #[test]
    fn test_bidirectional_sequence() {
        let (mut a, mut b) = handshake_pair();

        for i in 0..20u8 {
            let payload = vec![i; i as usize * 7];
            let wire = a.authenticate(payload.clone()).unwrap();
            assert_eq!(b.verify(wire).unwrap(), payload);

            let reply = vec![!i; 3];
            let wire = b.authenticate(reply.clone()).unwrap();
            assert_eq!(a.verify(wire).unwrap(), reply);
        }
    }

    #[test]
    fn test_empty_payload() {
        let (mut a, mut b) = handshake_pair();

        let wire = a.authenticate(Vec::new()).unwrap();
        assert_eq!(wire.len(), Codec::TAG_SIZE);
        assert!(b.verify(wire).unwrap().is_empty());
    }

    #[test]
    fn test_own_message_reflected_fails() {
        let (mut a, _b) = handshake_pair();

        let wire = a.authenticate(b"echo".to_vec()).unwrap();
        assert!(matches!(
            a.verify(wire),
            Err(CodecError::Authentication(_))
        ));
    }

    #[test]
    fn test_out_of_order_rejected() {
        let (mut a, mut b) = handshake_pair();

        let first = a.authenticate(b"first".to_vec()).unwrap();
        let second = a.authenticate(b"second".to_vec()).unwrap();

        assert!(matches!(
            b.verify(second),
            Err(CodecError::Authentication(_))
        ));
        assert!(b.verify(first).is_err());
    }

    #[test]
    fn test_bit_flip_payload_desyncs_chain() {
        let (mut a, mut b) = handshake_pair();

        let mut wire = a.authenticate(b"payload".to_vec()).unwrap();
        wire[0] ^= 0x80;
        assert!(matches!(
            b.verify(wire),
            Err(CodecError::Authentication(_))
        ));

        let next = a.authenticate(b"next".to_vec()).unwrap();
        assert!(b.verify(next).is_err());
    }

    #[test]
    fn test_bit_flip_tag_rejected() {
        let (mut a, mut b) = handshake_pair();

        let mut wire = a.authenticate(b"payload".to_vec()).unwrap();
        let last = wire.len() - 1;
        wire[last] ^= 0x01;
        assert!(matches!(
            b.verify(wire),
            Err(CodecError::Authentication(_))
        ));
    }

    #[test]
    fn test_failed_verify_still_advances_chain() {
        let (mut a, mut b) = handshake_pair();
        let (_, mut c) = handshake_pair();

        let mut bad = a.authenticate(b"one".to_vec()).unwrap();
        bad[1] ^= 0x01;
        let before = b.verify;
        assert!(b.verify(bad).is_err());
        assert_ne!(b.verify, before);

        // A fresh peer that saw the untouched message ends up elsewhere.
        let good = {
            let (mut a2, _) = handshake_pair();
            a2.authenticate(b"one".to_vec()).unwrap()
        };
        c.verify(good).unwrap();
        assert_ne!(b.verify, c.verify);
    }

    #[test]
    fn test_short_message_is_protocol_error() {
        let (_a, mut b) = handshake_pair();

        let err = b.verify(vec![0u8; Codec::TAG_SIZE - 1]).unwrap_err();
        assert!(matches!(err, CodecError::Protocol(_)));
        assert_eq!(b.state(), CodecState::Error);
    }

    #[test]
    fn test_authenticate_before_handshake() {
        let mut a = Codec::new(Role::TcpListener, SECRET).unwrap();

        let err = a.authenticate(b"early".to_vec()).unwrap_err();
        assert!(matches!(err, CodecError::Protocol(_)));
        assert_eq!(a.state(), CodecState::Error);

        let mut buf = [0u8; Codec::TAG_SIZE];
        assert!(a.begin_handshake(&mut buf).is_err());
    }

    #[test]
    fn test_verify_during_handshake() {
        let mut a = Codec::new(Role::TcpListener, SECRET).unwrap();
        let mut buf = [0u8; Codec::TAG_SIZE];
        a.begin_handshake(&mut buf).unwrap();

        assert!(matches!(
            a.verify(vec![0u8; Codec::TAG_SIZE]),
            Err(CodecError::Protocol(_))
        ));
        assert_eq!(a.state(), CodecState::Error);
        assert!(a.complete_handshake(&[0u8; Codec::TAG_SIZE]).is_err());
    }

    #[test]
    fn test_handshake_twice() {
        let (mut a, _b) = handshake_pair();

        let mut buf = [0u8; Codec::TAG_SIZE];
        assert!(matches!(
            a.begin_handshake(&mut buf),
            Err(CodecError::Protocol(_))
        ));
        assert_eq!(a.state(), CodecState::Error);
        assert!(a.authenticate(b"late".to_vec()).is_err());
    }

    #[test]
    fn test_complete_without_begin() {
        let mut a = Codec::new(Role::TcpListener, SECRET).unwrap();
        assert!(a.complete_handshake(&[0u8; Codec::TAG_SIZE]).is_err());
        assert_eq!(a.state(), CodecState::Error);
    }

    #[test]
    fn test_wrong_handshake_size() {
        let mut a = Codec::new(Role::TcpListener, SECRET).unwrap();
        let mut buf = [0u8; Codec::TAG_SIZE];
        a.begin_handshake(&mut buf).unwrap();

        let err = a.complete_handshake(&[0u8; 32]).unwrap_err();
        assert_eq!(
            err,
            CodecError::Protocol("wrong size for init handshake message".to_string())
        );
        assert_eq!(a.state(), CodecState::Error);
        assert!(a.authenticate(b"x".to_vec()).is_err());
    }

    #[test]
    fn test_small_handshake_buffer() {
        let mut a = Codec::new(Role::TcpListener, SECRET).unwrap();
        let mut buf = [0u8; 8];
        assert!(a.begin_handshake(&mut buf).is_err());
        assert_eq!(a.state(), CodecState::Error);
    }

    #[test]
    fn test_different_secrets_fail() {
        let mut a = Codec::new(Role::TcpListener, SECRET).unwrap();
        let mut b = Codec::new(Role::WsListener, "other").unwrap();

        let mut buf = [0u8; Codec::TAG_SIZE];
        let msg = a.begin_handshake(&mut buf).unwrap().to_vec();
        b.begin_handshake(&mut buf).unwrap();
        a.complete_handshake(&msg).unwrap();
        b.complete_handshake(&msg).unwrap();

        let wire = a.authenticate(b"hello".to_vec()).unwrap();
        assert!(matches!(
            b.verify(wire),
            Err(CodecError::Authentication(_))
        ));
    }
}
