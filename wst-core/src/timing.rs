//! Per-connection cancellation scopes.
//!
//! A [`SocketTiming`] owns a master token linked to the process shutdown
//! token. Every blocking operation on the connection runs under a [`Scope`]
//! derived from the master, bounded by one of the configured timeouts.
//! Cancelling the master cancels every live scope; cancelling or dropping
//! a scope never touches its parent.

use crate::config::TimingConfig;
use crate::error::CodecError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation scope composer for one tunneled connection.
#[derive(Debug)]
pub struct SocketTiming {
    config: TimingConfig,
    master: CancellationToken,
}

impl SocketTiming {
    /// Create a master scope that is cancelled together with `shutdown`.
    pub fn new(config: TimingConfig, shutdown: &CancellationToken) -> Self {
        Self {
            config,
            master: shutdown.child_token(),
        }
    }

    /// Cancel the master scope and everything derived from it.
    pub fn cancel(&self) {
        self.master.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.master.is_cancelled()
    }

    /// How long to keep a socket half-open after a normal close.
    pub fn linger_delay(&self) -> Duration {
        self.config.linger_delay
    }

    /// Bounds establishing the outbound leg; also fires on `external`.
    pub fn connect_scope(&self, external: &CancellationToken) -> Scope {
        Scope::linked(&self.master, self.config.connect_timeout, Some(external.clone()))
    }

    /// Bounds waiting for the next inbound chunk on either side.
    pub fn idle_scope(&self) -> Scope {
        Scope::linked(&self.master, self.config.idle_timeout, None)
    }

    /// Bounds a single outbound write.
    pub fn send_scope(&self) -> Scope {
        Scope::linked(&self.master, self.config.send_timeout, None)
    }

    /// A scope with an explicit budget, linked to the master.
    pub fn scope(&self, timeout: Duration) -> Scope {
        Scope::linked(&self.master, timeout, None)
    }
}

impl Drop for SocketTiming {
    fn drop(&mut self) {
        self.master.cancel();
    }
}

/// A cancellable, time-bounded handle for one blocking operation.
///
/// The deadline is raced in place by [`Scope::cancelled`] and
/// [`Scope::run`], so creating a scope costs no task. Dropping the scope
/// cancels its token.
#[derive(Debug)]
pub struct Scope {
    token: CancellationToken,
    deadline: Instant,
    external: Option<CancellationToken>,
}

impl Scope {
    fn linked(
        parent: &CancellationToken,
        timeout: Duration,
        external: Option<CancellationToken>,
    ) -> Self {
        Self {
            token: parent.child_token(),
            deadline: Instant::now() + timeout,
            external,
        }
    }

    #[cfg(test)]
    fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Whether the scope has fired, by cancellation, deadline or external signal.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
            || Instant::now() >= self.deadline
            || self.external.as_ref().is_some_and(|e| e.is_cancelled())
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Resolves once the scope is cancelled for any reason.
    pub async fn cancelled(&self) {
        let external = async {
            match &self.external {
                Some(external) => external.cancelled().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = self.token.cancelled() => {}
            _ = tokio::time::sleep_until(self.deadline) => self.token.cancel(),
            _ = external => self.token.cancel(),
        }
    }

    /// Run `fut` unless the scope fires first.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, CodecError> {
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(CodecError::Cancelled),
            out = fut => Ok(out),
        }
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
