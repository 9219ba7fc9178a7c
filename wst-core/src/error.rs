//! Error types for the codec and the tunnel plumbing around it.
//!
//! [`CodecError`] is what the codec and cancellation scopes return.
//! [`TunnelError`] carries a category plus context so the connection
//! handlers can decide how loudly to log a teardown.

use std::fmt;
use thiserror::Error;

/// Errors raised by the authenticated message codec and by scopes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Missing or unusable configuration, e.g. an empty shared secret.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Operation invoked in the wrong state or with a malformed message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Tag mismatch while verifying an inbound message.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// A scope fired (timeout or shutdown) while an operation was pending.
    #[error("operation cancelled")]
    Cancelled,
}

/// Error categories for the tunnel system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Tag verification failed.
    Authentication,
    /// Protocol violations from the peer or from local misuse.
    Protocol,
    /// Configuration errors.
    Configuration,
    /// Socket and WebSocket I/O errors.
    Connection,
    /// An idle, connect or send timeout elapsed.
    Timeout,
    /// Shutdown or explicit cancellation.
    Cancelled,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Authentication => write!(f, "authentication"),
            ErrorCategory::Protocol => write!(f, "protocol"),
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Connection => write!(f, "connection"),
            ErrorCategory::Timeout => write!(f, "timeout"),
            ErrorCategory::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A tunnel error with category and context.
#[derive(Debug)]
pub struct TunnelError {
    /// The error category.
    pub category: ErrorCategory,
    /// A human-readable message.
    pub message: String,
    /// The underlying cause, if any.
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Additional context as key-value pairs.
    pub context: Vec<(String, String)>,
}

impl TunnelError {
    /// Create a new tunnel error.
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            cause: None,
            context: Vec::new(),
        }
    }

    /// Add an underlying cause.
    pub fn with_cause<E: std::error::Error + Send + Sync + 'static>(mut self, cause: E) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Add context to the error.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.push((key.into(), value.into()));
        self
    }

    /// Whether this teardown is routine and should not be logged loudly.
    pub fn is_quiet(&self) -> bool {
        matches!(
            self.category,
            ErrorCategory::Cancelled | ErrorCategory::Timeout
        )
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Protocol, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Connection, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Timeout, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Cancelled, message)
    }
}

impl fmt::Display for TunnelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)?;

        if !self.context.is_empty() {
            write!(f, " (")?;
            for (i, (k, v)) in self.context.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}={}", k, v)?;
            }
            write!(f, ")")?;
        }

        if let Some(ref cause) = self.cause {
            write!(f, ": {}", cause)?;
        }

        Ok(())
    }
}

impl std::error::Error for TunnelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<CodecError> for TunnelError {
    fn from(err: CodecError) -> Self {
        let category = match err {
            CodecError::Configuration(_) => ErrorCategory::Configuration,
            CodecError::Protocol(_) => ErrorCategory::Protocol,
            CodecError::Authentication(_) => ErrorCategory::Authentication,
            CodecError::Cancelled => ErrorCategory::Cancelled,
        };
        Self::new(category, err.to_string()).with_cause(err)
    }
}

impl From<std::io::Error> for TunnelError {
    fn from(err: std::io::Error) -> Self {
        Self::connection(err.to_string()).with_cause(err)
    }
}

/// Result type using TunnelError.
pub type TunnelResult<T> = Result<T, TunnelError>;

/// Helper trait for adding context to errors.
pub trait ResultExt<T> {
    /// Convert the error into a [`TunnelError`] of the given category.
    fn with_category(self, category: ErrorCategory) -> Result<T, TunnelError>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ResultExt<T> for Result<T, E> {
    fn with_category(self, category: ErrorCategory) -> Result<T, TunnelError> {
        self.map_err(|e| TunnelError::new(category, e.to_string()).with_cause(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TunnelError::new(ErrorCategory::Authentication, "invalid HMAC")
            .with_context("conn", "abc123")
            .with_context("peer", "1.2.3.4:5000");

        let display = err.to_string();
        assert!(display.contains("[authentication]"));
        assert!(display.contains("invalid HMAC"));
        assert!(display.contains("conn=abc123"));
        assert!(display.contains("peer=1.2.3.4:5000"));
    }

    #[test]
    fn test_error_quiet() {
        assert!(TunnelError::cancelled("shutdown").is_quiet());
        assert!(TunnelError::timeout("idle").is_quiet());
        assert!(!TunnelError::new(ErrorCategory::Authentication, "test").is_quiet());
        assert!(!TunnelError::protocol("test").is_quiet());
        assert!(!TunnelError::connection("test").is_quiet());
    }

    #[test]
    fn test_codec_error_category() {
        let err: TunnelError = CodecError::Authentication("invalid HMAC".into()).into();
        assert_eq!(err.category, ErrorCategory::Authentication);

        let err: TunnelError = CodecError::Cancelled.into();
        assert_eq!(err.category, ErrorCategory::Cancelled);
        assert!(err.is_quiet());

        let err: TunnelError = CodecError::Protocol("invalid codec state".into()).into();
        assert_eq!(err.category, ErrorCategory::Protocol);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_with_category() {
        let result: Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset by peer",
        ));
        let err = result.with_category(ErrorCategory::Connection).unwrap_err();

        assert_eq!(err.category, ErrorCategory::Connection);
        assert_eq!(err.message, "reset by peer");
        assert!(std::error::Error::source(&err).is_some());
    }
}
