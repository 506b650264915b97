//! Domain-specific error types for the remote-control protocol.
//!
//! All fallible operations return `Result<T, RcError>`.
//! No panics on invalid input — every error is typed and recoverable.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type shared by `rc-server` and `rc-client`.
#[derive(Debug, Error)]
pub enum RcError {
    // ── Configuration ────────────────────────────────────────────
    /// The configuration file, environment, or flags produced an invalid setting.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    // ── Listener lifecycle ───────────────────────────────────────
    /// The server could not bind its listening socket.
    #[error("failed to bind listener: {0}")]
    BindFailure(#[source] std::io::Error),

    // ── Authentication ───────────────────────────────────────────
    /// The request's signature header was missing, malformed, or failed verification.
    #[error("invalid signature: {0}")]
    SignatureInvalid(String),

    // ── Queue / connection handling ──────────────────────────────
    /// The command queue had no free slot within the enqueue deadline.
    #[error("command queue is full: {backlog} commands waiting to run")]
    QueueFull { backlog: usize },

    /// A frame could not be decoded as a protocol message or response.
    #[error("decode error: {0}")]
    DecodeError(String),

    /// Writing a frame to the peer failed.
    #[error("write failure: {0}")]
    WriteFailure(#[source] std::io::Error),

    // ── Command execution ────────────────────────────────────────
    /// The subprocess could not be spawned.
    #[error("failed to spawn command: {0}")]
    SpawnFailure(String),

    /// The command exceeded its configured timeout and was killed.
    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    // ── Client session ───────────────────────────────────────────
    /// Dialing the server failed.
    #[error("failed to dial server: {0}")]
    DialFailure(String),

    /// The underlying channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl From<String> for RcError {
    fn from(s: String) -> Self {
        RcError::Other(s)
    }
}

impl From<&str> for RcError {
    fn from(s: &str) -> Self {
        RcError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for RcError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        RcError::ChannelClosed
    }
}

impl From<serde_json::Error> for RcError {
    fn from(e: serde_json::Error) -> Self {
        RcError::DecodeError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_full_renders_decimal_backlog() {
        let e = RcError::QueueFull { backlog: 5 };
        assert_eq!(
            e.to_string(),
            "command queue is full: 5 commands waiting to run"
        );
    }

    #[test]
    fn from_string() {
        let e: RcError = "something broke".into();
        assert!(matches!(e, RcError::Other(_)));
    }

    #[test]
    fn from_json_error() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let e: RcError = parse_err.into();
        assert!(matches!(e, RcError::DecodeError(_)));
    }
}
