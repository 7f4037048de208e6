//! Error types for the huddle session engine.
//!
//! `SessionError` is what the presentation layer sees: synchronous failures
//! of `connect`/`send`, and asynchronous conditions delivered on the error
//! notification class. Every variant is also what the session stores in its
//! last-error slot, so all of them are cheap to clone and compare.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

// ============================================================================
// Session Error Type
// ============================================================================

/// Failures reported by the chat session.
///
/// # Propagation
///
/// - `InvalidIdentity`, `ConnectionFailed` and `SendFailed` are returned
///   to the caller of the operation that triggered them
/// - `ConnectionLost` and `MalformedEvent` are asynchronous and only reach
///   observers through the error notification class
///
/// None of them is fatal; each resolves an operation or is logged and dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The display name was rejected before any transport call.
    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    /// The relay could not be reached or refused the handshake.
    #[error("Failed to connect to chat relay: {0}")]
    ConnectionFailed(String),

    /// The connection dropped while the session was connected.
    #[error("Connection to chat relay lost")]
    ConnectionLost,

    /// A message could not be published.
    #[error("Failed to send message: {0}")]
    SendFailed(String),

    /// An inbound payload did not parse into a chat event.
    #[error("Malformed event dropped: {0}")]
    MalformedEvent(String),
}

/// Stable classification of a [`SessionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidIdentity,
    ConnectionFailed,
    ConnectionLost,
    SendFailed,
    MalformedEvent,
}

impl SessionError {
    /// Returns the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidIdentity(_) => ErrorKind::InvalidIdentity,
            Self::ConnectionFailed(_) => ErrorKind::ConnectionFailed,
            Self::ConnectionLost => ErrorKind::ConnectionLost,
            Self::SendFailed(_) => ErrorKind::SendFailed,
            Self::MalformedEvent(_) => ErrorKind::MalformedEvent,
        }
    }

    /// Short message suitable for showing to the user.
    pub fn user_message(&self) -> &'static str {
        match self.kind() {
            ErrorKind::InvalidIdentity => "Please enter a valid username.",
            ErrorKind::ConnectionFailed => "Failed to connect to chat server. Please try again.",
            ErrorKind::ConnectionLost => "Connection to chat server lost. Please reconnect.",
            ErrorKind::SendFailed => "Failed to send message. Please check your connection.",
            ErrorKind::MalformedEvent => "Received a message that could not be read.",
        }
    }
}

// ============================================================================
// Transport Error Type
// ============================================================================

/// Errors reported by a transport adapter.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The socket could not be established.
    #[error("Failed to reach relay at {addr}: {reason}")]
    Unreachable { addr: String, reason: String },

    /// Connect or handshake did not complete in time.
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The relay refused the handshake.
    #[error("Handshake rejected: {0}")]
    Rejected(String),

    /// Relay speaks an incompatible protocol version.
    #[error("Protocol version mismatch (client: {client_version}, relay: {relay_version})")]
    VersionMismatch {
        /// The protocol version this client speaks.
        client_version: String,
        /// The protocol version the relay answered with.
        relay_version: String,
    },

    /// Unexpected frame or framing problem.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Operation requires an established connection.
    #[error("Not connected")]
    NotConnected,

    /// `connect` called on an adapter that already holds a connection.
    #[error("Already connected")]
    AlreadyConnected,

    /// I/O error passthrough.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error passthrough.
    #[error("Failed to parse frame: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Config Error Type
// ============================================================================

/// Errors loading the client configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Convenience Result type alias for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_failed_display() {
        let error = SessionError::ConnectionFailed("refused".to_string());
        let display = format!("{error}");
        assert!(display.contains("Failed to connect to chat relay"));
        assert!(display.contains("refused"));
    }

    #[test]
    fn test_kind_classification() {
        let cases = [
            (SessionError::InvalidIdentity(String::new()), ErrorKind::InvalidIdentity),
            (SessionError::ConnectionFailed(String::new()), ErrorKind::ConnectionFailed),
            (SessionError::ConnectionLost, ErrorKind::ConnectionLost),
            (SessionError::SendFailed(String::new()), ErrorKind::SendFailed),
            (SessionError::MalformedEvent(String::new()), ErrorKind::MalformedEvent),
        ];
        for (error, kind) in cases {
            assert_eq!(error.kind(), kind);
        }
    }

    #[test]
    fn test_user_messages_are_distinct() {
        let lost = SessionError::ConnectionLost.user_message();
        let failed = SessionError::ConnectionFailed("x".into()).user_message();
        assert_ne!(lost, failed);
        assert!(failed.contains("Failed to connect"));
    }

    #[test]
    fn test_version_mismatch_display() {
        let error = TransportError::VersionMismatch {
            client_version: "1.0".to_string(),
            relay_version: "2.0".to_string(),
        };
        let display = format!("{error}");
        assert!(display.contains("client: 1.0"));
        assert!(display.contains("relay: 2.0"));
    }

    #[test]
    fn test_io_error_from_conversion() {
        let io_error = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        let error: TransportError = io_error.into();
        assert!(matches!(error, TransportError::Io(_)));
    }
}
