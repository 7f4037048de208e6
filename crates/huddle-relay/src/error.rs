//! Errors the relay reports back to clients.

use huddle_core::EventKind;
use thiserror::Error;

/// A refused handshake or publish.
///
/// Each variant maps to a stable [`code`](RelayError::code) sent in
/// `error` frames; the connection stays open for publish errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("identity '{0}' is already connected")]
    IdentityTaken(String),

    #[error("relay is full (max: {max})")]
    Full { max: usize },

    #[error("unknown destination: {0}")]
    UnknownDestination(String),

    #[error("malformed event: {0}")]
    Malformed(String),

    #[error("sender '{claimed}' does not match connection identity '{actual}'")]
    SenderMismatch { claimed: String, actual: String },

    #[error("{kind} events cannot be sent to {destination}")]
    KindMismatch {
        kind: EventKind,
        destination: String,
    },
}

impl RelayError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::IdentityTaken(_) => "identity_taken",
            Self::Full { .. } => "relay_full",
            Self::UnknownDestination(_) => "unknown_destination",
            Self::Malformed(_) => "malformed_event",
            Self::SenderMismatch { .. } => "sender_mismatch",
            Self::KindMismatch { .. } => "kind_mismatch",
        }
    }
}
