//! Protocol frame types for client/relay communication.

use crate::version::ProtocolVersion;
use serde::{Deserialize, Serialize};

/// Heartbeat intervals a client asks for during the handshake.
///
/// `outgoing_ms` is how often the client pings; `incoming_ms` is how often
/// it wants to hear from the relay. Zero disables that direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HeartbeatSpec {
    pub outgoing_ms: u64,
    pub incoming_ms: u64,
}

/// Frame types that can be sent by clients to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FrameType {
    /// Handshake: claim a display name for this connection
    Connect {
        identity: String,
        #[serde(default)]
        heartbeat: HeartbeatSpec,
    },

    /// Start receiving broadcasts on a destination
    Subscribe { destination: String },

    /// Stop receiving broadcasts on a destination
    Unsubscribe { destination: String },

    /// Publish a JSON-encoded chat event to a destination
    Send { destination: String, body: String },

    /// Liveness probe
    Ping { seq: u64 },

    /// Client leaving gracefully
    Disconnect,
}

/// Frames sent from client to relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientFrame {
    /// Protocol version
    pub protocol_version: ProtocolVersion,

    /// Frame payload
    #[serde(flatten)]
    pub frame: FrameType,
}

impl ClientFrame {
    /// Creates a new client frame with the current protocol version.
    pub fn new(frame: FrameType) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            frame,
        }
    }

    pub fn connect(identity: &str, heartbeat: HeartbeatSpec) -> Self {
        Self::new(FrameType::Connect {
            identity: identity.to_string(),
            heartbeat,
        })
    }

    pub fn subscribe(destination: &str) -> Self {
        Self::new(FrameType::Subscribe {
            destination: destination.to_string(),
        })
    }

    pub fn unsubscribe(destination: &str) -> Self {
        Self::new(FrameType::Unsubscribe {
            destination: destination.to_string(),
        })
    }

    pub fn send(destination: &str, body: String) -> Self {
        Self::new(FrameType::Send {
            destination: destination.to_string(),
            body,
        })
    }

    pub fn ping(seq: u64) -> Self {
        Self::new(FrameType::Ping { seq })
    }

    pub fn disconnect() -> Self {
        Self::new(FrameType::Disconnect)
    }
}

/// Frames sent from the relay to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayFrame {
    /// Handshake accepted
    Connected {
        protocol_version: ProtocolVersion,
        session_id: String,
    },

    /// Handshake refused (version mismatch, identity taken, relay full)
    Rejected {
        reason: String,
        protocol_version: ProtocolVersion,
    },

    /// A broadcast on a subscribed destination
    Message { destination: String, body: String },

    /// Reply to a ping
    Pong { seq: u64 },

    /// Relay-side liveness signal
    Heartbeat,

    /// Error concerning a previous client frame; the connection stays up
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl RelayFrame {
    pub fn connected(session_id: String) -> Self {
        Self::Connected {
            protocol_version: ProtocolVersion::CURRENT,
            session_id,
        }
    }

    pub fn rejected(reason: &str) -> Self {
        Self::Rejected {
            reason: reason.to_string(),
            protocol_version: ProtocolVersion::CURRENT,
        }
    }

    pub fn message(destination: &str, body: String) -> Self {
        Self::Message {
            destination: destination.to_string(),
            body,
        }
    }

    pub fn pong(seq: u64) -> Self {
        Self::Pong { seq }
    }

    pub fn error(message: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: None,
        }
    }

    pub fn error_with_code(message: &str, code: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: Some(code.to_string()),
        }
    }
}
