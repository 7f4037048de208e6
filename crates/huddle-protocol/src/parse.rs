//! Wire encoding of chat events.
//!
//! The `body` of `send`/`message` frames is a JSON object:
//!
//! ```json
//! {"sender":"alice","content":"hi","type":"CHAT","timestamp":"2024-01-15T10:00:00Z"}
//! ```
//!
//! `content` is omitted for `JOIN`/`LEAVE`; `timestamp` is filled in by the
//! relay and, failing that, by the receiving client.

use chrono::{DateTime, Utc};
use huddle_core::{ChatEvent, DomainError, DomainResult, EventKind, Identity};
use serde::{Deserialize, Serialize};

/// Raw chat event JSON structure.
///
/// Every field is loosely typed so that a bad value is reported as a
/// `MalformedEvent` naming the field instead of a generic JSON error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireChatEvent {
    pub sender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl WireChatEvent {
    /// Converts to a validated domain event.
    ///
    /// The timestamp is left as sent; callers decide how to stamp.
    pub fn to_chat_event(&self) -> DomainResult<ChatEvent> {
        let sender = Identity::parse(&self.sender)
            .map_err(|e| DomainError::malformed(format!("invalid sender: {e}")))?;
        let kind: EventKind = self.kind.parse()?;

        ChatEvent::new(sender, kind, self.content.clone(), self.timestamp)
    }
}

impl From<&ChatEvent> for WireChatEvent {
    fn from(event: &ChatEvent) -> Self {
        Self {
            sender: event.sender().to_string(),
            content: event.content().map(str::to_string),
            kind: event.kind().as_str().to_string(),
            timestamp: event.timestamp(),
        }
    }
}

/// Encodes an event as a frame body.
pub fn encode_chat_event(event: &ChatEvent) -> String {
    // Only strings and an RFC 3339 timestamp: serialization cannot fail.
    serde_json::to_string(&WireChatEvent::from(event)).unwrap_or_default()
}

/// Parses a frame body into a chat event, stamping it with the local clock
/// if the relay did not.
///
/// Any failure is a `DomainError::MalformedEvent`.
pub fn parse_chat_event(body: &str) -> DomainResult<ChatEvent> {
    let wire: WireChatEvent = serde_json::from_str(body)
        .map_err(|e| DomainError::malformed(format!("invalid JSON: {e}")))?;

    Ok(wire.to_chat_event()?.stamped_if_missing(Utc::now()))
}
