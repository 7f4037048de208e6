//! Chat events exchanged through the relay.

use crate::{DomainError, DomainResult, Identity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of a chat event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// A message written by a participant.
    Chat,
    /// A participant announced its presence.
    Join,
    /// A participant left the room.
    Leave,
}

impl EventKind {
    /// Wire name of this kind ("CHAT", "JOIN", "LEAVE").
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "CHAT",
            Self::Join => "JOIN",
            Self::Leave => "LEAVE",
        }
    }

    /// Returns true for kinds shown as system notices rather than chat lines.
    pub fn is_presence(&self) -> bool {
        matches!(self, Self::Join | Self::Leave)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CHAT" => Ok(Self::Chat),
            "JOIN" => Ok(Self::Join),
            "LEAVE" => Ok(Self::Leave),
            other => Err(DomainError::malformed(format!("unknown event type '{other}'"))),
        }
    }
}

/// A single chat event. Immutable once constructed.
///
/// `content` is always present and non-empty for [`EventKind::Chat`] and
/// always `None` for presence events. `timestamp` is `None` only for
/// events built locally and not yet stamped by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEvent {
    sender: Identity,
    content: Option<String>,
    kind: EventKind,
    timestamp: Option<DateTime<Utc>>,
}

impl ChatEvent {
    /// Builds an event, enforcing the content rule for its kind.
    ///
    /// Content supplied with a `Join` or `Leave` is ignored.
    pub fn new(
        sender: Identity,
        kind: EventKind,
        content: Option<String>,
        timestamp: Option<DateTime<Utc>>,
    ) -> DomainResult<Self> {
        let content = match kind {
            EventKind::Chat => match content {
                Some(text) if !text.is_empty() => Some(text),
                _ => return Err(DomainError::malformed("chat event without content")),
            },
            EventKind::Join | EventKind::Leave => None,
        };

        Ok(Self {
            sender,
            content,
            kind,
            timestamp,
        })
    }

    /// Creates a chat message.
    pub fn chat(sender: Identity, content: impl Into<String>) -> DomainResult<Self> {
        Self::new(sender, EventKind::Chat, Some(content.into()), None)
    }

    /// Creates a presence announcement.
    pub fn join(sender: Identity) -> Self {
        Self {
            sender,
            content: None,
            kind: EventKind::Join,
            timestamp: None,
        }
    }

    /// Creates a departure notice.
    pub fn leave(sender: Identity) -> Self {
        Self {
            sender,
            content: None,
            kind: EventKind::Leave,
            timestamp: None,
        }
    }

    /// Returns a copy of this event stamped with `timestamp`.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Stamps the event with `now` unless it already carries a timestamp.
    #[must_use]
    pub fn stamped_if_missing(self, now: DateTime<Utc>) -> Self {
        if self.timestamp.is_some() {
            self
        } else {
            self.with_timestamp(now)
        }
    }

    pub fn sender(&self) -> &Identity {
        &self.sender
    }

    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    /// Returns true for join/leave notices.
    pub fn is_system_notice(&self) -> bool {
        self.kind.is_presence()
    }
}
