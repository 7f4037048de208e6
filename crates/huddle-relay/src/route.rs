//! Validation of events published by a connection.
//!
//! A `send` frame is accepted only when its body parses, its sender is the
//! identity the connection shook hands with, and its kind fits the
//! destination: `JOIN` on the join destination, `CHAT` on the send
//! destination. Accepted events are stamped with the relay's clock.

use chrono::{DateTime, Utc};
use huddle_core::{ChatEvent, EventKind, Identity};
use huddle_protocol::WireChatEvent;

use crate::config::RelayConfig;
use crate::error::RelayError;

/// What to do with an accepted publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Record the sender as present and broadcast its `Join`.
    Announce(ChatEvent),
    /// Broadcast a chat message.
    Chat(ChatEvent),
}

impl Route {
    pub fn event(&self) -> &ChatEvent {
        match self {
            Self::Announce(event) | Self::Chat(event) => event,
        }
    }
}

/// Validates a `send` frame from the connection owned by `identity`.
pub fn route_publish(
    config: &RelayConfig,
    identity: &Identity,
    destination: &str,
    body: &str,
    now: DateTime<Utc>,
) -> Result<Route, RelayError> {
    let expected = if destination == config.join_destination {
        EventKind::Join
    } else if destination == config.send_destination {
        EventKind::Chat
    } else {
        return Err(RelayError::UnknownDestination(destination.to_string()));
    };

    let wire: WireChatEvent =
        serde_json::from_str(body).map_err(|e| RelayError::Malformed(e.to_string()))?;
    let event = wire
        .to_chat_event()
        .map_err(|e| RelayError::Malformed(e.to_string()))?;

    if event.sender() != identity {
        return Err(RelayError::SenderMismatch {
            claimed: event.sender().to_string(),
            actual: identity.to_string(),
        });
    }
    if event.kind() != expected {
        return Err(RelayError::KindMismatch {
            kind: event.kind(),
            destination: destination.to_string(),
        });
    }

    let event = event.with_timestamp(now);
    Ok(match expected {
        EventKind::Join => Route::Announce(event),
        _ => Route::Chat(event),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use huddle_protocol::encode_chat_event;

    fn alice() -> Identity {
        Identity::parse("alice").unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn route(destination: &str, event: &ChatEvent) -> Result<Route, RelayError> {
        route_publish(
            &RelayConfig::default(),
            &alice(),
            destination,
            &encode_chat_event(event),
            now(),
        )
    }

    #[test]
    fn test_chat_is_routed_and_stamped() {
        let event = ChatEvent::chat(alice(), "hi").unwrap();
        let routed = route("/app/chat.sendMessage", &event).unwrap();

        assert!(matches!(routed, Route::Chat(_)));
        assert_eq!(routed.event().timestamp(), Some(now()));
        assert_eq!(routed.event().content(), Some("hi"));
    }

    #[test]
    fn test_join_is_an_announcement() {
        let routed = route("/app/chat.addUser", &ChatEvent::join(alice())).unwrap();
        assert!(matches!(routed, Route::Announce(_)));
    }

    #[test]
    fn test_relay_clock_overrides_client_timestamp() {
        let early = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        let event = ChatEvent::chat(alice(), "hi").unwrap().with_timestamp(early);
        let routed = route("/app/chat.sendMessage", &event).unwrap();
        assert_eq!(routed.event().timestamp(), Some(now()));
    }

    #[test]
    fn test_sender_must_match_connection() {
        let bob = Identity::parse("bob").unwrap();
        let event = ChatEvent::chat(bob, "impersonating").unwrap();
        let result = route("/app/chat.sendMessage", &event);
        assert!(matches!(result, Err(RelayError::SenderMismatch { .. })));
    }

    #[test]
    fn test_kind_must_match_destination() {
        let leave = ChatEvent::leave(alice());
        assert!(matches!(
            route("/app/chat.addUser", &leave),
            Err(RelayError::KindMismatch { kind: EventKind::Leave, .. })
        ));

        let chat = ChatEvent::chat(alice(), "hi").unwrap();
        assert!(matches!(
            route("/app/chat.addUser", &chat),
            Err(RelayError::KindMismatch { kind: EventKind::Chat, .. })
        ));
    }

    #[test]
    fn test_unknown_destination() {
        let event = ChatEvent::chat(alice(), "hi").unwrap();
        let result = route("/app/chat.whisper", &event);
        assert!(matches!(result, Err(RelayError::UnknownDestination(_))));
    }

    #[test]
    fn test_malformed_body() {
        let result = route_publish(
            &RelayConfig::default(),
            &alice(),
            "/app/chat.sendMessage",
            r#"{"sender":"alice","type":"CHAT","content":""}"#,
            now(),
        );
        assert!(matches!(result, Err(RelayError::Malformed(_))));
    }
}
