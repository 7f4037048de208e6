//! Room state reducer.
//!
//! `RoomState` is a pure fold over the inbound event stream: the ordered
//! message log plus the set of participants currently online. It is
//! maintained incrementally and never recomputed from the log.

use crate::{ChatEvent, EventKind, Identity};
use std::collections::BTreeSet;
use tracing::debug;

/// Message history and online participants of the shared room.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomState {
    /// Every folded event, in arrival order.
    messages: Vec<ChatEvent>,

    /// Identities with a `Join` and no later `Leave`.
    online_users: BTreeSet<Identity>,
}

impl RoomState {
    /// Creates an empty room.
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one event into the room.
    ///
    /// Every event is appended to the log, including echoes of our own
    /// messages. `Join` adds the sender to the online set and `Leave`
    /// removes it; both are no-ops on the set when already applied.
    pub fn apply(&mut self, event: ChatEvent) {
        match event.kind() {
            EventKind::Chat => {}
            EventKind::Join => {
                if !self.online_users.insert(event.sender().clone()) {
                    debug!(sender = %event.sender(), "Join for participant already online");
                }
            }
            EventKind::Leave => {
                if !self.online_users.remove(event.sender()) {
                    debug!(sender = %event.sender(), "Leave for participant not online");
                }
            }
        }
        self.messages.push(event);
    }

    /// Folds a sequence of events in order.
    pub fn apply_all(&mut self, events: impl IntoIterator<Item = ChatEvent>) {
        for event in events {
            self.apply(event);
        }
    }

    /// The message log in insertion order.
    pub fn messages(&self) -> &[ChatEvent] {
        &self.messages
    }

    /// Online participants, sorted by name.
    pub fn online_users(&self) -> &BTreeSet<Identity> {
        &self.online_users
    }

    /// Returns true if `name` is currently online.
    pub fn is_online(&self, name: &str) -> bool {
        self.online_users.contains(name)
    }

    /// Returns true if no event has been folded since the last clear.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.online_users.is_empty()
    }

    /// Drops the whole history and roster.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.online_users.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> Identity {
        Identity::parse(name).unwrap()
    }

    fn chat(name: &str, text: &str) -> ChatEvent {
        ChatEvent::chat(id(name), text).unwrap()
    }

    #[test]
    fn test_new_room_is_empty() {
        let room = RoomState::new();
        assert!(room.is_empty());
        assert!(room.messages().is_empty());
        assert!(room.online_users().is_empty());
    }

    #[test]
    fn test_fold_join_chat_leave_sequence() {
        let mut room = RoomState::new();
        room.apply_all([
            ChatEvent::join(id("alice")),
            chat("alice", "hi"),
            ChatEvent::join(id("bob")),
            ChatEvent::leave(id("alice")),
            chat("bob", "yo"),
        ]);

        let online: Vec<&str> = room.online_users().iter().map(Identity::as_str).collect();
        assert_eq!(online, vec!["bob"]);

        let log: Vec<(EventKind, &str)> = room
            .messages()
            .iter()
            .map(|e| (e.kind(), e.sender().as_str()))
            .collect();
        assert_eq!(
            log,
            vec![
                (EventKind::Join, "alice"),
                (EventKind::Chat, "alice"),
                (EventKind::Join, "bob"),
                (EventKind::Leave, "alice"),
                (EventKind::Chat, "bob"),
            ]
        );
        assert_eq!(room.messages().get(1).and_then(ChatEvent::content), Some("hi"));
        assert_eq!(room.messages().get(4).and_then(ChatEvent::content), Some("yo"));
    }

    #[test]
    fn test_user_online_between_join_and_leave() {
        // Every interleaving of other traffic between a Join and its Leave.
        let fillers: Vec<Vec<ChatEvent>> = vec![
            vec![],
            vec![chat("bob", "hello")],
            vec![ChatEvent::join(id("bob")), ChatEvent::leave(id("bob"))],
            vec![ChatEvent::join(id("u")), chat("u", "again")],
            vec![ChatEvent::leave(id("carol")), chat("carol", "x"), ChatEvent::join(id("dave"))],
        ];

        for filler in fillers {
            let mut room = RoomState::new();
            room.apply(ChatEvent::join(id("u")));
            assert!(room.is_online("u"));

            for event in filler {
                room.apply(event);
                assert!(room.is_online("u"));
            }

            room.apply(ChatEvent::leave(id("u")));
            assert!(!room.is_online("u"));
        }
    }

    #[test]
    fn test_is_online_among_many() {
        let mut room = RoomState::new();
        room.apply_all((0..50).map(|i| ChatEvent::join(id(&format!("user_{i}")))));
        room.apply(ChatEvent::leave(id("user_7")));

        assert!(room.is_online("user_0"));
        assert!(room.is_online("user_49"));
        assert!(!room.is_online("user_7"));
        assert!(!room.is_online("user_50"));
    }

    #[test]
    fn test_duplicate_join_is_set_union() {
        let mut room = RoomState::new();
        room.apply(ChatEvent::join(id("alice")));
        room.apply(ChatEvent::join(id("alice")));

        assert_eq!(room.online_users().len(), 1);
        assert_eq!(room.messages().len(), 2);
    }

    #[test]
    fn test_leave_for_absent_user_still_logged() {
        let mut room = RoomState::new();
        room.apply(ChatEvent::leave(id("ghost")));

        assert!(room.online_users().is_empty());
        assert_eq!(room.messages().len(), 1);
    }

    #[test]
    fn test_own_echo_is_not_deduplicated() {
        let mut room = RoomState::new();
        room.apply(chat("eve", "same"));
        room.apply(chat("eve", "same"));
        assert_eq!(room.messages().len(), 2);
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut room = RoomState::new();
        room.apply_all([ChatEvent::join(id("alice")), chat("alice", "hi")]);
        room.clear();
        assert!(room.is_empty());
    }
}
