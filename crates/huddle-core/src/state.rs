//! Session lifecycle states and their transition table.

use crate::{DomainError, DomainResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a chat session.
///
/// Allowed transitions:
///
/// ```text
/// Idle ──▶ Connecting ──▶ Connected ──▶ Idle
///               │
///               └──────────▶ Idle   (connect failed)
/// ```
///
/// Failure reasons are not a state; they are reported through the
/// session's last-error slot while the state returns to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SessionState {
    /// No session. Initial state and terminal state of every session.
    #[default]
    Idle,

    /// Transport connect in flight.
    Connecting,

    /// Connected and subscribed; publishing is permitted.
    Connected,
}

impl SessionState {
    /// Returns true if `self -> next` is in the transition table.
    ///
    /// Staying in the same state is not a transition and is always allowed,
    /// which keeps repeated disconnects idempotent.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::{Connected, Connecting, Idle};

        self == next
            || matches!(
                (self, next),
                (Idle, Connecting) | (Connecting, Connected) | (Connecting, Idle) | (Connected, Idle)
            )
    }

    /// Validates a transition, returning the new state.
    pub fn transition(self, next: SessionState) -> DomainResult<SessionState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(DomainError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    /// Returns true if publish operations are permitted.
    pub fn is_connected(self) -> bool {
        self == SessionState::Connected
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
        };
        f.write_str(name)
    }
}
