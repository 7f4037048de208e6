//! Huddle Core - Shared domain types for the group-chat client and relay
//!
//! This crate provides the domain types shared between the chat
//! client (`huddle-client`) and the relay (`huddle-relay`):
//! identities, chat events, the session state transition table and
//! the room state reducer.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod event;
pub mod identity;
pub mod room;
pub mod state;

// Re-exports for convenience
pub use error::{DomainError, DomainResult};
pub use event::{ChatEvent, EventKind};
pub use identity::{Identity, MAX_IDENTITY_LEN};
pub use room::RoomState;
pub use state::SessionState;
