//! Huddle Client - Session engine for the group-chat client
//!
//! This crate provides:
//! - [`Transport`]: the boundary to the chat relay, with [`WireTransport`]
//!   as the TCP implementation
//! - [`HandlerRegistry`]: ordered observers per notification class
//! - [`Session`]: the connect/send/disconnect state machine that folds
//!   inbound events into a [`RoomState`](huddle_core::RoomState)
//! - [`ClientConfig`]: TOML configuration with relay defaults
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod config;
pub mod error;
pub mod registry;
pub mod session;
pub mod transport;

pub use config::{ClientConfig, SessionConfig, TransportConfig};
pub use error::{ConfigError, ErrorKind, Result, SessionError, TransportError};
pub use registry::{
    ConnectionChange, DisconnectReason, EventClass, HandlerRegistry, Notification, Subscription,
};
pub use session::{Session, SessionSnapshot};
pub use transport::{Transport, TransportEvent, WireTransport};
