//! Transport adapter boundary.
//!
//! The session only talks to the relay through [`Transport`]. Lifecycle
//! callbacks and inbound broadcasts come back as [`TransportEvent`]s that
//! the session pulls with [`Transport::next_event`], so every callback runs
//! on the session's own task.

mod wire;

use async_trait::async_trait;
use huddle_core::{ChatEvent, Identity};

use crate::error::TransportError;

pub use crate::config::TransportConfig;
pub use wire::WireTransport;

/// Lifecycle callbacks and inbound traffic from a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A connection (or reconnection) was established.
    Connected,

    /// The connection went away, through `disconnect()` or a fault. At
    /// most once per connection.
    Disconnected,

    /// A non-fatal transport problem, e.g. the relay refused a frame.
    Error(String),

    /// A raw broadcast received on a subscribed channel.
    Inbound { channel: String, payload: String },
}

/// Duplex connection to the chat relay.
///
/// Implementations announce presence themselves as part of a successful
/// [`connect`](Transport::connect) and never queue publishes while
/// disconnected.
#[async_trait]
pub trait Transport: Send {
    /// Establishes the connection and announces `identity` to the room.
    async fn connect(&mut self, identity: &Identity) -> Result<(), TransportError>;

    /// Sends `event` to `channel`. Fails with `NotConnected` when there is
    /// no live connection.
    async fn publish(&mut self, channel: &str, event: &ChatEvent) -> Result<(), TransportError>;

    /// Starts delivering broadcasts on `channel` as
    /// [`TransportEvent::Inbound`].
    async fn subscribe(&mut self, channel: &str) -> Result<(), TransportError>;

    /// Best-effort teardown. Safe to call in any state, any number of times.
    async fn disconnect(&mut self);

    /// Waits for the next event. Returns `None` when nothing can arrive
    /// any more (never connected, or disconnected).
    async fn next_event(&mut self) -> Option<TransportEvent>;

    /// Returns an already-queued event without waiting.
    fn try_next_event(&mut self) -> Option<TransportEvent>;
}
