//! Relay configuration.

use std::time::Duration;

use huddle_protocol::{DEFAULT_JOIN_DESTINATION, DEFAULT_SEND_DESTINATION, DEFAULT_TOPIC};

/// Environment variable overriding [`RelayConfig::bind_addr`].
pub const BIND_ADDR_ENV: &str = "HUDDLE_RELAY_BIND";

/// Default listen address.
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

/// Default maximum number of connected clients.
pub const DEFAULT_MAX_CLIENTS: usize = 256;

/// Settings for a [`RelayServer`](crate::RelayServer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub bind_addr: String,

    /// Broadcast topic clients subscribe to.
    pub topic: String,

    /// Destination for chat messages.
    pub send_destination: String,

    /// Destination for presence announcements.
    pub join_destination: String,

    pub max_clients: usize,

    /// How long a connection may stay silent when the client declared no
    /// outgoing heartbeat.
    pub idle_timeout: Duration,

    /// How long a new connection has to send its `connect` frame.
    pub handshake_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            topic: DEFAULT_TOPIC.to_string(),
            send_destination: DEFAULT_SEND_DESTINATION.to_string(),
            join_destination: DEFAULT_JOIN_DESTINATION.to_string(),
            max_clients: DEFAULT_MAX_CLIENTS,
            idle_timeout: Duration::from_secs(300),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

impl RelayConfig {
    /// Defaults with `HUDDLE_RELAY_BIND` applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var(BIND_ADDR_ENV) {
            if !addr.trim().is_empty() {
                config.bind_addr = addr.trim().to_string();
            }
        }
        config
    }

    /// Same settings, listening on `addr`.
    pub fn with_bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    /// Read timeout for a client that pings every `outgoing_ms`.
    ///
    /// Twice the ping interval, or the idle timeout if the client does not
    /// ping at all.
    pub fn read_timeout(&self, outgoing_ms: u64) -> Duration {
        if outgoing_ms == 0 {
            self.idle_timeout
        } else {
            Duration::from_millis(outgoing_ms.saturating_mul(2))
        }
    }
}
