//! Client configuration.
//!
//! Loaded from TOML. Every section is optional and falls back to the
//! defaults the chat relay expects:
//!
//! ```toml
//! relay_addr = "127.0.0.1:8080"
//!
//! [channels]
//! topic = "/topic/public"
//! send_destination = "/app/chat.sendMessage"
//! join_destination = "/app/chat.addUser"
//!
//! [heartbeat]
//! outgoing_ms = 4000
//! incoming_ms = 4000
//!
//! [reconnect]
//! enabled = true
//! delay_ms = 5000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use huddle_protocol::{
    HeartbeatSpec, DEFAULT_JOIN_DESTINATION, DEFAULT_SEND_DESTINATION, DEFAULT_TOPIC,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

/// Environment variable overriding [`ClientConfig::relay_addr`].
pub const RELAY_ADDR_ENV: &str = "HUDDLE_RELAY_ADDR";

/// Default relay address.
pub const DEFAULT_RELAY_ADDR: &str = "127.0.0.1:8080";

/// Default maximum chat message length, in characters.
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 500;

/// How long a single frame write to the relay may block.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// File Format
// ============================================================================

/// Channel names used on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub topic: String,
    pub send_destination: String,
    pub join_destination: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            send_destination: DEFAULT_SEND_DESTINATION.to_string(),
            join_destination: DEFAULT_JOIN_DESTINATION.to_string(),
        }
    }
}

/// Heartbeat intervals in milliseconds. Zero disables a direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub outgoing_ms: u64,
    pub incoming_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            outgoing_ms: 4000,
            incoming_ms: 4000,
        }
    }
}

impl From<HeartbeatConfig> for HeartbeatSpec {
    fn from(config: HeartbeatConfig) -> Self {
        HeartbeatSpec {
            outgoing_ms: config.outgoing_ms,
            incoming_ms: config.incoming_ms,
        }
    }
}

/// Automatic reconnection after an unexpected drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub enabled: bool,
    pub delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delay_ms: 5000,
        }
    }
}

impl ReconnectConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Full client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub relay_addr: String,
    pub connect_timeout_ms: u64,
    pub max_message_len: usize,
    pub channels: ChannelConfig,
    pub heartbeat: HeartbeatConfig,
    pub reconnect: ReconnectConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_addr: DEFAULT_RELAY_ADDR.to_string(),
            connect_timeout_ms: 5000,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
            channels: ChannelConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

// ============================================================================
// Runtime Views
// ============================================================================

/// Settings consumed by the wire transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub relay_addr: String,
    pub connect_timeout: Duration,
    /// Upper bound for one frame write; a relay that stops reading counts
    /// as a dropped connection.
    pub write_timeout: Duration,
    pub heartbeat: HeartbeatSpec,
    pub reconnect: ReconnectConfig,
    /// Destination the presence announcement is sent to after connecting.
    pub join_destination: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        ClientConfig::default().transport()
    }
}

/// Settings consumed by the session state machine.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub topic: String,
    pub send_destination: String,
    pub max_message_len: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        ClientConfig::default().session()
    }
}

impl ClientConfig {
    /// Loads configuration.
    ///
    /// An explicit path must exist. Without one, `huddle/client.toml` in
    /// the user config directory is used if present, otherwise defaults.
    /// `HUDDLE_RELAY_ADDR` overrides the relay address in every case.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };

        if let Ok(addr) = std::env::var(RELAY_ADDR_ENV) {
            if !addr.trim().is_empty() {
                debug!(relay_addr = %addr, "Relay address overridden from environment");
                config.relay_addr = addr.trim().to_string();
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        debug!(path = %path.display(), "Loaded client config");
        Ok(config)
    }

    /// Rejects values the session cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.relay_addr.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "relay_addr",
                reason: "must not be empty".to_string(),
            });
        }
        if self.max_message_len == 0 {
            return Err(ConfigError::Invalid {
                field: "max_message_len",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.channels.topic.is_empty() {
            return Err(ConfigError::Invalid {
                field: "channels.topic",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            relay_addr: self.relay_addr.clone(),
            connect_timeout: self.connect_timeout(),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            heartbeat: self.heartbeat.into(),
            reconnect: self.reconnect,
            join_destination: self.channels.join_destination.clone(),
        }
    }

    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            topic: self.channels.topic.clone(),
            send_destination: self.channels.send_destination.clone(),
            max_message_len: self.max_message_len,
        }
    }
}

/// `<config dir>/huddle/client.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("huddle").join("client.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.relay_addr, "127.0.0.1:8080");
        assert_eq!(config.channels.topic, "/topic/public");
        assert_eq!(config.heartbeat.outgoing_ms, 4000);
        assert_eq!(config.heartbeat.incoming_ms, 4000);
        assert_eq!(config.reconnect.delay(), Duration::from_secs(5));
        assert_eq!(config.max_message_len, 500);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "relay_addr = \"10.0.0.5:9000\"").unwrap();
        writeln!(file, "[heartbeat]").unwrap();
        writeln!(file, "incoming_ms = 0").unwrap();

        let config = ClientConfig::from_file(file.path()).unwrap();
        assert_eq!(config.relay_addr, "10.0.0.5:9000");
        assert_eq!(config.heartbeat.incoming_ms, 0);
        assert_eq!(config.heartbeat.outgoing_ms, 4000);
        assert_eq!(config.channels, ChannelConfig::default());
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = ClientConfig::from_file(&dir.path().join("nope.toml"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "relay_addr = [").unwrap();
        let result = ClientConfig::from_file(file.path());
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_validate_rejects_zero_message_len() {
        let config = ClientConfig {
            max_message_len: 0,
            ..ClientConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "max_message_len", .. })
        ));
    }

    #[test]
    fn test_views_carry_channel_names() {
        let config = ClientConfig::default();
        let transport = config.transport();
        let session = config.session();

        assert_eq!(transport.join_destination, "/app/chat.addUser");
        assert_eq!(transport.connect_timeout, Duration::from_secs(5));
        assert_eq!(transport.heartbeat.incoming_ms, 4000);
        assert_eq!(session.topic, "/topic/public");
        assert_eq!(session.send_destination, "/app/chat.sendMessage");
    }
}
