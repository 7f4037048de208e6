//! Huddle Protocol - Wire protocol between chat clients and the relay
//!
//! Frames are newline-delimited JSON. Chat events travel as the `body`
//! of `send`/`message` frames, encoded with [`encode_chat_event`] and
//! validated on the way in by [`parse_chat_event`].

pub mod frame;
pub mod parse;
pub mod version;

pub use frame::{ClientFrame, FrameType, HeartbeatSpec, RelayFrame};
pub use parse::{encode_chat_event, parse_chat_event, WireChatEvent};
pub use version::ProtocolVersion;

/// Shared broadcast topic every participant subscribes to.
pub const DEFAULT_TOPIC: &str = "/topic/public";

/// Destination for chat messages; the relay rebroadcasts them on the topic.
pub const DEFAULT_SEND_DESTINATION: &str = "/app/chat.sendMessage";

/// Destination for presence announcements.
pub const DEFAULT_JOIN_DESTINATION: &str = "/app/chat.addUser";

/// Maximum accepted frame size (1 MB).
pub const MAX_FRAME_SIZE: usize = 1_048_576;
