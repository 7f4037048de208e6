//! Huddle Relay - Broadcast server for huddle chat rooms
//!
//! This crate provides the relay that chat clients connect to:
//! - `config` - Bind address, destinations and limits
//! - `roster` - Shared membership, subscription and presence state
//! - `route` - Validation of published chat events
//! - `server` - TCP listener and per-connection handlers
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   RelayServer   │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐  lock  ┌─────────────────┐
//! │ConnectionHandler│───────▶│     Roster      │
//! │  (per client)   │        │ members/outboxes│
//! └───────┬─────────┘        └───────┬─────────┘
//!         │                          │ broadcast
//!         ▼                          ▼
//! ┌─────────────────┐        ┌─────────────────┐
//! │  writer task    │◀───────│  member outbox  │
//! └─────────────────┘        └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod config;
pub mod error;
pub mod roster;
pub mod route;
pub mod server;

pub use config::RelayConfig;
pub use error::RelayError;
pub use roster::{Roster, SharedRoster};
pub use server::{ConnectionError, RelayServer, ServerError};
