//! TCP server for the huddle relay.
//!
//! The server:
//! - Listens on a TCP socket for client connections
//! - Spawns a ConnectionHandler for each client
//! - Shares one Roster between handlers for presence and broadcasts
//! - Supports graceful shutdown via CancellationToken
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Server errors are logged and allow continued operation

mod connection;

pub use connection::{ConnectionError, ConnectionHandler};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RelayConfig;
use crate::roster::{ConnectionId, Roster, SharedRoster};

/// How long shutdown waits for connection handlers to finish.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Broadcast relay for one chat room.
pub struct RelayServer {
    listener: TcpListener,
    config: Arc<RelayConfig>,
    roster: SharedRoster,
    cancel_token: CancellationToken,
    next_connection: ConnectionId,
}

impl RelayServer {
    /// Binds the listener. Use port 0 to let the OS pick one.
    pub async fn bind(
        config: RelayConfig,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        let listener =
            TcpListener::bind(config.bind_addr.as_str())
                .await
                .map_err(|e| ServerError::Bind {
                    addr: config.bind_addr.clone(),
                    error: e.to_string(),
                })?;

        Ok(Self {
            listener,
            config: Arc::new(config),
            roster: Roster::shared(),
            cancel_token,
            next_connection: 0,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(ServerError::Io)
    }

    /// Handle to the shared roster.
    pub fn roster(&self) -> SharedRoster {
        Arc::clone(&self.roster)
    }

    /// Accepts connections until the cancellation token is triggered, then
    /// waits for open connections to close.
    pub async fn run(mut self) -> Result<(), ServerError> {
        info!(addr = ?self.listener.local_addr().ok(), "Relay listening");

        let mut handlers = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Relay shutdown requested");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            self.next_connection += 1;
                            debug!(conn = self.next_connection, %peer, "Accepted connection");
                            handlers.spawn(self.handle_connection(stream, self.next_connection));
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }

                // Reap finished handlers so the set does not grow unbounded.
                Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "Connection task failed");
                    }
                }
            }
        }

        let drain = async {
            while let Some(joined) = handlers.join_next().await {
                if let Err(e) = joined {
                    warn!(error = %e, "Connection task failed during shutdown");
                }
            }
        };
        if timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!("Connections still open after shutdown grace period, aborting");
            handlers.shutdown().await;
        }

        info!("Relay stopped");
        Ok(())
    }

    fn handle_connection(
        &self,
        stream: TcpStream,
        conn: ConnectionId,
    ) -> impl std::future::Future<Output = ()> + Send + 'static {
        let handler = ConnectionHandler::new(
            stream,
            conn,
            Arc::clone(&self.config),
            Arc::clone(&self.roster),
            self.cancel_token.child_token(),
        );
        async move {
            if let Some(identity) = handler.run().await {
                debug!(conn, %identity, "Connection finished");
            }
        }
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: String, error: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
