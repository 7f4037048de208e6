//! Connection handler for individual chat clients.
//!
//! Each client connection gets its own `ConnectionHandler` that:
//! - Performs protocol version negotiation and identity admission
//! - Parses incoming frames and routes publishes through the roster
//! - Owns a writer task draining the connection's outbox
//! - Sends heartbeats when the client asked for them
//! - Announces the member's departure when the connection closes
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Connection errors are logged and result in graceful disconnect

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use huddle_core::{ChatEvent, Identity};
use huddle_protocol::{
    ClientFrame, FrameType, HeartbeatSpec, ProtocolVersion, RelayFrame, MAX_FRAME_SIZE,
};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::roster::{ConnectionId, Outbox, SharedRoster};
use crate::route::{route_publish, Route};

/// Write timeout (10 seconds)
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection handler for a single client.
pub struct ConnectionHandler {
    reader: BufReader<OwnedReadHalf>,

    /// Write half until the handshake succeeds, then owned by the writer task.
    writer: Option<OwnedWriteHalf>,

    conn: ConnectionId,
    config: Arc<RelayConfig>,
    roster: SharedRoster,
    cancel_token: CancellationToken,

    /// Identity claimed in the handshake.
    identity: Option<Identity>,

    outbox: Option<Outbox>,
    writer_task: Option<JoinHandle<()>>,
    heartbeat_cancel: Option<CancellationToken>,
    read_timeout: Duration,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        conn: ConnectionId,
        config: Arc<RelayConfig>,
        roster: SharedRoster,
        cancel_token: CancellationToken,
    ) -> Self {
        let (reader, writer) = stream.into_split();
        let read_timeout = config.idle_timeout;
        Self {
            reader: BufReader::new(reader),
            writer: Some(writer),
            conn,
            config,
            roster,
            cancel_token,
            identity: None,
            outbox: None,
            writer_task: None,
            heartbeat_cancel: None,
            read_timeout,
        }
    }

    /// Runs the connection until the client leaves, the link fails or the
    /// relay shuts down.
    ///
    /// Returns the identity the connection was admitted with, if any.
    pub async fn run(mut self) -> Option<Identity> {
        debug!(conn = self.conn, "New client connected");

        if let Err(e) = self.handle_handshake().await {
            warn!(conn = self.conn, error = %e, "Handshake failed");
            self.cleanup().await;
            return None;
        }
        info!(conn = self.conn, identity = ?self.identity_str(), "Client joined relay");

        if let Err(e) = self.process_frames().await {
            debug!(conn = self.conn, identity = ?self.identity_str(), error = %e, "Connection closed");
        }

        self.cleanup().await;
        info!(conn = self.conn, identity = ?self.identity_str(), "Client disconnected");
        self.identity
    }

    fn identity_str(&self) -> Option<&str> {
        self.identity.as_ref().map(Identity::as_str)
    }

    // ------------------------------------------------------------------------
    // Handshake
    // ------------------------------------------------------------------------

    /// Expects a `connect` frame, validates version and identity, and
    /// admits the connection to the roster.
    async fn handle_handshake(&mut self) -> Result<(), ConnectionError> {
        let frame = match timeout(self.config.handshake_timeout, self.read_frame()).await {
            Ok(frame) => frame?,
            Err(_) => return Err(ConnectionError::Timeout),
        };

        let client_version = frame.protocol_version;
        if !client_version.is_compatible_with(&ProtocolVersion::CURRENT) {
            warn!(
                client_version = %client_version,
                relay_version = %ProtocolVersion::CURRENT,
                "Protocol version mismatch"
            );
            self.reject(&format!(
                "Protocol version {} not compatible with relay version {}",
                client_version,
                ProtocolVersion::CURRENT
            ))
            .await?;
            return Err(ConnectionError::VersionMismatch {
                client: client_version,
                relay: ProtocolVersion::CURRENT,
            });
        }

        let (claimed, heartbeat) = match frame.frame {
            FrameType::Connect {
                identity,
                heartbeat,
            } => (identity, heartbeat),
            other => {
                self.reject("Expected connect frame for handshake").await?;
                return Err(ConnectionError::UnexpectedFrame(format!("{other:?}")));
            }
        };

        let identity = match Identity::parse(&claimed) {
            Ok(identity) => identity,
            Err(e) => {
                self.reject(&e.to_string()).await?;
                return Err(ConnectionError::Refused(e.to_string()));
            }
        };

        let (outbox, outbox_rx) = mpsc::unbounded_channel();
        let admitted = self.roster.lock().await.admit(
            self.conn,
            identity.clone(),
            outbox.clone(),
            self.config.max_clients,
        );
        if let Err(e) = admitted {
            self.reject(&e.to_string()).await?;
            return Err(ConnectionError::Refused(e.to_string()));
        }

        // Nothing else can be queued yet: the member has no subscriptions.
        let _ = outbox.send(RelayFrame::connected(format!("session-{}", self.conn)));

        let writer = self.writer.take().ok_or(ConnectionError::Eof)?;
        self.writer_task = Some(tokio::spawn(write_frames(writer, outbox_rx, self.conn)));
        self.start_heartbeat(&outbox, heartbeat);
        self.read_timeout = self.config.read_timeout(heartbeat.outgoing_ms);
        self.outbox = Some(outbox);
        self.identity = Some(identity);
        Ok(())
    }

    /// Sends a `rejected` frame straight to the socket.
    async fn reject(&mut self, reason: &str) -> Result<(), ConnectionError> {
        let writer = self.writer.as_mut().ok_or(ConnectionError::Eof)?;
        write_frame(writer, &RelayFrame::rejected(reason)).await
    }

    fn start_heartbeat(&mut self, outbox: &Outbox, heartbeat: HeartbeatSpec) {
        if heartbeat.incoming_ms == 0 {
            return;
        }
        let cancel = self.cancel_token.child_token();
        tokio::spawn(send_heartbeats(
            outbox.clone(),
            Duration::from_millis(heartbeat.incoming_ms),
            cancel.clone(),
        ));
        self.heartbeat_cancel = Some(cancel);
    }

    // ------------------------------------------------------------------------
    // Frame Loop
    // ------------------------------------------------------------------------

    async fn process_frames(&mut self) -> Result<(), ConnectionError> {
        let cancel = self.cancel_token.clone();
        loop {
            let read = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(conn = self.conn, "Relay shutting down, closing connection");
                    return Ok(());
                }
                read = timeout(self.read_timeout, self.read_frame()) => read,
            };

            let frame = match read {
                Ok(Ok(frame)) => frame,
                Ok(Err(ConnectionError::Eof)) => {
                    debug!(conn = self.conn, "Client sent EOF");
                    return Ok(());
                }
                Ok(Err(ConnectionError::Parse(reason))) => {
                    warn!(conn = self.conn, %reason, "Unreadable frame");
                    self.push(RelayFrame::error_with_code(&reason, "malformed_frame"));
                    continue;
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(ConnectionError::Timeout),
            };

            if !self.handle_frame(frame).await {
                return Ok(());
            }
        }
    }

    /// Handles one frame. Returns false when the client asked to leave.
    async fn handle_frame(&mut self, frame: ClientFrame) -> bool {
        match frame.frame {
            FrameType::Connect { .. } => {
                self.push(RelayFrame::error("Already connected"));
            }

            FrameType::Subscribe { destination } => {
                let mut roster = self.roster.lock().await;
                if roster.subscribe(self.conn, &destination) && destination == self.config.topic {
                    let replayed = roster.replay_presence(self.conn, &destination, Utc::now());
                    debug!(conn = self.conn, %destination, replayed, "Subscribed to topic");
                }
            }

            FrameType::Unsubscribe { destination } => {
                self.roster.lock().await.unsubscribe(self.conn, &destination);
            }

            FrameType::Send { destination, body } => {
                self.handle_publish(&destination, &body).await;
            }

            FrameType::Ping { seq } => {
                self.push(RelayFrame::pong(seq));
            }

            FrameType::Disconnect => {
                debug!(conn = self.conn, "Client requested disconnect");
                return false;
            }
        }
        true
    }

    async fn handle_publish(&mut self, destination: &str, body: &str) {
        let Some(identity) = self.identity.as_ref() else {
            return;
        };

        match route_publish(&self.config, identity, destination, body, Utc::now()) {
            Ok(Route::Announce(event)) => {
                let mut roster = self.roster.lock().await;
                if roster.announce(self.conn) {
                    info!(conn = self.conn, %identity, "Member announced presence");
                }
                roster.broadcast(&self.config.topic, &event);
            }
            Ok(Route::Chat(event)) => {
                self.roster
                    .lock()
                    .await
                    .broadcast(&self.config.topic, &event);
            }
            Err(e) => {
                warn!(conn = self.conn, %identity, destination, error = %e, "Publish refused");
                self.push(RelayFrame::error_with_code(&e.to_string(), e.code()));
            }
        }
    }

    /// Queues a frame for this connection only.
    fn push(&self, frame: RelayFrame) {
        if let Some(outbox) = &self.outbox {
            let _ = outbox.send(frame);
        }
    }

    /// Reads and parses one frame.
    async fn read_frame(&mut self) -> Result<ClientFrame, ConnectionError> {
        let mut line = String::new();

        let bytes_read = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        if bytes_read == 0 {
            return Err(ConnectionError::Eof);
        }

        if line.len() > MAX_FRAME_SIZE {
            return Err(ConnectionError::FrameTooLarge {
                size: line.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        let frame: ClientFrame =
            serde_json::from_str(&line).map_err(|e| ConnectionError::Parse(e.to_string()))?;

        debug!(
            conn = self.conn,
            frame_type = ?std::mem::discriminant(&frame.frame),
            "Received frame"
        );

        Ok(frame)
    }

    // ------------------------------------------------------------------------
    // Cleanup
    // ------------------------------------------------------------------------

    /// Leaves the roster, announces the departure and lets the writer task
    /// flush what is left.
    async fn cleanup(&mut self) {
        if let Some(cancel) = self.heartbeat_cancel.take() {
            cancel.cancel();
        }

        {
            let mut roster = self.roster.lock().await;
            if let Some(departed) = roster.remove(self.conn) {
                if departed.was_announced {
                    let leave = ChatEvent::leave(departed.identity).with_timestamp(Utc::now());
                    roster.broadcast(&self.config.topic, &leave);
                }
            }
        }

        self.outbox = None;
        if let Some(task) = self.writer_task.take() {
            if timeout(WRITE_TIMEOUT, task).await.is_err() {
                debug!(conn = self.conn, "Writer task did not finish in time");
            }
        }
    }
}

/// Drains an outbox onto the socket until every sender is gone.
async fn write_frames(
    writer: OwnedWriteHalf,
    mut outbox: mpsc::UnboundedReceiver<RelayFrame>,
    conn: ConnectionId,
) {
    let mut writer = BufWriter::new(writer);

    while let Some(frame) = outbox.recv().await {
        if let Err(e) = write_frame(&mut writer, &frame).await {
            debug!(conn, error = %e, "Write failed, closing outbox");
            return;
        }
    }

    let _ = writer.shutdown().await;
}

async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &RelayFrame,
) -> Result<(), ConnectionError> {
    let json = serde_json::to_string(frame).map_err(|e| ConnectionError::Parse(e.to_string()))?;

    match timeout(WRITE_TIMEOUT, async {
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok::<(), std::io::Error>(())
    })
    .await
    {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ConnectionError::Io(e.to_string())),
        Err(_) => Err(ConnectionError::WriteTimeout),
    }
}

/// Queues a heartbeat every `every` until cancelled or the outbox closes.
async fn send_heartbeats(outbox: Outbox, every: Duration, cancel: CancellationToken) {
    let mut ticker = interval_at(Instant::now() + every, every);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                if outbox.send(RelayFrame::Heartbeat).is_err() {
                    return;
                }
            }
        }
    }
}

/// Errors that can occur while serving a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Protocol version mismatch: client {client}, relay {relay}")]
    VersionMismatch {
        client: ProtocolVersion,
        relay: ProtocolVersion,
    },

    #[error("Unexpected frame: {0}")]
    UnexpectedFrame(String),

    #[error("Handshake refused: {0}")]
    Refused(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection closed")]
    Eof,

    #[error("Read timeout")]
    Timeout,

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },
}
