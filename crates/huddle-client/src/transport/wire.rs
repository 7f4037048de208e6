//! TCP transport speaking the huddle relay protocol.
//!
//! After the handshake a background link task owns the socket. It
//! multiplexes:
//! - inbound frames from a dedicated reader task
//! - outbound frames queued by `publish`/`subscribe`
//! - outgoing heartbeat pings
//! - the incoming liveness check
//!
//! and reports lifecycle changes as [`TransportEvent`]s.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use huddle_core::{ChatEvent, Identity};
use huddle_protocol::{
    encode_chat_event, ClientFrame, ProtocolVersion, RelayFrame, MAX_FRAME_SIZE,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, timeout, Instant, Interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{Transport, TransportConfig, TransportEvent};
use crate::error::TransportError;

// ============================================================================
// Connection
// ============================================================================

/// A handshaken socket: write half plus the line feed from its reader task.
struct Connection {
    writer: OwnedWriteHalf,
    write_timeout: Duration,
    lines: mpsc::UnboundedReceiver<io::Result<String>>,
    reader_task: JoinHandle<()>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

impl Connection {
    /// Connects to the relay and completes the handshake for `identity`.
    async fn open(config: &TransportConfig, identity: &Identity) -> Result<Self, TransportError> {
        let addr = config.relay_addr.as_str();
        debug!(relay_addr = addr, %identity, "Connecting to relay");

        let stream = match timeout(config.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(TransportError::Unreachable {
                    addr: addr.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => return Err(TransportError::Timeout(config.connect_timeout)),
        };

        let (reader, writer) = stream.into_split();
        let (line_tx, lines) = mpsc::unbounded_channel();
        let reader_task = tokio::spawn(read_lines(reader, line_tx));

        let mut conn = Self {
            writer,
            write_timeout: config.write_timeout,
            lines,
            reader_task,
        };

        conn.send(&ClientFrame::connect(identity.as_str(), config.heartbeat))
            .await?;

        let reply = match timeout(config.connect_timeout, conn.lines.recv()).await {
            Ok(Some(Ok(line))) => line,
            Ok(Some(Err(e))) => return Err(TransportError::Io(e)),
            Ok(None) => {
                return Err(TransportError::Protocol(
                    "relay closed the connection during handshake".to_string(),
                ))
            }
            Err(_) => return Err(TransportError::Timeout(config.connect_timeout)),
        };

        match serde_json::from_str::<RelayFrame>(&reply)? {
            RelayFrame::Connected {
                protocol_version,
                session_id,
            } => {
                if !ProtocolVersion::CURRENT.is_compatible_with(&protocol_version) {
                    return Err(TransportError::VersionMismatch {
                        client_version: ProtocolVersion::CURRENT.to_string(),
                        relay_version: protocol_version.to_string(),
                    });
                }
                info!(
                    %identity,
                    %session_id,
                    protocol_version = %protocol_version,
                    "Handshake complete"
                );
                Ok(conn)
            }
            RelayFrame::Rejected { reason, .. } => Err(TransportError::Rejected(reason)),
            other => Err(TransportError::Protocol(format!(
                "Unexpected response to connect: {other:?}"
            ))),
        }
    }

    /// Writes one newline-terminated frame.
    ///
    /// Fails with `Timeout` when the relay stops draining the socket.
    async fn send(&mut self, frame: &ClientFrame) -> Result<(), TransportError> {
        let mut json = serde_json::to_string(frame)?;
        json.push('\n');

        let limit = self.write_timeout;
        let writer = &mut self.writer;
        let write = async move {
            writer.write_all(json.as_bytes()).await?;
            writer.flush().await
        };
        match timeout(limit, write).await {
            Ok(result) => result?,
            Err(_) => return Err(TransportError::Timeout(limit)),
        }

        trace!(frame = ?frame.frame, "Sent frame");
        Ok(())
    }
}

/// Reads newline-delimited frames until EOF or error.
///
/// Runs as its own task so the link loop's `select!` only ever waits on a
/// channel, which is cancel safe.
async fn read_lines(reader: OwnedReadHalf, tx: mpsc::UnboundedSender<io::Result<String>>) {
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => return,
            Ok(_) => {
                if line.len() > MAX_FRAME_SIZE {
                    let _ = tx.send(Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("frame too large: {} bytes", line.len()),
                    )));
                    return;
                }
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if tx.send(Ok(trimmed.to_string())).is_err() {
                    return;
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e));
                return;
            }
        }
    }
}

// ============================================================================
// Link Task
// ============================================================================

enum LinkCommand {
    Send(ClientFrame),
    Subscribe(String),
}

/// Why [`drive`] returned.
enum LinkEnd {
    /// `disconnect()` was called or the transport was dropped.
    Closed,
    /// The socket failed or went quiet.
    Dropped(String),
}

/// Everything the link task needs besides the socket itself.
struct LinkContext {
    config: TransportConfig,
    identity: Identity,
    commands: mpsc::UnboundedReceiver<LinkCommand>,
    events: mpsc::UnboundedSender<TransportEvent>,
    cancel: CancellationToken,
    connected: Arc<AtomicBool>,
    subscriptions: Vec<String>,
}

impl LinkContext {
    fn emit(&self, event: TransportEvent) {
        // The receiver only goes away together with the transport.
        let _ = self.events.send(event);
    }

    fn record_subscription(&mut self, channel: String) -> bool {
        if self.subscriptions.contains(&channel) {
            return false;
        }
        self.subscriptions.push(channel);
        true
    }
}

/// Owns the connection until `disconnect()`, reconnecting after drops when
/// enabled.
async fn run_link(mut conn: Connection, mut ctx: LinkContext) {
    loop {
        match drive(&mut conn, &mut ctx).await {
            LinkEnd::Closed => {
                debug!(identity = %ctx.identity, "Link closed");
                return;
            }
            LinkEnd::Dropped(reason) => {
                ctx.connected.store(false, Ordering::SeqCst);
                warn!(identity = %ctx.identity, %reason, "Connection to relay dropped");
                ctx.emit(TransportEvent::Disconnected);

                if !ctx.config.reconnect.enabled {
                    return;
                }
                match reconnect(&mut ctx).await {
                    Some(fresh) => {
                        conn = fresh;
                        ctx.connected.store(true, Ordering::SeqCst);
                        ctx.emit(TransportEvent::Connected);
                    }
                    None => return,
                }
            }
        }
    }
}

/// Waits on an optional interval; pends forever when disabled.
async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn heartbeat_interval(ms: u64) -> Option<Interval> {
    (ms > 0).then(|| {
        let period = Duration::from_millis(ms);
        interval_at(Instant::now() + period, period)
    })
}

/// Runs one connection until it is closed or drops.
async fn drive(conn: &mut Connection, ctx: &mut LinkContext) -> LinkEnd {
    let incoming_ms = ctx.config.heartbeat.incoming_ms;
    let mut ping_interval = heartbeat_interval(ctx.config.heartbeat.outgoing_ms);
    let mut liveness_interval = heartbeat_interval(incoming_ms);
    let silence_limit = Duration::from_millis(incoming_ms.saturating_mul(2));
    let mut last_inbound = Instant::now();
    let mut ping_seq: u64 = 0;

    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => {
                let limit = ctx.config.write_timeout;
                if timeout(limit, flush_and_close(conn, ctx)).await.is_err() {
                    debug!("Relay not draining, closing without flush");
                }
                return LinkEnd::Closed;
            }

            line = conn.lines.recv() => {
                let line = match line {
                    Some(Ok(line)) => line,
                    Some(Err(e)) => return LinkEnd::Dropped(e.to_string()),
                    None => return LinkEnd::Dropped("relay closed the connection".to_string()),
                };
                last_inbound = Instant::now();
                handle_frame(&line, ctx);
            }

            command = ctx.commands.recv() => {
                let frame = match command {
                    Some(LinkCommand::Send(frame)) => frame,
                    Some(LinkCommand::Subscribe(channel)) => {
                        if !ctx.record_subscription(channel.clone()) {
                            continue;
                        }
                        ClientFrame::subscribe(&channel)
                    }
                    None => return LinkEnd::Closed,
                };
                if let Err(e) = conn.send(&frame).await {
                    return LinkEnd::Dropped(e.to_string());
                }
            }

            _ = tick(&mut ping_interval) => {
                ping_seq = ping_seq.wrapping_add(1);
                if let Err(e) = conn.send(&ClientFrame::ping(ping_seq)).await {
                    return LinkEnd::Dropped(e.to_string());
                }
            }

            _ = tick(&mut liveness_interval) => {
                if last_inbound.elapsed() > silence_limit {
                    return LinkEnd::Dropped(format!(
                        "no traffic from relay for {}ms",
                        silence_limit.as_millis()
                    ));
                }
            }
        }
    }
}

/// Writes whatever is still queued, then a `disconnect` frame. Best effort;
/// the relay treats EOF the same way.
async fn flush_and_close(conn: &mut Connection, ctx: &mut LinkContext) {
    while let Ok(command) = ctx.commands.try_recv() {
        let frame = match command {
            LinkCommand::Send(frame) => frame,
            LinkCommand::Subscribe(channel) => {
                if !ctx.record_subscription(channel.clone()) {
                    continue;
                }
                ClientFrame::subscribe(&channel)
            }
        };
        if conn.send(&frame).await.is_err() {
            return;
        }
    }
    let _ = conn.send(&ClientFrame::disconnect()).await;
}

/// Routes one relay frame.
fn handle_frame(line: &str, ctx: &LinkContext) {
    let frame = match serde_json::from_str::<RelayFrame>(line) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "Ignoring unreadable frame from relay");
            return;
        }
    };

    match frame {
        RelayFrame::Message { destination, body } => {
            if ctx.subscriptions.contains(&destination) {
                ctx.emit(TransportEvent::Inbound {
                    channel: destination,
                    payload: body,
                });
            } else {
                debug!(%destination, "Dropping message for unsubscribed destination");
            }
        }
        RelayFrame::Error { message, code } => {
            warn!(%message, code = ?code, "Relay reported an error");
            ctx.emit(TransportEvent::Error(message));
        }
        RelayFrame::Pong { seq } => trace!(seq, "Pong"),
        RelayFrame::Heartbeat => trace!("Relay heartbeat"),
        other => warn!(frame = ?other, "Unexpected frame after handshake"),
    }
}

/// Retries the handshake every `reconnect.delay` until it succeeds or the
/// link is cancelled.
///
/// Presence is not re-announced; subscriptions are restored.
async fn reconnect(ctx: &mut LinkContext) -> Option<Connection> {
    let mut attempt = 0u32;

    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => return None,
            _ = sleep(ctx.config.reconnect.delay()) => {}
        }
        attempt = attempt.saturating_add(1);

        while let Ok(command) = ctx.commands.try_recv() {
            match command {
                LinkCommand::Subscribe(channel) => {
                    ctx.record_subscription(channel);
                }
                LinkCommand::Send(frame) => {
                    debug!(frame = ?frame.frame, "Discarding frame queued before the drop");
                }
            }
        }

        let opened = tokio::select! {
            _ = ctx.cancel.cancelled() => return None,
            opened = Connection::open(&ctx.config, &ctx.identity) => opened,
        };

        let mut conn = match opened {
            Ok(conn) => conn,
            Err(e) => {
                debug!(attempt, error = %e, "Reconnect attempt failed");
                continue;
            }
        };

        let mut restored = true;
        for channel in &ctx.subscriptions {
            if let Err(e) = conn.send(&ClientFrame::subscribe(channel)).await {
                debug!(attempt, %channel, error = %e, "Resubscribe failed");
                restored = false;
                break;
            }
        }

        if restored {
            info!(attempt, identity = %ctx.identity, "Reconnected to relay");
            return Some(conn);
        }
    }
}

// ============================================================================
// Transport Implementation
// ============================================================================

struct Link {
    commands: mpsc::UnboundedSender<LinkCommand>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    connected: Arc<AtomicBool>,
}

/// [`Transport`] over TCP with newline-delimited JSON frames.
pub struct WireTransport {
    config: TransportConfig,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: mpsc::UnboundedReceiver<TransportEvent>,
    link: Option<Link>,
}

impl WireTransport {
    pub fn new(config: TransportConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            config,
            events_tx,
            events_rx,
            link: None,
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// True while a link exists and its socket is up.
    pub fn is_connected(&self) -> bool {
        self.link
            .as_ref()
            .is_some_and(|link| link.connected.load(Ordering::SeqCst))
    }

    fn live_link(&self) -> Result<&Link, TransportError> {
        match &self.link {
            Some(link) if link.connected.load(Ordering::SeqCst) => Ok(link),
            _ => Err(TransportError::NotConnected),
        }
    }

    fn discard_queued_events(&mut self) {
        let mut discarded = 0usize;
        while self.events_rx.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            debug!(discarded, "Discarded events from previous link");
        }
    }
}

impl Drop for WireTransport {
    fn drop(&mut self) {
        if let Some(link) = &self.link {
            link.cancel.cancel();
        }
    }
}

#[async_trait]
impl Transport for WireTransport {
    async fn connect(&mut self, identity: &Identity) -> Result<(), TransportError> {
        if let Some(link) = &self.link {
            if !link.task.is_finished() {
                return Err(TransportError::AlreadyConnected);
            }
            // A link that gave up on its own; clear it out.
            self.link = None;
        }
        self.discard_queued_events();

        let conn = Connection::open(&self.config, identity).await?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        let announce = ChatEvent::join(identity.clone());
        commands
            .send(LinkCommand::Send(ClientFrame::send(
                &self.config.join_destination,
                encode_chat_event(&announce),
            )))
            .map_err(|_| TransportError::NotConnected)?;

        let cancel = CancellationToken::new();
        let connected = Arc::new(AtomicBool::new(true));
        let ctx = LinkContext {
            config: self.config.clone(),
            identity: identity.clone(),
            commands: command_rx,
            events: self.events_tx.clone(),
            cancel: cancel.clone(),
            connected: Arc::clone(&connected),
            subscriptions: Vec::new(),
        };
        let task = tokio::spawn(run_link(conn, ctx));

        self.link = Some(Link {
            commands,
            cancel,
            task,
            connected,
        });
        let _ = self.events_tx.send(TransportEvent::Connected);
        Ok(())
    }

    async fn publish(&mut self, channel: &str, event: &ChatEvent) -> Result<(), TransportError> {
        let link = self.live_link()?;
        link.commands
            .send(LinkCommand::Send(ClientFrame::send(
                channel,
                encode_chat_event(event),
            )))
            .map_err(|_| TransportError::NotConnected)
    }

    async fn subscribe(&mut self, channel: &str) -> Result<(), TransportError> {
        let link = self.link.as_ref().ok_or(TransportError::NotConnected)?;
        link.commands
            .send(LinkCommand::Subscribe(channel.to_string()))
            .map_err(|_| TransportError::NotConnected)
    }

    /// Stops the link. A connection that was still up reports one
    /// `Disconnected`; one that already dropped has reported it.
    async fn disconnect(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };

        let was_up = link.connected.swap(false, Ordering::SeqCst);
        link.cancel.cancel();
        if let Err(e) = link.task.await {
            warn!(error = %e, "Link task ended abnormally");
        }
        self.discard_queued_events();
        if was_up {
            let _ = self.events_tx.send(TransportEvent::Disconnected);
        }
        debug!("Transport disconnected");
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        if self.link.is_none() {
            return self.events_rx.try_recv().ok();
        }
        self.events_rx.recv().await
    }

    fn try_next_event(&mut self) -> Option<TransportEvent> {
        self.events_rx.try_recv().ok()
    }
}
