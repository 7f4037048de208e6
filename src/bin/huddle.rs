//! huddle - line-mode group chat client
//!
//! Plain lines are sent to the room; lines starting with `/` are commands.
//!
//! # Usage
//!
//! ```text
//! huddle               # start idle, then /join NAME
//! huddle alice         # join immediately as alice
//! huddle --relay 10.0.0.5:8080 alice
//! ```
//!
//! Commands: `/join NAME`, `/leave`, `/who`, `/error`, `/clear`, `/quit`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use huddle_client::{
    ClientConfig, ConnectionChange, DisconnectReason, EventClass, Notification, Session,
    TransportEvent, WireTransport,
};
use huddle_core::{ChatEvent, EventKind};

// ============================================================================
// CLI Arguments
// ============================================================================

/// huddle - real-time group chat
#[derive(Parser, Debug)]
#[command(name = "huddle", version, about)]
struct Args {
    /// Display name to join with right away
    name: Option<String>,

    /// Path to a client.toml (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Relay address, overriding config and $HUDDLE_RELAY_ADDR
    #[arg(short, long)]
    relay: Option<String>,
}

// ============================================================================
// Rendering
// ============================================================================

fn render_event(event: &ChatEvent) -> String {
    let sender = event.sender();
    match event.kind() {
        EventKind::Chat => {
            let time = event
                .timestamp()
                .map(|t| t.with_timezone(&Local).format("%H:%M").to_string())
                .unwrap_or_else(|| "--:--".to_string());
            format!("[{time}] {sender}: {}", event.content().unwrap_or_default())
        }
        EventKind::Join => format!("* {sender} joined"),
        EventKind::Leave => format!("* {sender} left"),
    }
}

const HELP: &str = "commands: /join NAME, /leave, /who, /error, /clear, /quit";

/// Registers the printing observers. Observers are dropped with the
/// session, so this runs before every connect.
fn register_observers(session: &mut Session<WireTransport>) {
    session.subscribe(EventClass::Message, |n| {
        if let Notification::Message(event) = n {
            println!("{}", render_event(event));
        }
        Ok(())
    });

    session.subscribe(EventClass::Connection, |n| {
        match n {
            Notification::Connection(ConnectionChange::Connected) => {
                println!("* connected");
            }
            Notification::Connection(ConnectionChange::Disconnected(
                DisconnectReason::Requested,
            )) => {
                println!("* disconnected");
            }
            Notification::Connection(ConnectionChange::Disconnected(DisconnectReason::Lost)) => {
                println!("* connection lost, use /join to reconnect");
            }
            _ => {}
        }
        Ok(())
    });

    session.subscribe(EventClass::Error, |n| {
        if let Notification::Error(e) = n {
            println!("! {}", e.user_message());
            debug!(error = %e, "Session error");
        }
        Ok(())
    });
}

// ============================================================================
// Commands
// ============================================================================

/// Handles one input line. Returns false when the user asked to quit.
async fn handle_line(session: &mut Session<WireTransport>, line: &str) -> bool {
    let line = line.trim();
    if line.is_empty() {
        return true;
    }

    let Some(command) = line.strip_prefix('/') else {
        if !session.is_connected() {
            println!("! not connected, use /join NAME");
        } else if let Err(e) = session.send(line).await {
            println!("! {} ({e})", e.user_message());
        }
        return true;
    };

    let (name, arg) = command
        .split_once(char::is_whitespace)
        .map(|(name, arg)| (name, arg.trim()))
        .unwrap_or((command, ""));

    match name {
        "join" => join(session, arg).await,
        "leave" => session.disconnect().await,
        "who" => {
            let online = session.with_room(|room| {
                room.online_users()
                    .iter()
                    .map(|user| user.to_string())
                    .collect::<Vec<_>>()
            });
            if online.is_empty() {
                println!("* nobody here");
            } else {
                println!("* online: {}", online.join(", "));
            }
        }
        "error" => match session.last_error() {
            Some(e) => println!("! {} ({e})", e.user_message()),
            None => println!("* no error"),
        },
        "clear" => session.clear_error(),
        "quit" => return false,
        "help" => println!("{HELP}"),
        _ => println!("! unknown command /{name}; {HELP}"),
    }
    true
}

async fn join(session: &mut Session<WireTransport>, name: &str) {
    if session.is_connected() {
        println!("! already connected, use /leave first");
        return;
    }
    if session.handler_count() == 0 {
        register_observers(session);
    }
    match session.connect(name).await {
        Ok(()) => info!(identity = %name, "Joined"),
        Err(e) => println!("! {} ({e})", e.user_message()),
    }
}

// ============================================================================
// Main Loop
// ============================================================================

enum Input {
    Transport(TransportEvent),
    Line(Option<String>),
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let mut config =
        ClientConfig::load(args.config.as_deref()).context("Failed to load client config")?;
    if let Some(relay) = args.relay {
        config.relay_addr = relay;
        config.validate().context("Invalid relay address")?;
    }
    info!(relay = %config.relay_addr, "huddle starting");

    let mut session = Session::new(config.session(), WireTransport::new(config.transport()));

    if let Some(name) = args.name.as_deref() {
        join(&mut session, name).await;
    } else {
        println!("* {HELP}");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let input = tokio::select! {
            event = session.recv_event() => Input::Transport(event),
            line = lines.next_line() => Input::Line(line.context("Failed to read stdin")?),
        };

        match input {
            Input::Transport(event) => session.handle_event(event).await,
            Input::Line(Some(line)) => {
                if !handle_line(&mut session, &line).await {
                    break;
                }
            }
            Input::Line(None) => break,
        }
    }

    session.disconnect().await;
    Ok(())
}
