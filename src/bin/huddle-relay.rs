//! huddle relay - broadcast server for one chat room
//!
//! Accepts client connections, enforces unique display names, replays
//! presence to newcomers and fans every published event out to all
//! subscribers.
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default address (or $HUDDLE_RELAY_BIND)
//! huddle-relay
//!
//! # Listen on every interface
//! huddle-relay --bind 0.0.0.0:8080
//! ```

use std::process;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use huddle_relay::{RelayConfig, RelayServer};

/// huddle relay - group chat broadcast server
#[derive(Parser, Debug)]
#[command(name = "huddle-relay", version, about)]
struct Args {
    /// Address to listen on (overrides $HUDDLE_RELAY_BIND)
    #[arg(short, long)]
    bind: Option<String>,

    /// Maximum number of simultaneous clients
    #[arg(long)]
    max_clients: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("huddle_relay=info".parse()?)
                .add_directive("huddle_core=info".parse()?)
                .add_directive("huddle_protocol=info".parse()?),
        )
        .init();

    let mut config = RelayConfig::from_env();
    if let Some(bind) = args.bind {
        config = config.with_bind_addr(bind);
    }
    if let Some(max_clients) = args.max_clients {
        config.max_clients = max_clients;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        bind = %config.bind_addr,
        max_clients = config.max_clients,
        "huddle relay starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let server = RelayServer::bind(config, cancel_token).await?;

    if let Err(e) = server.run().await {
        error!(error = %e, "Relay error");
        return Err(e.into());
    }

    info!("huddle relay stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
