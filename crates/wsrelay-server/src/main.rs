//! wsrelay: multi-binding TCP relay behind a WebSocket-style upgrade.
//!
//! Listens on every configured binding, optionally reroutes each connection
//! to the host named in its `X-Real-Host` header, answers with a synthetic
//! `101 Switching Protocols` handshake and then relays raw bytes until
//! either side closes or the tunnel goes idle.

mod config;
mod listener;
mod server;
mod session;
mod tunnel;

use anyhow::Context;
use clap::Parser;
use server::RelayServer;
use std::path::PathBuf;
use tracing::{error, info, warn};
use wsrelay_core::{IndexedEndpoint, SettingsOverrides};

/// wsrelay: index-based TCP relay with a WebSocket upgrade handshake
#[derive(Parser, Debug)]
#[command(
    name = "wsrelay",
    version,
    about = "Index-based TCP relay with a WebSocket upgrade handshake",
    after_help = "Examples:\n  wsrelay -f config.json\n  wsrelay -b 0:0.0.0.0:80 -l 0:127.0.0.1:22\n  wsrelay -b 1:0.0.0.0:8080 -l 1:127.0.0.1:143"
)]
struct Cli {
    /// JSON config file
    #[arg(short = 'f', long = "file")]
    file: Option<PathBuf>,

    /// Listen binding as index:addr:port (repeatable, overrides the file per index)
    #[arg(short = 'b', long = "bind", value_name = "INDEX:ADDR:PORT")]
    bind: Vec<IndexedEndpoint>,

    /// Default target as index:host:port (repeatable, overrides the file per index)
    #[arg(short = 'l', long = "listen", value_name = "INDEX:HOST:PORT")]
    listen: Vec<IndexedEndpoint>,

    /// Relay buffer size in bytes
    #[arg(long)]
    buffer: Option<usize>,

    /// Idle timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Target connect timeout in seconds
    #[arg(long)]
    connect_timeout: Option<u64>,

    /// Header used to reroute a connection
    #[arg(long)]
    route_header: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting wsrelay");

    if let Err(e) = run(cli).await {
        error!(error = %format!("{e:#}"), "wsrelay failed");
        std::process::exit(1);
    }

    info!("wsrelay stopped");
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let overrides = SettingsOverrides {
        buffer_size: cli.buffer,
        idle_timeout_secs: cli.timeout,
        connect_timeout_secs: cli.connect_timeout,
        route_header: cli.route_header,
    };
    let relay_config = config::load(cli.file.as_deref(), &cli.bind, &cli.listen, overrides)
        .context("failed to load configuration")?;
    config::log_summary(&relay_config);

    let mut server = RelayServer::new(relay_config);
    server.start().await.context("failed to start listeners")?;
    info!(addrs = ?server.local_addrs(), "accepting connections");

    shutdown_signal().await;
    info!("received shutdown signal");

    server.stop();
    server.join().await;
    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "cannot install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
