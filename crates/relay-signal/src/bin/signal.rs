//! Relay Signal Server
//!
//! WebSocket rendezvous server for device discovery and signaling relay.
//!
//! # Usage
//!
//! ```bash
//! # Defaults, or the platform config file if present
//! relay-signal --port 3000
//!
//! # Explicit config file, JSON logs
//! relay-signal --config /etc/relay/config.toml --json
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use relay_core::Config;
use relay_signal::SignalServer;

#[derive(Parser, Debug)]
#[command(name = "relay-signal")]
#[command(about = "Rendezvous and signaling relay for device discovery")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Bind address (overrides the config file)
    #[arg(short, long)]
    bind: Option<IpAddr>,

    /// Config file path (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log as JSON
    #[arg(long)]
    json: bool,

    /// Print a sample config file and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.print_config {
        print!("{}", Config::sample()?);
        return Ok(());
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(args.json.then(|| fmt::layer().json()))
        .with((!args.json).then(|| fmt::layer()))
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::load(),
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }

    let addr = SocketAddr::new(config.server.bind, config.server.port);

    info!("Starting Relay Signal Server");
    info!("Listening on {}", addr);
    if config.negotiation.track_requests {
        info!(
            "Tracking connection requests (ttl {}s)",
            config.negotiation.request_ttl_secs
        );
    }

    let server = SignalServer::new(&config);
    tokio::select! {
        result = server.serve(addr) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}
