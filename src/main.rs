//! # netresolv - resolver merge daemon
//!
//! ## Startup
//!
//! 1. **Tracing** - `RUST_LOG` filter, `info` by default
//! 2. **Configuration** - TOML file plus environment overrides
//! 3. **Store** - in-memory resource store seeded with the configured layers
//! 4. **Supervisor** - runs the resolver merge controller with restart backoff
//!
//! ## Shutdown
//!
//! Ctrl+C cancels the shared `CancellationToken`; the controller finishes its
//! current pass and the supervisor returns.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use netresolv::cli::{Cli, Commands};
use netresolv::config::DaemonConfig;
use netresolv::daemon;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => {
            let config = DaemonConfig::load(config.as_deref())?;
            run(config).await
        }
        Commands::Merge { config } => {
            let config = DaemonConfig::load(config.as_deref())?;
            let merged = daemon::merge_once(&config).await?;
            let json = serde_json::to_string_pretty(&merged)
                .context("Failed to serialize merged resolvers")?;
            println!("{json}");
            Ok(())
        }
    }
}

async fn run(config: DaemonConfig) -> Result<()> {
    info!(layers = config.layers.len(), "netresolv starting...");

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown().await;
        signal_token.cancel();
    });

    info!("netresolv is running. Press Ctrl+C to stop.");
    daemon::run(config, shutdown).await?;

    info!("netresolv stopped gracefully");
    Ok(())
}

/// Initialize tracing subscriber with environment filter.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Wait for shutdown signal (Ctrl+C).
async fn wait_for_shutdown() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
        Err(err) => error!("Failed to listen for shutdown signal: {}", err),
    }
}
