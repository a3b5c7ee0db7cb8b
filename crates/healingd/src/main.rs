//! healingd - Luminous healing daemon
//!
//! Runs as root, listens on a Unix socket and executes whitelisted,
//! HMAC-signed healing actions on behalf of unprivileged clients.

use anyhow::{Context, Result};
use clap::Parser;
use healing_common::HealingConfig;
use healingd::{PrivilegedExecutor, SocketServer};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "healingd")]
#[command(about = "Luminous healing daemon - privileged action executor", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (default: /etc/luminous/healing.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Socket path, overrides configuration and environment
    #[arg(long)]
    socket: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    info!("healingd v{} starting", env!("CARGO_PKG_VERSION"));

    let mut config = match &cli.config {
        Some(path) => {
            let mut config = HealingConfig::load_from_path(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            config.apply_env(|key| std::env::var(key).ok());
            config
        }
        None => HealingConfig::load(),
    };
    if let Some(socket) = cli.socket {
        config.socket_path = socket;
    }

    if config.uses_default_secret() {
        warn!("Using the default shared secret; set LUMINOUS_HEALING_SECRET in production");
    }

    let executor = Arc::new(
        PrivilegedExecutor::from_config(&config)
            .await
            .context("Failed to initialize executor")?,
    );
    let server = SocketServer::bind(&config, executor)?;

    info!("healingd ready");

    server.run_until(shutdown_signal()).await
}

async fn shutdown_signal() {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
        _ = terminate.recv() => info!("Received SIGTERM"),
    }
}
