use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use codesmith_core::init_tracing;
use codesmithd::{router, AppState, Settings};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "codesmithd")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Multi-agent code assistant daemon", long_about = None)]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, env = "CODESMITH_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address; overrides `daemon.bind`
    #[arg(long, env = "CODESMITH_BIND")]
    bind: Option<String>,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

async fn shutdown_signal(token: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::warn!("ctrl-c handler unavailable; waiting for cancellation only");
        token.cancelled().await;
    }
    info!("shutting down");
    token.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(cli.json, level);

    let settings = Settings::load(cli.config.as_deref())?;
    let bind = cli.bind.unwrap_or_else(|| settings.daemon.bind.clone());
    let repos = settings.daemon.repos.len();
    let state = AppState::from_settings(settings)?;
    if state.orchestrator.start_keep_warm().await {
        info!("keep-warm enabled");
    }

    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(%bind, repos, "codesmithd listening");

    axum::serve(listener, router(state.clone()))
        .with_graceful_shutdown(shutdown_signal(state.shutdown.clone()))
        .await
        .context("server error")?;

    state.orchestrator.shutdown().await;
    Ok(())
}
