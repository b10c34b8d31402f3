mod state;
mod ws;

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::routing::{any, get};
use axum::Router;
use clap::Parser;
use miette::{IntoDiagnostic, Result};
use tracing::info;

use haven_core::PipelineConfig;

use crate::state::AppState;
use crate::ws::ws_handler;

#[derive(Parser)]
#[command(name = "haven-server")]
#[command(about = "Haven conversation pipeline server")]
#[command(version)]
struct Cli {
    /// Configuration file path (TOML)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();
    miette::set_panic_hook();
    let cli = Cli::parse();

    let default_filter = if cli.debug {
        "haven_core=debug,haven_server=debug,info"
    } else {
        "haven_core=info,haven_server=info,warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    let config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    let state = AppState::new(config);

    let app = Router::new()
        .route("/ws", any(ws_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state);

    info!(addr = %cli.bind, "listening");
    let listener = tokio::net::TcpListener::bind(cli.bind)
        .await
        .into_diagnostic()?;
    axum::serve(listener, app).await.into_diagnostic()?;
    Ok(())
}
