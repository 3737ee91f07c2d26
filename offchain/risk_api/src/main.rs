use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use margin_engine::EngineConfig;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod error;
mod routes;

#[derive(Parser, Debug)]
#[command(name = "risk-api", about = "Margin valuation and risk forecasts over HTTP")]
struct Args {
    #[arg(long, env = "RISK_API_BIND", default_value = "0.0.0.0:8787")]
    bind: String,

    /// JSON engine configuration; defaults apply when omitted.
    #[arg(long, env = "RISK_API_CONFIG")]
    config: Option<PathBuf>,

    /// Used when RUST_LOG is not set.
    #[arg(long, env = "RISK_API_LOG", default_value = "info")]
    log_filter: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading engine config from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    info!(target: "risk_api", ?config, "engine config loaded");

    let app = routes::router(routes::AppState {
        config: Arc::new(config),
    });
    let listener = TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("binding {}", args.bind))?;
    info!("Listening on {}", args.bind);
    axum::serve(listener, app).await?;
    Ok(())
}
