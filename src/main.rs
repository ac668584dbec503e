use std::sync::Arc;

use artery::cli::CliArgs;
use artery::config::ProxyConfig;
use artery::error::AppError;
use artery::server::{self, AppState};
use artery_engine::{ArtifactStore, Downloader};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use url::Url;

fn main() {
    if let Err(e) = bootstrap() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn bootstrap() -> Result<(), AppError> {
    let args = CliArgs::parse();

    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| AppError::Initialization(e.to_string()))?;

    let config = ProxyConfig::from_args(&args)?;
    info!(
        store_root = %config.store_root.display(),
        upstreams = ?config.upstreams.iter().map(Url::as_str).collect::<Vec<_>>(),
        negative_cache_secs = config.failed_path_cache.as_secs(),
        "starting artery"
    );

    let store = ArtifactStore::open(&config.store_root).await?;
    let downloader = Arc::new(Downloader::new(config.download_config(), store.clone())?);
    let state = AppState { store, downloader };

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, server::app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
