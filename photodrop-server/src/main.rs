mod cleanup;
mod config;
mod error;
mod http;
mod shutdown;
mod state;
mod storage;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::storage::UploadStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("photodrop_server=info".parse()?),
        )
        .init();

    let config = Config::parse();

    let store = UploadStore::open(&config.upload_dir)
        .await
        .context("failed to prepare upload directory")?;
    tracing::info!(root = %store.root().display(), "storing uploads");

    let state = Arc::new(state::AppState::new(store, config.port));

    let sweeper = match config.sweep_settings() {
        Some(settings) => {
            tracing::info!(
                interval_secs = settings.interval.as_secs(),
                max_age_secs = settings.max_age.as_secs(),
                "retention sweeper enabled"
            );
            let cleanup_state = state.clone();
            let shutdown = state.subscribe_shutdown();
            Some(tokio::spawn(async move {
                cleanup::cleanup_loop(cleanup_state, settings, shutdown).await;
            }))
        }
        None => {
            tracing::info!("retention sweeper disabled");
            None
        }
    };

    let app = http::router(state.clone(), config.request_timeout());
    http::run_http_server(
        config.bind_addr(),
        app,
        shutdown::shutdown_signal(state.clone()),
    )
    .await
    .with_context(|| format!("HTTP server on {} failed", config.bind_addr()))?;

    state.shutdown();
    if let Some(sweeper) = sweeper
        && let Err(e) = sweeper.await
    {
        tracing::warn!(error = %e, "retention sweeper task failed");
    }

    Ok(())
}
