//! durakv server entry point.
//!
//! Replays the transaction log into the store, then serves the REST API
//! until Ctrl-C or the first asynchronous persistence failure.

use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tokio::sync::{mpsc, oneshot};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use durakv::api;
use durakv::app_state::AppState;
use durakv::config::AppConfig;
use durakv::domain::KvStore;
use durakv::error::LogError;
use durakv::persistence::init_logger;
use durakv::service::KvService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config =
        AppConfig::from_env().map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    tracing::info!(addr = %config.listen_addr, log = ?config.log.backend, "starting durakv");

    // Rebuild state from the log before accepting traffic
    let store = Arc::new(KvStore::new(config.limits));
    tracing::info!(
        max_key_size = store.limits().max_key_size,
        max_value_size = store.limits().max_value_size,
        "store limits"
    );
    let (logger, summary) = init_logger(&config.log, store.as_ref())
        .await
        .context("transaction log recovery failed")?;
    tracing::info!(
        events = summary.events,
        keys = store.len().await,
        "store recovered"
    );
    let Some(mut log_errors) = logger.errors().await else {
        anyhow::bail!("transaction log error channel already taken");
    };

    // Build application state
    let kv_service = Arc::new(KvService::new(Arc::clone(&store), Arc::clone(&logger)));
    let app_state = AppState { kv_service };

    // Build router
    let app = Router::new()
        .merge(api::build_router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    let (fatal_tx, fatal_rx) = oneshot::channel();
    let shutdown = async move {
        let _ = fatal_tx.send(wait_for_shutdown(&mut log_errors).await);
    };
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    // Persist whatever is still queued, then release the backend
    let closed = logger.close().await;
    if let Some(err) = fatal_rx.await.ok().flatten() {
        return Err(anyhow::Error::new(err).context("transaction log failed"));
    }
    closed.context("failed to close transaction log")?;
    tracing::info!("shutdown complete");
    Ok(())
}

/// Resolves on Ctrl-C (returning `None`) or on the first persistence
/// failure reported by the logger.
async fn wait_for_shutdown(log_errors: &mut mpsc::Receiver<LogError>) -> Option<LogError> {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
            None
        }
        Some(err) = log_errors.recv() => {
            tracing::error!(error = %err, "transaction log failed, shutting down");
            Some(err)
        }
    }
}
