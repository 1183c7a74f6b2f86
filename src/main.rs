use payment_idempotency::api::{create_router, AppState};
use payment_idempotency::config::Settings;
use payment_idempotency::error::Result;
use payment_idempotency::idempotency::{IdempotencyCleanupJob, InMemoryIdempotencyStore};
use payment_idempotency::observability::{init_logging, init_metrics, LogConfig};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = Settings::new()?;

    // Initialize logging
    init_logging(&LogConfig::from(&settings.application))?;
    info!("Configuration loaded");

    let metrics_handle = init_metrics()?;
    info!("Prometheus recorder installed");

    let store = Arc::new(InMemoryIdempotencyStore::new());
    let sweep = IdempotencyCleanupJob::new(store.clone(), settings.idempotency.sweep_interval()).start();
    info!(
        interval_seconds = settings.idempotency.sweep_interval_seconds,
        "Idempotency sweep job started"
    );

    let state = AppState::new(store, settings.idempotency.clone()).with_metrics(metrics_handle);
    let router = create_router(state)?;

    let address = format!("{}:{}", settings.application.host, settings.application.port);
    let listener = TcpListener::bind(&address).await?;
    info!("Listening on {}", address);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweep.abort();
    info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}
