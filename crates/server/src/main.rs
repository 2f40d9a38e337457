//! Waitline server - hospital queue wait-time prediction service
//!
//! Serves wait-time estimates over HTTP, training per-department models from
//! the queue database on first use and caching them on disk.

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use waitline_lib::{
    health::HealthRegistry,
    observability::StructuredLogger,
    predictor::{FsModelStore, WaitTimeService},
    repository::MySqlQueueRepository,
};
use waitline_server::{api, config::ServiceConfig};

const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting waitline-server");

    let config = ServiceConfig::load()?;
    info!(
        addr = %config.bind_addr(),
        model_dir = %config.model_dir,
        "Server configured"
    );

    let repository = Arc::new(MySqlQueueRepository::connect_lazy(
        &config.database_url,
        config.db_max_connections,
    )?);
    let store = Arc::new(FsModelStore::new(&config.model_dir));

    let health_registry = HealthRegistry::with_service_components().await;
    let logger = StructuredLogger::default();

    let service = WaitTimeService::new(
        repository,
        store,
        config.prediction_config(),
        health_registry.clone(),
    )
    .with_logger(logger.clone());

    service.check_model_store().await;

    // Seed the cached-models gauge from whatever survived the last run
    match service.list_models().await {
        Ok(models) => info!(models = models.len(), "Model store opened"),
        Err(e) => warn!(error = %e, "Could not list stored models"),
    }

    logger.log_startup(SERVICE_VERSION, &config.model_dir);

    let app_state = Arc::new(api::AppState::new(Arc::new(service)));
    health_registry.set_ready(true).await;

    let shutdown_logger = logger.clone();
    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        shutdown_logger.log_shutdown("SIGINT received");
    };

    api::serve(&config.bind_addr(), app_state, shutdown).await?;
    info!("Shut down");

    Ok(())
}
