use starchart_backend::config::BackendConfig;
use starchart_backend::http;
use starchart_backend::logging;
use starchart_backend::StarChartService;

use anyhow::{Context, Result};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let config = BackendConfig::load(&config_path)?;

    // Initialize logging
    let _logging_guard = logging::init_logging(&config.log_dir, "starchart-backend", &config.log_level)?;

    tracing::info!("StarChart backend starting...");
    tracing::info!("Configuration loaded from {}", config_path);

    let service = StarChartService::from_config(&config).await?;

    // The catalog is required for every render; refuse to start without it
    service
        .warm_up()
        .await
        .context("Failed to load star catalog")?;

    let janitor = service.janitor(&config.cache).start();
    let service = Arc::new(service);

    let address = config.server_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .context(format!("Failed to bind {}", address))?;
    tracing::info!("HTTP server listening on {}", address);

    let served = axum::serve(listener, http::router(service))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    janitor.stop().await;
    tracing::info!("StarChart backend stopped");

    served.context("HTTP server failed")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
