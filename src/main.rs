use anyhow::Context;
use axum::Router;
use std::net::SocketAddr;
use tracing::{error, info};

use pilot_db_controller::api;
use pilot_db_controller::config::Config;
use pilot_db_controller::services::ControllerRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&config.logging.level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Controllers connect on first use
    let registry = ControllerRegistry::new();
    for (name, controller) in &config.controllers {
        if let Err(e) = registry.open(name, controller.clone()).await {
            error!("Failed to register controller {}: {}", name, e);
        }
    }
    info!("Registered {} controller(s)", registry.len().await);

    let app: Router = api::create_router(registry.clone());

    // Start server
    let addr: SocketAddr = config
        .server_address()
        .parse()
        .with_context(|| format!("Invalid server address {}", config.server_address()))?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let closed = registry.close_all().await;
    info!("Shut down after closing {} controller(s)", closed);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
