//! # Retail API Gateway - Main Entry Point
//!
//! Startup sequence: load configuration (file if `GATEWAY_CONFIG_PATH` is
//! set, otherwise defaults plus environment overrides), initialize logging
//! and metrics, assemble the server, and run it until ctrl-c or SIGTERM.

use anyhow::Context;
use tracing::info;

use retail_gateway::{observability, GatewayConfig, GatewayServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match std::env::var("GATEWAY_CONFIG_PATH") {
        Ok(path) => GatewayConfig::load_from_file(&path)
            .await
            .with_context(|| format!("failed to load configuration from {path}"))?,
        Err(_) => GatewayConfig::from_env().context("failed to build configuration")?,
    };

    observability::init_tracing(&config.observability.logging)
        .context("failed to initialize tracing")?;
    let prometheus = observability::init_metrics(&config.observability.metrics)
        .context("failed to initialize metrics")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %config.server.bind_address,
        port = config.server.port,
        "Starting retail gateway"
    );

    let server = GatewayServer::build(config, prometheus).context("failed to build gateway")?;
    server.run().await.context("gateway exited with error")?;

    info!("Gateway shutdown complete");
    Ok(())
}
