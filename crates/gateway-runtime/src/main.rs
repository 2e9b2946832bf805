//! # MHS Gateway
//!
//! Entry point: telemetry, configuration, then the service until shutdown.

use anyhow::{Context, Result};
use tracing::info;

use mhs_gateway::{GatewayConfig, SERVICE_DESCRIPTION, VERSION};
use mhs_telemetry::{init_telemetry, TelemetryConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let _telemetry = init_telemetry(TelemetryConfig::from_env())
        .context("Failed to initialize telemetry")?;

    info!("===========================================");
    info!("  {} v{}", SERVICE_DESCRIPTION, VERSION);
    info!("===========================================");

    let config = GatewayConfig::from_env().context("Failed to load configuration")?;

    info!("Configuration:");
    info!("  Environment: {}", config.node_env);
    info!("  HTTP: {}", config.http_addr());
    info!("  Brokers: {}", config.broker.urls.join(", "));
    info!("  Inbound queue: {}", config.broker.queue_name);
    info!("  Outbound queue: {}", config.broker.outbound_queue_name);

    gateway_runtime::run(config).await?;

    info!("Gateway stopped");
    Ok(())
}
