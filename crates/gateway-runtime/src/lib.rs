//! # MHS Gateway Runtime
//!
//! Start-up wiring for the gateway executable.
//!
//! ## Startup Sequence
//!
//! 1. Load configuration from the environment
//! 2. Install logging
//! 3. Pick the broker transport (STOMP, or in-process for `NODE_ENV=local`)
//! 4. Start the inbound subscriber (and the simulated MHS when local)
//! 5. Serve HTTP until SIGINT/SIGTERM

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use mhs_broker::{Connector, InMemoryBroker, StompConnector};
use mhs_gateway::{GatewayConfig, GatewayService};

/// Broker transport for `config`.
pub fn build_connector(config: &GatewayConfig) -> Arc<dyn Connector> {
    if config.is_local() {
        info!("Using in-process broker");
        Arc::new(InMemoryBroker::new())
    } else {
        info!(
            virtual_host = config.broker.virtual_host.as_deref().unwrap_or_default(),
            "Using STOMP broker"
        );
        Arc::new(StompConnector::new(config.stomp_options()))
    }
}

/// Resolves on Ctrl+C, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Shutdown signal received");
}

/// Build the service from `config` and run it until `shutdown_signal`.
pub async fn run(config: GatewayConfig) -> Result<()> {
    let connector = build_connector(&config);
    let service =
        GatewayService::new(config, connector).context("Failed to build gateway service")?;

    service
        .run(shutdown_signal())
        .await
        .context("Gateway stopped with an error")
}
