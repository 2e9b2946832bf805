//! Broker connectivity probe backing `GET /health`.

use mhs_broker::ConnectionManager;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::{SERVICE_DESCRIPTION, VERSION};

/// Overall health report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub version: String,
    pub description: String,
    pub node_env: String,
    pub status: String,
    pub details: HealthDetails,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.details.mhs.connected
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthDetails {
    pub mhs: MhsHealth,
}

/// Result of the broker probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MhsHealth {
    pub connected: bool,
    pub endpoints: Vec<String>,
    pub queue_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Probes the broker by opening and closing a connection.
pub struct HealthCheck {
    manager: Arc<ConnectionManager>,
    node_env: String,
    queue_name: String,
}

impl HealthCheck {
    pub fn new(
        manager: Arc<ConnectionManager>,
        node_env: impl Into<String>,
        queue_name: impl Into<String>,
    ) -> Self {
        Self {
            manager,
            node_env: node_env.into(),
            queue_name: queue_name.into(),
        }
    }

    pub async fn check(&self) -> HealthStatus {
        let error = match self.manager.connect().await {
            Ok(connection) => {
                if let Err(err) = connection.disconnect().await {
                    debug!(error = %err, "Disconnect after health probe failed");
                }
                None
            }
            Err(err) => Some(err.to_string()),
        };
        let connected = error.is_none();

        HealthStatus {
            version: VERSION.to_string(),
            description: SERVICE_DESCRIPTION.to_string(),
            node_env: self.node_env.clone(),
            status: if connected { "running" } else { "degraded" }.to_string(),
            details: HealthDetails {
                mhs: MhsHealth {
                    connected,
                    endpoints: self
                        .manager
                        .endpoints()
                        .iter()
                        .map(ToString::to_string)
                        .collect(),
                    queue_name: self.queue_name.clone(),
                    error,
                },
            },
        }
    }
}
