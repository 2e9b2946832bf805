//! Request orchestration: template, send, interpret the MHS status.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::CorrelationId;
use crate::mhs::{BrokerResponse, MhsClient, MhsError, MhsRequest};
use crate::templates::{MessageBuilder, MessageRecord, TemplateError};

/// Why a request produced no usable reply.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    /// The outbound document could not be built.
    #[error(transparent)]
    BuildFailed(#[from] TemplateError),

    /// The broker was unreachable after failover.
    #[error("{0}")]
    ConnectionFailed(String),

    /// The send itself failed.
    #[error("{0}")]
    Transport(String),

    /// The MHS reported a failure.
    #[error("MHS Error: {0}")]
    BrokerStatus(String),

    /// The MHS did not answer usefully.
    #[error("Unexpected Error: {0}")]
    Unavailable(String),
}

impl From<MhsError> for OrchestratorError {
    fn from(err: MhsError) -> Self {
        match err {
            MhsError::Connection(err) => Self::ConnectionFailed(err.to_string()),
            other => Self::Transport(other.to_string()),
        }
    }
}

/// A successful round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub conversation_id: CorrelationId,
    pub response: BrokerResponse,
}

/// Builds the document for an interaction and returns the MHS's reply.
pub struct RequestOrchestrator {
    templates: Arc<dyn MessageBuilder>,
    client: Arc<dyn MhsClient>,
}

impl RequestOrchestrator {
    pub fn new(templates: Arc<dyn MessageBuilder>, client: Arc<dyn MhsClient>) -> Self {
        Self { templates, client }
    }

    /// Send `record` as `interaction_id` under a fresh conversation id.
    ///
    /// Only a 200 is a success.
    pub async fn request(
        &self,
        interaction_id: &str,
        mut record: MessageRecord,
    ) -> Result<Exchange, OrchestratorError> {
        let conversation_id = CorrelationId::new();
        record.id = conversation_id.to_string();

        let message = self.templates.build(interaction_id, &record)?;
        debug!(
            conversation_id = %conversation_id,
            interaction_id,
            "Built outbound message"
        );

        let response = self
            .client
            .send_message(MhsRequest {
                interaction_id: interaction_id.to_string(),
                conversation_id,
                message,
            })
            .await?;

        info!(
            conversation_id = %conversation_id,
            status = response.status,
            "MHS responded"
        );

        match response.status {
            200 => Ok(Exchange {
                conversation_id,
                response,
            }),
            503 => Err(OrchestratorError::Unavailable(response.data)),
            _ => Err(OrchestratorError::BrokerStatus(response.data)),
        }
    }
}
