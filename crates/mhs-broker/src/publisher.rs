//! # Transactional Publisher
//!
//! Every publish is one broker transaction: `BEGIN`, one `SEND` per message in
//! call order, then `COMMIT` awaited until the broker confirms it.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::connection::BrokerConnection;
use crate::error::{ConnectionError, PublishError};
use crate::failover::ConnectionManager;

/// Failure of a publish that also opens its own connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OutboundError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Publish `messages` to `destination` as one transaction.
///
/// A failed write aborts the transaction before the error is returned.
pub async fn publish(
    connection: &dyn BrokerConnection,
    destination: &str,
    messages: &[String],
) -> Result<(), PublishError> {
    let transaction = format!("tx-{}", Uuid::new_v4());
    connection.begin(&transaction).await?;

    for body in messages {
        if let Err(err) = connection.send(destination, body, Some(&transaction)).await {
            if let Err(abort_err) = connection.abort(&transaction).await {
                warn!(
                    transaction = %transaction,
                    error = %abort_err,
                    "Failed to abort transaction"
                );
            }
            return Err(err.into());
        }
    }

    connection.commit(&transaction).await?;
    debug!(
        transaction = %transaction,
        destination,
        messages = messages.len(),
        "Transaction committed"
    );
    Ok(())
}

/// Publishes messages to broker destinations.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Deliver `messages` to `destination`, all or nothing, in order.
    async fn publish(&self, destination: &str, messages: Vec<String>) -> Result<(), OutboundError>;
}

/// [`MessagePublisher`] that opens a fresh connection per call.
pub struct BrokerPublisher {
    manager: Arc<ConnectionManager>,
}

impl BrokerPublisher {
    #[must_use]
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl MessagePublisher for BrokerPublisher {
    async fn publish(&self, destination: &str, messages: Vec<String>) -> Result<(), OutboundError> {
        let connection = self.manager.connect().await?;
        let result = publish(connection.as_ref(), destination, &messages).await;

        if let Err(err) = connection.disconnect().await {
            debug!(error = %err, "Disconnect after publish failed");
        }
        result.map_err(OutboundError::from)
    }
}
