//! MHS client: sends a request over the broker and waits for the correlated
//! reply.
//!
//! ```text
//! register(conversation) ─▶ publish(outbound queue) ─▶ await reply | expiry
//!                                                          ▲
//!                       subscriber: complete(ConversationId)
//! ```

use async_trait::async_trait;
use mhs_broker::{ConnectionError, MessagePublisher, OutboundError, PublishError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::{CorrelationId, PendingRequestStore};

/// Outcome of a broker round trip, as the MHS reported it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokerResponse {
    pub status: u16,
    pub data: String,
}

impl BrokerResponse {
    pub fn new(status: u16, data: impl Into<String>) -> Self {
        Self {
            status,
            data: data.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

/// A request ready for the MHS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MhsRequest {
    pub interaction_id: String,
    pub conversation_id: CorrelationId,
    pub message: String,
}

/// Transport failures that prevented a round trip.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MhsError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("{0}")]
    Transport(String),
}

impl From<OutboundError> for MhsError {
    fn from(err: OutboundError) -> Self {
        match err {
            OutboundError::Connection(err) => Self::Connection(err),
            OutboundError::Publish(err) => Self::Publish(err),
        }
    }
}

/// Sends requests to the MHS.
#[async_trait]
pub trait MhsClient: Send + Sync {
    async fn send_message(&self, request: MhsRequest) -> Result<BrokerResponse, MhsError>;
}

/// [`MhsClient`] that publishes on the outbound queue and waits for the
/// reply the subscriber routes back by conversation id.
pub struct CorrelatedMhsClient {
    publisher: Arc<dyn MessagePublisher>,
    pending: Arc<PendingRequestStore>,
    destination: String,
    timeout: Duration,
}

impl CorrelatedMhsClient {
    pub fn new(
        publisher: Arc<dyn MessagePublisher>,
        pending: Arc<PendingRequestStore>,
        destination: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            publisher,
            pending,
            destination: destination.into(),
            timeout,
        }
    }

    fn no_reply(&self) -> BrokerResponse {
        BrokerResponse::new(
            503,
            format!("no response from MHS within {}ms", self.timeout.as_millis()),
        )
    }
}

#[async_trait]
impl MhsClient for CorrelatedMhsClient {
    async fn send_message(&self, request: MhsRequest) -> Result<BrokerResponse, MhsError> {
        let correlation_id = request.conversation_id;

        // Registered before publishing so a fast reply cannot be missed
        let rx = self.pending.register(
            correlation_id,
            &request.interaction_id,
            Some(self.timeout),
        );
        let _registration = self.pending.guard(correlation_id);

        self.publisher
            .publish(&self.destination, vec![request.message])
            .await?;

        debug!(
            correlation_id = %correlation_id,
            interaction_id = %request.interaction_id,
            destination = %self.destination,
            "Sent MHS request"
        );

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(reply)) => Ok(BrokerResponse::new(200, reply.body)),
            Ok(Err(_)) => {
                // Swept by the cleanup task before our own deadline fired
                Ok(self.no_reply())
            }
            Err(_) => {
                warn!(
                    correlation_id = %correlation_id,
                    timeout_ms = self.timeout.as_millis(),
                    "MHS reply timed out"
                );
                Ok(self.no_reply())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mhs_broker::{BrokerEndpoint, BrokerPublisher, ConnectionManager, FailoverPolicy, InMemoryBroker};

    fn client(broker: &InMemoryBroker, timeout: Duration) -> (CorrelatedMhsClient, Arc<PendingRequestStore>) {
        let manager = ConnectionManager::new(
            vec![BrokerEndpoint::new("memory", 61613)],
            Arc::new(broker.clone()),
            FailoverPolicy {
                max_reconnects: 1,
                reconnect_delay: Duration::from_millis(1),
            },
        )
        .unwrap();
        let pending = Arc::new(PendingRequestStore::new(timeout));
        let client = CorrelatedMhsClient::new(
            Arc::new(BrokerPublisher::new(Arc::new(manager))),
            Arc::clone(&pending),
            "outbound",
            timeout,
        );
        (client, pending)
    }

    fn request(conversation_id: CorrelationId) -> MhsRequest {
        MhsRequest {
            interaction_id: "QUPA_IN000008UK02".into(),
            conversation_id,
            message: "<query/>".into(),
        }
    }

    #[tokio::test]
    async fn test_reply_resolves_with_200() {
        let broker = InMemoryBroker::new();
        let (client, pending) = client(&broker, Duration::from_secs(5));
        let conversation_id = CorrelationId::new();

        let responder = {
            let pending = Arc::clone(&pending);
            let broker = broker.clone();
            tokio::spawn(async move {
                while broker.queue_depth("outbound") == 0 {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                assert!(pending.complete(conversation_id, "<reply/>".into()));
            })
        };

        let response = client.send_message(request(conversation_id)).await.unwrap();
        responder.await.unwrap();

        assert_eq!(response, BrokerResponse::new(200, "<reply/>"));
        assert_eq!(broker.drain("outbound"), vec!["<query/>"]);
        assert_eq!(pending.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_no_reply_is_503_and_deregisters() {
        let broker = InMemoryBroker::new();
        let (client, pending) = client(&broker, Duration::from_millis(20));
        let conversation_id = CorrelationId::new();

        let response = client.send_message(request(conversation_id)).await.unwrap();

        assert_eq!(response.status, 503);
        assert!(response.data.contains("no response from MHS"));
        assert!(!pending.is_pending(&conversation_id));

        // A late reply is discarded
        assert!(!pending.complete(conversation_id, "<late/>".into()));
    }

    #[tokio::test]
    async fn test_dropped_caller_deregisters() {
        let broker = InMemoryBroker::new();
        let (client, pending) = client(&broker, Duration::from_secs(5));
        let conversation_id = CorrelationId::new();

        // The HTTP timeout drops the request future mid-wait
        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            client.send_message(request(conversation_id)),
        )
        .await;

        assert!(abandoned.is_err());
        assert_eq!(broker.queue_depth("outbound"), 1);
        assert!(!pending.is_pending(&conversation_id));
        assert_eq!(pending.stats().abandoned, 1);
    }

    #[tokio::test]
    async fn test_connection_failure_is_error() {
        let broker = InMemoryBroker::new();
        broker.set_offline(true);
        let (client, pending) = client(&broker, Duration::from_secs(5));

        let err = client
            .send_message(request(CorrelationId::new()))
            .await
            .unwrap_err();

        assert!(matches!(err, MhsError::Connection(_)));
        assert_eq!(pending.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_failure_is_error() {
        let broker = InMemoryBroker::new();
        broker.set_reject_sends(true);
        let (client, pending) = client(&broker, Duration::from_secs(5));

        let err = client
            .send_message(request(CorrelationId::new()))
            .await
            .unwrap_err();

        assert!(matches!(err, MhsError::Publish(_)));
        assert_eq!(pending.pending_count(), 0);
    }

    #[test]
    fn test_broker_response_success() {
        assert!(BrokerResponse::new(200, "").is_success());
        assert!(!BrokerResponse::new(503, "").is_success());
    }
}
