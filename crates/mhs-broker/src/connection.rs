//! # Broker Connection Ports
//!
//! Transport-neutral view of a broker session. The STOMP transport and the
//! in-memory broker both implement these traits.

use async_trait::async_trait;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::Stream;

use crate::endpoint::BrokerEndpoint;
use crate::error::BrokerError;
use crate::frame::AckMode;

/// Shared handle to an open connection.
pub type Connection = Arc<dyn BrokerConnection>;

/// An open session with the broker.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Endpoint this connection was opened against.
    fn endpoint(&self) -> &BrokerEndpoint;

    /// Start a transaction.
    async fn begin(&self, transaction: &str) -> Result<(), BrokerError>;

    /// Write a message, optionally inside a transaction.
    async fn send(
        &self,
        destination: &str,
        body: &str,
        transaction: Option<&str>,
    ) -> Result<(), BrokerError>;

    /// Commit a transaction. Resolves once the broker confirms it.
    async fn commit(&self, transaction: &str) -> Result<(), BrokerError>;

    /// Discard a transaction.
    async fn abort(&self, transaction: &str) -> Result<(), BrokerError>;

    /// Subscribe to a destination.
    async fn subscribe(&self, destination: &str, ack: AckMode)
        -> Result<Subscription, BrokerError>;

    /// Acknowledge one delivery.
    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError>;

    /// Close the session.
    async fn disconnect(&self) -> Result<(), BrokerError>;
}

/// Opens connections to a single endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &BrokerEndpoint) -> Result<Connection, BrokerError>;
}

/// A message delivered to a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Broker-assigned message id.
    pub message_id: String,
    /// Token to quote when acknowledging.
    pub ack_id: String,
    /// Destination the message was sent to.
    pub destination: String,
    /// Subscription that received it.
    pub subscription: String,
    /// Message body.
    pub body: String,
}

/// Receiving end of a subscription.
///
/// Yields `None` once the connection that owns it closes.
#[derive(Debug)]
pub struct Subscription {
    id: String,
    destination: String,
    receiver: mpsc::Receiver<Delivery>,
}

impl Subscription {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        destination: impl Into<String>,
        receiver: mpsc::Receiver<Delivery>,
    ) -> Self {
        Self {
            id: id.into(),
            destination: destination.into(),
            receiver,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Wait for the next delivery.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }
}

impl Stream for Subscription {
    type Item = Delivery;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    fn delivery(id: &str) -> Delivery {
        Delivery {
            message_id: id.into(),
            ack_id: id.into(),
            destination: "inbound".into(),
            subscription: "sub-0".into(),
            body: format!("body-{id}"),
        }
    }

    #[tokio::test]
    async fn test_subscription_recv() {
        let (tx, rx) = mpsc::channel(4);
        let mut subscription = Subscription::new("sub-0", "inbound", rx);

        tx.send(delivery("1")).await.unwrap();
        assert_eq!(subscription.recv().await, Some(delivery("1")));
        assert_eq!(subscription.destination(), "inbound");
    }

    #[tokio::test]
    async fn test_subscription_ends_when_sender_dropped() {
        let (tx, rx) = mpsc::channel(4);
        let mut subscription = Subscription::new("sub-0", "inbound", rx);
        drop(tx);
        assert_eq!(subscription.recv().await, None);
    }

    #[tokio::test]
    async fn test_subscription_as_stream() {
        let (tx, rx) = mpsc::channel(4);
        let subscription = Subscription::new("sub-0", "inbound", rx);

        tx.send(delivery("1")).await.unwrap();
        tx.send(delivery("2")).await.unwrap();
        drop(tx);

        let ids: Vec<_> = subscription.map(|d| d.message_id).collect().await;
        assert_eq!(ids, vec!["1", "2"]);
    }
}
