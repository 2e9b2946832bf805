//! # Queue Subscriber
//!
//! Consumes a broker queue with per-message acknowledgement. Each delivery
//! is either a reply to an outstanding request, matched by its
//! `ConversationId`, or an unsolicited message for the [`Dispatcher`].
//!
//! ```text
//! delivery ──parse──┬─ pending ConversationId ──▶ complete ──▶ ACK
//!                   ├─ abandoned ConversationId ──▶ discarded ──▶ ACK
//!                   └─ otherwise ──▶ dispatch ──ok──▶ ACK
//!                                        └──err──▶ logged, left unacknowledged
//! ```
//!
//! Unacknowledged deliveries stay with the broker and are redelivered once
//! the connection closes. If the broker ends the subscription the handle's
//! [`SubscriberHandle::stopped`] future resolves.

use mhs_broker::{AckMode, Connection, ConnectionManager, Delivery, Subscription};
use mhs_envelope::{InboundMessage, ParsedEnvelope};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::dispatch::Dispatcher;
use crate::domain::{CorrelationId, GatewayError, PendingRequestStore};

/// What became of one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Completed an outstanding request.
    Replied(CorrelationId),
    /// Handled by the named handler.
    Handled(&'static str),
    /// Reply to a request that already timed out or was abandoned.
    Discarded(CorrelationId),
    /// Left unacknowledged.
    Failed(String),
}

impl DeliveryOutcome {
    pub fn is_acked(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }
}

/// Running consumer for one queue.
pub struct SubscriberHandle {
    queue: String,
    connection: Connection,
    task: JoinHandle<()>,
    stopped: watch::Receiver<bool>,
}

impl SubscriberHandle {
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Resolves once the broker has ended the subscription.
    pub fn stopped(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut stopped = self.stopped.clone();
        async move {
            // A dropped sender means the consumer task is gone as well
            let _ = stopped.wait_for(|stopped| *stopped).await;
        }
    }

    /// Stop consuming and close the connection.
    pub async fn shutdown(self) {
        self.task.abort();
        if let Err(err) = self.connection.disconnect().await {
            debug!(queue = %self.queue, error = %err, "Subscriber disconnect failed");
        }
        info!(queue = %self.queue, "Subscriber stopped");
    }
}

/// Routes deliveries to the pending store or the dispatcher.
#[derive(Clone)]
pub struct DeliveryProcessor {
    dispatcher: Dispatcher,
    pending: Option<Arc<PendingRequestStore>>,
}

impl DeliveryProcessor {
    pub fn new(dispatcher: Dispatcher, pending: Option<Arc<PendingRequestStore>>) -> Self {
        Self {
            dispatcher,
            pending,
        }
    }

    /// Process one delivery body.
    pub async fn process(&self, body: &str) -> DeliveryOutcome {
        let envelope = match ParsedEnvelope::parse(body) {
            Ok(envelope) => envelope,
            Err(err) => {
                error!(error = %err, "Failed to parse inbound message");
                return DeliveryOutcome::Failed(err.to_string());
            }
        };
        let message = InboundMessage::from_parsed(body.to_string(), &envelope);

        if let Some((pending, correlation_id)) = self.reply_target(&message) {
            if pending.is_pending(&correlation_id) {
                if pending.complete(correlation_id, message.body.clone()) {
                    return DeliveryOutcome::Replied(correlation_id);
                }
                return DeliveryOutcome::Discarded(correlation_id);
            }
            if pending.was_abandoned(&correlation_id) {
                warn!(
                    status = "late-reply",
                    conversation_id = %correlation_id,
                    interaction_id = message.interaction_id.as_deref().unwrap_or_default(),
                    "Discarding late MHS reply"
                );
                return DeliveryOutcome::Discarded(correlation_id);
            }
        }

        match self.dispatcher.dispatch_message(&message).await {
            Ok(outcome) => DeliveryOutcome::Handled(outcome.handler),
            Err(err) => {
                error!(
                    error = %err,
                    conversation_id = message.correlation_id.as_deref().unwrap_or_default(),
                    "Failed to handle inbound message"
                );
                DeliveryOutcome::Failed(err.to_string())
            }
        }
    }

    fn reply_target(
        &self,
        message: &InboundMessage,
    ) -> Option<(&PendingRequestStore, CorrelationId)> {
        let pending = self.pending.as_deref()?;
        let correlation_id = CorrelationId::parse(message.correlation_id.as_deref()?).ok()?;
        Some((pending, correlation_id))
    }
}

/// Subscribe to `queue` and start consuming it in the background.
pub async fn initialise_subscriber(
    manager: &ConnectionManager,
    queue: &str,
    processor: DeliveryProcessor,
) -> Result<SubscriberHandle, GatewayError> {
    info!(
        status = "Initialising Subscriber",
        queue.name = queue,
        queue.ack_type = AckMode::ClientIndividual.as_str(),
        "Initialising subscriber"
    );

    let connection = manager.connect().await?;
    let subscription = connection
        .subscribe(queue, AckMode::ClientIndividual)
        .await?;

    let (stop_tx, stopped) = watch::channel(false);
    let task = tokio::spawn(consume(
        Arc::clone(&connection),
        subscription,
        processor,
        stop_tx,
    ));

    Ok(SubscriberHandle {
        queue: queue.to_string(),
        connection,
        task,
        stopped,
    })
}

async fn consume(
    connection: Connection,
    mut subscription: Subscription,
    processor: DeliveryProcessor,
    stopped: watch::Sender<bool>,
) {
    while let Some(delivery) = subscription.recv().await {
        debug!(
            message_id = %delivery.message_id,
            destination = %delivery.destination,
            "Received delivery"
        );

        let outcome = processor.process(&delivery.body).await;
        if outcome.is_acked() {
            acknowledge(&connection, &delivery).await;
        }
    }

    error!(
        status = "connection-failed",
        queue = %subscription.destination(),
        "Subscription closed by broker"
    );
    stopped.send_replace(true);
}

async fn acknowledge(connection: &Connection, delivery: &Delivery) {
    if let Err(err) = connection.ack(delivery).await {
        error!(
            message_id = %delivery.message_id,
            error = %err,
            "Failed to acknowledge message"
        );
    }
}
