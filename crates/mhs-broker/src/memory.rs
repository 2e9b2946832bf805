//! # In-Memory Broker
//!
//! Queue semantics on a single process, for tests and local runs:
//! - each destination is a queue; a message goes to one consumer, chosen
//!   round-robin, or waits in the backlog until someone subscribes;
//! - transactional sends are buffered per connection and delivered in order
//!   on commit;
//! - deliveries on `client`/`client-individual` subscriptions stay
//!   outstanding until acked; closing the connection that received them
//!   puts them back on the queue.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use crate::connection::{BrokerConnection, Connection, Connector, Delivery, Subscription};
use crate::endpoint::BrokerEndpoint;
use crate::error::BrokerError;
use crate::frame::AckMode;
use crate::DEFAULT_CHANNEL_CAPACITY;

struct Consumer {
    connection: u64,
    subscription: String,
    ack: AckMode,
    sender: mpsc::Sender<Delivery>,
}

#[derive(Default)]
struct Queue {
    backlog: VecDeque<String>,
    consumers: Vec<Consumer>,
    cursor: usize,
}

struct Outstanding {
    connection: u64,
    destination: String,
    body: String,
}

#[derive(Default)]
struct BrokerState {
    queues: Mutex<HashMap<String, Queue>>,
    outstanding: Mutex<HashMap<String, Outstanding>>,
    next_id: AtomicU64,
    offline: AtomicBool,
    reject_sends: AtomicBool,
    connections_opened: AtomicU64,
}

impl BrokerState {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Hand `body` to a consumer of `destination`, or park it in the backlog.
    fn deliver(&self, destination: &str, body: String) {
        let mut queues = self.queues.lock();
        let queue = queues.entry(destination.to_string()).or_default();

        let mut index = 0;
        while index < queue.consumers.len() {
            let slot = (queue.cursor + index) % queue.consumers.len();
            let consumer = &queue.consumers[slot];
            let message_id = format!("msg-{}", self.next_id());
            let delivery = Delivery {
                ack_id: message_id.clone(),
                message_id: message_id.clone(),
                destination: destination.to_string(),
                subscription: consumer.subscription.clone(),
                body: body.clone(),
            };

            match consumer.sender.try_send(delivery) {
                Ok(()) => {
                    if consumer.ack != AckMode::Auto {
                        self.outstanding.lock().insert(
                            message_id,
                            Outstanding {
                                connection: consumer.connection,
                                destination: destination.to_string(),
                                body,
                            },
                        );
                    }
                    queue.cursor = slot + 1;
                    return;
                }
                Err(TrySendError::Full(_)) => index += 1,
                Err(TrySendError::Closed(_)) => {
                    queue.consumers.remove(slot);
                    // The next consumer has shifted into this slot.
                    if queue.consumers.is_empty() {
                        break;
                    }
                    queue.cursor %= queue.consumers.len();
                }
            }
        }

        queue.backlog.push_back(body);
    }

    fn add_consumer(&self, destination: &str, consumer: Consumer) {
        let backlog = {
            let mut queues = self.queues.lock();
            let queue = queues.entry(destination.to_string()).or_default();
            queue.consumers.push(consumer);
            std::mem::take(&mut queue.backlog)
        };
        for body in backlog {
            self.deliver(destination, body);
        }
    }

    /// Drop a connection's consumers and requeue what it never acked.
    fn release(&self, connection: u64) {
        {
            let mut queues = self.queues.lock();
            for queue in queues.values_mut() {
                queue.consumers.retain(|c| c.connection != connection);
                queue.cursor = 0;
            }
        }

        let requeue: Vec<Outstanding> = {
            let mut outstanding = self.outstanding.lock();
            let ids: Vec<String> = outstanding
                .iter()
                .filter(|(_, o)| o.connection == connection)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| outstanding.remove(id)).collect()
        };

        for message in requeue {
            debug!(destination = %message.destination, "Requeueing unacknowledged message");
            self.deliver(&message.destination, message.body);
        }
    }
}

/// Process-local broker. Cloning shares the same queues.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl InMemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse new connections while `offline`.
    pub fn set_offline(&self, offline: bool) {
        self.state.offline.store(offline, Ordering::SeqCst);
    }

    /// Make every `SEND` fail while set.
    pub fn set_reject_sends(&self, reject: bool) {
        self.state.reject_sends.store(reject, Ordering::SeqCst);
    }

    /// Put a message on a queue without a connection.
    pub fn inject(&self, destination: &str, body: impl Into<String>) {
        self.state.deliver(destination, body.into());
    }

    /// Messages waiting for a consumer.
    #[must_use]
    pub fn queue_depth(&self, destination: &str) -> usize {
        self.state
            .queues
            .lock()
            .get(destination)
            .map_or(0, |q| q.backlog.len())
    }

    /// Take every message waiting on a queue.
    pub fn drain(&self, destination: &str) -> Vec<String> {
        self.state
            .queues
            .lock()
            .get_mut(destination)
            .map(|q| q.backlog.drain(..).collect())
            .unwrap_or_default()
    }

    /// Delivered but not yet acknowledged.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.state.outstanding.lock().len()
    }

    #[must_use]
    pub fn consumer_count(&self, destination: &str) -> usize {
        self.state
            .queues
            .lock()
            .get(destination)
            .map_or(0, |q| q.consumers.len())
    }

    /// Cut every consumer of `destination` off, as a broker restart would.
    /// Their subscriptions end; nothing they hold is requeued.
    pub fn close_consumers(&self, destination: &str) -> usize {
        self.state
            .queues
            .lock()
            .get_mut(destination)
            .map_or(0, |q| {
                q.cursor = 0;
                q.consumers.drain(..).count()
            })
    }

    #[must_use]
    pub fn connections_opened(&self) -> u64 {
        self.state.connections_opened.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Connector for InMemoryBroker {
    async fn connect(&self, endpoint: &BrokerEndpoint) -> Result<Connection, BrokerError> {
        if self.state.offline.load(Ordering::SeqCst) {
            return Err(BrokerError::Io(format!("connection refused: {endpoint}")));
        }
        self.state.connections_opened.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(MemoryConnection {
            id: self.state.next_id(),
            endpoint: endpoint.clone(),
            state: Arc::clone(&self.state),
            transactions: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }))
    }
}

/// A session on an [`InMemoryBroker`].
pub struct MemoryConnection {
    id: u64,
    endpoint: BrokerEndpoint,
    state: Arc<BrokerState>,
    transactions: Mutex<HashMap<String, Vec<(String, String)>>>,
    closed: AtomicBool,
}

impl MemoryConnection {
    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(BrokerError::Closed)
        } else {
            Ok(())
        }
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.transactions.lock().clear();
            self.state.release(self.id);
        }
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    fn endpoint(&self) -> &BrokerEndpoint {
        &self.endpoint
    }

    async fn begin(&self, transaction: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut transactions = self.transactions.lock();
        if transactions.contains_key(transaction) {
            return Err(BrokerError::Server(format!(
                "transaction '{transaction}' already started"
            )));
        }
        transactions.insert(transaction.to_string(), Vec::new());
        Ok(())
    }

    async fn send(
        &self,
        destination: &str,
        body: &str,
        transaction: Option<&str>,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        if self.state.reject_sends.load(Ordering::SeqCst) {
            return Err(BrokerError::Server(format!("send to '{destination}' rejected")));
        }
        match transaction {
            Some(transaction) => {
                let mut transactions = self.transactions.lock();
                let pending = transactions.get_mut(transaction).ok_or_else(|| {
                    BrokerError::Server(format!("unknown transaction '{transaction}'"))
                })?;
                pending.push((destination.to_string(), body.to_string()));
            }
            None => self.state.deliver(destination, body.to_string()),
        }
        Ok(())
    }

    async fn commit(&self, transaction: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let pending = self
            .transactions
            .lock()
            .remove(transaction)
            .ok_or_else(|| BrokerError::Server(format!("unknown transaction '{transaction}'")))?;
        for (destination, body) in pending {
            self.state.deliver(&destination, body);
        }
        Ok(())
    }

    async fn abort(&self, transaction: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.transactions.lock().remove(transaction);
        Ok(())
    }

    async fn subscribe(
        &self,
        destination: &str,
        ack: AckMode,
    ) -> Result<Subscription, BrokerError> {
        self.ensure_open()?;
        let id = format!("sub-{}", self.state.next_id());
        let (sender, receiver) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
        self.state.add_consumer(
            destination,
            Consumer {
                connection: self.id,
                subscription: id.clone(),
                ack,
                sender,
            },
        );
        Ok(Subscription::new(id, destination, receiver))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.state
            .outstanding
            .lock()
            .remove(&delivery.ack_id)
            .map(|_| ())
            .ok_or_else(|| {
                BrokerError::Server(format!("no outstanding delivery '{}'", delivery.ack_id))
            })
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        self.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> BrokerEndpoint {
        BrokerEndpoint::new("memory", 61613)
    }

    #[tokio::test]
    async fn test_backlog_until_subscribed() {
        let broker = InMemoryBroker::new();
        let connection = broker.connect(&endpoint()).await.unwrap();

        connection.send("inbound", "one", None).await.unwrap();
        connection.send("inbound", "two", None).await.unwrap();
        assert_eq!(broker.queue_depth("inbound"), 2);

        let mut subscription = connection.subscribe("inbound", AckMode::Auto).await.unwrap();
        assert_eq!(subscription.recv().await.unwrap().body, "one");
        assert_eq!(subscription.recv().await.unwrap().body, "two");
        assert_eq!(broker.queue_depth("inbound"), 0);
    }

    #[tokio::test]
    async fn test_transaction_delivers_on_commit() {
        let broker = InMemoryBroker::new();
        let connection = broker.connect(&endpoint()).await.unwrap();

        connection.begin("tx-1").await.unwrap();
        connection.send("outbound", "a", Some("tx-1")).await.unwrap();
        connection.send("outbound", "b", Some("tx-1")).await.unwrap();
        assert_eq!(broker.queue_depth("outbound"), 0);

        connection.commit("tx-1").await.unwrap();
        assert_eq!(broker.drain("outbound"), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_abort_discards() {
        let broker = InMemoryBroker::new();
        let connection = broker.connect(&endpoint()).await.unwrap();

        connection.begin("tx-1").await.unwrap();
        connection.send("outbound", "a", Some("tx-1")).await.unwrap();
        connection.abort("tx-1").await.unwrap();

        assert_eq!(broker.queue_depth("outbound"), 0);
        assert!(connection.commit("tx-1").await.is_err());
    }

    #[tokio::test]
    async fn test_send_to_unknown_transaction() {
        let broker = InMemoryBroker::new();
        let connection = broker.connect(&endpoint()).await.unwrap();
        assert!(connection.send("q", "a", Some("missing")).await.is_err());
    }

    #[tokio::test]
    async fn test_ack_clears_outstanding() {
        let broker = InMemoryBroker::new();
        let connection = broker.connect(&endpoint()).await.unwrap();
        let mut subscription = connection
            .subscribe("inbound", AckMode::ClientIndividual)
            .await
            .unwrap();

        broker.inject("inbound", "hello");
        let delivery = subscription.recv().await.unwrap();
        assert_eq!(broker.outstanding(), 1);

        connection.ack(&delivery).await.unwrap();
        assert_eq!(broker.outstanding(), 0);
        assert!(connection.ack(&delivery).await.is_err());
    }

    #[tokio::test]
    async fn test_unacked_requeued_on_disconnect() {
        let broker = InMemoryBroker::new();
        let connection = broker.connect(&endpoint()).await.unwrap();
        let mut subscription = connection
            .subscribe("inbound", AckMode::ClientIndividual)
            .await
            .unwrap();

        broker.inject("inbound", "unhandled");
        subscription.recv().await.unwrap();
        connection.disconnect().await.unwrap();

        assert_eq!(broker.outstanding(), 0);
        assert_eq!(broker.consumer_count("inbound"), 0);
        assert_eq!(broker.drain("inbound"), vec!["unhandled"]);
        assert_eq!(connection.begin("tx").await, Err(BrokerError::Closed));
    }

    #[tokio::test]
    async fn test_round_robin_between_consumers() {
        let broker = InMemoryBroker::new();
        let connection = broker.connect(&endpoint()).await.unwrap();
        let mut first = connection.subscribe("q", AckMode::Auto).await.unwrap();
        let mut second = connection.subscribe("q", AckMode::Auto).await.unwrap();

        broker.inject("q", "1");
        broker.inject("q", "2");

        assert_eq!(first.recv().await.unwrap().body, "1");
        assert_eq!(second.recv().await.unwrap().body, "2");
    }

    #[tokio::test]
    async fn test_dropped_subscription_skipped() {
        let broker = InMemoryBroker::new();
        let connection = broker.connect(&endpoint()).await.unwrap();
        let dropped = connection.subscribe("q", AckMode::Auto).await.unwrap();
        let mut live = connection.subscribe("q", AckMode::Auto).await.unwrap();
        drop(dropped);

        broker.inject("q", "1");
        broker.inject("q", "2");

        assert_eq!(live.recv().await.unwrap().body, "1");
        assert_eq!(live.recv().await.unwrap().body, "2");
        assert_eq!(broker.consumer_count("q"), 1);
    }

    #[tokio::test]
    async fn test_close_consumers_ends_subscriptions() {
        let broker = InMemoryBroker::new();
        let connection = broker.connect(&endpoint()).await.unwrap();
        let mut subscription = connection.subscribe("q", AckMode::Auto).await.unwrap();

        assert_eq!(broker.close_consumers("q"), 1);
        assert!(subscription.recv().await.is_none());

        broker.inject("q", "after");
        assert_eq!(broker.queue_depth("q"), 1);
    }

    #[tokio::test]
    async fn test_offline_refuses_connections() {
        let broker = InMemoryBroker::new();
        broker.set_offline(true);
        assert!(matches!(
            broker.connect(&endpoint()).await,
            Err(BrokerError::Io(_))
        ));

        broker.set_offline(false);
        assert!(broker.connect(&endpoint()).await.is_ok());
        assert_eq!(broker.connections_opened(), 1);
    }

    #[tokio::test]
    async fn test_rejected_sends() {
        let broker = InMemoryBroker::new();
        broker.set_reject_sends(true);
        let connection = broker.connect(&endpoint()).await.unwrap();
        assert!(matches!(
            connection.send("q", "a", None).await,
            Err(BrokerError::Server(_))
        ));
    }
}
