//! # STOMP over TCP
//!
//! One socket per connection. Writes go through a mutex-guarded framed sink;
//! a reader task owns the stream half and routes incoming frames:
//!
//! ```text
//! RECEIPT  -> waiter registered under its receipt-id
//! ERROR    -> waiter for its receipt-id, or every waiter when unsolicited
//! MESSAGE  -> subscription channel keyed by the subscription header
//! ```

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, warn};

use crate::codec::StompCodec;
use crate::connection::{BrokerConnection, Connection, Connector, Delivery, Subscription};
use crate::endpoint::BrokerEndpoint;
use crate::error::BrokerError;
use crate::frame::{AckMode, Command, Frame};
use crate::{DEFAULT_CHANNEL_CAPACITY, STOMP_VERSION};

/// Session options sent with `CONNECT`.
#[derive(Debug, Clone)]
pub struct StompOptions {
    /// Value of the `host` header. Defaults to the endpoint host.
    pub virtual_host: Option<String>,
    pub login: Option<String>,
    pub passcode: Option<String>,
    /// Bound on the TCP connect plus the `CONNECTED` handshake.
    pub connect_timeout: Duration,
    /// Bound on waiting for a `RECEIPT`.
    pub receipt_timeout: Duration,
}

impl Default for StompOptions {
    fn default() -> Self {
        Self {
            virtual_host: None,
            login: None,
            passcode: None,
            connect_timeout: Duration::from_secs(5),
            receipt_timeout: Duration::from_secs(10),
        }
    }
}

/// [`Connector`] for real brokers.
#[derive(Debug, Clone, Default)]
pub struct StompConnector {
    options: StompOptions,
}

impl StompConnector {
    #[must_use]
    pub fn new(options: StompOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Connector for StompConnector {
    async fn connect(&self, endpoint: &BrokerEndpoint) -> Result<Connection, BrokerError> {
        let connection = StompConnection::open(endpoint, &self.options).await?;
        Ok(Arc::new(connection))
    }
}

type ReceiptWaiter = oneshot::Sender<Result<(), BrokerError>>;

/// State shared between the connection handle and its reader task.
#[derive(Default)]
struct Shared {
    receipts: DashMap<String, ReceiptWaiter>,
    subscriptions: DashMap<String, mpsc::Sender<Delivery>>,
    closed: AtomicBool,
}

impl Shared {
    fn fail_all(&self, err: &BrokerError) {
        let ids: Vec<String> = self.receipts.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, waiter)) = self.receipts.remove(&id) {
                let _ = waiter.send(Err(err.clone()));
            }
        }
    }

    fn shut_down(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.fail_all(&BrokerError::Closed);
        self.subscriptions.clear();
    }
}

/// A STOMP 1.2 session over TCP.
pub struct StompConnection {
    endpoint: BrokerEndpoint,
    writer: Mutex<Writer>,
    shared: Arc<Shared>,
    reader: JoinHandle<()>,
    next_id: AtomicU64,
    receipt_timeout: Duration,
}

impl StompConnection {
    /// Connect, perform the `CONNECT`/`CONNECTED` handshake and start the
    /// reader task.
    pub async fn open(
        endpoint: &BrokerEndpoint,
        options: &StompOptions,
    ) -> Result<Self, BrokerError> {
        let (reader, writer) =
            tokio::time::timeout(options.connect_timeout, handshake(endpoint, options))
                .await
                .map_err(|_| BrokerError::Timeout(format!("connection to {endpoint}")))??;

        let shared = Arc::new(Shared::default());
        let reader = tokio::spawn(read_loop(reader, Arc::clone(&shared), endpoint.clone()));

        Ok(Self {
            endpoint: endpoint.clone(),
            writer: Mutex::new(writer),
            shared,
            reader,
            next_id: AtomicU64::new(0),
            receipt_timeout: options.receipt_timeout,
        })
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    async fn write(&self, frame: Frame) -> Result<(), BrokerError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        self.writer.lock().await.send(frame).await
    }

    /// Write a frame carrying a `receipt` header and wait for the broker to
    /// confirm it.
    async fn write_with_receipt(&self, frame: Frame) -> Result<(), BrokerError> {
        let receipt = self.next_id("receipt");
        let (tx, rx) = oneshot::channel();
        self.shared.receipts.insert(receipt.clone(), tx);

        if let Err(err) = self.write(frame.header("receipt", receipt.as_str())).await {
            self.shared.receipts.remove(&receipt);
            return Err(err);
        }

        match tokio::time::timeout(self.receipt_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BrokerError::Closed),
            Err(_) => {
                self.shared.receipts.remove(&receipt);
                Err(BrokerError::Timeout(receipt))
            }
        }
    }
}

impl Drop for StompConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl BrokerConnection for StompConnection {
    fn endpoint(&self) -> &BrokerEndpoint {
        &self.endpoint
    }

    async fn begin(&self, transaction: &str) -> Result<(), BrokerError> {
        self.write(Frame::new(Command::Begin).header("transaction", transaction))
            .await
    }

    async fn send(
        &self,
        destination: &str,
        body: &str,
        transaction: Option<&str>,
    ) -> Result<(), BrokerError> {
        let frame = Frame::new(Command::Send)
            .header("destination", destination)
            .header("content-type", "text/plain")
            .header_opt("transaction", transaction)
            .body(body.to_string());
        self.write(frame).await
    }

    async fn commit(&self, transaction: &str) -> Result<(), BrokerError> {
        self.write_with_receipt(Frame::new(Command::Commit).header("transaction", transaction))
            .await
    }

    async fn abort(&self, transaction: &str) -> Result<(), BrokerError> {
        self.write(Frame::new(Command::Abort).header("transaction", transaction))
            .await
    }

    async fn subscribe(
        &self,
        destination: &str,
        ack: AckMode,
    ) -> Result<Subscription, BrokerError> {
        let id = self.next_id("sub");
        let (tx, rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
        self.shared.subscriptions.insert(id.clone(), tx);

        let frame = Frame::new(Command::Subscribe)
            .header("id", id.as_str())
            .header("destination", destination)
            .header("ack", ack.as_str());
        if let Err(err) = self.write_with_receipt(frame).await {
            self.shared.subscriptions.remove(&id);
            return Err(err);
        }

        debug!(endpoint = %self.endpoint, destination, subscription = %id, ack = ack.as_str(), "Subscribed");
        Ok(Subscription::new(id, destination, rx))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        self.write(Frame::new(Command::Ack).header("id", delivery.ack_id.as_str()))
            .await
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let result = self.write_with_receipt(Frame::new(Command::Disconnect)).await;
        self.shared.shut_down();
        let _ = self.writer.lock().await.close().await;
        result
    }
}

type Reader = FramedRead<OwnedReadHalf, StompCodec>;
type Writer = FramedWrite<OwnedWriteHalf, StompCodec>;

async fn handshake(
    endpoint: &BrokerEndpoint,
    options: &StompOptions,
) -> Result<(Reader, Writer), BrokerError> {
    let stream = TcpStream::connect(endpoint.address()).await?;
    stream.set_nodelay(true)?;
    let (read_half, write_half) = stream.into_split();
    let mut reader = FramedRead::new(read_half, StompCodec::new());
    let mut writer = FramedWrite::new(write_half, StompCodec::new());

    let host = options
        .virtual_host
        .as_deref()
        .unwrap_or_else(|| endpoint.host());
    let connect = Frame::new(Command::Connect)
        .header("accept-version", STOMP_VERSION)
        .header("host", host)
        .header_opt("login", options.login.as_deref())
        .header_opt("passcode", options.passcode.as_deref())
        .header("heart-beat", "0,0");
    writer.send(connect).await?;

    match reader.next().await {
        Some(Ok(frame)) if frame.command == Command::Connected => {
            debug!(
                endpoint = %endpoint,
                version = frame.get("version").unwrap_or(STOMP_VERSION),
                server = frame.get("server").unwrap_or("unknown"),
                "STOMP session established"
            );
            Ok((reader, writer))
        }
        Some(Ok(frame)) if frame.command == Command::Error => {
            Err(BrokerError::Server(frame.error_message()))
        }
        Some(Ok(frame)) => Err(BrokerError::InvalidFrame(format!(
            "expected CONNECTED, got {}",
            frame.command
        ))),
        Some(Err(err)) => Err(err),
        None => Err(BrokerError::Closed),
    }
}

async fn read_loop(
    mut reader: Reader,
    shared: Arc<Shared>,
    endpoint: BrokerEndpoint,
) {
    while let Some(next) = reader.next().await {
        let frame = match next {
            Ok(frame) => frame,
            Err(err) => {
                error!(endpoint = %endpoint, error = %err, "Failed to decode broker frame");
                break;
            }
        };

        match frame.command {
            Command::Receipt => {
                let Some(id) = frame.get("receipt-id") else {
                    warn!(endpoint = %endpoint, "RECEIPT frame without receipt-id");
                    continue;
                };
                if let Some((_, waiter)) = shared.receipts.remove(id) {
                    let _ = waiter.send(Ok(()));
                }
            }
            Command::Error => {
                let err = BrokerError::Server(frame.error_message());
                error!(endpoint = %endpoint, error = %err, "Broker reported an error");
                match frame.get("receipt-id").and_then(|id| shared.receipts.remove(id)) {
                    Some((_, waiter)) => {
                        let _ = waiter.send(Err(err));
                    }
                    None => shared.fail_all(&err),
                }
            }
            Command::Message => route_message(&shared, &endpoint, frame).await,
            other => {
                debug!(endpoint = %endpoint, command = %other, "Ignoring unexpected frame");
            }
        }
    }

    debug!(endpoint = %endpoint, "Broker stream closed");
    shared.shut_down();
}

async fn route_message(shared: &Shared, endpoint: &BrokerEndpoint, frame: Frame) {
    let Some(subscription) = frame.get("subscription").map(str::to_string) else {
        warn!(endpoint = %endpoint, "MESSAGE frame without subscription header");
        return;
    };
    let Some(sender) = shared
        .subscriptions
        .get(&subscription)
        .map(|entry| entry.value().clone())
    else {
        warn!(endpoint = %endpoint, subscription, "MESSAGE for unknown subscription");
        return;
    };

    let message_id = frame.get("message-id").unwrap_or_default().to_string();
    let delivery = Delivery {
        ack_id: frame
            .get("ack")
            .map_or_else(|| message_id.clone(), str::to_string),
        destination: frame.get("destination").unwrap_or_default().to_string(),
        subscription: subscription.clone(),
        body: frame.body_text(),
        message_id,
    };

    if sender.send(delivery).await.is_err() {
        debug!(endpoint = %endpoint, subscription, "Subscription dropped, discarding message");
        shared.subscriptions.remove(&subscription);
    }
}
