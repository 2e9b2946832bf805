//! # Connection Manager
//!
//! Bounded failover across the configured endpoints. Attempt `n` goes to
//! endpoint `n % len`, so with two endpoints and one reconnect the primary is
//! tried first and the secondary once after the reconnect delay.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::connection::{Connection, Connector};
use crate::endpoint::BrokerEndpoint;
use crate::error::ConnectionError;
use crate::{DEFAULT_MAX_RECONNECTS, DEFAULT_RECONNECT_DELAY};

/// Event channel capacity.
const EVENT_CAPACITY: usize = 64;

/// How hard to try before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailoverPolicy {
    /// Attempts after the first one.
    pub max_reconnects: u32,
    /// Pause before each reconnect.
    pub reconnect_delay: Duration,
}

impl Default for FailoverPolicy {
    fn default() -> Self {
        Self {
            max_reconnects: DEFAULT_MAX_RECONNECTS,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

/// Connection lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// An attempt is about to be made.
    Connecting { endpoint: BrokerEndpoint },
    /// An attempt succeeded.
    Connected { endpoint: BrokerEndpoint },
    /// An attempt failed.
    Error { cause: String },
}

/// Opens broker connections with bounded failover.
pub struct ConnectionManager {
    endpoints: Vec<BrokerEndpoint>,
    connector: Arc<dyn Connector>,
    policy: FailoverPolicy,
    events: broadcast::Sender<ConnectionEvent>,
}

impl ConnectionManager {
    /// Create a manager over at least one endpoint.
    pub fn new(
        endpoints: Vec<BrokerEndpoint>,
        connector: Arc<dyn Connector>,
        policy: FailoverPolicy,
    ) -> Result<Self, ConnectionError> {
        if endpoints.is_empty() {
            return Err(ConnectionError {
                cause: "no broker endpoints configured".into(),
            });
        }
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            endpoints,
            connector,
            policy,
            events,
        })
    }

    /// Observe lifecycle events from now on.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn endpoints(&self) -> &[BrokerEndpoint] {
        &self.endpoints
    }

    #[must_use]
    pub fn policy(&self) -> FailoverPolicy {
        self.policy
    }

    /// Open a connection, reconnecting at most `max_reconnects` times.
    pub async fn connect(&self) -> Result<Connection, ConnectionError> {
        let attempts = self.policy.max_reconnects.saturating_add(1) as usize;
        let mut last_cause = String::new();

        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(self.policy.reconnect_delay).await;
            }

            let endpoint = &self.endpoints[attempt % self.endpoints.len()];
            info!(
                status = "Connecting to Queue",
                queue.transport_path = %endpoint,
                attempt = attempt + 1,
                "Connecting to broker"
            );
            self.emit(ConnectionEvent::Connecting {
                endpoint: endpoint.clone(),
            });

            match self.connector.connect(endpoint).await {
                Ok(connection) => {
                    debug!(endpoint = %endpoint, "Connected to broker");
                    self.emit(ConnectionEvent::Connected {
                        endpoint: endpoint.clone(),
                    });
                    return Ok(connection);
                }
                Err(err) => {
                    last_cause = err.to_string();
                    error!(
                        status = "connection-failed",
                        endpoint = %endpoint,
                        error = %format!("Connection.onError: {last_cause}"),
                        "Broker connection attempt failed"
                    );
                    self.emit(ConnectionEvent::Error {
                        cause: last_cause.clone(),
                    });
                }
            }
        }

        Err(ConnectionError { cause: last_cause })
    }

    fn emit(&self, event: ConnectionEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::BrokerConnection;
    use crate::error::BrokerError;
    use crate::memory::InMemoryBroker;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Instant;

    /// Refuses the first `failures` attempts, then defers to an in-memory broker.
    struct FlakyConnector {
        failures: Mutex<usize>,
        attempts: Mutex<Vec<BrokerEndpoint>>,
        broker: InMemoryBroker,
    }

    impl FlakyConnector {
        fn new(failures: usize) -> Self {
            Self {
                failures: Mutex::new(failures),
                attempts: Mutex::new(Vec::new()),
                broker: InMemoryBroker::new(),
            }
        }
    }

    #[async_trait]
    impl Connector for FlakyConnector {
        async fn connect(&self, endpoint: &BrokerEndpoint) -> Result<Connection, BrokerError> {
            self.attempts.lock().push(endpoint.clone());
            {
                let mut failures = self.failures.lock();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(BrokerError::Io(format!("refused by {endpoint}")));
                }
            }
            self.broker.connect(endpoint).await
        }
    }

    fn endpoints() -> Vec<BrokerEndpoint> {
        vec![
            BrokerEndpoint::new("primary", 61613),
            BrokerEndpoint::new("secondary", 61613),
        ]
    }

    #[tokio::test]
    async fn test_connects_first_time() {
        let connector = Arc::new(FlakyConnector::new(0));
        let manager =
            ConnectionManager::new(endpoints(), connector.clone(), FailoverPolicy::default())
                .unwrap();

        let connection = manager.connect().await.unwrap();
        assert_eq!(connection.endpoint().host(), "primary");
        assert_eq!(connector.attempts.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_fails_over_once_after_delay() {
        let connector = Arc::new(FlakyConnector::new(1));
        let manager =
            ConnectionManager::new(endpoints(), connector.clone(), FailoverPolicy::default())
                .unwrap();

        let started = Instant::now();
        let connection = manager.connect().await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(connection.endpoint().host(), "secondary");
    }

    #[tokio::test]
    async fn test_gives_up_after_one_reconnect() {
        let connector = Arc::new(FlakyConnector::new(5));
        let policy = FailoverPolicy {
            max_reconnects: 1,
            reconnect_delay: Duration::from_millis(1),
        };
        let manager = ConnectionManager::new(endpoints(), connector.clone(), policy).unwrap();

        let err = manager.connect().await.err().unwrap();
        assert_eq!(err.cause, "I/O error: refused by tcp://secondary:61613");
        assert_eq!(connector.attempts.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_emits_lifecycle_events() {
        let connector = Arc::new(FlakyConnector::new(1));
        let policy = FailoverPolicy {
            max_reconnects: 1,
            reconnect_delay: Duration::from_millis(1),
        };
        let manager = ConnectionManager::new(endpoints(), connector, policy).unwrap();
        let mut events = manager.events();

        manager.connect().await.unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(
            seen,
            vec![
                ConnectionEvent::Connecting {
                    endpoint: BrokerEndpoint::new("primary", 61613)
                },
                ConnectionEvent::Error {
                    cause: "I/O error: refused by tcp://primary:61613".into()
                },
                ConnectionEvent::Connecting {
                    endpoint: BrokerEndpoint::new("secondary", 61613)
                },
                ConnectionEvent::Connected {
                    endpoint: BrokerEndpoint::new("secondary", 61613)
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_single_endpoint_retried() {
        let connector = Arc::new(FlakyConnector::new(1));
        let policy = FailoverPolicy {
            max_reconnects: 1,
            reconnect_delay: Duration::from_millis(1),
        };
        let manager = ConnectionManager::new(
            vec![BrokerEndpoint::new("only", 61613)],
            connector.clone(),
            policy,
        )
        .unwrap();

        manager.connect().await.unwrap();
        let hosts: Vec<_> = connector
            .attempts
            .lock()
            .iter()
            .map(|e| e.host().to_string())
            .collect();
        assert_eq!(hosts, vec!["only", "only"]);
    }

    #[test]
    fn test_requires_endpoints() {
        let result = ConnectionManager::new(
            Vec::new(),
            Arc::new(FlakyConnector::new(0)),
            FailoverPolicy::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_default_policy() {
        let policy = FailoverPolicy::default();
        assert_eq!(policy.max_reconnects, 1);
        assert_eq!(policy.reconnect_delay, Duration::from_millis(100));
    }
}
