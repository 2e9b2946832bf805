//! Gateway service: wires the broker, subscribers and HTTP server together.

use axum::Router;
use mhs_broker::{BrokerPublisher, ConnectionManager, Connector, MessagePublisher};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};

use crate::api::{build_router, AppState};
use crate::dispatch::{Dispatcher, HandlerRegistry, ReplyContext};
use crate::domain::{cleanup_task, GatewayConfig, GatewayError, PendingRequestStore};
use crate::health::HealthCheck;
use crate::mhs::CorrelatedMhsClient;
use crate::orchestrator::RequestOrchestrator;
use crate::subscriber::{initialise_subscriber, DeliveryProcessor, SubscriberHandle};
use crate::templates::{EbxmlTemplates, ServiceIdentity};
use crate::PDS_ODS_CODE;

/// The gateway and everything it owns.
pub struct GatewayService {
    config: GatewayConfig,
    manager: Arc<ConnectionManager>,
    publisher: Arc<dyn MessagePublisher>,
    pending_store: Arc<PendingRequestStore>,
    dispatcher: Dispatcher,
    router: Router,
}

impl GatewayService {
    /// Validate `config` and build every component over `connector`.
    pub fn new(config: GatewayConfig, connector: Arc<dyn Connector>) -> Result<Self, GatewayError> {
        config
            .validate()
            .map_err(|e| GatewayError::Config(e.to_string()))?;

        let endpoints = config
            .endpoints()
            .map_err(|e| GatewayError::Config(e.to_string()))?;
        let manager = Arc::new(ConnectionManager::new(
            endpoints,
            connector,
            config.failover_policy(),
        )?);

        let pending_store = Arc::new(PendingRequestStore::new(config.timeouts.mhs_response));
        let publisher: Arc<dyn MessagePublisher> =
            Arc::new(BrokerPublisher::new(Arc::clone(&manager)));

        let client = Arc::new(CorrelatedMhsClient::new(
            Arc::clone(&publisher),
            Arc::clone(&pending_store),
            config.broker.outbound_queue_name.clone(),
            config.timeouts.mhs_response,
        ));
        let orchestrator = Arc::new(RequestOrchestrator::new(
            Arc::new(EbxmlTemplates::new()),
            client,
        ));

        let health = Arc::new(HealthCheck::new(
            Arc::clone(&manager),
            config.node_env.clone(),
            config.broker.queue_name.clone(),
        ));

        let router = build_router(
            AppState {
                orchestrator,
                health,
                identity: Arc::new(config.identity.clone()),
            },
            config.auth.clone(),
            config.timeouts.request,
        );

        Ok(Self {
            config,
            manager,
            publisher,
            pending_store,
            dispatcher: Dispatcher::new(HandlerRegistry::gateway()),
            router,
        })
    }

    /// HTTP router, for serving or driving directly in tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Get pending request store
    pub fn pending_store(&self) -> Arc<PendingRequestStore> {
        Arc::clone(&self.pending_store)
    }

    /// Start consuming the inbound queue.
    pub async fn start_subscriber(&self) -> Result<SubscriberHandle, GatewayError> {
        initialise_subscriber(
            &self.manager,
            &self.config.broker.queue_name,
            DeliveryProcessor::new(
                self.dispatcher.clone(),
                Some(Arc::clone(&self.pending_store)),
            ),
        )
        .await
    }

    /// Answer the outbound queue in-process, replying on the inbound queue.
    pub async fn start_simulated_mhs(&self) -> Result<SubscriberHandle, GatewayError> {
        let replies = ReplyContext::new(
            Arc::clone(&self.publisher),
            self.config.broker.queue_name.clone(),
            ServiceIdentity::new(PDS_ODS_CODE, &self.config.identity.pds_asid),
        );
        initialise_subscriber(
            &self.manager,
            &self.config.broker.outbound_queue_name,
            DeliveryProcessor::new(Dispatcher::new(HandlerRegistry::simulated_mhs(replies)), None),
        )
        .await
    }

    /// Run until `shutdown` resolves or a subscriber loses its queue. The
    /// latter stops the server and returns [`GatewayError::SubscriberStopped`].
    pub async fn run<F>(self, shutdown: F) -> Result<(), GatewayError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!(node_env = %self.config.node_env, "Starting MHS gateway...");

        let mut subscribers = vec![self.start_subscriber().await?];
        if self.config.is_local() {
            info!("Local mode: answering outbound requests in-process");
            subscribers.push(self.start_simulated_mhs().await?);
        }

        let cleanup = {
            let pending_store = Arc::clone(&self.pending_store);
            let interval = self.config.timeouts.cleanup_interval;
            tokio::spawn(async move {
                cleanup_task(pending_store, interval).await;
            })
        };

        let addr = self.config.http_addr();
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::Bind(format!("{addr}: {e}")))?;
        info!(addr = %addr, "Starting HTTP server");

        let (lost_tx, mut lost_rx) = mpsc::channel::<String>(subscribers.len());
        for subscriber in &subscribers {
            let stopped = subscriber.stopped();
            let queue = subscriber.queue().to_string();
            let lost_tx = lost_tx.clone();
            tokio::spawn(async move {
                stopped.await;
                let _ = lost_tx.send(queue).await;
            });
        }
        drop(lost_tx);

        let (lost_queue_tx, mut lost_queue) = oneshot::channel::<String>();
        let stop = async move {
            tokio::select! {
                _ = shutdown => {}
                Some(queue) = lost_rx.recv() => {
                    error!(
                        status = "connection-failed",
                        queue = %queue,
                        "Subscriber lost its queue, stopping"
                    );
                    let _ = lost_queue_tx.send(queue);
                }
            }
        };

        let served = axum::serve(listener, self.router.clone())
            .with_graceful_shutdown(stop)
            .await;

        cleanup.abort();
        for subscriber in subscribers {
            subscriber.shutdown().await;
        }

        if let Err(e) = served {
            error!(error = %e, "HTTP server error");
            return Err(GatewayError::Internal(e.to_string()));
        }
        if let Ok(queue) = lost_queue.try_recv() {
            return Err(GatewayError::SubscriberStopped(queue));
        }

        info!("MHS gateway stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mhs_broker::InMemoryBroker;

    fn local_config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.node_env = "local".into();
        config.auth.keys = vec!["key".into()];
        config
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = local_config();
        config.broker.queue_name.clear();

        let err = GatewayService::new(config, Arc::new(InMemoryBroker::new()))
            .err()
            .unwrap();
        assert!(matches!(err, GatewayError::Config(_)));
    }

    #[tokio::test]
    async fn test_subscribers_attach_to_their_queues() {
        let broker = InMemoryBroker::new();
        let service = GatewayService::new(local_config(), Arc::new(broker.clone())).unwrap();

        let inbound = service.start_subscriber().await.unwrap();
        let outbound = service.start_simulated_mhs().await.unwrap();

        assert_eq!(broker.consumer_count("gp2gp-inbound"), 1);
        assert_eq!(broker.consumer_count("gp2gp-outbound"), 1);

        inbound.shutdown().await;
        outbound.shutdown().await;
        assert_eq!(broker.consumer_count("gp2gp-inbound"), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let mut config = local_config();
        config.http.host = std::net::Ipv4Addr::LOCALHOST.into();
        config.http.port = 0;
        let broker = InMemoryBroker::new();
        let service = GatewayService::new(config, Arc::new(broker.clone())).unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let running = tokio::spawn(service.run(async {
            let _ = rx.await;
        }));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(broker.consumer_count("gp2gp-outbound"), 1);

        tx.send(()).unwrap();
        running.await.unwrap().unwrap();
        assert_eq!(broker.consumer_count("gp2gp-inbound"), 0);
    }

    #[tokio::test]
    async fn test_run_fails_when_broker_drops_subscriber() {
        let mut config = local_config();
        config.http.host = std::net::Ipv4Addr::LOCALHOST.into();
        config.http.port = 0;
        let broker = InMemoryBroker::new();
        let service = GatewayService::new(config, Arc::new(broker.clone())).unwrap();

        let running = tokio::spawn(service.run(std::future::pending()));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(broker.close_consumers("gp2gp-inbound"), 1);

        let result = tokio::time::timeout(std::time::Duration::from_secs(2), running)
            .await
            .unwrap()
            .unwrap();
        match result {
            Err(GatewayError::SubscriberStopped(queue)) => assert_eq!(queue, "gp2gp-inbound"),
            other => panic!("expected SubscriberStopped, got {other:?}"),
        }
    }
}
