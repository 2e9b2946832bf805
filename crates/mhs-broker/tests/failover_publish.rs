//! Publish through the connection manager and consume on a separate session.

use std::sync::Arc;
use std::time::Duration;

use mhs_broker::{
    AckMode, BrokerEndpoint, BrokerPublisher, ConnectionEvent, ConnectionManager,
    FailoverPolicy, InMemoryBroker, MessagePublisher,
};

fn manager(broker: &InMemoryBroker) -> Arc<ConnectionManager> {
    let endpoints = vec![
        "tcp://mq-1:61613".parse::<BrokerEndpoint>().unwrap(),
        "tcp://mq-2:61613".parse::<BrokerEndpoint>().unwrap(),
    ];
    Arc::new(
        ConnectionManager::new(endpoints, Arc::new(broker.clone()), FailoverPolicy::default())
            .unwrap(),
    )
}

#[tokio::test]
async fn published_transaction_reaches_subscriber_in_order() {
    let broker = InMemoryBroker::new();
    let manager = manager(&broker);

    let consumer = manager.connect().await.unwrap();
    let mut subscription = consumer
        .subscribe("gp2gp-outbound", AckMode::ClientIndividual)
        .await
        .unwrap();

    let publisher = BrokerPublisher::new(Arc::clone(&manager));
    publisher
        .publish(
            "gp2gp-outbound",
            vec!["first".into(), "second".into(), "third".into()],
        )
        .await
        .unwrap();

    for expected in ["first", "second", "third"] {
        let delivery = tokio::time::timeout(Duration::from_secs(1), subscription.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivery.body, expected);
        consumer.ack(&delivery).await.unwrap();
    }
    assert_eq!(broker.outstanding(), 0);
}

#[tokio::test]
async fn outage_reports_connecting_and_error_events() {
    let broker = InMemoryBroker::new();
    broker.set_offline(true);
    let manager = manager(&broker);
    let mut events = manager.events();

    let err = manager.connect().await.err().unwrap();
    assert!(err.cause.contains("connection refused"));

    let mut connecting = 0;
    let mut errors = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            ConnectionEvent::Connecting { .. } => connecting += 1,
            ConnectionEvent::Error { .. } => errors += 1,
            ConnectionEvent::Connected { .. } => panic!("should not connect"),
        }
    }
    assert_eq!((connecting, errors), (2, 2));
}
