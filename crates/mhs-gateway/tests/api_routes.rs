//! Router behaviour driven through `tower::ServiceExt::oneshot`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use parking_lot::Mutex;
use tower::ServiceExt;

use mhs_broker::{BrokerEndpoint, ConnectionError, ConnectionManager, FailoverPolicy, InMemoryBroker};
use mhs_gateway::domain::{AuthConfig, IdentityConfig};
use mhs_gateway::{
    build_router, AppState, BrokerResponse, EbxmlTemplates, HealthCheck, MhsClient, MhsError,
    MhsRequest, RequestOrchestrator,
};

/// Returns a canned result and remembers what it was asked to send.
struct ScriptedClient {
    result: Result<BrokerResponse, MhsError>,
    sent: Mutex<Vec<MhsRequest>>,
}

#[async_trait]
impl MhsClient for ScriptedClient {
    async fn send_message(&self, request: MhsRequest) -> Result<BrokerResponse, MhsError> {
        self.sent.lock().push(request);
        self.result.clone()
    }
}

struct Harness {
    router: Router,
    client: Arc<ScriptedClient>,
    broker: InMemoryBroker,
}

fn harness(result: Result<BrokerResponse, MhsError>) -> Harness {
    let broker = InMemoryBroker::new();
    let manager = Arc::new(
        ConnectionManager::new(
            vec![BrokerEndpoint::new("mq-1", 61613)],
            Arc::new(broker.clone()),
            FailoverPolicy {
                max_reconnects: 0,
                reconnect_delay: Duration::from_millis(1),
            },
        )
        .unwrap(),
    );

    let client = Arc::new(ScriptedClient {
        result,
        sent: Mutex::new(Vec::new()),
    });
    let state = AppState {
        orchestrator: Arc::new(RequestOrchestrator::new(
            Arc::new(EbxmlTemplates::new()),
            client.clone(),
        )),
        health: Arc::new(HealthCheck::new(manager, "test", "gp2gp-inbound")),
        identity: Arc::new(IdentityConfig {
            deductions_asid: "deductionsAsid".into(),
            deductions_ods_code: "B86041".into(),
            pds_asid: "pdsAsid".into(),
        }),
    };
    let auth = AuthConfig {
        keys: vec!["correct-key".into(), "other-key".into()],
    };

    Harness {
        router: build_router(state, auth, Duration::from_secs(5)),
        client,
        broker,
    }
}

fn ok(data: &str) -> Result<BrokerResponse, MhsError> {
    Ok(BrokerResponse::new(200, data))
}

async fn get(router: &Router, uri: &str, key: Option<&str>) -> (StatusCode, serde_json::Value) {
    let mut request = Request::builder().uri(uri);
    if let Some(key) = key {
        request = request.header("Authorization", key);
    }
    let response = router
        .clone()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn missing_authorization_is_401() {
    let h = harness(ok("message"));
    let (status, body) = get(&h.router, "/pds-retrieval/9999999999", None).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Authorization header not provided");
    assert!(h.client.sent.lock().is_empty());
}

#[tokio::test]
async fn wrong_authorization_is_403() {
    let h = harness(ok("message"));
    let (status, body) = get(&h.router, "/pds-retrieval/9999999999", Some("wrong")).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(
        body["error"],
        "Authorization header value is not a valid authorization key"
    );
}

#[tokio::test]
async fn valid_request_returns_mhs_message() {
    let h = harness(ok("message"));
    let (status, body) = get(&h.router, "/pds-retrieval/9999999999", Some("other-key")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!({ "message": "message" }));

    let sent = h.client.sent.lock();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].interaction_id, "QUPA_IN000008UK02");
    assert!(sent[0].message.contains("9999999999"));
    assert!(sent[0].message.contains(&sent[0].conversation_id.to_string()));
    assert!(sent[0].message.contains("pdsAsid"));
}

#[tokio::test]
async fn short_nhs_number_is_422_without_broker_call() {
    let h = harness(ok("message"));
    let (status, body) = get(&h.router, "/pds-retrieval/99", Some("correct-key")).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        body,
        serde_json::json!({
            "errors": [{ "nhsNumber": "'nhsNumber' provided is not 10 characters" }]
        })
    );
    assert!(h.client.sent.lock().is_empty());
}

#[tokio::test]
async fn non_numeric_nhs_number_is_422_without_broker_call() {
    let h = harness(ok("message"));
    let (status, body) = get(&h.router, "/pds-retrieval/xxxxxxxxxx", Some("correct-key")).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        body,
        serde_json::json!({
            "errors": [{ "nhsNumber": "'nhsNumber' provided is not numeric" }]
        })
    );
    assert!(h.client.sent.lock().is_empty());
}

#[tokio::test]
async fn mhs_500_is_503_with_mhs_error() {
    let h = harness(Ok(BrokerResponse::new(500, "500 MHS Error")));
    let (status, body) = get(&h.router, "/pds-retrieval/9999999999", Some("correct-key")).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["errors"], "MHS Error: 500 MHS Error");
}

#[tokio::test]
async fn mhs_503_is_503_with_unexpected_error() {
    let h = harness(Ok(BrokerResponse::new(503, "MHS error")));
    let (status, body) = get(&h.router, "/pds-retrieval/9999999999", Some("correct-key")).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["errors"], "Unexpected Error: MHS error");
}

#[tokio::test]
async fn send_failure_is_503_with_its_message() {
    let h = harness(Err(MhsError::Transport("rejected".into())));
    let (status, body) = get(&h.router, "/pds-retrieval/9999999999", Some("correct-key")).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["errors"], "rejected");
}

#[tokio::test]
async fn broker_unreachable_is_503() {
    let h = harness(Err(MhsError::Connection(ConnectionError {
        cause: "connection refused".into(),
    })));
    let (status, body) = get(&h.router, "/pds-retrieval/9999999999", Some("correct-key")).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["errors"], "connection refused");
}

#[tokio::test]
async fn health_needs_no_authorization() {
    let h = harness(ok("message"));
    let (status, body) = get(&h.router, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["details"]["mhs"]["connected"], true);
    assert_eq!(body["details"]["mhs"]["queue_name"], "gp2gp-inbound");
}

#[tokio::test]
async fn health_is_503_when_broker_is_down() {
    let h = harness(ok("message"));
    h.broker.set_offline(true);
    let (status, body) = get(&h.router, "/health", None).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["details"]["mhs"]["connected"], false);
}
