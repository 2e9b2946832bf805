//! HTTP routes.
//!
//! - `GET /pds-retrieval/:nhsNumber` (authorized): PDS retrieval round trip
//! - `GET /health`: broker connectivity

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use mhs_envelope::interactions;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tracing::{error, info, warn};

use crate::domain::{ApiError, ApiResult, AuthConfig, FieldError, IdentityConfig};
use crate::health::HealthCheck;
use crate::middleware::{AuthLayer, TimeoutLayer, TracingLayer};
use crate::orchestrator::RequestOrchestrator;
use crate::templates::{MessageRecord, ServiceIdentity};
use crate::{NHS_NUMBER_LENGTH, PDS_ODS_CODE};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<RequestOrchestrator>,
    pub health: Arc<HealthCheck>,
    pub identity: Arc<IdentityConfig>,
}

/// Build the router with its middleware stack.
pub fn build_router(state: AppState, auth: AuthConfig, request_timeout: Duration) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(TracingLayer::new())
        .layer(TimeoutLayer::new(request_timeout));

    Router::new()
        .route(
            "/pds-retrieval/:nhs_number",
            get(pds_retrieval).route_layer(AuthLayer::new(auth)),
        )
        .route("/health", get(health))
        .layer(middleware)
        .with_state(state)
}

/// Format checks on an NHS number. Every failed check is reported.
pub fn validate_nhs_number(nhs_number: &str) -> Result<(), Vec<FieldError>> {
    let mut errors = Vec::new();

    if nhs_number.chars().count() != NHS_NUMBER_LENGTH {
        errors.push(FieldError::new(
            "nhsNumber",
            format!("'nhsNumber' provided is not {NHS_NUMBER_LENGTH} characters"),
        ));
    }
    if nhs_number.is_empty() || !nhs_number.chars().all(|c| c.is_ascii_digit()) {
        errors.push(FieldError::new(
            "nhsNumber",
            "'nhsNumber' provided is not numeric",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

async fn pds_retrieval(
    State(state): State<AppState>,
    Path(nhs_number): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    if let Err(errors) = validate_nhs_number(&nhs_number) {
        warn!(
            status = "validation-failed",
            validation.status = "failed",
            validation.errors = %serde_json::json!(errors),
            "Request validation failed"
        );
        return Err(ApiError::Validation(errors));
    }

    let identity = &state.identity;
    let record = MessageRecord::new(String::new())
        .with_sender(ServiceIdentity::new(
            &identity.deductions_ods_code,
            &identity.deductions_asid,
        ))
        .with_receiver(ServiceIdentity::new(PDS_ODS_CODE, &identity.pds_asid))
        .with_nhs_number(nhs_number);

    match state
        .orchestrator
        .request(interactions::PDS_RETRIEVAL_QUERY, record)
        .await
    {
        Ok(exchange) => {
            info!(
                status = "200 PDS response received",
                conversation_id = %exchange.conversation_id,
                response.status = exchange.response.status,
                "PDS response received"
            );
            Ok(Json(serde_json::json!({ "message": exchange.response.data })))
        }
        Err(err) => {
            error!(error = %err, "PDS retrieval failed");
            Err(ApiError::Unavailable(err.to_string()))
        }
    }
}

async fn health(State(state): State<AppState>) -> Response {
    let status = state.health.check().await;
    info!(status = "Health check completed", "Health check completed");

    if status.is_healthy() {
        (StatusCode::OK, Json(status)).into_response()
    } else {
        warn!(
            mhs.connected = false,
            mhs.error = status.details.mhs.error.as_deref().unwrap_or_default(),
            "Broker unreachable"
        );
        (StatusCode::SERVICE_UNAVAILABLE, Json(status)).into_response()
    }
}
