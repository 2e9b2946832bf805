//! Gateway error types and their HTTP mapping.
//!
//! | Variant        | Status | Body                              |
//! |----------------|--------|-----------------------------------|
//! | `Unauthorized` | 401    | `{"error": msg}`                  |
//! | `Forbidden`    | 403    | `{"error": msg}`                  |
//! | `Validation`   | 422    | `{"errors": [{field: msg}, ...]}` |
//! | `Unavailable`  | 503    | `{"errors": msg}`                 |
//! | `Timeout`      | 504    | `{"errors": msg}`                 |

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use mhs_broker::{BrokerError, ConnectionError};
use serde::Serialize;
use std::fmt;

/// One failed field check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl Serialize for FieldError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.field, &self.message)?;
        map.end()
    }
}

/// Errors surfaced to API callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Missing credential
    Unauthorized(String),
    /// Credential not recognised
    Forbidden(String),
    /// Input failed format validation
    Validation(Vec<FieldError>),
    /// Broker round trip failed
    Unavailable(String),
    /// Request exceeded its deadline
    Timeout(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// JSON body for the response.
    pub fn body(&self) -> serde_json::Value {
        match self {
            Self::Unauthorized(message) | Self::Forbidden(message) => {
                serde_json::json!({ "error": message })
            }
            Self::Validation(errors) => serde_json::json!({ "errors": errors }),
            Self::Unavailable(message) | Self::Timeout(message) => {
                serde_json::json!({ "errors": message })
            }
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthorized(message)
            | Self::Forbidden(message)
            | Self::Unavailable(message)
            | Self::Timeout(message) => f.write_str(message),
            Self::Validation(errors) => {
                let messages: Vec<&str> = errors.iter().map(|e| e.message.as_str()).collect();
                f.write_str(&messages.join(", "))
            }
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}

/// Result type for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Gateway-level errors (start-up and background tasks)
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Server socket bind error
    #[error("server bind error: {0}")]
    Bind(String),

    /// Broker unreachable after failover
    #[error("broker connection failed: {0}")]
    Connection(#[from] ConnectionError),

    /// Broker refused an operation
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    /// A queue subscriber lost its subscription
    #[error("subscriber for '{0}' stopped")]
    SubscriberStopped(String),

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),
}
