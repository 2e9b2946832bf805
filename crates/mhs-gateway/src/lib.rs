// Allow missing docs for internal items
#![allow(missing_docs)]

//! MHS Gateway - HTTP front door for PDS and GP2GP message exchange.
//!
//! Requests arrive over HTTP, are turned into ebXML envelopes and sent to the
//! MHS through a STOMP broker. Replies come back on the inbound queue and are
//! matched to the waiting request by conversation id.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                            MHS GATEWAY                               │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  GET /pds-retrieval/:nhsNumber          GET /health                  │
//! │         │                                    │                       │
//! │  ┌──────┴────────────────────────────────────┴──────┐                │
//! │  │        Tracing → Timeout → Auth (PDS only)       │                │
//! │  └──────┬────────────────────────────────────┬──────┘                │
//! │         │                                    │                       │
//! │  ┌──────┴───────────┐                 ┌──────┴──────┐                │
//! │  │   Orchestrator   │                 │ HealthCheck │                │
//! │  │ template + send  │                 └─────────────┘                │
//! │  └──────┬───────────┘                                                │
//! │         │ register(conversation)                                     │
//! │  ┌──────┴─────────────────────┐      ┌─────────────────────────────┐ │
//! │  │    Pending Request Store   │◀─────│ Subscriber (inbound queue)  │ │
//! │  │  (oneshot per conversation)│      │ reply? complete : dispatch  │ │
//! │  └──────┬─────────────────────┘      └──────────────▲──────────────┘ │
//! └─────────┼───────────────────────────────────────────┼────────────────┘
//!           │ publish (outbound queue)                  │ MESSAGE
//!           ▼                                           │
//!      ┌──────────────────────── STOMP broker ──────────┴─┐
//!      └───────────────────────────┬──────────────────────┘
//!                                  ▼
//!                                 MHS
//! ```
//!
//! With `NODE_ENV=local` the broker is in-process and a second subscriber
//! plays the MHS, answering the outbound queue from templates.
//!
//! # Usage
//!
//! ```ignore
//! use mhs_gateway::{GatewayConfig, GatewayService};
//!
//! let config = GatewayConfig::from_env()?;
//! let service = GatewayService::new(config, connector)?;
//! service.run(shutdown_signal()).await?;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod api;
pub mod dispatch;
pub mod domain;
pub mod health;
pub mod mhs;
pub mod middleware;
pub mod orchestrator;
pub mod service;
pub mod subscriber;
pub mod templates;

// Re-exports for public API
pub use api::{build_router, validate_nhs_number, AppState};
pub use dispatch::{
    DispatchError, Dispatcher, HandlerError, HandlerOutcome, HandlerRegistry, MessageHandler,
    ReplyContext,
};
pub use domain::config::GatewayConfig;
pub use domain::error::{ApiError, ApiResult, FieldError, GatewayError};
pub use domain::{CorrelationId, PendingRequestStore};
pub use health::{HealthCheck, HealthStatus};
pub use mhs::{BrokerResponse, CorrelatedMhsClient, MhsClient, MhsError, MhsRequest};
pub use orchestrator::{Exchange, OrchestratorError, RequestOrchestrator};
pub use service::GatewayService;
pub use subscriber::{initialise_subscriber, DeliveryOutcome, DeliveryProcessor, SubscriberHandle};
pub use templates::{EbxmlTemplates, MessageBuilder, MessageRecord, ServiceIdentity, TemplateError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Reported by the health check
pub const SERVICE_DESCRIPTION: &str = "MHS gateway for PDS retrieval and GP2GP";

/// Digits in an NHS number
pub const NHS_NUMBER_LENGTH: usize = 10;

/// ODS code of the Spine services PDS queries are addressed to
pub const PDS_ODS_CODE: &str = "YES";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_nhs_number_length() {
        assert!(validate_nhs_number(&"9".repeat(NHS_NUMBER_LENGTH)).is_ok());
        assert!(validate_nhs_number(&"9".repeat(NHS_NUMBER_LENGTH + 1)).is_err());
    }
}
