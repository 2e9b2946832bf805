//! # Inbound Dispatcher
//!
//! Routes each inbound envelope to the handler registered for its
//! interaction identifier:
//!
//! ```text
//! raw body ──parse──▶ Action ──lookup──▶ handler ──▶ HandlerOutcome
//!                       │                  │
//!                  absent: MissingAction   unknown: default handler
//! ```
//!
//! The registry is built once at start-up and never mutated afterwards.

pub mod handlers;

use async_trait::async_trait;
use mhs_broker::OutboundError;
use mhs_envelope::{interactions, InboundMessage, ParseError};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::templates::TemplateError;

pub use handlers::{
    ContinueRequestHandler, DefaultMessageHandler, EhrRequestCompletedHandler, EhrRequestHandler,
    PdsGeneralUpdateRequestAcceptedHandler, PdsRetrievalQueryHandler, ReplyContext,
};

/// What a handler did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerOutcome {
    /// Name of the handler that ran
    pub handler: &'static str,
    /// Messages published in response
    pub replies: usize,
}

impl HandlerOutcome {
    pub fn handled(handler: &'static str) -> Self {
        Self {
            handler,
            replies: 0,
        }
    }

    pub fn replied(handler: &'static str, replies: usize) -> Self {
        Self { handler, replies }
    }
}

/// Handler failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Outbound(#[from] OutboundError),

    #[error("message has no {0}")]
    MissingField(&'static str),
}

/// Dispatch failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Message does not contain action")]
    MissingAction,

    #[error(transparent)]
    Handler(#[from] HandlerError),
}

/// Business logic for one interaction type.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Handle the original message.
    async fn handle(&self, message: &InboundMessage) -> Result<HandlerOutcome, HandlerError>;
}

/// Interaction identifier to handler table with a guaranteed default.
#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
    default: Arc<dyn MessageHandler>,
}

impl HandlerRegistry {
    pub fn new(default: Arc<dyn MessageHandler>) -> Self {
        Self {
            handlers: HashMap::new(),
            default,
        }
    }

    /// Register `handler` for `interaction_id`, replacing any previous one.
    pub fn with(mut self, interaction_id: &str, handler: Arc<dyn MessageHandler>) -> Self {
        self.handlers.insert(interaction_id.to_string(), handler);
        self
    }

    /// Exact-match lookup, falling back to the default handler.
    pub fn resolve(&self, interaction_id: &str) -> &Arc<dyn MessageHandler> {
        self.handlers.get(interaction_id).unwrap_or(&self.default)
    }

    /// Registered interactions, not counting the default.
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Handlers for messages the MHS delivers to the gateway.
    pub fn gateway() -> Self {
        Self::new(Arc::new(DefaultMessageHandler))
            .with(
                interactions::EHR_REQUEST_COMPLETED,
                Arc::new(EhrRequestCompletedHandler),
            )
            .with(
                interactions::PDS_GENERAL_UPDATE_REQUEST_ACCEPTED,
                Arc::new(PdsGeneralUpdateRequestAcceptedHandler),
            )
    }

    /// Handlers that answer requests the way the MHS would, publishing
    /// through `replies`.
    pub fn simulated_mhs(replies: ReplyContext) -> Self {
        Self::new(Arc::new(DefaultMessageHandler))
            .with(
                interactions::PDS_RETRIEVAL_QUERY,
                Arc::new(PdsRetrievalQueryHandler::new(replies.clone())),
            )
            .with(
                interactions::EHR_REQUEST,
                Arc::new(EhrRequestHandler::new(replies.clone())),
            )
            .with(
                interactions::CONTINUE_REQUEST,
                Arc::new(ContinueRequestHandler::new(replies)),
            )
    }
}

/// Routes inbound messages through a [`HandlerRegistry`].
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
}

impl Dispatcher {
    pub fn new(registry: HandlerRegistry) -> Self {
        debug!(handlers = registry.handler_count(), "Dispatcher ready");
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Parse `raw` and hand it to its handler.
    pub async fn dispatch(&self, raw: &str) -> Result<HandlerOutcome, DispatchError> {
        info!(status = "handling-message", "Handling inbound message");
        let message = InboundMessage::from_raw(raw)?;
        self.route(&message).await
    }

    /// Dispatch a message whose routing keys are already resolved.
    pub async fn dispatch_message(
        &self,
        message: &InboundMessage,
    ) -> Result<HandlerOutcome, DispatchError> {
        info!(status = "handling-message", "Handling inbound message");
        self.route(message).await
    }

    async fn route(&self, message: &InboundMessage) -> Result<HandlerOutcome, DispatchError> {
        let interaction_id = message
            .interaction_id
            .as_deref()
            .ok_or(DispatchError::MissingAction)?;

        let handler = self.registry.resolve(interaction_id);
        debug!(
            interaction_id,
            handler = handler.name(),
            conversation_id = message.correlation_id.as_deref().unwrap_or_default(),
            "Resolved handler"
        );

        Ok(handler.handle(message).await?)
    }
}
