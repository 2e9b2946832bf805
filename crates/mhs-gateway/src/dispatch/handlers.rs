//! Per-interaction handlers.
//!
//! Handlers hold no per-message state. The ones that reply build their
//! response from the inbound envelope and publish it through a
//! [`ReplyContext`] in a single transaction.

use async_trait::async_trait;
use mhs_broker::MessagePublisher;
use mhs_envelope::{InboundMessage, ParsedEnvelope};
use std::sync::Arc;
use tracing::{debug, info};

use super::{HandlerError, HandlerOutcome, MessageHandler};
use crate::templates::{EbxmlTemplates, MessageRecord, ServiceIdentity, FRAGMENT_COUNT};

/// Where and as whom a replying handler publishes.
#[derive(Clone)]
pub struct ReplyContext {
    publisher: Arc<dyn MessagePublisher>,
    destination: String,
    identity: ServiceIdentity,
    templates: EbxmlTemplates,
}

impl ReplyContext {
    pub fn new(
        publisher: Arc<dyn MessagePublisher>,
        destination: impl Into<String>,
        identity: ServiceIdentity,
    ) -> Self {
        Self {
            publisher,
            destination: destination.into(),
            identity,
            templates: EbxmlTemplates::new(),
        }
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Record addressed back to the sender of `message`, in its conversation.
    fn reply_record(
        &self,
        message: &InboundMessage,
        envelope: &ParsedEnvelope,
    ) -> Result<MessageRecord, HandlerError> {
        let conversation_id = message
            .correlation_id
            .as_deref()
            .ok_or(HandlerError::MissingField("ConversationId"))?;

        let sender = ServiceIdentity::new(
            party_ods_code(envelope, "From").unwrap_or_default(),
            sender_asid(envelope).unwrap_or_default(),
        );
        let mut record = MessageRecord::new(conversation_id)
            .with_sender(self.identity.clone())
            .with_receiver(sender);
        if let Some(nhs_number) = patient_nhs_number(envelope) {
            record = record.with_nhs_number(nhs_number);
        }
        Ok(record)
    }

    async fn send(&self, messages: Vec<String>) -> Result<usize, HandlerError> {
        let count = messages.len();
        self.publisher.publish(&self.destination, messages).await?;
        debug!(destination = %self.destination, count, "Published reply");
        Ok(count)
    }
}

/// `ehr-request-completed`: the EHR extract has arrived.
#[derive(Debug, Default)]
pub struct EhrRequestCompletedHandler;

#[async_trait]
impl MessageHandler for EhrRequestCompletedHandler {
    fn name(&self) -> &'static str {
        "EHRRequestCompleted"
    }

    async fn handle(&self, message: &InboundMessage) -> Result<HandlerOutcome, HandlerError> {
        info!(
            status = "ehr-request-completed",
            conversation_id = message.correlation_id.as_deref().unwrap_or_default(),
            "EHR extract received"
        );
        Ok(HandlerOutcome::handled(self.name()))
    }
}

#[derive(Debug, Default)]
pub struct PdsGeneralUpdateRequestAcceptedHandler;

#[async_trait]
impl MessageHandler for PdsGeneralUpdateRequestAcceptedHandler {
    fn name(&self) -> &'static str {
        "PDSGeneralUpdateRequestAccepted"
    }

    async fn handle(&self, message: &InboundMessage) -> Result<HandlerOutcome, HandlerError> {
        info!(
            status = "pds-update-accepted",
            conversation_id = message.correlation_id.as_deref().unwrap_or_default(),
            "PDS general update request accepted"
        );
        Ok(HandlerOutcome::handled(self.name()))
    }
}

/// Accepts any message nothing else is registered for.
#[derive(Debug, Default)]
pub struct DefaultMessageHandler;

#[async_trait]
impl MessageHandler for DefaultMessageHandler {
    fn name(&self) -> &'static str {
        "DefaultMessage"
    }

    async fn handle(&self, message: &InboundMessage) -> Result<HandlerOutcome, HandlerError> {
        info!(
            status = "unhandled-interaction",
            interaction_id = message.interaction_id.as_deref().unwrap_or_default(),
            conversation_id = message.correlation_id.as_deref().unwrap_or_default(),
            "No handler for interaction, message accepted"
        );
        Ok(HandlerOutcome::handled(self.name()))
    }
}

/// Answers an EHR request with an EHR extract.
pub struct EhrRequestHandler {
    context: ReplyContext,
}

impl EhrRequestHandler {
    pub fn new(context: ReplyContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl MessageHandler for EhrRequestHandler {
    fn name(&self) -> &'static str {
        "EHRRequest"
    }

    async fn handle(&self, message: &InboundMessage) -> Result<HandlerOutcome, HandlerError> {
        let envelope = ParsedEnvelope::parse(&message.body)?;
        let record = self.context.reply_record(message, &envelope)?;

        let extract = self.context.templates.ehr_extract(&record);
        let replies = self.context.send(vec![extract]).await?;

        info!(
            status = "ehr-extract-sent",
            conversation_id = %record.id,
            "Answered EHR request"
        );
        Ok(HandlerOutcome::replied(self.name(), replies))
    }
}

/// Answers a continue request with every fragment, then an acknowledgement.
pub struct ContinueRequestHandler {
    context: ReplyContext,
}

impl ContinueRequestHandler {
    pub fn new(context: ReplyContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl MessageHandler for ContinueRequestHandler {
    fn name(&self) -> &'static str {
        "ContinueRequest"
    }

    async fn handle(&self, message: &InboundMessage) -> Result<HandlerOutcome, HandlerError> {
        let envelope = ParsedEnvelope::parse(&message.body)?;
        let record = self.context.reply_record(message, &envelope)?;
        let acknowledged = first_text(&envelope, "MessageId").unwrap_or_else(|| record.id.clone());

        // One transaction: every fragment is enqueued before the acknowledgement.
        let templates = &self.context.templates;
        let mut messages: Vec<String> = (1..=FRAGMENT_COUNT)
            .map(|index| templates.fragment(&record, index))
            .collect();
        messages.push(templates.acknowledgement(&record, &acknowledged));

        let replies = self.context.send(messages).await?;

        info!(
            status = "fragments-sent",
            conversation_id = %record.id,
            fragments = FRAGMENT_COUNT,
            "Answered continue request"
        );
        Ok(HandlerOutcome::replied(self.name(), replies))
    }
}

/// Answers a PDS retrieval query with a PDS retrieval response.
pub struct PdsRetrievalQueryHandler {
    context: ReplyContext,
}

impl PdsRetrievalQueryHandler {
    pub fn new(context: ReplyContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl MessageHandler for PdsRetrievalQueryHandler {
    fn name(&self) -> &'static str {
        "PDSRetrievalQuery"
    }

    async fn handle(&self, message: &InboundMessage) -> Result<HandlerOutcome, HandlerError> {
        let envelope = ParsedEnvelope::parse(&message.body)?;
        let mut record = self.context.reply_record(message, &envelope)?;
        let nhs_number =
            queried_nhs_number(&envelope).ok_or(HandlerError::MissingField("nhsNumber"))?;
        record = record.with_nhs_number(nhs_number);

        let response = self.context.templates.pds_retrieval_response(&record);
        let replies = self.context.send(vec![response]).await?;
        Ok(HandlerOutcome::replied(self.name(), replies))
    }
}

fn first_text(envelope: &ParsedEnvelope, key: &str) -> Option<String> {
    envelope
        .find(key)
        .into_iter()
        .filter_map(|node| node.text())
        .map(str::trim)
        .find(|text| !text.is_empty())
        .map(str::to_string)
}

/// ODS code of the `From` or `To` party.
fn party_ods_code(envelope: &ParsedEnvelope, party: &str) -> Option<String> {
    envelope
        .find(party)
        .into_iter()
        .filter_map(|node| node.get("PartyId"))
        .filter_map(|node| node.text())
        .map(str::trim)
        .find(|text| !text.is_empty())
        .map(str::to_string)
}

/// ASID of the sending device in the HL7 wrapper.
fn sender_asid(envelope: &ParsedEnvelope) -> Option<String> {
    envelope
        .find("communicationFunctionSnd")
        .into_iter()
        .filter_map(|node| node.get("device"))
        .filter_map(|device| device.get("id"))
        .filter_map(|id| id.get("extension"))
        .filter_map(|extension| extension.text())
        .map(str::to_string)
        .next()
}

/// NHS number of the record target of an EHR request or extract.
fn patient_nhs_number(envelope: &ParsedEnvelope) -> Option<String> {
    envelope
        .find("patient")
        .into_iter()
        .filter_map(|patient| patient.get("id"))
        .filter_map(|id| id.get("extension"))
        .filter_map(|extension| extension.text())
        .map(str::to_string)
        .next()
}

/// NHS number a PDS retrieval query asks about.
fn queried_nhs_number(envelope: &ParsedEnvelope) -> Option<String> {
    envelope
        .find("person.id")
        .into_iter()
        .filter_map(|person| person.get("value"))
        .filter_map(|value| value.get("extension"))
        .filter_map(|extension| extension.text())
        .map(str::to_string)
        .next()
}
