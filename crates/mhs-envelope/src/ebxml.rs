//! # ebXML Routing Keys
//!
//! The MHS envelope carries its routing metadata in the SOAP header:
//!
//! ```text
//! Envelope / Header / MessageHeader / Action          -> interaction identifier
//! Envelope / Header / MessageHeader / ConversationId  -> correlation identifier
//! ```

use crate::parser::{ParseError, ParsedEnvelope};

/// Depth within which routing keys are searched.
///
/// The root mapping, `Envelope`, `Header` and `MessageHeader` account for
/// four levels; one more tolerates a single wrapping element.
pub const ACTION_SEARCH_DEPTH: usize = 5;

/// Known interaction identifiers.
pub mod interactions {
    /// GP2GP EHR request.
    pub const EHR_REQUEST: &str = "RCMR_IN010000UK05";
    /// GP2GP EHR extract (response to an EHR request).
    pub const EHR_EXTRACT: &str = "RCMR_IN030000UK06";
    /// GP2GP EHR request completed.
    pub const EHR_REQUEST_COMPLETED: &str = EHR_EXTRACT;
    /// GP2GP continue message requesting large-message fragments.
    pub const CONTINUE_REQUEST: &str = "COPC_IN000001UK01";
    /// Application acknowledgement.
    pub const ACKNOWLEDGEMENT: &str = "MCCI_IN010000UK13";
    /// PDS general update request accepted.
    pub const PDS_GENERAL_UPDATE_REQUEST_ACCEPTED: &str = "PRPA_IN000202UK01";
    /// PDS retrieval query.
    pub const PDS_RETRIEVAL_QUERY: &str = "QUPA_IN000008UK02";
    /// PDS retrieval response.
    pub const PDS_RETRIEVAL_RESPONSE: &str = "QUPA_IN000009UK03";
}

/// First non-empty `Action` value of the envelope.
#[must_use]
pub fn extract_interaction_id(envelope: &ParsedEnvelope) -> Option<String> {
    first_non_empty(envelope, "Action")
}

/// First non-empty `ConversationId` value of the envelope.
#[must_use]
pub fn extract_conversation_id(envelope: &ParsedEnvelope) -> Option<String> {
    first_non_empty(envelope, "ConversationId")
}

fn first_non_empty(envelope: &ParsedEnvelope, key: &str) -> Option<String> {
    envelope
        .find_all(key, ACTION_SEARCH_DEPTH)
        .into_iter()
        .filter_map(|node| node.text())
        .map(str::trim)
        .find(|text| !text.is_empty())
        .map(str::to_string)
}

/// A message delivered by the broker, with its routing keys resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Raw document body, exactly as delivered.
    pub body: String,
    /// Interaction identifier from `Action`.
    pub interaction_id: Option<String>,
    /// Correlation identifier from `ConversationId`.
    pub correlation_id: Option<String>,
}

impl InboundMessage {
    /// Parse `body` and resolve its routing keys.
    pub fn from_raw(body: impl Into<String>) -> Result<Self, ParseError> {
        let body = body.into();
        let envelope = ParsedEnvelope::parse(&body)?;
        Ok(Self::from_parsed(body, &envelope))
    }

    /// Build from a body that has already been parsed.
    #[must_use]
    pub fn from_parsed(body: String, envelope: &ParsedEnvelope) -> Self {
        Self {
            interaction_id: extract_interaction_id(envelope),
            correlation_id: extract_conversation_id(envelope),
            body,
        }
    }
}
