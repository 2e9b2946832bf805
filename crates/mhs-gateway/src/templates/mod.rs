//! Outbound message templates.
//!
//! A [`MessageRecord`] is turned into a complete ebXML envelope carrying an
//! HL7 payload. Values are XML-escaped on the way in.

mod ebxml;

pub use ebxml::{EbxmlTemplates, FRAGMENT_COUNT};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Timestamp layout used by HL7 `creationTime` and the ebXML header.
pub const HL7_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Template failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// A mandatory field was not supplied.
    #[error("{0} is undefined")]
    MissingField(&'static str),

    /// No template exists for the interaction.
    #[error("no template for interaction {0}")]
    UnknownInteraction(String),
}

/// Sending or receiving party.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceIdentity {
    pub ods_code: String,
    pub asid: String,
}

impl ServiceIdentity {
    pub fn new(ods_code: impl Into<String>, asid: impl Into<String>) -> Self {
        Self {
            ods_code: ods_code.into(),
            asid: asid.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientRecord {
    pub nhs_number: Option<String>,
}

/// Data a template is filled from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    /// Conversation id, upper-case
    pub id: String,
    /// `YYYYMMDDHHMMSS`
    pub timestamp: String,
    pub sending_service: ServiceIdentity,
    pub receiving_service: ServiceIdentity,
    pub patient: Option<PatientRecord>,
}

impl MessageRecord {
    /// Record for conversation `id`, stamped with the current time.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            timestamp: chrono::Utc::now().format(HL7_TIMESTAMP_FORMAT).to_string(),
            ..Self::default()
        }
    }

    pub fn with_sender(mut self, sender: ServiceIdentity) -> Self {
        self.sending_service = sender;
        self
    }

    pub fn with_receiver(mut self, receiver: ServiceIdentity) -> Self {
        self.receiving_service = receiver;
        self
    }

    pub fn with_nhs_number(mut self, nhs_number: impl Into<String>) -> Self {
        self.patient = Some(PatientRecord {
            nhs_number: Some(nhs_number.into()),
        });
        self
    }

    /// The patient's NHS number, or `MissingField("nhsNumber")`.
    pub fn nhs_number(&self) -> Result<&str, TemplateError> {
        self.patient
            .as_ref()
            .and_then(|patient| patient.nhs_number.as_deref())
            .filter(|nhs_number| !nhs_number.is_empty())
            .ok_or(TemplateError::MissingField("nhsNumber"))
    }
}

/// Builds the outbound document for a request interaction.
pub trait MessageBuilder: Send + Sync {
    fn build(&self, interaction_id: &str, record: &MessageRecord) -> Result<String, TemplateError>;
}

/// Fresh upper-case message id.
pub(crate) fn message_id() -> String {
    let mut buf = Uuid::encode_buffer();
    Uuid::new_v4()
        .hyphenated()
        .encode_upper(&mut buf)
        .to_string()
}
