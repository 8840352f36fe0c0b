//! Types and traits for attachment inspection.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::policy::JustificationField;
use crate::ticket::{AttachmentRef, Ticket};

use super::protection::ContainerFormat;

/// Errors raised while reading or classifying an attachment.
///
/// These are processing failures, never a "not protected" verdict. All of them
/// are treated as transient by the engine.
#[derive(Debug, Error)]
pub enum InspectionError {
    /// The attachment could not be downloaded.
    #[error("attachment could not be read: {0}")]
    Unreadable(String),

    /// The attachment was downloaded but its container could not be parsed.
    #[error("attachment {file_name} is malformed: {reason}")]
    Malformed { file_name: String, reason: String },

    #[error("attachment inspection timed out")]
    Timeout,
}

/// Structured justification data extracted from a ticket.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtractedJustification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_guid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub justification_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manager_approval: Option<String>,
}

impl ExtractedJustification {
    /// Trimmed value of a field, or `None` when absent or blank.
    pub fn field(&self, field: JustificationField) -> Option<&str> {
        let value = match field {
            JustificationField::Requester => self.requester.as_deref(),
            JustificationField::ReasonCode => self.reason_code.as_deref(),
            JustificationField::MessageGuid => self.message_guid.as_deref(),
            JustificationField::JustificationText => self.justification_text.as_deref(),
            JustificationField::ManagerApproval => self.manager_approval.as_deref(),
        };
        value.map(str::trim).filter(|v| !v.is_empty())
    }
}

/// Result of inspecting a ticket's attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inspection {
    pub is_protected: bool,
    /// Container detected in the attachment, if any.
    pub container: Option<ContainerFormat>,
    /// Present only for protected attachments.
    pub extracted: Option<ExtractedJustification>,
}

impl Inspection {
    pub fn not_protected(container: Option<ContainerFormat>) -> Self {
        Self {
            is_protected: false,
            container,
            extracted: None,
        }
    }

    pub fn protected(container: Option<ContainerFormat>, extracted: ExtractedJustification) -> Self {
        Self {
            is_protected: true,
            container,
            extracted: Some(extracted),
        }
    }
}

/// Classifies a ticket's attachment and extracts justification data.
#[async_trait]
pub trait AttachmentInspector: Send + Sync {
    async fn inspect(&self, ticket: &Ticket) -> Result<Inspection, InspectionError>;
}

/// Reads attachment bytes from wherever the ticketing system stores them.
#[async_trait]
pub trait AttachmentFetcher: Send + Sync {
    async fn fetch(
        &self,
        ticket: &Ticket,
        attachment: &AttachmentRef,
    ) -> Result<Vec<u8>, InspectionError>;
}
