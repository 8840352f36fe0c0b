//! Core ticket data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of record in the ticketing queue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TicketKind {
    /// Incident record.
    Incident,
    /// Request item (service request).
    Ritm,
}

impl TicketKind {
    /// Ticketing table backing this kind of record.
    pub fn table(&self) -> &'static str {
        match self {
            TicketKind::Incident => "incident",
            TicketKind::Ritm => "sc_req_item",
        }
    }

    /// Resolve a ticketing table name back to a kind.
    pub fn from_table(table: &str) -> Option<Self> {
        match table {
            "incident" => Some(TicketKind::Incident),
            "sc_req_item" => Some(TicketKind::Ritm),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TicketKind::Incident => "incident",
            TicketKind::Ritm => "ritm",
        }
    }

    /// Inverse of [`TicketKind::as_str`].
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "incident" => Some(TicketKind::Incident),
            "ritm" => Some(TicketKind::Ritm),
            _ => None,
        }
    }
}

/// Reference to a file attached to a ticket.
///
/// The bytes are not carried on the ticket; an `AttachmentFetcher` reads them
/// on demand during inspection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttachmentRef {
    /// Attachment identifier in the ticketing system.
    pub id: String,
    /// Original file name.
    pub file_name: String,
    /// MIME type reported by the ticketing system.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Size in bytes, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

/// Externally visible status of a ticket as seen by the engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    New,
    Inspected,
    Justified,
    Rejected,
    Released,
    Failed,
    Skipped,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::New => "new",
            TicketStatus::Inspected => "inspected",
            TicketStatus::Justified => "justified",
            TicketStatus::Rejected => "rejected",
            TicketStatus::Released => "released",
            TicketStatus::Failed => "failed",
            TicketStatus::Skipped => "skipped",
        }
    }
}

/// One incident or request item describing a quarantined email.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ticket {
    /// Unique identifier in the ticketing system (sys_id).
    pub id: String,
    /// Human readable number, e.g. `INC0012345` or `RITM0004567`.
    pub number: String,
    pub kind: TicketKind,
    #[serde(default)]
    pub short_description: String,
    /// Free-form body; justification lines are extracted from here.
    #[serde(default)]
    pub description: String,
    /// Caller / requested-for user, if the ticketing system provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<AttachmentRef>,
    /// Populated from the inspection result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub justification_text: Option<String>,
    /// Identifier of the quarantined message; required for release.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_guid: Option<String>,
    pub status: TicketStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opened_at: Option<DateTime<Utc>>,
}

impl Ticket {
    /// Create a bare ticket in the `New` status.
    pub fn new(id: impl Into<String>, number: impl Into<String>, kind: TicketKind) -> Self {
        Self {
            id: id.into(),
            number: number.into(),
            kind,
            short_description: String::new(),
            description: String::new(),
            requester: None,
            attachment: None,
            justification_text: None,
            message_guid: None,
            status: TicketStatus::New,
            opened_at: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_requester(mut self, requester: impl Into<String>) -> Self {
        self.requester = Some(requester.into());
        self
    }

    pub fn with_attachment(mut self, attachment: AttachmentRef) -> Self {
        self.attachment = Some(attachment);
        self
    }

    pub fn with_message_guid(mut self, guid: impl Into<String>) -> Self {
        self.message_guid = Some(guid.into());
        self
    }
}

/// Outcome recorded on the originating ticket.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TicketOutcome {
    Released,
    Rejected,
    Skipped,
    Failed,
}

impl TicketOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketOutcome::Released => "released",
            TicketOutcome::Rejected => "rejected",
            TicketOutcome::Skipped => "skipped",
            TicketOutcome::Failed => "failed",
        }
    }

    /// The ticket status a successfully recorded outcome settles on.
    pub fn final_status(&self) -> TicketStatus {
        match self {
            TicketOutcome::Released => TicketStatus::Released,
            TicketOutcome::Rejected => TicketStatus::Rejected,
            TicketOutcome::Skipped => TicketStatus::Skipped,
            TicketOutcome::Failed => TicketStatus::Failed,
        }
    }
}

/// Write request sent to the ticketing system.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TicketUpdate {
    pub ticket_id: String,
    /// Needed by the ticketing client to address the right table.
    pub kind: TicketKind,
    pub outcome: TicketOutcome,
    /// Human readable detail written to the ticket's work notes.
    pub detail: String,
}
