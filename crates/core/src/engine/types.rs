//! Types for the workflow engine.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::NotifierConfig;
use crate::ticket::Ticket;

/// Errors returned by engine control operations.
///
/// Ticket processing itself never returns an error; failures end up as a
/// `Failed` journal record plus a notification.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No journal record for this ticket.
    #[error("ticket not found: {0}")]
    TicketNotFound(String),

    /// Operation not allowed in the ticket's current state.
    #[error("invalid ticket state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// The ticket is being processed right now.
    #[error("ticket is being processed: {0}")]
    TicketBusy(String),

    /// Progress journal error.
    #[error("progress store error: {0}")]
    Store(#[from] crate::progress::StoreError),
}

/// Pipeline stage, used in failure reports and metrics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Polling,
    Inspecting,
    Releasing,
    Updating,
}

impl Stage {
    /// Lowercase label for metrics and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Polling => "polling",
            Stage::Inspecting => "inspecting",
            Stage::Releasing => "releasing",
            Stage::Updating => "updating",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Polling => "Polling",
            Stage::Inspecting => "Inspecting",
            Stage::Releasing => "Releasing",
            Stage::Updating => "Updating",
        };
        f.write_str(name)
    }
}

/// Kind of failure that ended a ticket's pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Ticket source unreachable or returned garbage.
    SourceUnavailable,
    /// Attachment unreadable or unparseable.
    InspectionError,
    /// Release API unreachable or timed out.
    GatewayUnavailable,
    /// Release API refused the release.
    GatewayRejected,
    /// An ambiguous release could not be resolved by a status query.
    ReleaseUnconfirmed,
    /// Ticketing write failed.
    UpdateFailed,
    /// The progress journal could not be read or written.
    JournalError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SourceUnavailable => "source_unavailable",
            ErrorKind::InspectionError => "inspection_error",
            ErrorKind::GatewayUnavailable => "gateway_unavailable",
            ErrorKind::GatewayRejected => "gateway_rejected",
            ErrorKind::ReleaseUnconfirmed => "release_unconfirmed",
            ErrorKind::UpdateFailed => "update_failed",
            ErrorKind::JournalError => "journal_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failure episode. Drives exactly one notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureEvent {
    pub episode_id: Uuid,
    /// Absent for poll failures.
    pub ticket_id: Option<String>,
    pub ticket_number: Option<String>,
    pub stage: Stage,
    pub error_kind: ErrorKind,
    pub error_detail: String,
    pub timestamp: DateTime<Utc>,
}

impl FailureEvent {
    pub fn for_ticket(
        ticket: &Ticket,
        stage: Stage,
        error_kind: ErrorKind,
        error_detail: impl Into<String>,
    ) -> Self {
        Self {
            episode_id: Uuid::new_v4(),
            ticket_id: Some(ticket.id.clone()),
            ticket_number: Some(ticket.number.clone()),
            stage,
            error_kind,
            error_detail: error_detail.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn for_poll(error_kind: ErrorKind, error_detail: impl Into<String>) -> Self {
        Self {
            episode_id: Uuid::new_v4(),
            ticket_id: None,
            ticket_number: None,
            stage: Stage::Polling,
            error_kind,
            error_detail: error_detail.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Where failure alerts are sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertTarget {
    pub distribution_list: String,
    pub subject_prefix: String,
}

impl From<&NotifierConfig> for AlertTarget {
    fn from(config: &NotifierConfig) -> Self {
        Self {
            distribution_list: config.distribution_list.clone(),
            subject_prefix: config.subject_prefix.clone(),
        }
    }
}

/// Result of one poll cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollSummary {
    /// Tickets returned by the source (after de-duplication).
    pub polled: usize,
    /// Tickets whose pipeline ran this cycle.
    pub processed: usize,
    /// Tickets ignored because their journal record is terminal.
    pub already_terminal: usize,
    /// Tickets ignored because another pipeline holds them.
    pub in_flight: usize,
    pub released: usize,
    pub rejected: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Pipelines stopped by shutdown before the release stage.
    pub halted: usize,
    /// The source could not be polled.
    pub poll_failed: bool,
}

/// Current status of the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineStatus {
    /// Whether the poll loop is running.
    pub running: bool,
    /// Tickets currently being processed.
    pub in_flight: usize,
    /// When the last poll cycle finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_poll_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_poll: Option<PollSummary>,
    /// Journal record counts keyed by state type.
    pub journal: BTreeMap<String, u64>,
}
