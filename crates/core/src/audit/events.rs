use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Audit event types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    // System events
    ServiceStarted {
        version: String,
        config_hash: String,
    },
    ServiceStopped {
        reason: String,
    },

    /// One poll cycle fetched the ticket queue.
    TicketsPolled {
        source: String,
        /// Tickets returned after de-duplication.
        polled: usize,
        /// Tickets whose pipeline was started.
        dispatched: usize,
    },

    // Ticket lifecycle
    TicketStateChanged {
        ticket_id: String,
        from_state: String,
        to_state: String,
        reason: Option<String>,
    },
    JustificationEvaluated {
        ticket_id: String,
        accepted: bool,
        reason: String,
    },

    // Release
    ReleaseRequested {
        ticket_id: String,
        guid: String,
        attempt: u32,
    },
    ReleaseCompleted {
        ticket_id: String,
        guid: String,
        /// Release was established by a status query rather than a release call.
        via_status_query: bool,
    },
    ReleaseFailed {
        ticket_id: String,
        guid: String,
        attempt: u32,
        error_kind: String,
        detail: String,
        will_retry: bool,
    },

    /// Outcome written back to the ticketing system.
    TicketUpdated {
        ticket_id: String,
        outcome: String,
        detail: String,
    },

    /// A failure episode was reported to the distribution list.
    FailureNotified {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ticket_id: Option<String>,
        episode_id: String,
        stage: String,
        error_kind: String,
        /// False when the notifier itself failed.
        delivered: bool,
    },

    /// An operator reset a failed ticket.
    TicketRetryRequested {
        ticket_id: String,
        requested_by: String,
        previous_state: String,
        resume_state: String,
    },
}

impl AuditEvent {
    /// Returns the event type as a string for storage
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ServiceStarted { .. } => "service_started",
            Self::ServiceStopped { .. } => "service_stopped",
            Self::TicketsPolled { .. } => "tickets_polled",
            Self::TicketStateChanged { .. } => "ticket_state_changed",
            Self::JustificationEvaluated { .. } => "justification_evaluated",
            Self::ReleaseRequested { .. } => "release_requested",
            Self::ReleaseCompleted { .. } => "release_completed",
            Self::ReleaseFailed { .. } => "release_failed",
            Self::TicketUpdated { .. } => "ticket_updated",
            Self::FailureNotified { .. } => "failure_notified",
            Self::TicketRetryRequested { .. } => "ticket_retry_requested",
        }
    }

    /// Extract ticket_id if this event is ticket-related
    pub fn ticket_id(&self) -> Option<&str> {
        match self {
            Self::TicketStateChanged { ticket_id, .. }
            | Self::JustificationEvaluated { ticket_id, .. }
            | Self::ReleaseRequested { ticket_id, .. }
            | Self::ReleaseCompleted { ticket_id, .. }
            | Self::ReleaseFailed { ticket_id, .. }
            | Self::TicketUpdated { ticket_id, .. }
            | Self::TicketRetryRequested { ticket_id, .. } => Some(ticket_id),
            Self::FailureNotified { ticket_id, .. } => ticket_id.as_deref(),
            _ => None,
        }
    }

    /// Extract the actor if this event was triggered by an operator action
    pub fn actor(&self) -> Option<&str> {
        match self {
            Self::TicketRetryRequested { requested_by, .. } => Some(requested_by),
            _ => None,
        }
    }
}

/// A stored audit record with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub ticket_id: Option<String>,
    pub actor: Option<String>,
    pub data: AuditEvent,
}
