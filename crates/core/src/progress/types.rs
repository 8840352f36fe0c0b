//! Progress journal types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::{ErrorKind, Stage};
use crate::policy::JustificationDecision;
use crate::ticket::{TicketKind, TicketOutcome, TicketStatus};

/// Where a ticket is in its pipeline.
///
/// ```text
/// New -> Inspecting -> Skipped ------------------------> Updated
///                   -> Rejected -----------------------> Updated
///                   -> Justified -> Releasing -> Released -> Updated
///                      ^-----------'
/// ```
///
/// Any non-terminal state can transition to Failed. `Releasing` is written
/// before every release call and is the marker that prevents a blind second
/// release after a crash. `Releasing -> Justified` is only written when the
/// gateway is known not to have released the message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowState {
    /// Seen, nothing done yet.
    New,

    /// Attachment inspection in progress.
    Inspecting { started_at: DateTime<Utc> },

    /// Attachment not password protected; no release needed.
    Skipped { reason: String },

    /// Policy accepted the justification.
    Justified {
        guid: String,
        decision: JustificationDecision,
    },

    /// Policy rejected the justification.
    Rejected { decision: JustificationDecision },

    /// A release call for `guid` has been (or is about to be) issued.
    Releasing {
        guid: String,
        /// 1-based attempt number within the current episode.
        attempt: u32,
        requested_at: DateTime<Utc>,
    },

    /// The gateway confirmed the release.
    Released {
        guid: String,
        released_at: DateTime<Utc>,
    },

    /// Outcome recorded on the originating ticket.
    Updated {
        outcome: TicketOutcome,
        detail: String,
        updated_at: DateTime<Utc>,
    },

    /// Pipeline stopped; needs an operator retry.
    Failed {
        stage: Stage,
        error_kind: ErrorKind,
        detail: String,
        /// The gateway confirmed the release before the failure.
        release_confirmed: bool,
        /// Message GUID when a release marker had been written.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        guid: Option<String>,
        /// A release call may have gone through without the gateway saying so.
        #[serde(default)]
        release_in_doubt: bool,
        failed_at: DateTime<Utc>,
    },
}

impl WorkflowState {
    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowState::Updated { .. } | WorkflowState::Failed { .. })
    }

    /// Returns true if `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: &WorkflowState) -> bool {
        use WorkflowState::*;

        if self.is_terminal() {
            return false;
        }
        if matches!(next, Failed { .. }) {
            return true;
        }
        matches!(
            (self, next),
            (New, Inspecting { .. })
                | (Inspecting { .. }, Inspecting { .. })
                | (Inspecting { .. }, Skipped { .. })
                | (Inspecting { .. }, Justified { .. })
                | (Inspecting { .. }, Rejected { .. })
                | (Justified { .. }, Releasing { .. })
                | (Releasing { .. }, Releasing { .. })
                | (Releasing { .. }, Justified { .. })
                | (Releasing { .. }, Released { .. })
                | (Released { .. }, Updated { .. })
                | (Skipped { .. }, Updated { .. })
                | (Rejected { .. }, Updated { .. })
        )
    }

    /// Returns the state type as a string (for filtering).
    pub fn state_type(&self) -> &'static str {
        match self {
            WorkflowState::New => "new",
            WorkflowState::Inspecting { .. } => "inspecting",
            WorkflowState::Skipped { .. } => "skipped",
            WorkflowState::Justified { .. } => "justified",
            WorkflowState::Rejected { .. } => "rejected",
            WorkflowState::Releasing { .. } => "releasing",
            WorkflowState::Released { .. } => "released",
            WorkflowState::Updated { .. } => "updated",
            WorkflowState::Failed { .. } => "failed",
        }
    }

    /// Externally visible ticket status for this state.
    pub fn ticket_status(&self) -> TicketStatus {
        match self {
            WorkflowState::New => TicketStatus::New,
            WorkflowState::Inspecting { .. } => TicketStatus::Inspected,
            WorkflowState::Skipped { .. } => TicketStatus::Skipped,
            WorkflowState::Justified { .. } => TicketStatus::Justified,
            WorkflowState::Rejected { .. } => TicketStatus::Rejected,
            WorkflowState::Releasing { .. } => TicketStatus::Justified,
            WorkflowState::Released { .. } => TicketStatus::Released,
            WorkflowState::Updated { outcome, .. } => outcome.final_status(),
            WorkflowState::Failed { .. } => TicketStatus::Failed,
        }
    }

    /// State to resume from after an operator retry of a failed ticket.
    ///
    /// A confirmed release resumes at the update step. A release in doubt
    /// resumes at `Releasing`, which forces a status query before any new
    /// release call; a release known not to have happened resumes at
    /// `Justified`. Everything else starts over.
    pub fn retry_state(&self) -> Option<WorkflowState> {
        let WorkflowState::Failed {
            release_confirmed,
            release_in_doubt,
            guid,
            ..
        } = self
        else {
            return None;
        };

        let now = Utc::now();
        Some(match (release_confirmed, guid) {
            (true, Some(guid)) => WorkflowState::Released {
                guid: guid.clone(),
                released_at: now,
            },
            (false, Some(guid)) if *release_in_doubt => WorkflowState::Releasing {
                guid: guid.clone(),
                attempt: 0,
                requested_at: now,
            },
            (false, Some(guid)) => WorkflowState::Justified {
                guid: guid.clone(),
                decision: JustificationDecision::accept("release retried by operator"),
            },
            _ => WorkflowState::New,
        })
    }
}

/// One journal record per ticket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressRecord {
    pub ticket_id: String,
    pub ticket_number: String,
    pub kind: TicketKind,
    pub state: WorkflowState,
    /// Release markers written over the ticket's lifetime.
    pub release_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProgressRecord {
    pub fn status(&self) -> TicketStatus {
        self.state.ticket_status()
    }
}

/// Filter for querying journal records.
#[derive(Debug, Clone, Default)]
pub struct ProgressFilter {
    /// Filter by state type.
    pub state: Option<String>,
    /// Maximum number of results.
    pub limit: i64,
    /// Offset for pagination.
    pub offset: i64,
}

impl ProgressFilter {
    /// Create a new filter with defaults.
    pub fn new() -> Self {
        Self {
            state: None,
            limit: 100,
            offset: 0,
        }
    }

    /// Filter by state type.
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    /// Set limit.
    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    /// Set offset.
    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}
