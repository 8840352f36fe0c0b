//! Progress journal storage trait.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::ticket::Ticket;

use super::{ProgressFilter, ProgressRecord, WorkflowState};

/// Error type for journal operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record for this ticket.
    #[error("Ticket not found: {0}")]
    NotFound(String),

    /// The requested state change is not a legal transition.
    #[error("Cannot move ticket {ticket_id} from {from} to {to}")]
    InvalidTransition {
        ticket_id: String,
        from: String,
        to: String,
    },

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),
}

/// Durable per-ticket progress journal.
///
/// This is where the release marker lives: the engine writes `Releasing`
/// here before every release call and consults it on every run.
pub trait ProgressStore: Send + Sync {
    /// Create a `New` record for the ticket, or return the existing one.
    fn begin(&self, ticket: &Ticket) -> Result<ProgressRecord, StoreError>;

    /// Get a record by ticket ID.
    fn get(&self, ticket_id: &str) -> Result<Option<ProgressRecord>, StoreError>;

    /// Move a record to a new state, rejecting illegal transitions.
    fn transition(
        &self,
        ticket_id: &str,
        next: WorkflowState,
    ) -> Result<ProgressRecord, StoreError>;

    /// List records matching the filter, most recently updated first.
    fn list(&self, filter: &ProgressFilter) -> Result<Vec<ProgressRecord>, StoreError>;

    /// Count records matching the filter.
    fn count(&self, filter: &ProgressFilter) -> Result<i64, StoreError>;

    /// Record counts keyed by state type.
    fn counts_by_state(&self) -> Result<BTreeMap<String, u64>, StoreError>;

    /// Reopen a `Failed` record so the next cycle picks it up again.
    fn reset_for_retry(&self, ticket_id: &str) -> Result<ProgressRecord, StoreError>;
}
