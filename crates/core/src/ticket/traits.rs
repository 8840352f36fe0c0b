//! Collaborator traits for the ticketing system's read and write paths.

use async_trait::async_trait;
use thiserror::Error;

use super::{Ticket, TicketUpdate};

/// Errors from polling the ticket queue. All of them are transient.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("ticket source unavailable: {0}")]
    Unavailable(String),

    #[error("ticket source timed out")]
    Timeout,

    #[error("malformed ticket source response: {0}")]
    Malformed(String),
}

/// Errors from writing an outcome back to a ticket. All of them are transient.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("ticket update failed: {0}")]
    Failed(String),

    #[error("ticket update timed out")]
    Timeout,
}

/// Read side of the ticketing queue.
///
/// Each call returns the tickets currently pending; the same ticket may be
/// returned again by later calls until its outcome has been written back.
#[async_trait]
pub trait TicketSource: Send + Sync {
    /// Returns the name of this source implementation.
    fn name(&self) -> &str;

    /// Fetch the currently pending tickets.
    async fn poll(&self) -> Result<Vec<Ticket>, SourceError>;
}

/// Write side of the ticketing queue.
#[async_trait]
pub trait TicketUpdater: Send + Sync {
    /// Returns the name of this updater implementation.
    fn name(&self) -> &str;

    /// Record an outcome on the originating ticket.
    async fn update(&self, update: &TicketUpdate) -> Result<(), UpdateError>;
}
