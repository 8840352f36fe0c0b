//! Tickets pulled from the ticketing queue and the traits used to read and update them.

mod traits;
mod types;

pub use traits::{SourceError, TicketSource, TicketUpdater, UpdateError};
pub use types::{
    AttachmentRef, Ticket, TicketKind, TicketOutcome, TicketStatus, TicketUpdate,
};
