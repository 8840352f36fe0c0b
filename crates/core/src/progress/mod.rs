//! Durable progress journal.
//!
//! One record per ticket tracks how far its pipeline got, so a restarted or
//! retried ticket resumes where it stopped and a release is never issued
//! twice for the same ticket.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteProgressStore;
pub use store::{ProgressStore, StoreError};
pub use types::{ProgressFilter, ProgressRecord, WorkflowState};
