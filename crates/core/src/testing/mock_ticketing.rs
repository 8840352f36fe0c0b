//! Mock ticket source and updater for testing.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::ticket::{SourceError, Ticket, TicketSource, TicketUpdate, TicketUpdater, UpdateError};

/// Mock implementation of the TicketSource trait.
///
/// Returns the configured queue on every poll, like a real queue that keeps
/// listing a ticket until someone closes it.
///
/// # Example
///
/// ```rust,ignore
/// let source = MockTicketSource::new();
/// source.set_tickets(vec![fixtures::ticket("INC001")]).await;
/// source.fail_next(SourceError::Timeout).await;
///
/// assert!(source.poll().await.is_err());
/// assert_eq!(source.poll().await.unwrap().len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MockTicketSource {
    tickets: RwLock<Vec<Ticket>>,
    /// Errors returned by the next polls, in order.
    errors: RwLock<VecDeque<SourceError>>,
    /// If set, every poll fails with this message.
    down: RwLock<Option<String>>,
    polls: RwLock<u32>,
}

impl MockTicketSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the pending queue.
    pub async fn set_tickets(&self, tickets: Vec<Ticket>) {
        *self.tickets.write().await = tickets;
    }

    /// Fail the next poll with `error`. Queued errors are used in order.
    pub async fn fail_next(&self, error: SourceError) {
        self.errors.write().await.push_back(error);
    }

    /// Make every poll fail until `set_up` is called.
    pub async fn set_down(&self, detail: impl Into<String>) {
        *self.down.write().await = Some(detail.into());
    }

    pub async fn set_up(&self) {
        *self.down.write().await = None;
    }

    /// Number of poll calls so far.
    pub async fn poll_count(&self) -> u32 {
        *self.polls.read().await
    }
}

#[async_trait]
impl TicketSource for MockTicketSource {
    fn name(&self) -> &str {
        "mock"
    }

    async fn poll(&self) -> Result<Vec<Ticket>, SourceError> {
        *self.polls.write().await += 1;

        if let Some(error) = self.errors.write().await.pop_front() {
            return Err(error);
        }
        if let Some(detail) = self.down.read().await.clone() {
            return Err(SourceError::Unavailable(detail));
        }
        Ok(self.tickets.read().await.clone())
    }
}

/// A recorded ticket update for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedUpdate {
    pub update: TicketUpdate,
    pub timestamp: DateTime<Utc>,
}

/// Mock implementation of the TicketUpdater trait.
///
/// Records every successful update. Failures can be scripted for the next
/// N calls or made permanent.
#[derive(Debug, Default)]
pub struct MockTicketUpdater {
    updates: RwLock<Vec<RecordedUpdate>>,
    failures_remaining: RwLock<u32>,
    always_fail: RwLock<bool>,
    attempts: RwLock<u32>,
}

impl MockTicketUpdater {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` update calls.
    pub async fn fail_next(&self, count: u32) {
        *self.failures_remaining.write().await = count;
    }

    /// Fail every update call until cleared.
    pub async fn set_always_fail(&self, fail: bool) {
        *self.always_fail.write().await = fail;
    }

    /// Updates that were accepted.
    pub async fn updates(&self) -> Vec<TicketUpdate> {
        self.updates
            .read()
            .await
            .iter()
            .map(|r| r.update.clone())
            .collect()
    }

    /// Accepted updates for one ticket.
    pub async fn updates_for(&self, ticket_id: &str) -> Vec<TicketUpdate> {
        self.updates()
            .await
            .into_iter()
            .filter(|u| u.ticket_id == ticket_id)
            .collect()
    }

    /// Update calls made, failed ones included.
    pub async fn attempt_count(&self) -> u32 {
        *self.attempts.read().await
    }
}

#[async_trait]
impl TicketUpdater for MockTicketUpdater {
    fn name(&self) -> &str {
        "mock"
    }

    async fn update(&self, update: &TicketUpdate) -> Result<(), UpdateError> {
        *self.attempts.write().await += 1;

        if *self.always_fail.read().await {
            return Err(UpdateError::Failed("mock updater is down".to_string()));
        }
        {
            let mut remaining = self.failures_remaining.write().await;
            if *remaining > 0 {
                *remaining -= 1;
                return Err(UpdateError::Failed("mock update failure".to_string()));
            }
        }

        self.updates.write().await.push(RecordedUpdate {
            update: update.clone(),
            timestamp: Utc::now(),
        });
        Ok(())
    }
}
