//! Mock attachment inspector for testing.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::inspector::{
    AttachmentInspector, ContainerFormat, ExtractedJustification, Inspection, InspectionError,
};
use crate::ticket::Ticket;

/// Mock implementation of the AttachmentInspector trait.
///
/// Tickets without a configured result are reported as not protected.
#[derive(Debug, Default)]
pub struct MockInspector {
    results: RwLock<HashMap<String, Inspection>>,
    /// Errors returned for a ticket before its result, in order.
    errors: RwLock<HashMap<String, VecDeque<InspectionError>>>,
    calls: RwLock<Vec<String>>,
}

impl MockInspector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report the ticket's attachment as password protected with `extracted`.
    pub async fn set_protected(&self, ticket_id: &str, extracted: ExtractedJustification) {
        self.results.write().await.insert(
            ticket_id.to_string(),
            Inspection::protected(Some(ContainerFormat::Zip), extracted),
        );
    }

    /// Report the ticket's attachment as not protected.
    pub async fn set_not_protected(&self, ticket_id: &str) {
        self.results
            .write()
            .await
            .insert(ticket_id.to_string(), Inspection::not_protected(None));
    }

    /// Fail the next inspection of this ticket.
    pub async fn fail_next(&self, ticket_id: &str, error: InspectionError) {
        self.errors
            .write()
            .await
            .entry(ticket_id.to_string())
            .or_default()
            .push_back(error);
    }

    /// Inspections of this ticket so far, failed ones included.
    pub async fn call_count(&self, ticket_id: &str) -> usize {
        self.calls
            .read()
            .await
            .iter()
            .filter(|id| id.as_str() == ticket_id)
            .count()
    }
}

#[async_trait]
impl AttachmentInspector for MockInspector {
    async fn inspect(&self, ticket: &Ticket) -> Result<Inspection, InspectionError> {
        self.calls.write().await.push(ticket.id.clone());

        if let Some(queue) = self.errors.write().await.get_mut(&ticket.id) {
            if let Some(error) = queue.pop_front() {
                return Err(error);
            }
        }

        Ok(self
            .results
            .read()
            .await
            .get(&ticket.id)
            .cloned()
            .unwrap_or_else(|| Inspection::not_protected(None)))
    }
}
