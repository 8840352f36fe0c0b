//! Attachment inspector backed by the ticketing system's attachment storage.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::ticket::Ticket;

use super::extract::extract_justification;
use super::protection::detect_protection;
use super::types::{AttachmentFetcher, AttachmentInspector, Inspection, InspectionError};

/// Downloads a ticket's attachment and checks it for password protection.
pub struct TicketAttachmentInspector {
    fetcher: Arc<dyn AttachmentFetcher>,
}

impl TicketAttachmentInspector {
    pub fn new(fetcher: Arc<dyn AttachmentFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl AttachmentInspector for TicketAttachmentInspector {
    async fn inspect(&self, ticket: &Ticket) -> Result<Inspection, InspectionError> {
        let Some(attachment) = &ticket.attachment else {
            debug!(ticket_id = %ticket.id, "Ticket has no attachment");
            return Ok(Inspection::not_protected(None));
        };

        let bytes = self.fetcher.fetch(ticket, attachment).await?;
        if bytes.is_empty() {
            return Err(InspectionError::Malformed {
                file_name: attachment.file_name.clone(),
                reason: "attachment is empty".to_string(),
            });
        }

        let protection =
            detect_protection(&bytes).map_err(|reason| InspectionError::Malformed {
                file_name: attachment.file_name.clone(),
                reason,
            })?;

        debug!(
            ticket_id = %ticket.id,
            file_name = %attachment.file_name,
            size = bytes.len(),
            protected = protection.is_protected(),
            container = ?protection.container(),
            "Attachment classified"
        );

        if protection.is_protected() {
            Ok(Inspection::protected(
                protection.container(),
                extract_justification(ticket),
            ))
        } else {
            Ok(Inspection::not_protected(protection.container()))
        }
    }
}
