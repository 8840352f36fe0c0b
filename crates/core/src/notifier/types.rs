//! Notification types and the notifier trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::FailureEvent;

/// Errors that can occur while delivering a notification.
///
/// The engine logs these and moves on; they never change a ticket's outcome.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),
}

/// A message to the responsible team.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    /// One or more addresses separated by `,` or `;`.
    pub distribution_list: String,
    pub subject: String,
    pub body: String,
}

impl Notification {
    /// Render a failure episode as an alert.
    pub fn for_failure(
        event: &FailureEvent,
        distribution_list: impl Into<String>,
        subject_prefix: &str,
    ) -> Self {
        let subject = match &event.ticket_number {
            Some(number) => format!("{} {} failure for ticket {}", subject_prefix, event.stage, number),
            None => format!("{} {} failure", subject_prefix, event.stage),
        }
        .trim()
        .to_string();

        let body = format!(
            "A quarantined email release workflow step failed and needs attention.\n\n\
             Ticket id:     {}\n\
             Ticket number: {}\n\
             Stage:         {}\n\
             Error kind:    {}\n\
             Detail:        {}\n\
             Time (UTC):    {}\n\
             Episode:       {}\n",
            event.ticket_id.as_deref().unwrap_or("-"),
            event.ticket_number.as_deref().unwrap_or("-"),
            event.stage,
            event.error_kind,
            event.error_detail,
            event.timestamp.to_rfc3339(),
            event.episode_id,
        );

        Self {
            distribution_list: distribution_list.into(),
            subject,
            body,
        }
    }

    /// Individual recipient addresses.
    pub fn recipients(&self) -> impl Iterator<Item = &str> {
        self.distribution_list
            .split([',', ';'])
            .map(str::trim)
            .filter(|a| !a.is_empty())
    }
}

/// Delivers alerts to the responsible team. Best-effort.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}
