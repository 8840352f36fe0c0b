//! Notifier that only writes alerts to the log.

use async_trait::async_trait;
use tracing::warn;

use super::{Notification, Notifier, NotifyError};

/// Used when no SMTP relay is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        warn!(
            to = %notification.distribution_list,
            subject = %notification.subject,
            body = %notification.body,
            "Failure alert (no SMTP relay configured)"
        );
        Ok(())
    }
}
