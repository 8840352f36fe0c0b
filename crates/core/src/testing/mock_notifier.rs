//! Mock notifier for testing.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::notifier::{Notification, Notifier, NotifyError};

/// Mock implementation of the Notifier trait. Records every notification.
#[derive(Debug, Default)]
pub struct MockNotifier {
    sent: RwLock<Vec<Notification>>,
    fail: RwLock<bool>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every send fail. Failed sends are still recorded.
    pub async fn set_failing(&self, fail: bool) {
        *self.fail.write().await = fail;
    }

    pub async fn notifications(&self) -> Vec<Notification> {
        self.sent.read().await.clone()
    }

    pub async fn count(&self) -> usize {
        self.sent.read().await.len()
    }

    /// Notifications whose subject mentions this ticket number.
    pub async fn for_ticket(&self, number: &str) -> Vec<Notification> {
        self.sent
            .read()
            .await
            .iter()
            .filter(|n| n.subject.ends_with(number))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    fn name(&self) -> &str {
        "mock"
    }

    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent.write().await.push(notification.clone());
        if *self.fail.read().await {
            return Err(NotifyError::DeliveryFailed("mock relay down".to_string()));
        }
        Ok(())
    }
}
