//! Mock release gateway for testing.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::gateway::{
    GatewayError, GatewayReleaseStatus, ReleaseGateway, ReleaseRequest, ReleaseResult,
};

/// Scripted response to one release call.
#[derive(Debug, Clone)]
pub enum MockRelease {
    /// The message is released and the caller is told so.
    Released,
    /// The message stays quarantined and the caller gets this error.
    Error(GatewayError),
    /// The message stays quarantined and the gateway answers `success: false`.
    Failure { code: String, detail: String },
    /// The message is released but the caller only sees a timeout.
    ReleasedReplyLost,
    /// The message is released after this delay.
    Delayed(Duration),
    /// The call never returns.
    Hang,
}

/// How the status endpoint behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MockStatusMode {
    /// Report the true state of the message.
    #[default]
    Truthful,
    /// Always report `Unknown`.
    Unsupported,
    /// Always fail.
    Failing,
}

/// A recorded release call for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedRelease {
    pub guid: String,
    pub timestamp: DateTime<Utc>,
}

/// Mock implementation of the ReleaseGateway trait.
///
/// Keeps track of which messages are actually released, so tests can tell a
/// confirmed release from a duplicate one.
///
/// # Example
///
/// ```rust,ignore
/// let gateway = MockReleaseGateway::new();
/// gateway.script(vec![
///     MockRelease::Error(GatewayError::unavailable("503")),
///     MockRelease::Released,
/// ]).await;
///
/// // ... run the engine ...
/// assert_eq!(gateway.release_count("guid-1").await, 2);
/// assert!(gateway.is_released("guid-1").await);
/// ```
#[derive(Debug, Default)]
pub struct MockReleaseGateway {
    /// Responses for the next release calls; empty means `Released`.
    script: RwLock<VecDeque<MockRelease>>,
    status_mode: RwLock<MockStatusMode>,
    released: RwLock<HashSet<String>>,
    releases: RwLock<Vec<RecordedRelease>>,
    status_queries: RwLock<Vec<String>>,
    /// Confirmed releases per guid; more than one means a duplicate release.
    confirmed: RwLock<Vec<String>>,
}

impl MockReleaseGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue responses for the next release calls.
    pub async fn script(&self, responses: Vec<MockRelease>) {
        self.script.write().await.extend(responses);
    }

    pub async fn set_status_mode(&self, mode: MockStatusMode) {
        *self.status_mode.write().await = mode;
    }

    /// Mark a message as released out of band.
    pub async fn mark_released(&self, guid: &str) {
        self.released.write().await.insert(guid.to_string());
    }

    pub async fn is_released(&self, guid: &str) -> bool {
        self.released.read().await.contains(guid)
    }

    /// Release calls for this guid, failed ones included.
    pub async fn release_count(&self, guid: &str) -> usize {
        self.releases
            .read()
            .await
            .iter()
            .filter(|r| r.guid == guid)
            .count()
    }

    /// All release calls.
    pub async fn releases(&self) -> Vec<RecordedRelease> {
        self.releases.read().await.clone()
    }

    /// Release calls that released the message, whether or not the caller heard.
    pub async fn effective_release_count(&self, guid: &str) -> usize {
        self.confirmed
            .read()
            .await
            .iter()
            .filter(|g| g.as_str() == guid)
            .count()
    }

    pub async fn status_query_count(&self, guid: &str) -> usize {
        self.status_queries
            .read()
            .await
            .iter()
            .filter(|g| g.as_str() == guid)
            .count()
    }

    async fn apply_release(&self, guid: &str) {
        self.released.write().await.insert(guid.to_string());
        self.confirmed.write().await.push(guid.to_string());
    }
}

#[async_trait]
impl ReleaseGateway for MockReleaseGateway {
    fn name(&self) -> &str {
        "mock"
    }

    async fn release(&self, request: &ReleaseRequest) -> Result<ReleaseResult, GatewayError> {
        self.releases.write().await.push(RecordedRelease {
            guid: request.guid.clone(),
            timestamp: Utc::now(),
        });

        let next = self
            .script
            .write()
            .await
            .pop_front()
            .unwrap_or(MockRelease::Released);

        match next {
            MockRelease::Released => {
                self.apply_release(&request.guid).await;
                Ok(ReleaseResult::success())
            }
            MockRelease::Error(e) => Err(e),
            MockRelease::Failure { code, detail } => Ok(ReleaseResult::failure(code, detail)),
            MockRelease::ReleasedReplyLost => {
                self.apply_release(&request.guid).await;
                Err(GatewayError::ambiguous("request timed out"))
            }
            MockRelease::Delayed(delay) => {
                tokio::time::sleep(delay).await;
                self.apply_release(&request.guid).await;
                Ok(ReleaseResult::success())
            }
            MockRelease::Hang => {
                std::future::pending::<()>().await;
                unreachable!("pending future never resolves")
            }
        }
    }

    async fn release_status(&self, guid: &str) -> Result<GatewayReleaseStatus, GatewayError> {
        self.status_queries.write().await.push(guid.to_string());

        match *self.status_mode.read().await {
            MockStatusMode::Unsupported => Ok(GatewayReleaseStatus::Unknown),
            MockStatusMode::Failing => Err(GatewayError::unavailable("status endpoint down")),
            MockStatusMode::Truthful => {
                if self.released.read().await.contains(guid) {
                    Ok(GatewayReleaseStatus::Released)
                } else {
                    Ok(GatewayReleaseStatus::Quarantined)
                }
            }
        }
    }
}
