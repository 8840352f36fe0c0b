//! Release gateway trait.

use async_trait::async_trait;

use super::types::{GatewayError, GatewayReleaseStatus, ReleaseRequest, ReleaseResult};

/// Abstraction over the email security gateway's release API.
///
/// Connection pools behind an implementation must be safe to share between
/// concurrent ticket pipelines.
#[async_trait]
pub trait ReleaseGateway: Send + Sync {
    /// Gateway name for logs and metrics.
    fn name(&self) -> &str;

    /// Ask the gateway to deliver a quarantined message.
    ///
    /// `Err` covers transport failures; an explicit refusal comes back as an
    /// unsuccessful `ReleaseResult`.
    async fn release(&self, request: &ReleaseRequest) -> Result<ReleaseResult, GatewayError>;

    /// Report whether a message is still quarantined.
    ///
    /// Used after ambiguous release failures. Implementations without a
    /// status endpoint return `Unknown`.
    async fn release_status(&self, guid: &str) -> Result<GatewayReleaseStatus, GatewayError>;
}
