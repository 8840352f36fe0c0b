//! HTTP JSON release gateway client.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::GatewayConfig;
use crate::metrics;

use super::{GatewayError, GatewayReleaseStatus, ReleaseGateway, ReleaseRequest, ReleaseResult};

/// Release gateway client speaking the quarantine REST API.
pub struct HttpReleaseGateway {
    client: Client,
    config: GatewayConfig,
}

impl HttpReleaseGateway {
    /// Create a new gateway client.
    pub fn new(config: GatewayConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, config }
    }

    /// Get the base URL without trailing slash.
    fn base_url(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    fn release_url(&self) -> String {
        format!("{}/api/v1/quarantine/release", self.base_url())
    }

    fn status_url(&self, guid: &str) -> String {
        format!(
            "{}/api/v1/quarantine/messages/{}",
            self.base_url(),
            urlencoding::encode(guid)
        )
    }
}

/// Status body returned by the message endpoint.
#[derive(Debug, Deserialize)]
struct MessageStatusResponse {
    status: String,
}

/// Error body returned with non-2xx responses.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(alias = "errorCode", alias = "code")]
    error_code: Option<String>,
    #[serde(alias = "errorDetail", alias = "message")]
    error_detail: Option<String>,
}

/// Classify a transport error.
///
/// A failed connect means the request never left; anything after that may
/// have been processed by the gateway.
fn transport_error(e: reqwest::Error) -> GatewayError {
    if e.is_connect() {
        GatewayError::unavailable(format!("connection failed: {}", e))
    } else if e.is_timeout() {
        GatewayError::ambiguous("request timed out")
    } else {
        GatewayError::ambiguous(e.to_string())
    }
}

/// Map a non-success HTTP status (with its body) to a gateway error.
fn status_error(status: StatusCode, body: &str) -> GatewayError {
    let snippet: String = body.chars().take(200).collect();

    match status {
        StatusCode::TOO_MANY_REQUESTS | StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE => {
            GatewayError::unavailable(format!("HTTP {}: {}", status, snippet))
        }
        StatusCode::GATEWAY_TIMEOUT | StatusCode::INTERNAL_SERVER_ERROR => {
            GatewayError::ambiguous(format!("HTTP {}: {}", status, snippet))
        }
        _ => {
            if let Ok(err) = serde_json::from_str::<ErrorResponse>(body) {
                if let Some(code) = err.error_code {
                    return GatewayError::from_code(
                        &code,
                        err.error_detail.unwrap_or_else(|| status.to_string()),
                    );
                }
            }
            if status.is_server_error() {
                GatewayError::ambiguous(format!("HTTP {}: {}", status, snippet))
            } else {
                GatewayError::Rejected {
                    code: format!("http_{}", status.as_u16()),
                    detail: snippet,
                }
            }
        }
    }
}

fn parse_status(status: &str) -> GatewayReleaseStatus {
    match status.trim().to_ascii_lowercase().as_str() {
        "released" | "delivered" => GatewayReleaseStatus::Released,
        "quarantined" | "held" => GatewayReleaseStatus::Quarantined,
        _ => GatewayReleaseStatus::Unknown,
    }
}

#[async_trait]
impl ReleaseGateway for HttpReleaseGateway {
    fn name(&self) -> &str {
        "http_gateway"
    }

    async fn release(&self, request: &ReleaseRequest) -> Result<ReleaseResult, GatewayError> {
        let start = Instant::now();
        debug!(guid = %request.guid, "Requesting message release");

        let result: Result<ReleaseResult, GatewayError> = async {
            let response = self
                .client
                .post(self.release_url())
                .basic_auth(&self.config.principal, Some(&self.config.secret))
                .json(request)
                .send()
                .await
                .map_err(transport_error)?;

            let status = response.status();
            let body = response.text().await.map_err(transport_error)?;

            if !status.is_success() {
                return Err(status_error(status, &body));
            }

            serde_json::from_str::<ReleaseResult>(&body).map_err(|e| {
                // The gateway accepted the call but the answer is unreadable.
                GatewayError::ambiguous(format!("Failed to parse release response: {}", e))
            })
        }
        .await;

        metrics::observe_external(
            "gateway",
            "release",
            start.elapsed().as_secs_f64(),
            matches!(&result, Ok(r) if r.success),
        );

        if let Err(e) = &result {
            warn!(guid = %request.guid, error = %e, "Release request failed");
        }
        result
    }

    async fn release_status(&self, guid: &str) -> Result<GatewayReleaseStatus, GatewayError> {
        if !self.config.status_query {
            return Ok(GatewayReleaseStatus::Unknown);
        }

        let start = Instant::now();
        let result: Result<GatewayReleaseStatus, GatewayError> = async {
            let response = self
                .client
                .get(self.status_url(guid))
                .basic_auth(&self.config.principal, Some(&self.config.secret))
                .send()
                .await
                .map_err(transport_error)?;

            let status = response.status();
            if status == StatusCode::NOT_FOUND {
                return Ok(GatewayReleaseStatus::Unknown);
            }
            let body = response.text().await.map_err(transport_error)?;
            if !status.is_success() {
                return Err(status_error(status, &body));
            }

            let parsed: MessageStatusResponse = serde_json::from_str(&body).map_err(|e| {
                GatewayError::unavailable(format!("Failed to parse status response: {}", e))
            })?;
            Ok(parse_status(&parsed.status))
        }
        .await;

        metrics::observe_external(
            "gateway",
            "release_status",
            start.elapsed().as_secs_f64(),
            result.is_ok(),
        );
        debug!(guid = guid, result = ?result, "Release status queried");
        result
    }
}
