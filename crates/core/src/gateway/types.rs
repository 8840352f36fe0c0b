//! Release gateway types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error codes that mean "try again later". Every other code is permanent.
const TRANSIENT_CODES: &[&str] = &[
    "unavailable",
    "timeout",
    "rate_limited",
    "internal_error",
    "busy",
];

/// Errors that can occur during release gateway operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// Transient; retryable.
    ///
    /// `ambiguous` is true when the request may have reached the gateway and
    /// its outcome is unknown (timeouts). Ambiguous failures must be resolved
    /// with a status query before another release call.
    #[error("Gateway unavailable: {detail}")]
    Unavailable { detail: String, ambiguous: bool },

    /// Permanent; the gateway refused the release.
    #[error("Gateway rejected release ({code}): {detail}")]
    Rejected { code: String, detail: String },
}

impl GatewayError {
    /// Map a gateway error code onto the error taxonomy.
    pub fn from_code(code: &str, detail: impl Into<String>) -> Self {
        let normalized = code.trim().to_ascii_lowercase();
        let detail = detail.into();
        if TRANSIENT_CODES.contains(&normalized.as_str()) {
            GatewayError::Unavailable {
                detail: format!("{}: {}", normalized, detail),
                ambiguous: false,
            }
        } else {
            GatewayError::Rejected {
                code: normalized,
                detail,
            }
        }
    }

    pub fn unavailable(detail: impl Into<String>) -> Self {
        GatewayError::Unavailable {
            detail: detail.into(),
            ambiguous: false,
        }
    }

    pub fn ambiguous(detail: impl Into<String>) -> Self {
        GatewayError::Unavailable {
            detail: detail.into(),
            ambiguous: true,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Unavailable { .. })
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self, GatewayError::Unavailable { ambiguous: true, .. })
    }

    /// Error kind name used in failure reports.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Unavailable { .. } => "gateway_unavailable",
            GatewayError::Rejected { .. } => "gateway_rejected",
        }
    }
}

/// Release request for one quarantined message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReleaseRequest {
    pub guid: String,
}

impl ReleaseRequest {
    pub fn new(guid: impl Into<String>) -> Self {
        Self { guid: guid.into() }
    }
}

/// Gateway answer to a release request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReleaseResult {
    pub success: bool,
    #[serde(default, alias = "errorCode", skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, alias = "errorDetail", skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl ReleaseResult {
    pub fn success() -> Self {
        Self {
            success: true,
            error_code: None,
            error_detail: None,
        }
    }

    pub fn failure(code: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            success: false,
            error_code: Some(code.into()),
            error_detail: Some(detail.into()),
        }
    }

    /// Turn an unsuccessful result into the matching error.
    pub fn into_outcome(self) -> Result<(), GatewayError> {
        if self.success {
            return Ok(());
        }
        let detail = self
            .error_detail
            .unwrap_or_else(|| "release refused".to_string());
        match self.error_code {
            Some(code) => Err(GatewayError::from_code(&code, detail)),
            None => Err(GatewayError::Rejected {
                code: "unknown".to_string(),
                detail,
            }),
        }
    }
}

/// What the gateway reports about a message, used to resolve ambiguous failures.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GatewayReleaseStatus {
    /// The message has been delivered; a release call must not be repeated.
    Released,
    /// The message is still held; releasing it is safe.
    Quarantined,
    /// The gateway cannot tell.
    Unknown,
}

impl GatewayReleaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayReleaseStatus::Released => "released",
            GatewayReleaseStatus::Quarantined => "quarantined",
            GatewayReleaseStatus::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_codes_map_to_unavailable() {
        for code in ["unavailable", "timeout", "RATE_LIMITED", "internal_error", " busy "] {
            let err = GatewayError::from_code(code, "try later");
            assert!(err.is_transient(), "{code}");
            assert!(!err.is_ambiguous(), "{code}");
        }
    }

    #[test]
    fn test_other_codes_map_to_rejected() {
        for code in ["invalid_guid", "not_found", "already_released", "policy_denied", "weird"] {
            let err = GatewayError::from_code(code, "no");
            assert!(!err.is_transient(), "{code}");
            assert_eq!(err.kind(), "gateway_rejected");
        }
    }

    #[test]
    fn test_result_into_outcome() {
        assert_eq!(ReleaseResult::success().into_outcome(), Ok(()));

        let err = ReleaseResult::failure("invalid_guid", "no such message")
            .into_outcome()
            .unwrap_err();
        assert_eq!(
            err,
            GatewayError::Rejected {
                code: "invalid_guid".to_string(),
                detail: "no such message".to_string()
            }
        );

        let err = ReleaseResult::failure("busy", "queue full")
            .into_outcome()
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_failure_without_code_is_rejected() {
        let result = ReleaseResult {
            success: false,
            error_code: None,
            error_detail: None,
        };
        let err = result.into_outcome().unwrap_err();
        assert_eq!(err.kind(), "gateway_rejected");
    }

    #[test]
    fn test_wire_format() {
        let json = r#"{"success": false, "errorCode": "not_found"}"#;
        let result: ReleaseResult = serde_json::from_str(json).unwrap();
        assert!(!result.success);
        assert_eq!(result.error_code.as_deref(), Some("not_found"));
        assert!(result.error_detail.is_none());
    }
}
