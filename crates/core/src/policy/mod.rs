//! Justification policy.
//!
//! A pure decision function: the same extracted justification always yields the
//! same decision. Absent fields are not errors; they are reported in the
//! decision's reason.

mod config;

pub use config::{JustificationField, PolicyConfig};

use serde::{Deserialize, Serialize};

use crate::inspector::ExtractedJustification;

/// Immutable outcome of evaluating one justification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JustificationDecision {
    accepted: bool,
    reason: String,
}

impl JustificationDecision {
    pub fn accept(reason: impl Into<String>) -> Self {
        Self {
            accepted: true,
            reason: reason.into(),
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: reason.into(),
        }
    }

    pub fn accepted(&self) -> bool {
        self.accepted
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Decides whether a justification is sufficient to release a message.
#[derive(Debug, Clone)]
pub struct JustificationPolicy {
    config: PolicyConfig,
}

impl JustificationPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// ACCEPT iff every required field is present and, when approved reason codes
    /// are configured, the reason code matches one of them.
    pub fn evaluate(&self, extracted: &ExtractedJustification) -> JustificationDecision {
        let missing: Vec<&str> = self
            .config
            .required_fields
            .iter()
            .filter(|field| extracted.field(**field).is_none())
            .map(|field| field.as_str())
            .collect();

        if !missing.is_empty() {
            return JustificationDecision::reject(format!(
                "missing required field(s): {}",
                missing.join(", ")
            ));
        }

        if !self.config.approved_reason_codes.is_empty() {
            match extracted.field(JustificationField::ReasonCode) {
                None => {
                    return JustificationDecision::reject(
                        "no reason code given and approved reason codes are configured",
                    );
                }
                Some(code) if !self.config.approved_reason_codes.contains(code) => {
                    return JustificationDecision::reject(format!(
                        "reason code '{}' is not an approved reason code",
                        code
                    ));
                }
                Some(_) => {}
            }
        }

        let mut summary = Vec::new();
        if let Some(requester) = extracted.field(JustificationField::Requester) {
            summary.push(format!("requester={}", requester));
        }
        if let Some(code) = extracted.field(JustificationField::ReasonCode) {
            summary.push(format!("reason_code={}", code));
        }

        if summary.is_empty() {
            JustificationDecision::accept("justification accepted")
        } else {
            JustificationDecision::accept(format!("justification accepted ({})", summary.join(", ")))
        }
    }
}
