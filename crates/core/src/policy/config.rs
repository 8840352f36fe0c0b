//! Justification policy configuration.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Fields of an extracted justification that a policy can require.
///
/// Declaration order is the order missing fields are reported in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JustificationField {
    Requester,
    #[serde(alias = "reasonCode")]
    ReasonCode,
    #[serde(alias = "messageGuid")]
    MessageGuid,
    #[serde(alias = "justificationText")]
    JustificationText,
    #[serde(alias = "managerApproval")]
    ManagerApproval,
}

impl JustificationField {
    pub fn as_str(&self) -> &'static str {
        match self {
            JustificationField::Requester => "requester",
            JustificationField::ReasonCode => "reason_code",
            JustificationField::MessageGuid => "message_guid",
            JustificationField::JustificationText => "justification_text",
            JustificationField::ManagerApproval => "manager_approval",
        }
    }
}

impl fmt::Display for JustificationField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Criteria a justification must meet before a release is attempted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyConfig {
    /// Fields that must be present and non-empty.
    #[serde(default = "default_required_fields")]
    pub required_fields: BTreeSet<JustificationField>,

    /// When non-empty, the reason code must match one of these exactly.
    #[serde(default)]
    pub approved_reason_codes: BTreeSet<String>,
}

fn default_required_fields() -> BTreeSet<JustificationField> {
    [JustificationField::Requester, JustificationField::ReasonCode]
        .into_iter()
        .collect()
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            required_fields: default_required_fields(),
            approved_reason_codes: BTreeSet::new(),
        }
    }
}

impl PolicyConfig {
    /// Require a field.
    pub fn with_required(mut self, field: JustificationField) -> Self {
        self.required_fields.insert(field);
        self
    }

    /// Add an approved reason code.
    pub fn with_approved_code(mut self, code: impl Into<String>) -> Self {
        self.approved_reason_codes.insert(code.into());
        self
    }
}
