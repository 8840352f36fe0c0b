//! ServiceNow REST API wire types.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope of every Table and Attachment API response.
#[derive(Debug, Deserialize)]
pub(super) struct ResultList<T> {
    #[serde(default = "Vec::new")]
    pub result: Vec<T>,
}

/// A field that is either a plain value or a reference object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(super) enum FieldValue {
    Plain(String),
    Reference {
        #[serde(default)]
        display_value: Option<String>,
        #[serde(default)]
        value: Option<String>,
    },
}

impl FieldValue {
    pub fn text(&self) -> Option<&str> {
        let raw = match self {
            FieldValue::Plain(s) => Some(s.as_str()),
            FieldValue::Reference {
                display_value,
                value,
            } => display_value.as_deref().or(value.as_deref()),
        };
        raw.map(str::trim).filter(|s| !s.is_empty())
    }
}

/// One incident or request item row.
#[derive(Debug, Deserialize)]
pub(super) struct RecordRow {
    pub sys_id: String,
    #[serde(default)]
    pub number: String,
    #[serde(default)]
    pub short_description: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Incident requester.
    #[serde(default)]
    pub caller_id: Option<FieldValue>,
    /// Request item requester.
    #[serde(default)]
    pub requested_for: Option<FieldValue>,
    #[serde(default)]
    pub opened_at: Option<String>,
    /// Instance-specific columns, including the message GUID field.
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl RecordRow {
    pub fn requester(&self) -> Option<String> {
        self.caller_id
            .as_ref()
            .and_then(FieldValue::text)
            .or_else(|| self.requested_for.as_ref().and_then(FieldValue::text))
            .map(String::from)
    }

    /// Read a custom column as text.
    pub fn extra_text(&self, field: &str) -> Option<String> {
        match self.extra.get(field)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Object(map) => map
                .get("display_value")
                .or_else(|| map.get("value"))
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from),
            _ => None,
        }
    }

    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        self.opened_at.as_deref().and_then(parse_servicenow_time)
    }
}

/// Attachment metadata row.
#[derive(Debug, Deserialize)]
pub(super) struct AttachmentRow {
    pub sys_id: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub content_type: Option<String>,
    /// The API reports sizes as strings.
    #[serde(default)]
    pub size_bytes: Option<String>,
}

/// PATCH body for a ticket update.
#[derive(Debug, Serialize)]
pub(super) struct RecordPatch<'a> {
    pub work_notes: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<&'a str>,
}

/// Parse ServiceNow's `YYYY-MM-DD HH:MM:SS` (UTC) timestamps.
pub(super) fn parse_servicenow_time(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value.trim(), "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_record_row() {
        let json = r#"{
            "result": [{
                "sys_id": "9d385017c611228701d22104cc95c371",
                "number": "INC0010001",
                "short_description": "Release quarantined invoice",
                "description": "Requester: alice\nReason Code: APPROVED_VENDOR",
                "caller_id": {"display_value": "Alice Example", "link": "https://x/api/now/table/sys_user/1"},
                "opened_at": "2024-03-01 09:15:00",
                "u_message_guid": "6f1c2a9e-0000-4b1a-9a55-1234567890ab"
            }]
        }"#;
        let parsed: ResultList<RecordRow> = serde_json::from_str(json).unwrap();
        let row = &parsed.result[0];

        assert_eq!(row.number, "INC0010001");
        assert_eq!(row.requester().as_deref(), Some("Alice Example"));
        assert_eq!(
            row.extra_text("u_message_guid").as_deref(),
            Some("6f1c2a9e-0000-4b1a-9a55-1234567890ab")
        );
        assert_eq!(
            row.opened_at().unwrap().to_rfc3339(),
            "2024-03-01T09:15:00+00:00"
        );
    }

    #[test]
    fn test_plain_reference_and_blank_fields() {
        let json = r#"{"result": [{
            "sys_id": "abc",
            "number": "RITM0001",
            "caller_id": "",
            "requested_for": "bob",
            "u_message_guid": "  "
        }]}"#;
        let parsed: ResultList<RecordRow> = serde_json::from_str(json).unwrap();
        let row = &parsed.result[0];
        assert_eq!(row.requester().as_deref(), Some("bob"));
        assert!(row.extra_text("u_message_guid").is_none());
        assert!(row.opened_at().is_none());
    }

    #[test]
    fn test_empty_result() {
        let parsed: ResultList<AttachmentRow> = serde_json::from_str(r#"{}"#).unwrap();
        assert!(parsed.result.is_empty());
    }

    #[test]
    fn test_patch_body() {
        let patch = RecordPatch {
            work_notes: "released",
            state: None,
        };
        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(json["work_notes"], "released");
        assert!(json.get("state").is_none());
    }
}
