//! Justification extraction from ticket text.
//!
//! Recognizes `Key: value` lines in the ticket description. Keys are matched
//! case-insensitively with spaces, dashes and underscores ignored, so
//! `Reason Code`, `reason_code` and `REASON-CODE` are the same key.

use once_cell::sync::Lazy;
use regex_lite::Regex;

use crate::ticket::Ticket;

use super::types::ExtractedJustification;

static KEY_VALUE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*([A-Za-z][A-Za-z _\-]{0,40}?)[ \t]*[:=][ \t]*(.*?)[ \t]*$")
        .expect("valid key/value regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Key {
    Requester,
    ReasonCode,
    MessageGuid,
    Justification,
    ManagerApproval,
}

fn classify(raw_key: &str) -> Option<Key> {
    let normalized: String = raw_key
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();

    match normalized.as_str() {
        "requester" | "requestedby" | "requestedfor" => Some(Key::Requester),
        "reasoncode" | "reason" => Some(Key::ReasonCode),
        "messageguid" | "guid" | "messageid" => Some(Key::MessageGuid),
        "justification" | "businessjustification" => Some(Key::Justification),
        "managerapproval" | "approvedby" => Some(Key::ManagerApproval),
        _ => None,
    }
}

/// Extract justification fields from a ticket.
///
/// The first occurrence of each key wins. Blank values are ignored so a later
/// line can still supply the field. Structured ticket fields fill in whatever
/// the description does not provide.
pub fn extract_justification(ticket: &Ticket) -> ExtractedJustification {
    let text = ticket.description.replace("\r\n", "\n");
    let mut extracted = ExtractedJustification::default();

    for caps in KEY_VALUE_LINE.captures_iter(&text) {
        let (Some(key), Some(value)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let value = value.as_str().trim();
        if value.is_empty() {
            continue;
        }
        let slot = match classify(key.as_str()) {
            Some(Key::Requester) => &mut extracted.requester,
            Some(Key::ReasonCode) => &mut extracted.reason_code,
            Some(Key::MessageGuid) => &mut extracted.message_guid,
            Some(Key::Justification) => &mut extracted.justification_text,
            Some(Key::ManagerApproval) => &mut extracted.manager_approval,
            None => continue,
        };
        if slot.is_none() {
            *slot = Some(value.to_string());
        }
    }

    if extracted.requester.is_none() {
        extracted.requester = non_blank(ticket.requester.as_deref());
    }
    if extracted.message_guid.is_none() {
        extracted.message_guid = non_blank(ticket.message_guid.as_deref());
    }
    if extracted.justification_text.is_none() {
        extracted.justification_text = non_blank(ticket.justification_text.as_deref());
    }

    extracted
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}
