//! Job identifier extraction.
//!
//! Jobs carry no explicit key. The agent embeds `[message_id: <digits>]` in
//! its command line and in the arguments it writes to the audit log, so every
//! data source is joined by pulling that token out of free text. All call
//! sites go through this module.

use crate::error::{Error, Result};
use crate::types::AuditEvent;
use regex_lite::Regex;
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::LazyLock;

static MESSAGE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[message_id:\s*(\d+)\]").expect("message_id pattern"));

/// Extract the job id from free text (a command line, a prompt).
pub fn from_text(text: &str) -> Option<String> {
    MESSAGE_ID
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Whether `text` carries any job id marker.
pub fn has_marker(text: &str) -> bool {
    MESSAGE_ID.is_match(text)
}

/// Extract the job id from an audit event.
///
/// A direct `message_id` field wins; otherwise the `args` payload is searched,
/// whatever its shape.
pub fn from_event(event: &AuditEvent) -> Option<String> {
    if let Some(direct) = event.message_id.as_deref() {
        if !direct.is_empty() {
            return Some(direct.to_string());
        }
    }

    match event.args.as_ref()? {
        Value::String(s) => from_text(s),
        Value::Array(items) => {
            let joined = items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(" ");
            from_text(&joined)
        }
        Value::Null => None,
        other => from_text(&other.to_string()),
    }
}

/// Validate a job id supplied by a caller (URL segment, CLI argument).
///
/// Ids are used to build file names, so anything but ASCII digits is refused.
pub fn validate(id: &str) -> Result<&str> {
    if !id.is_empty() && id.len() <= 32 && id.bytes().all(|b| b.is_ascii_digit()) {
        Ok(id)
    } else {
        Err(Error::InvalidJobId(id.to_string()))
    }
}

/// Descending order on job ids: numeric when both parse, else lexicographic.
pub fn cmp_desc(a: &str, b: &str) -> Ordering {
    match (a.parse::<u128>(), b.parse::<u128>()) {
        (Ok(a), Ok(b)) => b.cmp(&a),
        _ => b.cmp(a),
    }
}
