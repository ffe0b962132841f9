//! Audit log reader.
//!
//! The audit log is append-only NDJSON written by the job runner. Lines may be
//! half-written or corrupt; those are skipped one at a time and never abort a
//! read. Append order is causal order, and reads preserve it.

use crate::error::Result;
use crate::job_id;
use crate::tail;
use crate::types::AuditEvent;
use std::io;
use std::path::{Path, PathBuf};

/// Upper bound on events returned by one read.
pub const MAX_EVENTS: usize = 2000;

/// Default number of events for "recent actions" queries.
pub const DEFAULT_EVENTS: usize = 200;

/// Parse one audit line. Blank, corrupt, and non-object lines yield `None`.
pub fn parse_line(line: &str) -> Option<AuditEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    serde_json::from_str(line).ok()
}

/// Reads recent events from one audit log file.
#[derive(Debug, Clone)]
pub struct AuditReader {
    path: PathBuf,
}

impl AuditReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The well-formed events among the last `limit` non-blank lines, oldest first.
    ///
    /// `limit` is clamped to `1..=MAX_EVENTS`. A missing log means no events
    /// have been written yet and yields an empty list.
    pub async fn recent(&self, limit: usize) -> Result<Vec<AuditEvent>> {
        let limit = limit.clamp(1, MAX_EVENTS);
        let lines = match tail::read_recent_lines(&self.path, limit).await {
            Ok(lines) => lines,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "Audit log not found");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut skipped = 0usize;
        let events: Vec<AuditEvent> = lines
            .iter()
            .filter_map(|line| {
                let parsed = parse_line(line);
                if parsed.is_none() {
                    skipped += 1;
                }
                parsed
            })
            .collect();

        if skipped > 0 {
            tracing::debug!(
                path = %self.path.display(),
                skipped,
                "Skipped malformed audit lines"
            );
        }
        Ok(events)
    }

    /// Recent events that belong to `job_id`.
    pub async fn for_job(&self, job_id: &str, limit: usize) -> Result<Vec<AuditEvent>> {
        Ok(self
            .recent(limit)
            .await?
            .into_iter()
            .filter(|e| job_id::from_event(e).as_deref() == Some(job_id))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_line_fields() {
        let event = parse_line(
            r#"{"ts":"2024-01-01T00:00:00Z","source":"telegram","actor":"ops","event":"start","args":"run [message_id: 42]","run_log":"/tmp/x.jsonl","host":"box"}"#,
        )
        .unwrap();
        assert_eq!(event.timestamp.as_deref(), Some("2024-01-01T00:00:00Z"));
        assert_eq!(event.source.as_deref(), Some("telegram"));
        assert_eq!(event.actor.as_deref(), Some("ops"));
        assert!(event.is_start());
        assert_eq!(event.args, Some(json!("run [message_id: 42]")));
        assert_eq!(event.run_log.as_deref(), Some("/tmp/x.jsonl"));
        assert_eq!(event.extra.get("host"), Some(&json!("box")));
    }

    #[test]
    fn test_parse_line_lenient_types() {
        let event =
            parse_line(r#"{"event":"end","exit_code":2.0,"duration_sec":12,"actor":7,"ts":5}"#)
                .unwrap();
        assert!(event.is_end());
        assert_eq!(event.exit_code, Some(2));
        assert_eq!(event.duration_seconds, Some(12.0));
        assert_eq!(event.actor.as_deref(), Some("7"));
        assert_eq!(event.timestamp, None);
        assert!(event.extra.is_empty());
    }

    #[test]
    fn test_parse_line_mistyped_fields_do_not_drop_event() {
        let event = parse_line(
            r#"{"event":"end","exit_code":"2","duration_sec":"slow","args":null,"actor":null,"cwd":[1],"message_id":42}"#,
        )
        .unwrap();
        assert!(event.is_end());
        assert_eq!(event.exit_code, None);
        assert_eq!(event.duration_seconds, None);
        assert_eq!(event.args, None);
        assert_eq!(event.actor, None);
        assert_eq!(event.cwd, None);
        assert_eq!(event.message_id, None);
    }

    #[test]
    fn test_parse_line_fractional_exit_code_ignored() {
        let event = parse_line(r#"{"event":"end","exit_code":1.5,"source":{"bot":"tg"}}"#).unwrap();
        assert_eq!(event.exit_code, None);
        assert_eq!(event.source.as_deref(), Some(r#"{"bot":"tg"}"#));
    }

    #[test]
    fn test_parse_line_rejects_garbage() {
        assert!(parse_line("").is_none());
        assert!(parse_line("{\"event\":\"start\"").is_none());
        assert!(parse_line("[1,2,3]").is_none());
        assert!(parse_line("\"start\"").is_none());
    }

    #[tokio::test]
    async fn test_recent_skips_corrupt_lines_and_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("actions.ndjson");
        std::fs::write(
            &path,
            concat!(
                "{\"event\":\"a\"}\n",
                "not json\n",
                "{\"event\":\"b\"}\n",
                "\n",
                "{\"event\":\"c\"",
            ),
        )
        .unwrap();

        let reader = AuditReader::new(&path);
        let events = reader.recent(100).await.unwrap();
        let kinds: Vec<_> = events.iter().filter_map(|e| e.kind.as_deref()).collect();
        assert_eq!(kinds, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_recent_limits_to_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("actions.ndjson");
        let content: String = (0..50)
            .map(|i| format!("{{\"event\":\"e{}\"}}\n", i))
            .collect();
        std::fs::write(&path, content).unwrap();

        let events = AuditReader::new(&path).recent(3).await.unwrap();
        let kinds: Vec<_> = events.iter().filter_map(|e| e.kind.as_deref()).collect();
        assert_eq!(kinds, vec!["e47", "e48", "e49"]);
    }

    #[tokio::test]
    async fn test_blank_lines_do_not_use_up_the_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("actions.ndjson");
        let mut content = String::from("{\"event\":\"a\"}\n{\"event\":\"b\"}\n");
        content.push_str(&"\n".repeat(20));
        content.push_str("{\"event\":\"c\"}\n\n");
        std::fs::write(&path, content).unwrap();

        let events = AuditReader::new(&path).recent(2).await.unwrap();
        let kinds: Vec<_> = events.iter().filter_map(|e| e.kind.as_deref()).collect();
        assert_eq!(kinds, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_missing_log_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let events = AuditReader::new(dir.path().join("missing.ndjson"))
            .recent(10)
            .await
            .unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_for_job_filters_by_extracted_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("actions.ndjson");
        std::fs::write(
            &path,
            concat!(
                "{\"event\":\"start\",\"args\":\"go [message_id: 1]\"}\n",
                "{\"event\":\"start\",\"args\":[\"go\",\"[message_id: 2]\"]}\n",
                "{\"event\":\"note\",\"message_id\":\"1\"}\n",
                "{\"event\":\"start\",\"args\":\"go [message_id: 11]\"}\n",
            ),
        )
        .unwrap();

        let events = AuditReader::new(&path).for_job("1", 100).await.unwrap();
        let kinds: Vec<_> = events.iter().filter_map(|e| e.kind.as_deref()).collect();
        assert_eq!(kinds, vec!["start", "note"]);
    }
}
