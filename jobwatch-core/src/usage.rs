//! Token usage aggregation over recent output logs.
//!
//! Every output log ends its turn with a `turn.completed` record carrying a
//! `usage` payload. Only the tail of each file is read, and files older than
//! the long window are dropped by their name (or mtime) before any read.

use crate::config::UsageConfig;
use crate::tail;
use chrono::{DateTime, Duration, Utc};
use regex_lite::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// `msg<id>-<YYYYMMDD>T<HHMMSS><Z|+hhmm>.jsonl`
static LOG_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^msg\d+-(\d{8})T(\d{6})(Z|[+-]\d{4})\.jsonl$").expect("log name pattern")
});

const SHORTCUT_SUFFIX: &str = ".latest.jsonl";

/// Usage payload of a `turn.completed` record.
///
/// Missing, null, or non-numeric counts read as 0 so one odd field does not
/// discard the whole record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TokenUsage {
    #[serde(deserialize_with = "lenient_count")]
    pub input_tokens: u64,
    #[serde(deserialize_with = "lenient_count")]
    pub cached_input_tokens: u64,
    #[serde(deserialize_with = "lenient_count")]
    pub output_tokens: u64,
}

fn lenient_count<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_u64().unwrap_or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f > 0.0)
                // Saturating float-to-int cast.
                .map(|f| f as u64)
                .unwrap_or(0)
        }),
        _ => 0,
    })
}

/// Additive totals over one rolling window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageWindow {
    pub runs: u64,
    pub input_tokens: u64,
    pub cached_input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

impl UsageWindow {
    fn empty(since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self {
            runs: 0,
            input_tokens: 0,
            cached_input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
            since,
            until,
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.since
    }

    fn add(&mut self, usage: &TokenUsage) {
        self.runs = self.runs.saturating_add(1);
        self.input_tokens = self.input_tokens.saturating_add(usage.input_tokens);
        self.cached_input_tokens = self
            .cached_input_tokens
            .saturating_add(usage.cached_input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(usage.output_tokens);
        // Cached tokens are a subset of input tokens.
        self.total_tokens = self
            .total_tokens
            .saturating_add(usage.input_tokens.saturating_add(usage.output_tokens));
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub last5h: UsageWindow,
    pub last7d: UsageWindow,
    pub scanned_files: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest_log_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Timestamp encoded in an output log file name.
pub fn timestamp_from_name(name: &str) -> Option<DateTime<Utc>> {
    let caps = LOG_NAME.captures(name)?;
    let offset = match &caps[3] {
        "Z" => "+0000",
        other => other,
    };
    let text = format!("{}{}{}", &caps[1], &caps[2], offset);
    DateTime::parse_from_str(&text, "%Y%m%d%H%M%S%z")
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Last usage payload among `lines`, scanning from the end.
pub fn last_turn_usage<S: AsRef<str>>(lines: &[S]) -> Option<TokenUsage> {
    #[derive(Deserialize)]
    struct TurnRecord {
        #[serde(rename = "type")]
        kind: String,
        usage: Option<TokenUsage>,
    }

    lines.iter().rev().find_map(|line| {
        let line = line.as_ref();
        if !line.contains("turn.completed") || !line.contains("\"usage\"") {
            return None;
        }
        serde_json::from_str::<TurnRecord>(line.trim())
            .ok()
            .filter(|record| record.kind == "turn.completed")
            .and_then(|record| record.usage)
    })
}

struct Candidate {
    path: PathBuf,
    timestamp: DateTime<Utc>,
}

async fn collect_candidates(dir: &Path, since: DateTime<Utc>) -> std::io::Result<Vec<Candidate>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut candidates = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !name.ends_with(".jsonl") || name.ends_with(SHORTCUT_SUFFIX) {
            continue;
        }

        let timestamp = match timestamp_from_name(name) {
            Some(ts) => ts,
            None => match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(mtime) => DateTime::<Utc>::from(mtime),
                Err(_) => continue,
            },
        };
        if timestamp < since {
            continue;
        }

        candidates.push(Candidate {
            path: entry.path(),
            timestamp,
        });
    }

    Ok(candidates)
}

/// Sum token usage from output logs in `dir` over the last 5 hours and 7 days.
///
/// An unreadable directory yields zeroed windows with a warning.
pub async fn summarize_usage(dir: &Path, now: DateTime<Utc>, config: &UsageConfig) -> UsageSummary {
    let mut last5h = UsageWindow::empty(now - Duration::hours(5), now);
    let mut last7d = UsageWindow::empty(now - Duration::days(7), now);

    let mut candidates = match collect_candidates(dir, last7d.since).await {
        Ok(candidates) => candidates,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "Output log directory not readable");
            return UsageSummary {
                last5h,
                last7d,
                scanned_files: 0,
                newest_log_at: None,
                warning: Some(format!("output log directory not readable: {}", e)),
            };
        }
    };

    candidates.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    let found = candidates.len();
    let mut warning = None;
    if found > config.max_files {
        candidates.truncate(config.max_files);
        warning = Some(format!(
            "only scanned newest {} output logs (found {})",
            config.max_files, found
        ));
    }

    let newest_log_at = candidates.first().map(|c| c.timestamp);
    let scanned_files = candidates.len();

    for candidate in &candidates {
        let lines = match tail::tail_lines(&candidate.path, config.tail_lines).await {
            Ok(lines) => lines,
            Err(e) => {
                tracing::debug!(path = %candidate.path.display(), error = %e, "Skipping unreadable output log");
                continue;
            }
        };
        let Some(usage) = last_turn_usage(&lines) else {
            continue;
        };

        if last7d.contains(candidate.timestamp) {
            last7d.add(&usage);
        }
        if last5h.contains(candidate.timestamp) {
            last5h.add(&usage);
        }
    }

    tracing::debug!(scanned_files, runs = last7d.runs, "Usage summary computed");

    UsageSummary {
        last5h,
        last7d,
        scanned_files,
        newest_log_at,
        warning,
    }
}
