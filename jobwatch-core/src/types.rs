//! Core domain types for jobwatch
//!
//! Everything here is derived state: it is recomputed from the process table
//! and the log files on every query and never persisted.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Job** | One invocation of the agent, identified by a numeric id embedded as `[message_id: N]` |
//! | **Audit log** | Append-only NDJSON record of job `start`/`end` events and other admin actions |
//! | **Output log** | Per-job JSONL record of the agent's internal steps |
//! | **Shortcut** | `msg<id>.latest.jsonl`, meant to point at the newest output log for a job |

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

// ============================================
// Processes
// ============================================

/// One row of a process listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Process {
    pub pid: u32,
    /// Elapsed time as reported by `ps` (e.g. `01:02:03`, `2-04:00:00`)
    pub elapsed_time: String,
    pub command_line: String,
}

/// Result of a process listing.
///
/// A failed listing is not an error: `processes` is empty and `warning`
/// carries the reason.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSnapshot {
    pub processes: Vec<Process>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

// ============================================
// Audit events
// ============================================

/// One line of the audit log.
///
/// Known fields are lifted out; anything else is kept in `extra` so events
/// can be forwarded without loss. Field types are taken leniently: a value of
/// the wrong type reads as absent instead of failing the whole event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    #[serde(
        rename = "ts",
        default,
        deserialize_with = "string_only",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<String>,
    #[serde(default, deserialize_with = "stringified", skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, deserialize_with = "stringified", skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    /// `start`, `end`, or any other action name
    #[serde(
        rename = "event",
        default,
        deserialize_with = "string_only",
        skip_serializing_if = "Option::is_none"
    )]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "string_only", skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// Free-form arguments; the job id is embedded somewhere in here
    #[serde(default, deserialize_with = "non_null", skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    #[serde(default, deserialize_with = "whole_number", skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
    #[serde(
        rename = "duration_sec",
        default,
        deserialize_with = "any_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub duration_seconds: Option<f64>,
    #[serde(default, deserialize_with = "string_only", skip_serializing_if = "Option::is_none")]
    pub run_log: Option<String>,
    #[serde(default, deserialize_with = "string_only", skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn string_only<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        _ => None,
    })
}

/// Strings as-is, other scalars and structures in their JSON form.
fn stringified<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    })
}

fn non_null<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Ok(Option::<Value>::deserialize(deserializer)?.filter(|v| !v.is_null()))
}

/// Integers, or floats with no fractional part.
fn whole_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    Ok(Option::<Value>::deserialize(deserializer)?.and_then(|v| {
        v.as_i64().or_else(|| {
            v.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        })
    }))
}

fn any_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    Ok(Option::<Value>::deserialize(deserializer)?.and_then(|v| v.as_f64()))
}

impl AuditEvent {
    pub fn is_start(&self) -> bool {
        self.kind.as_deref() == Some("start")
    }

    pub fn is_end(&self) -> bool {
        self.kind.as_deref() == Some("end")
    }
}

// ============================================
// Jobs
// ============================================

/// A job that currently has at least one live process.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveJob {
    pub job_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    /// Distinct pids, in listing order
    pub process_ids: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_command: Option<String>,
}

/// Active jobs plus an optional degradation notice.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveJobs {
    pub jobs: Vec<ActiveJob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Derived status of a job in the recent-jobs view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// A live process carries the job id
    Running,
    /// Ended with exit code 0
    Ok,
    /// Ended with a nonzero exit code
    Error,
    /// Not live and no exit code observed
    Unknown,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Ok => "ok",
            JobStatus::Error => "error",
            JobStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job reconstructed from audit history.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentJob {
    pub job_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_log_ref: Option<String>,
    pub status: JobStatus,
}

impl RecentJob {
    pub(crate) fn new(job_id: String) -> Self {
        Self {
            job_id,
            started_at: None,
            ended_at: None,
            exit_code: None,
            duration_seconds: None,
            actor: None,
            source: None,
            output_log_ref: None,
            status: JobStatus::Unknown,
        }
    }
}
