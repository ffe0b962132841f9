//! Integration tests for jobwatch-core
//!
//! These tests point a [`JobMonitor`] at the fixture workspace in
//! `tests/fixtures/workspace/` and verify the end-to-end correlation,
//! resolution, timeline and usage flows.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use jobwatch_core::config::{Config, PathsConfig, UsageConfig};
use jobwatch_core::stream::{FollowOptions, StreamEvent};
use jobwatch_core::timeline::{TimelineItem, TimelineStatus};
use jobwatch_core::types::{JobStatus, Process};
use jobwatch_core::{usage, JobMonitor, ProcessSource, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Get the path to a fixture directory
fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn fixture_config() -> Config {
    Config {
        paths: PathsConfig {
            workspace_root: fixture_path("workspace"),
            audit_log: None,
            output_dir: None,
            gateway_log_dir: fixture_path("gateway"),
            gateway_log_pattern: "openclaw-*.log".to_string(),
        },
        ..Config::default()
    }
}

struct FixedSource(Vec<Process>);

#[async_trait]
impl ProcessSource for FixedSource {
    async fn list(&self) -> Result<Vec<Process>> {
        Ok(self.0.clone())
    }
}

fn monitor_with(processes: Vec<Process>) -> JobMonitor {
    JobMonitor::with_source(fixture_config(), Arc::new(FixedSource(processes))).unwrap()
}

fn process(pid: u32, cmd: &str) -> Process {
    Process {
        pid,
        elapsed_time: "02:15".to_string(),
        command_line: cmd.to_string(),
    }
}

// ============================================
// Correlation
// ============================================

#[tokio::test]
async fn test_recent_jobs_from_fixture_audit_log() {
    let monitor = monitor_with(vec![]);
    let jobs = monitor.list_recent_jobs(None).await.unwrap();

    let summary: Vec<_> = jobs.iter().map(|j| (j.job_id.as_str(), j.status)).collect();
    assert_eq!(
        summary,
        vec![
            ("43", JobStatus::Unknown),
            ("7", JobStatus::Ok),
            ("42", JobStatus::Error),
        ]
    );

    let deploy = &jobs[2];
    assert_eq!(deploy.duration_seconds, Some(300.0));
    assert_eq!(deploy.ended_at.as_deref(), Some("2024-01-01T00:05:00Z"));
    assert_eq!(deploy.actor.as_deref(), Some("ops"));
    assert_eq!(
        deploy.output_log_ref.as_deref(),
        Some("logs/codex/msg42-20240101T000000Z.jsonl")
    );
}

#[tokio::test]
async fn test_live_job_is_running_and_active() {
    let monitor = monitor_with(vec![
        process(100, "/bin/sh -c codex exec 'report [message_id: 43]'"),
        process(101, "codex exec 'report [message_id: 43]'"),
        process(102, "node /usr/bin/codex exec 'report [message_id: 43]'"),
    ]);

    let active = monitor.list_active_jobs().await;
    assert_eq!(active.jobs.len(), 1);
    let job = &active.jobs[0];
    assert_eq!(job.job_id, "43");
    assert_eq!(job.process_ids, vec![100, 101, 102]);
    assert_eq!(job.started_at.as_deref(), Some("2024-01-01T02:00:00Z"));
    assert_eq!(job.elapsed_time.as_deref(), Some("02:15"));

    let recent = monitor.list_recent_jobs(Some(1)).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].job_id, "43");
    assert_eq!(recent[0].status, JobStatus::Running);
}

#[tokio::test]
async fn test_job_actions_filter_by_id() {
    let monitor = monitor_with(vec![]);

    let events = monitor.read_job_actions("42", Some(500)).await.unwrap();
    let kinds: Vec<_> = events.iter().filter_map(|e| e.kind.as_deref()).collect();
    assert_eq!(kinds, vec!["start", "note"]);

    let all = monitor.read_recent_actions(None).await.unwrap();
    assert_eq!(all.len(), 6);
}

// ============================================
// Output and timeline
// ============================================

#[tokio::test]
async fn test_output_recent_reads_newest_log() {
    let monitor = monitor_with(vec![]);
    let recent = monitor.read_job_output_recent("7", Some(1)).await.unwrap();

    assert!(recent.path.ends_with("msg7-20240101T010000Z.jsonl"));
    assert_eq!(recent.lines.len(), 3);
}

#[tokio::test]
async fn test_timeline_reconstruction_from_fixture() {
    let monitor = monitor_with(vec![]);
    let timeline = monitor.job_timeline("42", None, false).await.unwrap();

    let ids: Vec<_> = timeline.items.iter().map(|i| i.id()).collect();
    assert_eq!(ids, vec!["item_1", "raw_1", "item_2", "item_3"]);

    match &timeline.items[0] {
        TimelineItem::Command {
            command,
            output,
            exit_code,
            status,
            ..
        } => {
            assert_eq!(command.as_deref(), Some("bash -lc 'make deploy'"));
            assert_eq!(output.as_deref(), Some("make: *** [deploy] Error 2\n"));
            assert_eq!(*exit_code, Some(2));
            assert_eq!(status.as_deref(), Some("failed"));
        }
        other => panic!("expected command, got {:?}", other),
    }

    assert_eq!(timeline.summary.status, TimelineStatus::CompletedWithErrors);
    assert_eq!(timeline.summary.output_tokens, Some(150));
    let error = timeline.summary.latest_error.as_ref().unwrap();
    assert_eq!(error.exit_code, 2);

    let with_reasoning = monitor.job_timeline("42", None, true).await.unwrap();
    assert_eq!(with_reasoning.items.len(), 5);
    assert_eq!(with_reasoning.items[0].id(), "item_0");
}

#[tokio::test]
async fn test_missing_output_is_not_found() {
    let monitor = monitor_with(vec![]);
    let err = monitor.read_job_output_recent("43", None).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.to_string(), "no output log found for message_id 43");
}

#[tokio::test]
async fn test_gateway_log_recent() {
    let monitor = monitor_with(vec![]);
    let recent = monitor.read_gateway_log_recent(None).await;
    assert!(recent.warning.is_none());
    assert_eq!(recent.lines.len(), 3);
    assert!(recent.lines[2].contains("exited with 1"));
}

// ============================================
// Usage
// ============================================

#[tokio::test]
async fn test_usage_windows_from_fixture_logs() {
    let dir = fixture_path("workspace/logs/codex");
    let now = Utc.with_ymd_and_hms(2024, 1, 1, 5, 30, 0).unwrap();

    let summary = usage::summarize_usage(&dir, now, &UsageConfig::default()).await;

    assert_eq!(summary.scanned_files, 2);
    assert_eq!(summary.last5h.runs, 1);
    assert_eq!(summary.last5h.input_tokens, 300);
    assert_eq!(summary.last7d.runs, 2);
    assert_eq!(summary.last7d.input_tokens, 1500);
    assert_eq!(summary.last7d.cached_input_tokens, 800);
    assert_eq!(summary.last7d.total_tokens, 1670);
    assert_eq!(
        summary.newest_log_at,
        Some(Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap())
    );
}

// ============================================
// Streaming
// ============================================

#[tokio::test]
async fn test_job_output_stream_reports_not_found() {
    let mut config = fixture_config();
    config.stream.resolve_attempts = 2;
    config.stream.resolve_interval_ms = 10;
    let monitor = JobMonitor::with_source(config, Arc::new(FixedSource(vec![]))).unwrap();

    let mut stream = monitor.stream_job_output("43").unwrap();
    let event = tokio::time::timeout(Duration::from_secs(5), stream.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, StreamEvent::NotFound(_)));
}

#[tokio::test]
async fn test_job_output_stream_reports_path_first() {
    let monitor = monitor_with(vec![]);
    let mut stream = monitor.stream_job_output("7").unwrap();
    let event = tokio::time::timeout(Duration::from_secs(5), stream.recv())
        .await
        .unwrap()
        .unwrap();
    match event {
        StreamEvent::Path(path) => assert!(path.ends_with("msg7-20240101T010000Z.jsonl")),
        other => panic!("expected path, got {:?}", other),
    }

    // Following starts at end of file: existing lines are not replayed.
    let next = tokio::time::timeout(Duration::from_millis(300), stream.recv()).await;
    assert!(next.is_err());
}

#[test]
fn test_follow_options_from_defaults() {
    let options = FollowOptions::from(&Config::default().stream);
    assert_eq!(options.keepalive, Duration::from_secs(15));
    assert_eq!(options.resolve_attempts, 120);
}
