//! The engine facade.
//!
//! [`JobMonitor`] binds the readers, correlator, resolver, streamer and
//! aggregators to one [`Config`]. It holds no cached state: every call goes
//! back to the process table and the log files.

use crate::audit::{self, AuditReader};
use crate::config::Config;
use crate::correlate;
use crate::error::Result;
use crate::job_id;
use crate::process::{self, JobCommandMatcher, ProcessSource, PsProcessSource};
use crate::resolve::{self, OutputResolver};
use crate::stream::{FollowOptions, FollowTarget, LineFilter, LogStream};
use crate::tail;
use crate::timeline::{self, Timeline, TimelineItem, TimelineSummary, TurnState};
use crate::types::{ActiveJobs, AuditEvent, ProcessSnapshot, RecentJob};
use crate::usage::{self, UsageSummary};
use chrono::Utc;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

pub const DEFAULT_OUTPUT_TAIL: usize = 300;
pub const MIN_OUTPUT_TAIL: usize = 50;
pub const MAX_OUTPUT_TAIL: usize = 20_000;
pub const MAX_GATEWAY_TAIL: usize = 2000;

/// Recent lines of a job's output log.
#[derive(Debug, Clone, Serialize)]
pub struct RecentOutput {
    pub path: PathBuf,
    pub lines: Vec<String>,
}

/// Recent gateway log lines; resolution failures become a warning.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GatewayLogRecent {
    pub lines: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// A job timeline reconstructed from the tail of its output log.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobTimeline {
    pub job_id: String,
    pub path: PathBuf,
    pub items: Vec<TimelineItem>,
    pub turn: TurnState,
    pub summary: TimelineSummary,
}

impl JobTimeline {
    fn new(job_id: &str, path: PathBuf, timeline: Timeline, include_reasoning: bool) -> Self {
        let summary = timeline.summary(include_reasoning);
        let turn = timeline.turn;
        let items = timeline
            .items
            .into_iter()
            .filter(|item| include_reasoning || !item.is_reasoning())
            .collect();
        Self {
            job_id: job_id.to_string(),
            path,
            items,
            turn,
            summary,
        }
    }
}

pub struct JobMonitor {
    config: Config,
    source: Arc<dyn ProcessSource>,
    matcher: JobCommandMatcher,
    audit: AuditReader,
    resolver: OutputResolver,
}

impl JobMonitor {
    /// Monitor backed by the system `ps`.
    pub fn new(config: Config) -> Result<Self> {
        let matcher = JobCommandMatcher::from_config(&config.process)?;
        let source = Arc::new(PsProcessSource::new(
            matcher.clone(),
            config.process.timeout(),
        ));
        Self::with_source(config, source)
    }

    /// Monitor backed by any process source.
    pub fn with_source(config: Config, source: Arc<dyn ProcessSource>) -> Result<Self> {
        let matcher = JobCommandMatcher::from_config(&config.process)?;
        let audit = AuditReader::new(config.paths.audit_log_path());
        let resolver = OutputResolver::new(config.paths.output_dir_path());
        Ok(Self {
            config,
            source,
            matcher,
            audit,
            resolver,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn follow_options(&self) -> FollowOptions {
        FollowOptions::from(&self.config.stream)
    }

    pub async fn list_processes(&self) -> ProcessSnapshot {
        process::snapshot(self.source.as_ref()).await
    }

    pub async fn list_active_jobs(&self) -> ActiveJobs {
        let snapshot = self.list_processes().await;
        if snapshot.processes.is_empty() {
            return ActiveJobs {
                jobs: Vec::new(),
                warning: snapshot.warning,
            };
        }

        let events = match self.audit.recent(correlate::ACTIVE_AUDIT_WINDOW).await {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(error = %e, "Audit log unreadable; start times omitted");
                Vec::new()
            }
        };

        ActiveJobs {
            jobs: correlate::active_jobs(&snapshot.processes, &events, &self.matcher),
            warning: snapshot.warning,
        }
    }

    pub async fn list_recent_jobs(&self, limit: Option<usize>) -> Result<Vec<RecentJob>> {
        let limit = correlate::clamp_recent_limit(limit);
        let events = self.audit.recent(correlate::RECENT_AUDIT_WINDOW).await?;
        let snapshot = self.list_processes().await;
        let live = correlate::live_job_ids(&snapshot.processes);
        Ok(correlate::recent_jobs(&events, &live, limit))
    }

    pub async fn read_recent_actions(&self, limit: Option<usize>) -> Result<Vec<AuditEvent>> {
        self.audit
            .recent(limit.unwrap_or(audit::DEFAULT_EVENTS))
            .await
    }

    /// Audit events for one job among the last `limit` events.
    pub async fn read_job_actions(
        &self,
        job_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<AuditEvent>> {
        let job_id = job_id::validate(job_id)?;
        self.audit
            .for_job(job_id, limit.unwrap_or(audit::DEFAULT_EVENTS))
            .await
    }

    pub async fn resolve_job_output(&self, job_id: &str) -> Result<PathBuf> {
        self.resolver.resolve(job_id).await
    }

    pub async fn read_job_output_recent(
        &self,
        job_id: &str,
        tail: Option<usize>,
    ) -> Result<RecentOutput> {
        let path = self.resolver.resolve(job_id).await?;
        let n = tail::clamp_tail(tail, DEFAULT_OUTPUT_TAIL, MIN_OUTPUT_TAIL, MAX_OUTPUT_TAIL);
        let lines = tail::read_recent_lines(&path, n).await?;
        Ok(RecentOutput { path, lines })
    }

    pub async fn resolve_gateway_log(&self) -> Result<PathBuf> {
        resolve::resolve_gateway_log(
            &self.config.paths.gateway_log_dir,
            &self.config.paths.gateway_log_pattern,
        )
        .await
    }

    pub async fn read_gateway_log_recent(&self, tail: Option<usize>) -> GatewayLogRecent {
        let n = tail::clamp_tail(tail, DEFAULT_OUTPUT_TAIL, MIN_OUTPUT_TAIL, MAX_GATEWAY_TAIL);
        let result = match self.resolve_gateway_log().await {
            Ok(path) => tail::read_recent_lines(&path, n).await.map_err(Into::into),
            Err(e) => Err(e),
        };

        match result {
            Ok(lines) => GatewayLogRecent {
                lines,
                warning: None,
            },
            Err(e) => {
                tracing::debug!(error = %e, "Gateway log unavailable");
                GatewayLogRecent {
                    lines: Vec::new(),
                    warning: Some(e.to_string()),
                }
            }
        }
    }

    /// Follow a job's output log, waiting for it to appear.
    pub fn stream_job_output(&self, job_id: &str) -> Result<LogStream> {
        let job_id = job_id::validate(job_id)?;
        Ok(LogStream::spawn(
            FollowTarget::JobOutput {
                resolver: self.resolver.clone(),
                job_id: job_id.to_string(),
            },
            LineFilter::All,
            self.follow_options(),
        ))
    }

    pub fn stream_gateway_log(&self) -> LogStream {
        LogStream::spawn(
            FollowTarget::Gateway {
                dir: self.config.paths.gateway_log_dir.clone(),
                pattern: self.config.paths.gateway_log_pattern.clone(),
            },
            LineFilter::All,
            self.follow_options(),
        )
    }

    /// Follow every appended audit line.
    pub fn stream_actions(&self) -> LogStream {
        LogStream::follow(self.audit.path(), self.follow_options())
    }

    /// Follow appended audit lines that belong to one job.
    pub fn stream_job_actions(&self, job_id: &str) -> Result<LogStream> {
        let job_id = job_id::validate(job_id)?;
        Ok(LogStream::spawn(
            FollowTarget::Path(self.audit.path().to_path_buf()),
            LineFilter::Job(job_id.to_string()),
            self.follow_options(),
        ))
    }

    /// Reconstruct a job's timeline from the last `tail` lines of its output log.
    pub async fn job_timeline(
        &self,
        job_id: &str,
        tail: Option<usize>,
        include_reasoning: bool,
    ) -> Result<JobTimeline> {
        let path = self.resolver.resolve(job_id).await?;
        let n = tail::clamp_tail(tail, timeline::DEFAULT_WINDOW, 1, MAX_OUTPUT_TAIL);
        let lines = tail::read_recent_lines(&path, n).await?;
        let timeline = timeline::reconstruct(&lines);
        Ok(JobTimeline::new(job_id, path, timeline, include_reasoning))
    }

    pub async fn usage_summary(&self) -> UsageSummary {
        let dir = self.config.paths.output_dir_path();
        usage::summarize_usage(&dir, Utc::now(), &self.config.usage).await
    }
}
