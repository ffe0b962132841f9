//! Job correlation.
//!
//! Joins the process table and the audit log on the embedded job id. There is
//! no foreign key: both sides are reduced with [`crate::job_id`] and matched
//! on the extracted id. Everything here is a pure function of its inputs, so
//! repeated calls over the same snapshot give identical results.

use crate::format::parse_timestamp;
use crate::job_id;
use crate::process::JobCommandMatcher;
use crate::types::{ActiveJob, AuditEvent, JobStatus, Process, RecentJob};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// Audit events consulted when resolving `startedAt` for active jobs.
pub const ACTIVE_AUDIT_WINDOW: usize = 1000;

/// Audit events folded into the recent-jobs view.
pub const RECENT_AUDIT_WINDOW: usize = 2000;

/// How far `end.ts - duration_sec` may drift from the open job's start
/// before an anonymous `end` is refused.
pub const ORPHAN_END_TOLERANCE_SECS: i64 = 30;

pub const DEFAULT_RECENT_LIMIT: usize = 50;
pub const MAX_RECENT_LIMIT: usize = 200;

/// Clamp a requested recent-jobs limit to `1..=MAX_RECENT_LIMIT`.
pub fn clamp_recent_limit(limit: Option<usize>) -> usize {
    limit
        .unwrap_or(DEFAULT_RECENT_LIMIT)
        .clamp(1, MAX_RECENT_LIMIT)
}

/// Processes grouped by job id, groups in first-seen order, pids deduplicated.
pub fn group_by_job(processes: &[Process]) -> Vec<(String, Vec<&Process>)> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<&Process>)> = Vec::new();

    for process in processes {
        let Some(id) = job_id::from_text(&process.command_line) else {
            continue;
        };
        let slot = *index.entry(id.clone()).or_insert_with(|| {
            groups.push((id, Vec::new()));
            groups.len() - 1
        });
        let members = &mut groups[slot].1;
        if !members.iter().any(|p| p.pid == process.pid) {
            members.push(process);
        }
    }

    groups
}

/// Job ids that currently have a live process.
pub fn live_job_ids(processes: &[Process]) -> HashSet<String> {
    processes
        .iter()
        .filter_map(|p| job_id::from_text(&p.command_line))
        .collect()
}

/// Choose the process that represents a job in summaries.
///
/// Priority: the user-facing invocation carrying the job id marker, then a
/// job-runner invocation, then the first process. `procs` must not be empty.
pub fn pick_primary<'a>(procs: &[&'a Process], matcher: &JobCommandMatcher) -> Option<&'a Process> {
    procs
        .iter()
        .find(|p| job_id::has_marker(&p.command_line))
        .or_else(|| procs.iter().find(|p| matcher.is_match(&p.command_line)))
        .or_else(|| procs.first())
        .copied()
}

/// Timestamp of the most recent `start` event for `job_id`.
pub fn find_started_at(events: &[AuditEvent], job_id: &str) -> Option<String> {
    events
        .iter()
        .rev()
        .filter(|e| e.is_start())
        .find(|e| job_id::from_event(e).as_deref() == Some(job_id))
        .and_then(|e| e.timestamp.clone())
}

/// One [`ActiveJob`] per distinct job id among `processes`, newest id first.
pub fn active_jobs(
    processes: &[Process],
    events: &[AuditEvent],
    matcher: &JobCommandMatcher,
) -> Vec<ActiveJob> {
    let mut jobs: Vec<ActiveJob> = group_by_job(processes)
        .into_iter()
        .map(|(job_id, procs)| {
            let primary = pick_primary(&procs, matcher);
            ActiveJob {
                started_at: find_started_at(events, &job_id),
                process_ids: procs.iter().map(|p| p.pid).collect(),
                elapsed_time: primary.map(|p| p.elapsed_time.clone()),
                primary_command: primary.map(|p| p.command_line.clone()),
                job_id,
            }
        })
        .collect();

    jobs.sort_by(|a, b| job_id::cmp_desc(&a.job_id, &b.job_id));
    jobs
}

/// Fold audit events into per-job records, in first-seen order.
///
/// `start` sets the start fields and `end` the end fields; later events
/// overwrite earlier ones field by field. An `end` event without a job id is
/// credited only when exactly one job is open and, if the event carries both
/// `ts` and `duration_sec`, the start they imply matches that job's start
/// (see [`orphan_end_matches`]). Otherwise it is dropped. Status is left as
/// [`JobStatus::Unknown`]; see [`recent_jobs`].
pub fn fold_jobs(events: &[AuditEvent]) -> Vec<RecentJob> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut jobs: Vec<RecentJob> = Vec::new();
    let mut open: Vec<String> = Vec::new();

    for event in events {
        let id = match job_id::from_event(event) {
            Some(id) => id,
            None if event.is_end() => {
                let owner = match open.as_slice() {
                    [only] => index
                        .get(only)
                        .map(|&slot| &jobs[slot])
                        .filter(|job| orphan_end_matches(event, job)),
                    _ => None,
                };
                match owner {
                    Some(job) => job.job_id.clone(),
                    None => {
                        tracing::debug!(
                            open = open.len(),
                            ts = ?event.timestamp,
                            "Dropping end event with no job id"
                        );
                        continue;
                    }
                }
            }
            None => continue,
        };

        let slot = *index.entry(id.clone()).or_insert_with(|| {
            jobs.push(RecentJob::new(id.clone()));
            jobs.len() - 1
        });
        let job = &mut jobs[slot];

        if event.is_start() {
            if event.timestamp.is_some() {
                job.started_at = event.timestamp.clone();
            }
            if event.actor.is_some() {
                job.actor = event.actor.clone();
            }
            if event.source.is_some() {
                job.source = event.source.clone();
            }
            if let Some(run_log) = event.run_log.as_ref().filter(|s| !s.is_empty()) {
                job.output_log_ref = Some(run_log.clone());
            }
            open.retain(|open_id| open_id != &id);
            open.push(id);
        } else if event.is_end() {
            if event.timestamp.is_some() {
                job.ended_at = event.timestamp.clone();
            }
            if event.exit_code.is_some() {
                job.exit_code = event.exit_code;
            }
            if event.duration_seconds.is_some() {
                job.duration_seconds = event.duration_seconds;
            }
            open.retain(|open_id| open_id != &id);
        }
    }

    jobs
}

/// Whether an `end` event with no job id plausibly belongs to `job`, the only
/// open job. Without both `ts` and `duration_sec` there is nothing to check
/// against and the event is accepted.
pub fn orphan_end_matches(event: &AuditEvent, job: &RecentJob) -> bool {
    let (Some(ended), Some(duration)) = (event.timestamp.as_deref(), event.duration_seconds)
    else {
        return true;
    };
    let (Some(ended), Some(started)) = (
        parse_timestamp(ended),
        job.started_at.as_deref().and_then(parse_timestamp),
    ) else {
        return false;
    };
    if !duration.is_finite() || duration < 0.0 {
        return false;
    }

    let implied_start = ended - chrono::Duration::milliseconds((duration * 1000.0) as i64);
    (implied_start - started).num_seconds().abs() <= ORPHAN_END_TOLERANCE_SECS
}

/// Status of a folded job given the set of live job ids.
pub fn derive_status(job: &RecentJob, live: &HashSet<String>) -> JobStatus {
    if live.contains(&job.job_id) {
        return JobStatus::Running;
    }
    match job.exit_code {
        Some(0) => JobStatus::Ok,
        Some(_) => JobStatus::Error,
        // No end event and not live: crashed, lost, or truncated; we cannot tell which.
        None => JobStatus::Unknown,
    }
}

/// Recent jobs, newest start first, truncated to `limit` after sorting.
pub fn recent_jobs(events: &[AuditEvent], live: &HashSet<String>, limit: usize) -> Vec<RecentJob> {
    let mut jobs = fold_jobs(events);
    for job in &mut jobs {
        job.status = derive_status(job, live);
    }

    jobs.sort_by(compare_recent);
    jobs.truncate(limit.clamp(1, MAX_RECENT_LIMIT));
    jobs
}

fn compare_recent(a: &RecentJob, b: &RecentJob) -> Ordering {
    let a_ts = a.started_at.as_deref().and_then(parse_timestamp);
    let b_ts = b.started_at.as_deref().and_then(parse_timestamp);
    match (a_ts, b_ts) {
        (Some(a_ts), Some(b_ts)) if a_ts != b_ts => b_ts.cmp(&a_ts),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        _ => job_id::cmp_desc(&a.job_id, &b.job_id),
    }
}
