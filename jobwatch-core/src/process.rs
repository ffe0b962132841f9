//! Process snapshot reader.
//!
//! Lists running processes once per call and keeps only those that look like
//! job invocations. A listing failure never escapes as an error: callers get
//! an empty snapshot with a warning, since "no jobs visible" is a valid state.

use crate::config::ProcessConfig;
use crate::error::{Error, Result};
use crate::types::{Process, ProcessSnapshot};
use async_trait::async_trait;
use regex_lite::Regex;
use std::time::Duration;
use tokio::process::Command;

/// Something that can list processes.
#[async_trait]
pub trait ProcessSource: Send + Sync {
    /// Return the current process rows.
    async fn list(&self) -> Result<Vec<Process>>;
}

/// Matches command lines that invoke the job runner, e.g. `codex ... exec`.
#[derive(Debug, Clone)]
pub struct JobCommandMatcher {
    binary: Regex,
    subcommand: Option<Regex>,
}

impl JobCommandMatcher {
    /// Build a matcher for `binary` followed somewhere by `subcommand`.
    ///
    /// Both are matched as whole words. An empty subcommand matches any
    /// invocation of the binary.
    pub fn new(binary: &str, subcommand: &str) -> Result<Self> {
        let word = |s: &str| {
            Regex::new(&format!(r"\b{}\b", regex_lite::escape(s)))
                .map_err(|e| Error::Config(format!("invalid process pattern {:?}: {}", s, e)))
        };
        let subcommand = if subcommand.trim().is_empty() {
            None
        } else {
            Some(word(subcommand.trim())?)
        };
        Ok(Self {
            binary: word(binary.trim())?,
            subcommand,
        })
    }

    pub fn from_config(config: &ProcessConfig) -> Result<Self> {
        Self::new(&config.job_binary, &config.job_subcommand)
    }

    pub fn is_match(&self, command_line: &str) -> bool {
        self.binary.is_match(command_line)
            && self
                .subcommand
                .as_ref()
                .map_or(true, |sub| sub.is_match(command_line))
    }
}

impl Default for JobCommandMatcher {
    fn default() -> Self {
        Self {
            binary: Regex::new(r"\bcodex\b").expect("codex pattern"),
            subcommand: Some(Regex::new(r"\bexec\b").expect("exec pattern")),
        }
    }
}

/// Lists processes with `ps -eo pid=,etime=,args=`.
pub struct PsProcessSource {
    matcher: JobCommandMatcher,
    timeout: Duration,
}

impl PsProcessSource {
    pub fn new(matcher: JobCommandMatcher, timeout: Duration) -> Self {
        Self { matcher, timeout }
    }
}

#[async_trait]
impl ProcessSource for PsProcessSource {
    async fn list(&self) -> Result<Vec<Process>> {
        let mut cmd = Command::new("ps");
        cmd.args(["-eo", "pid=,etime=,args="]).kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(result) => result.map_err(|e| Error::ProcessListing(format!("ps: {}", e)))?,
            Err(_) => {
                return Err(Error::ProcessListing(format!(
                    "ps timed out after {}ms",
                    self.timeout.as_millis()
                )))
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::ProcessListing(format!(
                "ps exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_ps_output(&stdout)
            .into_iter()
            .filter(|p| self.matcher.is_match(&p.command_line))
            .collect())
    }
}

/// Take a snapshot, converting any failure into a warning.
pub async fn snapshot(source: &dyn ProcessSource) -> ProcessSnapshot {
    match source.list().await {
        Ok(processes) => ProcessSnapshot {
            processes,
            warning: None,
        },
        Err(e) => {
            tracing::warn!(error = %e, "Process listing unavailable");
            ProcessSnapshot {
                processes: Vec::new(),
                warning: Some(e.to_string()),
            }
        }
    }
}

/// Parse `<pid> <etime> <command line>` rows. Rows that do not fit are skipped.
pub fn parse_ps_output(text: &str) -> Vec<Process> {
    text.lines().filter_map(parse_ps_line).collect()
}

fn parse_ps_line(line: &str) -> Option<Process> {
    let line = line.trim();
    let (pid, rest) = line.split_once(char::is_whitespace)?;
    let pid: u32 = pid.parse().ok()?;
    let (elapsed, command) = rest.trim_start().split_once(char::is_whitespace)?;
    Some(Process {
        pid,
        elapsed_time: elapsed.to_string(),
        command_line: command.trim_start().to_string(),
    })
}
