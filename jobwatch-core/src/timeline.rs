//! Timeline reconstruction from job output logs.
//!
//! An output log is JSONL: `turn.started` / `turn.completed` records bracket a
//! turn, and `item.started` / `item.completed` records wrap an `item` object
//! with its own `id` and `type`. Items are keyed by id and kept in first-seen
//! order; a later record for the same id replaces the stored item in place.
//! `command_execution` items merge field by field instead, because the
//! started record carries the command and the completed record carries the
//! output and exit code.
//!
//! Lines that are not JSON objects become [`TimelineItem::Raw`] entries with
//! synthetic ids (`raw_1`, `raw_2`, ...) so the stream's ordering survives.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

/// Lines reconstructed by default when only the tail of a log is wanted.
pub const DEFAULT_WINDOW: usize = 1200;

/// Role of a text item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TextRole {
    Agent,
    Reasoning,
}

/// One path touched by a file change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileChangeEntry {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// One semantic step of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimelineItem {
    Raw {
        id: String,
        text: String,
    },
    Text {
        id: String,
        role: TextRole,
        text: String,
    },
    Command {
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        command: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        #[serde(rename = "exitCode", skip_serializing_if = "Option::is_none")]
        exit_code: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
    FileChange {
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<String>,
        changes: Vec<FileChangeEntry>,
    },
}

impl TimelineItem {
    pub fn id(&self) -> &str {
        match self {
            TimelineItem::Raw { id, .. }
            | TimelineItem::Text { id, .. }
            | TimelineItem::Command { id, .. }
            | TimelineItem::FileChange { id, .. } => id,
        }
    }

    pub fn is_reasoning(&self) -> bool {
        matches!(
            self,
            TimelineItem::Text {
                role: TextRole::Reasoning,
                ..
            }
        )
    }

    /// A command with neither an exit code nor a terminal status.
    fn is_unfinished_command(&self) -> bool {
        match self {
            TimelineItem::Command {
                exit_code, status, ..
            } => {
                exit_code.is_none()
                    && !matches!(
                        status.as_deref(),
                        Some("completed" | "failed" | "declined")
                    )
            }
            _ => false,
        }
    }

    fn failed_exit_code(&self) -> Option<i64> {
        match self {
            TimelineItem::Command {
                exit_code: Some(code),
                ..
            } if *code != 0 => Some(*code),
            _ => None,
        }
    }

    fn command(&self) -> Option<&str> {
        match self {
            TimelineItem::Command { command, .. } => command.as_deref(),
            _ => None,
        }
    }
}

/// Coarse turn progress, tracked outside the item sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnPhase {
    #[default]
    Idle,
    Started,
    Completed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnState {
    pub phase: TurnPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
}

/// Overall status label of a reconstructed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TimelineStatus {
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "completed (errors)")]
    CompletedWithErrors,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "stopped (errors)")]
    StoppedWithErrors,
    #[serde(rename = "idle")]
    Idle,
}

impl TimelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimelineStatus::Running => "running",
            TimelineStatus::CompletedWithErrors => "completed (errors)",
            TimelineStatus::Completed => "completed",
            TimelineStatus::StoppedWithErrors => "stopped (errors)",
            TimelineStatus::Idle => "idle",
        }
    }
}

impl std::fmt::Display for TimelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The most recent failed command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandFailure {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub exit_code: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineSummary {
    pub status: TimelineStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_error: Option<CommandFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
}

/// A reconstructed timeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Timeline {
    pub items: Vec<TimelineItem>,
    pub turn: TurnState,
}

impl Timeline {
    /// Items to show, with reasoning dropped unless asked for.
    pub fn visible(&self, include_reasoning: bool) -> Vec<&TimelineItem> {
        self.items
            .iter()
            .filter(|item| include_reasoning || !item.is_reasoning())
            .collect()
    }

    pub fn summary(&self, include_reasoning: bool) -> TimelineSummary {
        let visible = self.visible(include_reasoning);

        let running = visible.iter().any(|item| item.is_unfinished_command());
        let errored = visible.iter().any(|item| item.failed_exit_code().is_some());
        let completed = self.turn.phase == TurnPhase::Completed;

        let status = if running {
            TimelineStatus::Running
        } else if completed && errored {
            TimelineStatus::CompletedWithErrors
        } else if completed {
            TimelineStatus::Completed
        } else if errored {
            TimelineStatus::StoppedWithErrors
        } else {
            TimelineStatus::Idle
        };

        let current_step = visible
            .iter()
            .rev()
            .find(|item| item.is_unfinished_command())
            .and_then(|item| item.command().map(str::to_string));

        let latest_error = visible.iter().rev().find_map(|item| {
            item.failed_exit_code().map(|exit_code| CommandFailure {
                id: item.id().to_string(),
                command: item.command().map(str::to_string),
                exit_code,
            })
        });

        TimelineSummary {
            status,
            current_step,
            latest_error,
            output_tokens: self.turn.output_tokens,
        }
    }
}

/// Folds output log lines into a [`Timeline`], one line at a time.
#[derive(Debug, Default)]
pub struct TimelineBuilder {
    timeline: Timeline,
    index: HashMap<String, usize>,
    raw_seq: u64,
}

impl TimelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn into_timeline(self) -> Timeline {
        self.timeline
    }

    pub fn push_line(&mut self, line: &str) {
        let record = match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(record)) => record,
            _ => {
                self.raw_seq += 1;
                let id = format!("raw_{}", self.raw_seq);
                self.upsert(TimelineItem::Raw {
                    id,
                    text: line.to_string(),
                });
                return;
            }
        };

        match record.get("type").and_then(Value::as_str) {
            Some("turn.started") => self.timeline.turn.phase = TurnPhase::Started,
            Some("turn.completed") => {
                self.timeline.turn.phase = TurnPhase::Completed;
                if let Some(tokens) = record
                    .get("usage")
                    .and_then(|u| u.get("output_tokens"))
                    .and_then(Value::as_u64)
                {
                    self.timeline.turn.output_tokens = Some(tokens);
                }
            }
            Some("item.started" | "item.completed") => {
                if let Some(item) = record.get("item") {
                    self.push_item(item);
                }
            }
            _ => {}
        }
    }

    fn push_item(&mut self, item: &Value) {
        let (Some(id), Some(kind)) = (str_field(item, "id"), str_field(item, "type")) else {
            return;
        };
        let id = id.to_string();

        let entry = match kind {
            "agent_message" | "reasoning" => TimelineItem::Text {
                role: if kind == "agent_message" {
                    TextRole::Agent
                } else {
                    TextRole::Reasoning
                },
                text: str_field(item, "text").unwrap_or_default().to_string(),
                id,
            },
            "file_change" => TimelineItem::FileChange {
                status: str_field(item, "status").map(str::to_string),
                changes: item
                    .get("changes")
                    .and_then(Value::as_array)
                    .map(|changes| changes.iter().filter_map(file_change_entry).collect())
                    .unwrap_or_default(),
                id,
            },
            "command_execution" => {
                let (prev_command, prev_output, prev_exit, prev_status) = match self.get(&id) {
                    Some(TimelineItem::Command {
                        command,
                        output,
                        exit_code,
                        status,
                        ..
                    }) => (command.clone(), output.clone(), *exit_code, status.clone()),
                    _ => (None, None, None, None),
                };
                TimelineItem::Command {
                    command: str_field(item, "command")
                        .map(str::to_string)
                        .or(prev_command),
                    output: str_field(item, "aggregated_output")
                        .map(str::to_string)
                        .or(prev_output),
                    exit_code: item.get("exit_code").and_then(Value::as_i64).or(prev_exit),
                    status: str_field(item, "status").map(str::to_string).or(prev_status),
                    id,
                }
            }
            _ => return,
        };

        self.upsert(entry);
    }

    fn get(&self, id: &str) -> Option<&TimelineItem> {
        self.index.get(id).map(|&i| &self.timeline.items[i])
    }

    fn upsert(&mut self, item: TimelineItem) {
        match self.index.get(item.id()) {
            Some(&i) => self.timeline.items[i] = item,
            None => {
                self.index
                    .insert(item.id().to_string(), self.timeline.items.len());
                self.timeline.items.push(item);
            }
        }
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn file_change_entry(change: &Value) -> Option<FileChangeEntry> {
    let path = str_field(change, "path").filter(|p| !p.is_empty())?;
    Some(FileChangeEntry {
        path: path.to_string(),
        kind: str_field(change, "kind").map(str::to_string),
    })
}

/// Reconstruct a timeline from a batch of lines.
pub fn reconstruct<I, S>(lines: I) -> Timeline
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut builder = TimelineBuilder::new();
    for line in lines {
        builder.push_line(line.as_ref());
    }
    builder.into_timeline()
}

/// Reconstruct only the last `window` lines.
pub fn reconstruct_tail<S: AsRef<str>>(lines: &[S], window: usize) -> Timeline {
    let start = lines.len().saturating_sub(window);
    reconstruct(&lines[start..])
}
