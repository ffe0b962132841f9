//! jobwatch - live view of agent job executions on one host
//!
//! Serves the HTTP/SSE API (`jobwatch serve`) or answers one-shot queries
//! against the process table and the job logs.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Logs: $XDG_STATE_HOME/jobwatch/jobwatch.log (~/.local/state/jobwatch/jobwatch.log)
//! - Config: $XDG_CONFIG_HOME/jobwatch/config.toml (~/.config/jobwatch/config.toml)

mod server;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use jobwatch_core::format::{format_relative_opt, format_relative_time};
use jobwatch_core::timeline::{TextRole, TimelineItem};
use jobwatch_core::{Config, JobMonitor, UsageWindow};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "jobwatch")]
#[command(about = "Live view of agent job executions on this host")]
#[command(version)]
struct Args {
    /// Config file (defaults to $XDG_CONFIG_HOME/jobwatch/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP/SSE API
    Serve {
        /// Address to bind (overrides [server].bind)
        #[arg(long)]
        bind: Option<String>,
    },
    /// Jobs with at least one live process
    Active,
    /// Recently started jobs, newest first
    Recent {
        #[arg(long, default_value = "50")]
        limit: usize,
    },
    /// Audit events for one job
    Actions {
        job_id: String,
        #[arg(long, default_value = "500")]
        limit: usize,
    },
    /// Token usage over the last 5 hours and 7 days
    Usage,
    /// Reconstructed step timeline for one job
    Timeline {
        job_id: String,
        /// Number of output log lines to reconstruct from
        #[arg(long)]
        tail: Option<usize>,
        /// Include reasoning notes
        #[arg(long)]
        reasoning: bool,
    },
    /// Raw matching processes
    Processes,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => Config::load().context("failed to load configuration")?,
    };

    let _log_guard =
        jobwatch_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("jobwatch starting");

    let bind = config.server.bind.clone();
    let monitor = JobMonitor::new(config).context("failed to build job monitor")?;

    match args.command {
        Command::Serve { bind: override_bind } => {
            let bind = override_bind.unwrap_or(bind);
            server::serve(Arc::new(monitor), &bind).await
        }
        Command::Active => {
            let active = monitor.list_active_jobs().await;
            if args.json {
                return print_json(&active);
            }
            warn_line(active.warning.as_deref());
            if active.jobs.is_empty() {
                println!("No active jobs");
                return Ok(());
            }
            let now = Utc::now();
            println!("{:<10} {:<14} {:<12} PIDS", "JOB", "STARTED", "ELAPSED");
            for job in &active.jobs {
                let pids: Vec<String> = job.process_ids.iter().map(u32::to_string).collect();
                println!(
                    "{:<10} {:<14} {:<12} {}",
                    job.job_id,
                    format_relative_opt(job.started_at.as_deref(), now),
                    job.elapsed_time.as_deref().unwrap_or("-"),
                    pids.join(",")
                );
            }
            Ok(())
        }
        Command::Recent { limit } => {
            let jobs = monitor
                .list_recent_jobs(Some(limit))
                .await
                .context("failed to read recent jobs")?;
            if args.json {
                return print_json(&jobs);
            }
            if jobs.is_empty() {
                println!("No jobs in the audit log");
                return Ok(());
            }
            let now = Utc::now();
            println!(
                "{:<10} {:<8} {:<14} {:<6} {:<10} ACTOR",
                "JOB", "STATUS", "STARTED", "EXIT", "DURATION"
            );
            for job in &jobs {
                println!(
                    "{:<10} {:<8} {:<14} {:<6} {:<10} {}",
                    job.job_id,
                    job.status.as_str(),
                    format_relative_opt(job.started_at.as_deref(), now),
                    job.exit_code
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    job.duration_seconds
                        .map(|d| format!("{:.0}s", d))
                        .unwrap_or_else(|| "-".to_string()),
                    job.actor.as_deref().unwrap_or("-")
                );
            }
            Ok(())
        }
        Command::Actions { job_id, limit } => {
            let limit = limit.clamp(1, server::MAX_JOB_ACTIONS);
            let events = monitor
                .read_job_actions(&job_id, Some(limit))
                .await
                .with_context(|| format!("failed to read actions for job {}", job_id))?;
            if args.json {
                return print_json(&events);
            }
            for event in &events {
                println!(
                    "{} {:<8} {}",
                    event.timestamp.as_deref().unwrap_or("-"),
                    event.kind.as_deref().unwrap_or("-"),
                    event
                        .exit_code
                        .map(|c| format!("exit={}", c))
                        .unwrap_or_default()
                );
            }
            Ok(())
        }
        Command::Usage => {
            let summary = monitor.usage_summary().await;
            if args.json {
                return print_json(&summary);
            }
            warn_line(summary.warning.as_deref());
            print_window("last 5h", &summary.last5h);
            print_window("last 7d", &summary.last7d);
            println!("scanned files: {}", summary.scanned_files);
            if let Some(newest) = summary.newest_log_at {
                println!("newest log: {}", format_relative_time(newest, Utc::now()));
            }
            Ok(())
        }
        Command::Timeline {
            job_id,
            tail,
            reasoning,
        } => {
            let timeline = monitor
                .job_timeline(&job_id, tail, reasoning)
                .await
                .with_context(|| format!("failed to build timeline for job {}", job_id))?;
            if args.json {
                return print_json(&timeline);
            }
            println!("{}", timeline.path.display());
            for item in &timeline.items {
                println!("{}", describe_item(item));
            }
            println!("status: {}", timeline.summary.status);
            if let Some(step) = &timeline.summary.current_step {
                println!("current step: {}", step);
            }
            if let Some(error) = &timeline.summary.latest_error {
                println!(
                    "latest error: exit {} ({})",
                    error.exit_code,
                    error.command.as_deref().unwrap_or("unknown command")
                );
            }
            if let Some(tokens) = timeline.summary.output_tokens {
                println!("output tokens: {}", tokens);
            }
            Ok(())
        }
        Command::Processes => {
            let snapshot = monitor.list_processes().await;
            if args.json {
                return print_json(&snapshot);
            }
            warn_line(snapshot.warning.as_deref());
            for process in &snapshot.processes {
                println!(
                    "{:>7} {:>12} {}",
                    process.pid, process.elapsed_time, process.command_line
                );
            }
            Ok(())
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    println!("{}", text);
    Ok(())
}

fn warn_line(warning: Option<&str>) {
    if let Some(warning) = warning {
        eprintln!("warning: {}", warning);
    }
}

fn print_window(label: &str, window: &UsageWindow) {
    println!(
        "{}: {} runs, {} input ({} cached), {} output, {} total",
        label,
        window.runs,
        window.input_tokens,
        window.cached_input_tokens,
        window.output_tokens,
        window.total_tokens
    );
}

fn describe_item(item: &TimelineItem) -> String {
    match item {
        TimelineItem::Raw { text, .. } => format!("  raw      {}", first_line(text)),
        TimelineItem::Text { role, text, .. } => {
            let label = match role {
                TextRole::Agent => "agent",
                TextRole::Reasoning => "thinking",
            };
            format!("  {:<8} {}", label, first_line(text))
        }
        TimelineItem::Command {
            command,
            exit_code,
            status,
            ..
        } => format!(
            "  command  {} [{}{}]",
            command.as_deref().unwrap_or("?"),
            status.as_deref().unwrap_or("pending"),
            exit_code.map(|c| format!(", exit {}", c)).unwrap_or_default()
        ),
        TimelineItem::FileChange { changes, .. } => {
            let paths: Vec<&str> = changes.iter().map(|c| c.path.as_str()).collect();
            format!("  files    {}", paths.join(", "))
        }
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}
