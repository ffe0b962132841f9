//! # jobwatch-core
//!
//! Core library for jobwatch - a live view of agent job executions on one host.
//!
//! This library provides:
//! - Process and audit log readers
//! - Job correlation across the process table and the audit log
//! - Output log resolution and per-subscriber log following
//! - Timeline reconstruction from job output logs
//! - Token usage aggregation over rolling windows
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Nothing is persisted. Every query is recomputed from three sources:
//! - **Process table:** which jobs are alive right now
//! - **Audit log:** append-only `start`/`end` history
//! - **Output logs:** per-job JSONL step records
//!
//! Jobs are joined across sources by the `[message_id: N]` token each
//! source embeds in free text (see [`job_id`]).
//!
//! ## Example
//!
//! ```rust,no_run
//! use jobwatch_core::{Config, JobMonitor};
//!
//! # async fn run() -> jobwatch_core::Result<()> {
//! let monitor = JobMonitor::new(Config::load()?)?;
//! let active = monitor.list_active_jobs().await;
//! for job in active.jobs {
//!     println!("{} {:?}", job.job_id, job.started_at);
//! }
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use error::{Error, Result};
pub use monitor::{GatewayLogRecent, JobMonitor, JobTimeline, RecentOutput};
pub use process::{JobCommandMatcher, ProcessSource, PsProcessSource};
pub use stream::{LogStream, StreamEvent};
pub use timeline::{Timeline, TimelineBuilder, TimelineItem, TimelineSummary};
pub use types::*;
pub use usage::{UsageSummary, UsageWindow};

// Public modules
pub mod audit;
pub mod config;
pub mod correlate;
pub mod error;
pub mod format;
pub mod job_id;
pub mod logging;
pub mod monitor;
pub mod process;
pub mod resolve;
pub mod stream;
pub mod tail;
pub mod timeline;
pub mod types;
pub mod usage;
