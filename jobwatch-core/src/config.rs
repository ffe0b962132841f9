//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/jobwatch/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/jobwatch/` (~/.config/jobwatch/)
//! - State/Logs: `$XDG_STATE_HOME/jobwatch/` (~/.local/state/jobwatch/)
//!
//! The observed data sources (audit log, output logs, gateway log) live
//! wherever the agent host writes them; see [`PathsConfig`].

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Locations of the observed logs
    #[serde(default)]
    pub paths: PathsConfig,

    /// Process listing settings
    #[serde(default)]
    pub process: ProcessConfig,

    /// Log follow settings
    #[serde(default)]
    pub stream: StreamConfig,

    /// Usage scan settings
    #[serde(default)]
    pub usage: UsageConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// HTTP surface
    #[serde(default)]
    pub server: ServerConfig,
}

/// Where the agent host writes its logs.
///
/// `audit_log` and `output_dir` default to locations under `workspace_root`.
#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    /// Agent workspace root (defaults to `$WORKSPACE_ROOT`)
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,

    /// Append-only NDJSON audit log
    pub audit_log: Option<PathBuf>,

    /// Directory holding per-job JSONL output logs
    pub output_dir: Option<PathBuf>,

    /// Directory holding gateway logs
    #[serde(default = "default_gateway_log_dir")]
    pub gateway_log_dir: PathBuf,

    /// Glob matched against file names in `gateway_log_dir`
    #[serde(default = "default_gateway_log_pattern")]
    pub gateway_log_pattern: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            workspace_root: default_workspace_root(),
            audit_log: None,
            output_dir: None,
            gateway_log_dir: default_gateway_log_dir(),
            gateway_log_pattern: default_gateway_log_pattern(),
        }
    }
}

impl PathsConfig {
    /// Resolved audit log path.
    pub fn audit_log_path(&self) -> PathBuf {
        self.audit_log
            .clone()
            .unwrap_or_else(|| self.workspace_root.join("logs").join("actions.ndjson"))
    }

    /// Resolved output log directory.
    pub fn output_dir_path(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| self.workspace_root.join("logs").join("codex"))
    }
}

fn default_workspace_root() -> PathBuf {
    std::env::var_os("WORKSPACE_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/root/.openclaw/workspace"))
}

fn default_gateway_log_dir() -> PathBuf {
    PathBuf::from("/tmp/openclaw")
}

fn default_gateway_log_pattern() -> String {
    "openclaw-*.log".to_string()
}

/// Process listing configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ProcessConfig {
    /// Binary name that runs jobs
    #[serde(default = "default_job_binary")]
    pub job_binary: String,

    /// Subcommand of `job_binary` that marks a job invocation
    #[serde(default = "default_job_subcommand")]
    pub job_subcommand: String,

    /// Timeout for the process listing in milliseconds
    #[serde(default = "default_process_timeout")]
    pub timeout_ms: u64,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            job_binary: default_job_binary(),
            job_subcommand: default_job_subcommand(),
            timeout_ms: default_process_timeout(),
        }
    }
}

impl ProcessConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_job_binary() -> String {
    "codex".to_string()
}

fn default_job_subcommand() -> String {
    "exec".to_string()
}

fn default_process_timeout() -> u64 {
    5000
}

/// Log follow configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StreamConfig {
    /// Seconds between keepalive pings
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,

    /// Milliseconds between output path resolution attempts
    #[serde(default = "default_resolve_interval")]
    pub resolve_interval_ms: u64,

    /// Resolution attempts before a stream reports "not found"
    #[serde(default = "default_resolve_attempts")]
    pub resolve_attempts: u32,

    /// Fallback poll interval when no file-change event arrives
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Seconds a followed file may be missing before the stream ends
    #[serde(default = "default_vanish_grace")]
    pub vanish_grace_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            keepalive_secs: default_keepalive_secs(),
            resolve_interval_ms: default_resolve_interval(),
            resolve_attempts: default_resolve_attempts(),
            poll_interval_ms: default_poll_interval(),
            vanish_grace_secs: default_vanish_grace(),
        }
    }
}

fn default_keepalive_secs() -> u64 {
    15
}

fn default_resolve_interval() -> u64 {
    1000
}

fn default_resolve_attempts() -> u32 {
    120
}

fn default_poll_interval() -> u64 {
    500
}

fn default_vanish_grace() -> u64 {
    30
}

/// Usage scan configuration
#[derive(Debug, Deserialize, Clone)]
pub struct UsageConfig {
    /// Maximum number of output logs scanned per summary
    #[serde(default = "default_usage_max_files")]
    pub max_files: usize,

    /// Lines read from the end of each output log
    #[serde(default = "default_usage_tail_lines")]
    pub tail_lines: usize,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            max_files: default_usage_max_files(),
            tail_lines: default_usage_tail_lines(),
        }
    }
}

fn default_usage_max_files() -> usize {
    2000
}

fn default_usage_tail_lines() -> usize {
    120
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:4175".to_string()
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make streams or scans degenerate.
    pub fn validate(&self) -> Result<()> {
        if self.stream.keepalive_secs == 0 {
            return Err(Error::Config(
                "stream.keepalive_secs must be greater than 0".to_string(),
            ));
        }
        if self.stream.resolve_interval_ms == 0 || self.stream.poll_interval_ms == 0 {
            return Err(Error::Config(
                "stream intervals must be greater than 0".to_string(),
            ));
        }
        if self.stream.resolve_attempts == 0 {
            return Err(Error::Config(
                "stream.resolve_attempts must be at least 1".to_string(),
            ));
        }
        if self.usage.max_files == 0 || self.usage.tail_lines == 0 {
            return Err(Error::Config(
                "usage.max_files and usage.tail_lines must be at least 1".to_string(),
            ));
        }
        if self.process.job_binary.trim().is_empty() {
            return Err(Error::Config(
                "process.job_binary must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/jobwatch/config.toml` (~/.config/jobwatch/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("jobwatch").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/jobwatch/` (~/.local/state/jobwatch/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("jobwatch")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/jobwatch/jobwatch.log` (~/.local/state/jobwatch/jobwatch.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("jobwatch.log")
    }
}
