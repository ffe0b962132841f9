//! Error types for jobwatch-core

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the jobwatch-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// The process listing could not be obtained
    #[error("process listing failed: {0}")]
    ProcessListing(String),

    /// A caller-supplied job id is not a plain digit string
    #[error("invalid job id: {0:?}")]
    InvalidJobId(String),

    /// The output log directory has not been created yet
    #[error("output directory not found yet: {}; no jobs have written output logs", .0.display())]
    OutputDirMissing(PathBuf),

    /// No output log exists for a job id
    #[error("no output log found for message_id {job_id}")]
    OutputNotFound { job_id: String },

    /// No gateway log file matched the configured pattern
    #[error("gateway log file not found in {}", .0.display())]
    GatewayLogNotFound(PathBuf),

    /// Invalid glob pattern
    #[error("invalid pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

impl Error {
    /// Whether this error means "nothing there yet, try again later".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::OutputDirMissing(_) | Error::OutputNotFound { .. } | Error::GatewayLogNotFound(_)
        )
    }
}

/// Result type alias for jobwatch-core
pub type Result<T> = std::result::Result<T, Error>;
