//! Output path resolution.
//!
//! Maps a job id to the newest output log in the output directory. The
//! `msg<id>.latest.jsonl` shortcut is trusted only when it stays inside that
//! directory; anything else falls back to the timestamp-named files.

use crate::error::{Error, Result};
use crate::job_id;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Resolves job ids to output log files under one directory.
#[derive(Debug, Clone)]
pub struct OutputResolver {
    output_dir: PathBuf,
}

impl OutputResolver {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Path of the newest output log for `job_id`.
    pub async fn resolve(&self, job_id: &str) -> Result<PathBuf> {
        let job_id = job_id::validate(job_id)?;

        match tokio::fs::metadata(&self.output_dir).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(Error::OutputDirMissing(self.output_dir.clone())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::OutputDirMissing(self.output_dir.clone()))
            }
            Err(e) => return Err(e.into()),
        }

        if let Some(path) = self.shortcut(job_id).await? {
            return Ok(path);
        }

        self.newest_timestamped(job_id)
            .await?
            .ok_or_else(|| Error::OutputNotFound {
                job_id: job_id.to_string(),
            })
    }

    async fn shortcut(&self, job_id: &str) -> Result<Option<PathBuf>> {
        let shortcut = self.output_dir.join(shortcut_name(job_id));
        let meta = match tokio::fs::symlink_metadata(&shortcut).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if meta.is_file() {
            return Ok(Some(shortcut));
        }
        if !meta.file_type().is_symlink() {
            return Ok(None);
        }

        // Dangling links canonicalize to an error; treat them as absent.
        let (Ok(target), Ok(dir)) = (
            tokio::fs::canonicalize(&shortcut).await,
            tokio::fs::canonicalize(&self.output_dir).await,
        ) else {
            tracing::debug!(path = %shortcut.display(), "Ignoring dangling output shortcut");
            return Ok(None);
        };

        // The link itself is returned so followers see it being repointed.
        if target.starts_with(&dir) && target != dir {
            Ok(Some(shortcut))
        } else {
            tracing::warn!(
                path = %shortcut.display(),
                target = %target.display(),
                "Ignoring output shortcut that points outside the output directory"
            );
            Ok(None)
        }
    }

    async fn newest_timestamped(&self, job_id: &str) -> Result<Option<PathBuf>> {
        let prefix = format!("msg{}-", job_id);
        let mut entries = tokio::fs::read_dir(&self.output_dir).await?;
        let mut newest: Option<String> = None;

        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !name.starts_with(&prefix) || !name.ends_with(".jsonl") {
                continue;
            }
            if newest.as_ref().map_or(true, |current| name > *current) {
                newest = Some(name);
            }
        }

        Ok(newest.map(|name| self.output_dir.join(name)))
    }
}

/// File name of the "latest" shortcut for a job.
pub fn shortcut_name(job_id: &str) -> String {
    format!("msg{}.latest.jsonl", job_id)
}

/// Newest file (by modification time) matching `pattern` inside `dir`.
///
/// The glob walk and metadata reads are blocking, so they run on the
/// blocking pool.
pub async fn resolve_gateway_log(dir: &Path, pattern: &str) -> Result<PathBuf> {
    let dir = dir.to_path_buf();
    let pattern = pattern.to_string();
    tokio::task::spawn_blocking(move || newest_match(&dir, &pattern))
        .await
        .map_err(|e| Error::Io(io::Error::other(e)))?
}

fn newest_match(dir: &Path, pattern: &str) -> Result<PathBuf> {
    let full = dir.join(pattern);
    let full = full.to_string_lossy();

    let mut newest: Option<(SystemTime, PathBuf)> = None;
    for path in glob::glob(&full)?.flatten() {
        let Ok(meta) = std::fs::metadata(&path) else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        if newest.as_ref().map_or(true, |(best, _)| mtime > *best) {
            newest = Some((mtime, path));
        }
    }

    newest
        .map(|(_, path)| path)
        .ok_or_else(|| Error::GatewayLogNotFound(dir.to_path_buf()))
}
