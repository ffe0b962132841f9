//! Log tail streamer.
//!
//! Each [`LogStream`] owns exactly one follow task and one channel to its
//! subscriber. Nothing is shared between streams: two subscribers on the same
//! file have independent cursors. Dropping the stream aborts its task, and the
//! task also stops on its own once the receiver is gone.
//!
//! Follow semantics mirror `tail -n 0 -F`:
//! - start at the current end of file
//! - a truncated file is re-read from offset 0
//! - a replaced file (new inode) is followed from its start
//! - a partial trailing line is held back until its newline arrives

use crate::audit;
use crate::config::StreamConfig;
use crate::error::Result;
use crate::job_id;
use crate::resolve::{self, OutputResolver};
use crate::tail::clean_line;
use chrono::{DateTime, Utc};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

const CHANNEL_CAPACITY: usize = 256;

/// A line with no newline after this many bytes is emitted as-is.
const MAX_PARTIAL_LINE: usize = 1 << 20;

/// One unit delivered to a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// The followed file, sent once after resolution.
    Path(PathBuf),
    /// One appended line, `\r` stripped, never blank.
    Line(String),
    /// Keepalive, independent of data.
    Ping(DateTime<Utc>),
    /// Resolution gave up; the file never appeared.
    NotFound(String),
    /// The followed file disappeared and did not come back.
    Vanished(PathBuf),
    /// Hard I/O failure.
    Failed(String),
}

impl StreamEvent {
    /// Whether the stream ends after this event.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamEvent::NotFound(_) | StreamEvent::Vanished(_) | StreamEvent::Failed(_)
        )
    }
}

/// Timing knobs for a follow task.
#[derive(Debug, Clone)]
pub struct FollowOptions {
    pub keepalive: Duration,
    pub resolve_interval: Duration,
    pub resolve_attempts: u32,
    pub poll_interval: Duration,
    pub vanish_grace: Duration,
}

impl From<&StreamConfig> for FollowOptions {
    fn from(config: &StreamConfig) -> Self {
        Self {
            keepalive: Duration::from_secs(config.keepalive_secs),
            resolve_interval: Duration::from_millis(config.resolve_interval_ms),
            resolve_attempts: config.resolve_attempts,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            vanish_grace: Duration::from_secs(config.vanish_grace_secs),
        }
    }
}

impl Default for FollowOptions {
    fn default() -> Self {
        Self::from(&StreamConfig::default())
    }
}

/// What to follow.
#[derive(Debug, Clone)]
pub enum FollowTarget {
    /// A fixed path. It may not exist yet; the stream waits for it.
    Path(PathBuf),
    /// The newest output log of a job, retried until it appears.
    JobOutput {
        resolver: OutputResolver,
        job_id: String,
    },
    /// The newest gateway log, resolved once.
    Gateway { dir: PathBuf, pattern: String },
}

impl FollowTarget {
    async fn resolve(&self) -> Result<PathBuf> {
        match self {
            FollowTarget::Path(path) => Ok(path.clone()),
            FollowTarget::JobOutput { resolver, job_id } => resolver.resolve(job_id).await,
            FollowTarget::Gateway { dir, pattern } => {
                resolve::resolve_gateway_log(dir, pattern).await
            }
        }
    }

    fn attempts(&self, options: &FollowOptions) -> u32 {
        match self {
            FollowTarget::JobOutput { .. } => options.resolve_attempts.max(1),
            _ => 1,
        }
    }
}

/// Which appended lines reach the subscriber.
#[derive(Debug, Clone, Default)]
pub enum LineFilter {
    #[default]
    All,
    /// Audit lines whose extracted job id matches.
    Job(String),
}

impl LineFilter {
    fn accepts(&self, line: &str) -> bool {
        match self {
            LineFilter::All => true,
            LineFilter::Job(id) => audit::parse_line(line)
                .and_then(|event| job_id::from_event(&event))
                .is_some_and(|found| found == *id),
        }
    }
}

/// A live subscription to one log file.
pub struct LogStream {
    rx: mpsc::Receiver<StreamEvent>,
    task: JoinHandle<()>,
}

impl LogStream {
    /// Start following `target`. Must be called inside a tokio runtime.
    pub fn spawn(target: FollowTarget, filter: LineFilter, options: FollowOptions) -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let task = tokio::spawn(run(target, filter, options, tx));
        Self { rx, task }
    }

    /// Follow a fixed path with every line passed through.
    pub fn follow(path: impl Into<PathBuf>, options: FollowOptions) -> Self {
        Self::spawn(FollowTarget::Path(path.into()), LineFilter::All, options)
    }

    /// Next event, or `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

type Sender = mpsc::Sender<StreamEvent>;

async fn run(target: FollowTarget, filter: LineFilter, options: FollowOptions, tx: Sender) {
    let mut ping = time::interval_at(Instant::now() + options.keepalive, options.keepalive);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let Some(path) = resolve_with_retry(&target, &options, &mut ping, &tx).await else {
        return;
    };

    let cursor = match FileCursor::at_end(path.clone()).await {
        Ok(cursor) => cursor,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to open log for follow");
            let _ = tx.send(StreamEvent::Failed(e.to_string())).await;
            return;
        }
    };

    if tx.send(StreamEvent::Path(path.clone())).await.is_err() {
        return;
    }
    tracing::debug!(path = %path.display(), "Following log");

    follow(cursor, &filter, &options, &mut ping, &tx).await;
    tracing::debug!(path = %path.display(), "Log follow ended");
}

async fn resolve_with_retry(
    target: &FollowTarget,
    options: &FollowOptions,
    ping: &mut Interval,
    tx: &Sender,
) -> Option<PathBuf> {
    let attempts = target.attempts(options);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match target.resolve().await {
            Ok(path) => return Some(path),
            Err(e) if e.is_not_found() && attempt < attempts => {
                tracing::trace!(attempt, error = %e, "Log not resolvable yet");
            }
            Err(e) if e.is_not_found() => {
                tracing::debug!(attempts, error = %e, "Giving up on log resolution");
                let _ = tx.send(StreamEvent::NotFound(e.to_string())).await;
                return None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Log resolution failed");
                let _ = tx.send(StreamEvent::Failed(e.to_string())).await;
                return None;
            }
        }

        let wait = time::sleep(options.resolve_interval);
        tokio::pin!(wait);
        loop {
            tokio::select! {
                _ = &mut wait => break,
                _ = ping.tick() => {
                    if tx.send(StreamEvent::Ping(Utc::now())).await.is_err() {
                        return None;
                    }
                }
                _ = tx.closed() => return None,
            }
        }
    }
}

async fn follow(
    mut cursor: FileCursor,
    filter: &LineFilter,
    options: &FollowOptions,
    ping: &mut Interval,
    tx: &Sender,
) {
    let (wake_tx, mut wake_rx) = mpsc::channel::<()>(1);
    let _watcher = watch_parent(&cursor.path, wake_tx);

    let mut poll = time::interval(options.poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = poll.tick() => {}
            Some(()) = wake_rx.recv() => {}
            _ = ping.tick() => {
                if tx.send(StreamEvent::Ping(Utc::now())).await.is_err() {
                    return;
                }
                continue;
            }
            _ = tx.closed() => return,
        }

        match cursor.read_new().await {
            Ok(Progress::Idle) => {}
            Ok(Progress::Lines(lines)) => {
                for line in lines.into_iter().filter(|l| filter.accepts(l)) {
                    if tx.send(StreamEvent::Line(line)).await.is_err() {
                        return;
                    }
                }
            }
            Ok(Progress::Missing(since)) => {
                if since.elapsed() >= options.vanish_grace {
                    tracing::info!(path = %cursor.path.display(), "Followed log vanished");
                    let _ = tx.send(StreamEvent::Vanished(cursor.path.clone())).await;
                    return;
                }
            }
            Err(e) => {
                tracing::warn!(path = %cursor.path.display(), error = %e, "Log read failed");
                let _ = tx.send(StreamEvent::Failed(e.to_string())).await;
                return;
            }
        }
    }
}

/// Wake the follow loop on any change in the file's directory. Without a
/// watcher the poll interval alone drives reads.
fn watch_parent(path: &Path, wake: mpsc::Sender<()>) -> Option<RecommendedWatcher> {
    let dir = path.parent().filter(|d| !d.as_os_str().is_empty())?;
    let watcher = RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if res.is_ok() {
                let _ = wake.try_send(());
            }
        },
        notify::Config::default(),
    );

    match watcher {
        Ok(mut watcher) => match watcher.watch(dir, RecursiveMode::NonRecursive) {
            Ok(()) => Some(watcher),
            Err(e) => {
                tracing::debug!(dir = %dir.display(), error = %e, "Watch failed, polling only");
                None
            }
        },
        Err(e) => {
            tracing::debug!(error = %e, "Watcher unavailable, polling only");
            None
        }
    }
}

enum Progress {
    Idle,
    Lines(Vec<String>),
    Missing(Instant),
}

/// Read position in one followed file.
struct FileCursor {
    path: PathBuf,
    offset: u64,
    file_id: Option<u64>,
    seen: bool,
    missing_since: Option<Instant>,
    partial: Vec<u8>,
}

impl FileCursor {
    async fn at_end(path: PathBuf) -> io::Result<Self> {
        let mut cursor = Self {
            path,
            offset: 0,
            file_id: None,
            seen: false,
            missing_since: None,
            partial: Vec::new(),
        };
        match tokio::fs::metadata(&cursor.path).await {
            Ok(meta) => {
                cursor.offset = meta.len();
                cursor.file_id = file_id(&meta);
                cursor.seen = true;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        Ok(cursor)
    }

    fn rewind(&mut self) {
        self.offset = 0;
        self.partial.clear();
    }

    async fn read_new(&mut self) -> io::Result<Progress> {
        let meta = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if !self.seen {
                    return Ok(Progress::Idle);
                }
                let since = *self.missing_since.get_or_insert_with(Instant::now);
                return Ok(Progress::Missing(since));
            }
            Err(e) => return Err(e),
        };
        self.missing_since = None;

        let id = file_id(&meta);
        if !self.seen {
            // Appeared after the stream started: everything in it is new.
            self.rewind();
        } else if id != self.file_id {
            tracing::debug!(path = %self.path.display(), "Followed log replaced");
            self.rewind();
        }
        self.seen = true;
        self.file_id = id;

        let len = meta.len();
        if len < self.offset {
            tracing::debug!(path = %self.path.display(), "Followed log truncated");
            self.rewind();
        }
        if len == self.offset {
            return Ok(Progress::Idle);
        }

        let mut file = match tokio::fs::File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Progress::Idle),
            Err(e) => return Err(e),
        };
        file.seek(io::SeekFrom::Start(self.offset)).await?;
        let mut buf = Vec::new();
        let read = file.take(len - self.offset).read_to_end(&mut buf).await?;
        self.offset += read as u64;

        Ok(Progress::Lines(self.split(buf)))
    }

    fn split(&mut self, bytes: Vec<u8>) -> Vec<String> {
        self.partial.extend(bytes);
        let mut lines = Vec::new();

        while let Some(pos) = self.partial.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.partial.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&raw[..pos]);
            if let Some(line) = clean_line(&text) {
                lines.push(line.to_string());
            }
        }

        if self.partial.len() > MAX_PARTIAL_LINE {
            let raw = std::mem::take(&mut self.partial);
            let text = String::from_utf8_lossy(&raw);
            if let Some(line) = clean_line(&text) {
                lines.push(line.to_string());
            }
        }

        lines
    }
}

#[cfg(unix)]
fn file_id(meta: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(meta.ino())
}

#[cfg(not(unix))]
fn file_id(_meta: &std::fs::Metadata) -> Option<u64> {
    None
}
