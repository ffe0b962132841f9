//! Bounded reads from the end of a log file.
//!
//! Output and audit logs grow without bound, so recent-history reads walk the
//! file backwards in fixed chunks and stop once enough lines are in hand.

use std::io;
use std::path::Path;

use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Chunk size for backward reading: 8KB.
const CHUNK_SIZE: u64 = 8 * 1024;

/// Read the last `n` lines from a file without loading the entire file.
///
/// Lines come back oldest first. A trailing newline at EOF does not produce
/// an empty last line, and lines longer than the chunk size are reassembled.
pub async fn tail_lines(path: &Path, n: usize) -> io::Result<Vec<String>> {
    if n == 0 {
        return Ok(Vec::new());
    }

    let mut file = tokio::fs::File::open(path).await?;
    let file_len = file.metadata().await?.len();
    if file_len == 0 {
        return Ok(Vec::new());
    }

    // n lines need n + 1 newlines to be fully delimited (the extra one is
    // the boundary in front of the oldest line, or the trailing newline).
    let target_newlines = n + 1;
    let mut newline_count = 0usize;
    let mut collected: Vec<u8> = Vec::new();
    let mut remaining = file_len;

    while remaining > 0 {
        let chunk_len = remaining.min(CHUNK_SIZE);
        let offset = remaining - chunk_len;

        file.seek(io::SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; chunk_len as usize];
        file.read_exact(&mut buf).await?;

        newline_count += buf.iter().filter(|&&b| b == b'\n').count();

        buf.append(&mut collected);
        collected = buf;
        remaining = offset;

        if newline_count >= target_newlines {
            break;
        }
    }

    let text = String::from_utf8_lossy(&collected);
    let text = text.strip_suffix('\n').unwrap_or(&text);
    if text.is_empty() {
        return Ok(Vec::new());
    }

    let all: Vec<&str> = text.split('\n').collect();
    let start = all.len().saturating_sub(n);
    Ok(all[start..].iter().map(|s| s.to_string()).collect())
}

/// Strip trailing carriage returns and drop blank lines.
pub fn clean_lines<I, S>(lines: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    lines
        .into_iter()
        .filter_map(|line| clean_line(line.as_ref()).map(str::to_string))
        .collect()
}

/// A single line with its trailing `\r` removed, or `None` if it is blank.
pub fn clean_line(line: &str) -> Option<&str> {
    let line = line.trim_end_matches('\r');
    if line.trim().is_empty() {
        None
    } else {
        Some(line)
    }
}

/// Last `n` non-blank lines of a file, cleaned.
///
/// Blank lines do not count toward `n`: the raw window is widened until it
/// holds `n` non-blank lines or covers the whole file.
pub async fn read_recent_lines(path: &Path, n: usize) -> io::Result<Vec<String>> {
    let mut window = n;
    loop {
        let raw = tail_lines(path, window).await?;
        let whole_file = raw.len() < window;
        let mut lines = clean_lines(raw);
        if lines.len() >= n || whole_file {
            let start = lines.len().saturating_sub(n);
            return Ok(lines.split_off(start));
        }
        window = window.saturating_mul(2);
    }
}

/// Clamp a requested tail length, substituting `default` for zero.
pub fn clamp_tail(requested: Option<usize>, default: usize, min: usize, max: usize) -> usize {
    requested.unwrap_or(default).clamp(min, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn recent_lines_skip_blank_lines_before_counting() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "one").unwrap();
        writeln!(f, "two\r").unwrap();
        for _ in 0..10 {
            writeln!(f).unwrap();
        }
        writeln!(f, "three").unwrap();
        writeln!(f, "   ").unwrap();
        f.flush().unwrap();

        let result = read_recent_lines(f.path(), 2).await.unwrap();
        assert_eq!(result, vec!["two", "three"]);

        let all = read_recent_lines(f.path(), 50).await.unwrap();
        assert_eq!(all, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn tail_0_lines_returns_empty() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "line1").unwrap();
        f.flush().unwrap();

        assert!(tail_lines(f.path(), 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn tail_fewer_than_n() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "alpha").unwrap();
        writeln!(f, "beta").unwrap();
        f.flush().unwrap();

        let result = tail_lines(f.path(), 100).await.unwrap();
        assert_eq!(result, vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn tail_last_5_of_many() {
        let mut f = NamedTempFile::new().unwrap();
        for i in 0..1000 {
            writeln!(f, "line{}", i).unwrap();
        }
        f.flush().unwrap();

        let result = tail_lines(f.path(), 5).await.unwrap();
        assert_eq!(
            result,
            vec!["line995", "line996", "line997", "line998", "line999"]
        );
    }

    #[tokio::test]
    async fn tail_lines_longer_than_chunk() {
        let mut f = NamedTempFile::new().unwrap();
        let a = "A".repeat(10_000);
        let b = "B".repeat(12_000);
        let c = "C".repeat(9_000);
        writeln!(f, "{}", a).unwrap();
        writeln!(f, "{}", b).unwrap();
        writeln!(f, "{}", c).unwrap();
        f.flush().unwrap();

        let result = tail_lines(f.path(), 2).await.unwrap();
        assert_eq!(result, vec![b, c]);
    }

    #[tokio::test]
    async fn tail_no_trailing_newline() {
        let mut f = NamedTempFile::new().unwrap();
        write!(f, "line1\nline2\nline3").unwrap();
        f.flush().unwrap();

        let result = tail_lines(f.path(), 2).await.unwrap();
        assert_eq!(result, vec!["line2", "line3"]);
    }

    #[tokio::test]
    async fn tail_empty_file() {
        let f = NamedTempFile::new().unwrap();
        assert!(tail_lines(f.path(), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn tail_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = tail_lines(&dir.path().join("nope.log"), 10)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn recent_lines_are_cleaned() {
        let mut f = NamedTempFile::new().unwrap();
        write!(f, "one\r\n\r\n   \ntwo\r\n").unwrap();
        f.flush().unwrap();

        let result = read_recent_lines(f.path(), 10).await.unwrap();
        assert_eq!(result, vec!["one", "two"]);
    }

    #[test]
    fn test_clamp_tail() {
        assert_eq!(clamp_tail(None, 300, 50, 2000), 300);
        assert_eq!(clamp_tail(Some(10), 300, 50, 2000), 50);
        assert_eq!(clamp_tail(Some(90_000), 300, 50, 2000), 2000);
        assert_eq!(clamp_tail(Some(700), 300, 50, 2000), 700);
    }
}
