//! Durable per-job run log.
//!
//! Pull-based by design: the runner appends lines, status consumers tail the
//! file. Producer and consumer are separate processes with no shared memory,
//! and the log survives consumer restarts.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};

use super::JobLayout;
use crate::error::{OcrbatchError, Result};

/// Upper bound on lines returned by a tail read.
pub const MAX_LOG_LINES: usize = 1500;

pub struct JobLogger {
    log_path: PathBuf,
}

impl JobLogger {
    pub fn new(layout: &JobLayout) -> Self {
        Self {
            log_path: layout.log_path(),
        }
    }

    /// Appends one timestamped line. Best-effort: a log write failure must
    /// never fail the run it describes.
    pub fn append(&self, line: &str) {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let result = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.log_path)
            .and_then(|mut file| writeln!(file, "[{timestamp}] {line}"));

        if let Err(e) = result {
            log::warn!("Failed to append to {}: {}", self.log_path.display(), e);
        }
    }
}

/// Returns up to `limit` most recent log lines, oldest first. A missing log
/// file reads as empty.
pub fn read_tail(log_path: &Path, limit: usize) -> Result<Vec<String>> {
    if !log_path.exists() {
        return Ok(Vec::new());
    }

    let contents = std::fs::read_to_string(log_path).map_err(|e| OcrbatchError::Io {
        path: log_path.to_path_buf(),
        source: e,
    })?;

    let limit = limit.min(MAX_LOG_LINES);
    let lines: Vec<String> = contents.lines().map(str::to_string).collect();
    let start = lines.len().saturating_sub(limit);
    Ok(lines[start..].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_read_tail() {
        let dir = tempfile::tempdir().unwrap();
        let layout = JobLayout::new(dir.path());
        let logger = JobLogger::new(&layout);

        logger.append("first");
        logger.append("second");

        let lines = read_tail(&layout.log_path(), 10).unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("first"));
        assert!(lines[1].ends_with("second"));
    }

    #[test]
    fn test_read_tail_respects_limit() {
        let dir = tempfile::tempdir().unwrap();
        let layout = JobLayout::new(dir.path());
        let logger = JobLogger::new(&layout);

        for i in 0..5 {
            logger.append(&format!("line {i}"));
        }

        let lines = read_tail(&layout.log_path(), 2).unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("line 3"));
        assert!(lines[1].ends_with("line 4"));
    }

    #[test]
    fn test_read_tail_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let layout = JobLayout::new(dir.path().join("nothing"));
        let lines = read_tail(&layout.log_path(), 10).unwrap();
        assert!(lines.is_empty());
    }
}
