//! Per-job directory layout.
//!
//! Everything a job owns lives under one root: copied inputs, the queue
//! store, per-task fragments, rendered page images, the merged document and
//! the run log. Keeping the layout in one place means every component
//! agrees on where artifacts go.

use std::path::{Path, PathBuf};

use crate::error::{OcrbatchError, Result};

pub const QUEUE_DATABASE_FILENAME: &str = "queue.sqlite3";
pub const INPUT_DIRECTORY_NAME: &str = "input";
pub const OUTPUT_DIRECTORY_NAME: &str = "output";
pub const WORK_DIRECTORY_NAME: &str = "work";
pub const FRAGMENTS_DIRECTORY_NAME: &str = "fragments";
pub const MERGED_MARKDOWN_FILENAME: &str = "output.md";
pub const RUN_LOG_FILENAME: &str = "run.log";

#[derive(Debug, Clone)]
pub struct JobLayout {
    job_root: PathBuf,
}

impl JobLayout {
    pub fn new<P: AsRef<Path>>(job_root: P) -> Self {
        Self {
            job_root: job_root.as_ref().to_path_buf(),
        }
    }

    pub fn job_root(&self) -> &Path {
        &self.job_root
    }

    pub fn queue_database_path(&self) -> PathBuf {
        self.job_root.join(QUEUE_DATABASE_FILENAME)
    }

    pub fn input_dir(&self) -> PathBuf {
        self.job_root.join(INPUT_DIRECTORY_NAME)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.job_root.join(OUTPUT_DIRECTORY_NAME)
    }

    /// Rendered PDF page images, cached across runs.
    pub fn work_dir(&self) -> PathBuf {
        self.output_dir().join(WORK_DIRECTORY_NAME)
    }

    /// Per-task Markdown fragments.
    pub fn fragments_dir(&self) -> PathBuf {
        self.output_dir().join(FRAGMENTS_DIRECTORY_NAME)
    }

    pub fn fragment_path(&self, task_id: i64) -> PathBuf {
        self.fragments_dir().join(format!("task_{task_id}.md"))
    }

    pub fn merged_markdown_path(&self) -> PathBuf {
        self.job_root.join(MERGED_MARKDOWN_FILENAME)
    }

    pub fn log_path(&self) -> PathBuf {
        self.job_root.join(RUN_LOG_FILENAME)
    }

    /// Creates the expected directories.
    pub fn ensure(&self) -> Result<()> {
        for dir in [self.input_dir(), self.work_dir(), self.fragments_dir()] {
            std::fs::create_dir_all(&dir).map_err(|e| OcrbatchError::Io {
                path: dir.clone(),
                source: e,
            })?;
        }
        Ok(())
    }
}
