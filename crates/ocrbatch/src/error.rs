use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OcrbatchError {
    #[error("Queue store error: {0}")]
    Store(#[from] crate::db::DatabaseError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("PDF error: {0}")]
    Pdf(#[from] PdfError),

    #[error("Run error: {0}")]
    Run(#[from] RunError),

    #[error("Watch error: {0}")]
    Watch(#[from] WatchError),

    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from a single OCR engine invocation. Isolated to the task that
/// triggered them; the runner records the message and moves on.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Engine invocation failed: {0}")]
    Failed(String),

    #[error("Engine timed out after {0:?}")]
    Timeout(Duration),

    #[error("Engine produced malformed output: {0}")]
    MalformedOutput(String),

    #[error("Failed to read engine input '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum PdfError {
    #[error("Failed to read PDF '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse PDF '{path}': {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Page index {page_index} out of range for '{path}' ({page_count} pages)")]
    PageOutOfRange {
        path: PathBuf,
        page_index: u32,
        page_count: u32,
    },

    #[error("Failed to render PDF page: {0}")]
    Render(String),
}

#[derive(Error, Debug)]
pub enum RunError {
    #[error("A run is already active for job root '{0}'")]
    AlreadyRunning(PathBuf),

    #[error("Task {task_id} is not executable: {reason}")]
    InvalidTask { task_id: i64, reason: String },

    #[error("Job registry lock poisoned")]
    LockPoisoned,
}

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Watch loop is already running")]
    AlreadyRunning,

    #[error("Inbox directory does not exist: {0}")]
    InboxMissing(PathBuf),

    #[error("Inbox path is not a directory: {0}")]
    InboxNotADirectory(PathBuf),

    #[error("Failed to list inbox '{path}': {source}")]
    ListInbox {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create jobs root '{path}': {source}")]
    CreateJobsRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to copy bundle contents from '{from}' to '{to}': {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to update marker '{path}': {source}")]
    Marker {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Bundle contains no supported files: {0}")]
    NoSupportedFiles(PathBuf),

    #[error("Watch state lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, OcrbatchError>;
