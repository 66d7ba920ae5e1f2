pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod job;
pub mod pdf;
pub mod pipeline;
pub mod sanitize;
pub mod watch;

pub use config::{EngineSettings, RunOptions};
pub use db::Database;
pub use engine::{CommandEngine, OcrEngine, RecognizeRequest};
pub use error::{EngineError, OcrbatchError, Result, RunError, WatchError};
pub use ingest::{DiscoveryReport, EnqueueOutcome};
pub use job::{JobLayout, JobRegistry, JobStatus};
pub use pipeline::{MergeSummary, RunOutcome};
pub use watch::{SharedWatchState, WatchConfig, WatchStatus};
