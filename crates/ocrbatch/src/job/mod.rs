//! Job aggregate: the unit users operate on.
//!
//! A job is created implicitly by the first enqueue into an empty job root,
//! mutated by the runner and by `add_inputs`, and destroyed only by an
//! explicit reset. The operations here are the command surface consumed by
//! CLI/GUI collaborators.

pub mod layout;
pub mod log;
pub mod registry;
pub mod status;

pub use layout::JobLayout;
pub use log::{JobLogger, MAX_LOG_LINES};
pub use registry::JobRegistry;
pub use status::JobStatus;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::config::RunOptions;
use crate::db::task_repo::{self, StatusCounts};
use crate::db::Database;
use crate::engine::OcrEngine;
use crate::error::{OcrbatchError, Result};
use crate::ingest::{self, EnqueueOutcome};
use crate::pipeline::{self, RunOutcome};
use crate::sanitize;

/// Opens (creating if needed) the job's queue store.
pub fn open_queue(layout: &JobLayout) -> Result<Database> {
    Ok(Database::open(&layout.queue_database_path())?)
}

/// Decomposes and enqueues the given inputs into the job's queue.
pub fn enqueue(layout: &JobLayout, inputs: &[PathBuf]) -> Result<EnqueueOutcome> {
    layout.ensure()?;
    let db = open_queue(layout)?;
    ingest::enqueue_inputs(&db, inputs)
}

/// Runs the job's queue on the calling thread. Refuses if a run is already
/// active for the root.
pub fn run_blocking(
    registry: &JobRegistry,
    layout: &JobLayout,
    engine: &dyn OcrEngine,
    options: &RunOptions,
) -> Result<RunOutcome> {
    let cancel = registry.begin(layout.job_root())?;
    let logger = JobLogger::new(layout);

    let result = (|| {
        let db = open_queue(layout)?;
        pipeline::run_queue(&db, layout, engine, options, &cancel, &logger)
    })();

    registry.finish(layout.job_root());
    result
}

/// Starts the job's runner on a background thread and returns its handle.
/// The registry entry is released by the runner thread when it concludes,
/// so status polling sees `is_running` flip without anyone joining.
pub fn run(
    registry: &JobRegistry,
    layout: &JobLayout,
    engine: Arc<dyn OcrEngine>,
    options: RunOptions,
) -> Result<thread::JoinHandle<()>> {
    let cancel = registry.begin(layout.job_root())?;
    let registry_for_thread = registry.clone();
    let layout_for_thread = layout.clone();

    let handle = thread::spawn(move || {
        let logger = JobLogger::new(&layout_for_thread);
        let run_result = (|| -> Result<RunOutcome> {
            let db = open_queue(&layout_for_thread)?;
            pipeline::run_queue(
                &db,
                &layout_for_thread,
                engine.as_ref(),
                &options,
                &cancel,
                &logger,
            )
        })();

        if let Err(e) = run_result {
            error!(
                "Run aborted for {}: {}",
                layout_for_thread.job_root().display(),
                e
            );
            logger.append(&format!("run aborted: {e}"));
        }

        registry_for_thread.finish(layout_for_thread.job_root());
    });

    Ok(handle)
}

/// Requests cancellation of an active run. Returns whether one was active.
pub fn cancel(registry: &JobRegistry, job_root: &Path) -> bool {
    registry.cancel(job_root)
}

/// Assembles the job's status snapshot. A job root without a queue store
/// reads as an empty job rather than an error.
pub fn job_status(registry: &JobRegistry, layout: &JobLayout) -> Result<JobStatus> {
    let queue_path = layout.queue_database_path();
    let (counts, last_error_message, durations) = if queue_path.exists() {
        let db = Database::open(&queue_path)?;
        let counts = task_repo::status_counts(&db)?;
        let last_error_message = task_repo::last_error_message(&db)?;
        let durations =
            status::completed_durations_seconds(&task_repo::completed_timestamps(&db)?);
        (counts, last_error_message, durations)
    } else {
        (StatusCounts::default(), None, Vec::new())
    };

    let start_unix_timestamp_millis = registry.running_since_millis(layout.job_root());

    Ok(JobStatus {
        job_root: layout.job_root().to_string_lossy().to_string(),
        is_running: start_unix_timestamp_millis.is_some(),
        start_unix_timestamp_millis,
        total_tasks: counts.total(),
        pending_tasks: counts.pending,
        running_tasks: counts.running,
        completed_tasks: counts.completed,
        failed_tasks: counts.failed,
        last_error_message,
        eta_seconds: status::compute_eta_seconds(&durations, counts.pending),
    })
}

/// Tail-bounded read of the job's run log.
pub fn logs(layout: &JobLayout, limit: usize) -> Result<Vec<String>> {
    log::read_tail(&layout.log_path(), limit)
}

#[derive(Debug)]
pub struct ResetSummary {
    pub deleted_tasks: usize,
    pub outputs_deleted: bool,
}

/// Clears all task rows. With `delete_outputs`, also removes fragments, work
/// images and the merged document, then recreates the layout.
pub fn reset(layout: &JobLayout, delete_outputs: bool) -> Result<ResetSummary> {
    let queue_path = layout.queue_database_path();
    let deleted_tasks = if queue_path.exists() {
        let db = Database::open(&queue_path)?;
        task_repo::delete_all(&db)?
    } else {
        0
    };
    info!("Reset removed {deleted_tasks} task(s)");

    if !delete_outputs {
        return Ok(ResetSummary {
            deleted_tasks,
            outputs_deleted: false,
        });
    }

    let output_dir = layout.output_dir();
    if is_unsafe_deletion_target(&output_dir) {
        warn!(
            "Refusing to delete unsafe output path: {}",
            output_dir.display()
        );
        return Ok(ResetSummary {
            deleted_tasks,
            outputs_deleted: false,
        });
    }

    if output_dir.is_dir() {
        std::fs::remove_dir_all(&output_dir).map_err(|e| OcrbatchError::Io {
            path: output_dir.clone(),
            source: e,
        })?;
    }
    let merged_path = layout.merged_markdown_path();
    if merged_path.is_file() {
        std::fs::remove_file(&merged_path).map_err(|e| OcrbatchError::Io {
            path: merged_path.clone(),
            source: e,
        })?;
    }

    layout.ensure()?;
    Ok(ResetSummary {
        deleted_tasks,
        outputs_deleted: true,
    })
}

/// Copies dropped files or directories into the job's `input/` directory.
/// Returns the number of files copied.
pub fn add_inputs(layout: &JobLayout, paths: &[PathBuf]) -> Result<u64> {
    layout.ensure()?;
    let input_dir = layout.input_dir();

    let mut copied = 0;
    for path in paths {
        if !path.exists() {
            return Err(OcrbatchError::Io {
                path: path.clone(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "dropped path does not exist",
                ),
            });
        }

        if path.is_file() {
            let file_name = path
                .file_name()
                .map(sanitize::sanitize_filename)
                .unwrap_or_else(|| "input_file".to_string());
            let destination = input_dir.join(file_name);
            std::fs::copy(path, &destination).map_err(|e| OcrbatchError::Io {
                path: destination.clone(),
                source: e,
            })?;
            copied += 1;
            continue;
        }

        if path.is_dir() {
            let directory_name = path
                .file_name()
                .map(sanitize::sanitize_filename)
                .unwrap_or_else(|| "input_directory".to_string());
            copied += copy_directory_recursively(path, &input_dir.join(directory_name))?;
            continue;
        }

        return Err(OcrbatchError::Io {
            path: path.clone(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "unsupported dropped path type",
            ),
        });
    }

    Ok(copied)
}

fn copy_directory_recursively(source: &Path, destination: &Path) -> Result<u64> {
    std::fs::create_dir_all(destination).map_err(|e| OcrbatchError::Io {
        path: destination.to_path_buf(),
        source: e,
    })?;

    let mut copied = 0;
    for entry in WalkDir::new(source) {
        let entry = entry.map_err(|e| OcrbatchError::Io {
            path: source.to_path_buf(),
            source: e.into(),
        })?;
        if entry.path().is_dir() {
            continue;
        }

        let relative = entry.path().strip_prefix(source).map_err(|_| {
            OcrbatchError::Io {
                path: entry.path().to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "walked entry escaped its root",
                ),
            }
        })?;
        let target = destination.join(relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| OcrbatchError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        std::fs::copy(entry.path(), &target).map_err(|e| OcrbatchError::Io {
            path: target.clone(),
            source: e,
        })?;
        copied += 1;
    }

    Ok(copied)
}

/// Refuses filesystem roots and other obviously wrong deletion targets.
fn is_unsafe_deletion_target(path: &Path) -> bool {
    let raw = path.to_string_lossy();
    let trimmed = raw.trim();
    if matches!(trimmed, "" | "/" | "." | "..") {
        return true;
    }

    match path.canonicalize() {
        Ok(resolved) => resolved.parent().is_none(),
        // A path that cannot be resolved and does not exist is nothing to
        // delete; treat as unsafe only if it looks like a root.
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::task_repo::TaskSpec;

    fn job_fixture() -> (tempfile::TempDir, JobLayout) {
        let dir = tempfile::tempdir().unwrap();
        let layout = JobLayout::new(dir.path().join("job"));
        layout.ensure().unwrap();
        (dir, layout)
    }

    #[test]
    fn test_enqueue_reports_nothing_for_unsupported_inputs() {
        let (_dir, layout) = job_fixture();
        let note = layout.input_dir().join("note.txt");
        std::fs::write(&note, b"plain text").unwrap();

        let outcome = enqueue(&layout, &[note]).unwrap();
        assert!(matches!(outcome, EnqueueOutcome::NothingEnqueued { .. }));
    }

    #[test]
    fn test_enqueue_then_status_counts() {
        let (_dir, layout) = job_fixture();
        let image = layout.input_dir().join("scan.png");
        std::fs::write(&image, b"fake").unwrap();

        let outcome = enqueue(&layout, &[image]).unwrap();
        assert_eq!(outcome.enqueued_count(), 1);

        let registry = JobRegistry::new();
        let status = job_status(&registry, &layout).unwrap();
        assert_eq!(status.total_tasks, 1);
        assert_eq!(status.pending_tasks, 1);
        assert!(!status.is_running);
        assert_eq!(status.eta_seconds, None);
    }

    #[test]
    fn test_status_for_missing_queue_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let layout = JobLayout::new(dir.path().join("fresh"));
        let registry = JobRegistry::new();

        let status = job_status(&registry, &layout).unwrap();
        assert_eq!(status.total_tasks, 0);
        assert_eq!(status.last_error_message, None);
        assert_eq!(status.eta_seconds, None);
        assert!(!layout.queue_database_path().exists());
    }

    #[test]
    fn test_reset_keeps_outputs_unless_requested() {
        let (_dir, layout) = job_fixture();
        let db = open_queue(&layout).unwrap();
        task_repo::enqueue(&db, &[TaskSpec::image(Path::new("/in/a.png"))]).unwrap();

        let fragment = layout.fragment_path(1);
        std::fs::write(&fragment, b"fragment").unwrap();
        std::fs::write(layout.merged_markdown_path(), b"merged").unwrap();

        let summary = reset(&layout, false).unwrap();
        assert_eq!(summary.deleted_tasks, 1);
        assert!(!summary.outputs_deleted);
        assert!(fragment.exists());
        assert!(layout.merged_markdown_path().exists());

        let registry = JobRegistry::new();
        let status = job_status(&registry, &layout).unwrap();
        assert_eq!(status.total_tasks, 0);
    }

    #[test]
    fn test_reset_with_delete_outputs_removes_artifacts() {
        let (_dir, layout) = job_fixture();
        let db = open_queue(&layout).unwrap();
        task_repo::enqueue(&db, &[TaskSpec::image(Path::new("/in/a.png"))]).unwrap();

        let fragment = layout.fragment_path(1);
        std::fs::write(&fragment, b"fragment").unwrap();
        std::fs::write(layout.merged_markdown_path(), b"merged").unwrap();

        let summary = reset(&layout, true).unwrap();
        assert_eq!(summary.deleted_tasks, 1);
        assert!(summary.outputs_deleted);
        assert!(!fragment.exists());
        assert!(!layout.merged_markdown_path().exists());
        // Layout is recreated for the next enqueue.
        assert!(layout.fragments_dir().is_dir());
    }

    #[test]
    fn test_add_inputs_copies_files_and_directories() {
        let (_dir, layout) = job_fixture();
        let staging = tempfile::tempdir().unwrap();
        let file = staging.path().join("scan.png");
        std::fs::write(&file, b"img").unwrap();
        let nested_dir = staging.path().join("batch");
        std::fs::create_dir(&nested_dir).unwrap();
        std::fs::write(nested_dir.join("page1.png"), b"img").unwrap();
        std::fs::write(nested_dir.join("page2.png"), b"img").unwrap();

        let copied = add_inputs(&layout, &[file, nested_dir]).unwrap();
        assert_eq!(copied, 3);
        assert!(layout.input_dir().join("scan.png").exists());
        assert!(layout.input_dir().join("batch").join("page1.png").exists());
        assert!(layout.input_dir().join("batch").join("page2.png").exists());
    }

    #[test]
    fn test_add_inputs_missing_path_errors() {
        let (_dir, layout) = job_fixture();
        let result = add_inputs(&layout, &[PathBuf::from("/nonexistent/scan.png")]);
        assert!(result.is_err());
    }

    #[test]
    fn test_unsafe_deletion_targets() {
        assert!(is_unsafe_deletion_target(Path::new("/")));
        assert!(is_unsafe_deletion_target(Path::new("")));
        assert!(is_unsafe_deletion_target(Path::new(".")));
        assert!(!is_unsafe_deletion_target(Path::new("/tmp/some/job/output")));
    }

    #[test]
    fn test_cancel_without_run_is_false() {
        let (_dir, layout) = job_fixture();
        let registry = JobRegistry::new();
        assert!(!cancel(&registry, layout.job_root()));
    }
}
