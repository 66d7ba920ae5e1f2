//! Serial pipeline runner: drives one job's queue to completion, one task at
//! a time.
//!
//! The engine binds a scarce accelerator, so there is deliberately no
//! intra-job parallelism. A single task failure never aborts the run — the
//! failure is recorded and the loop moves to the next pending task, so one
//! bad scan cannot poison a batch. Cancellation is cooperative and only
//! observed between tasks; the in-flight engine call is an opaque external
//! invocation bounded by its own timeout.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info_span, warn};

use crate::config::RunOptions;
use crate::db::task_repo::{self, TaskKind, TaskRow};
use crate::db::Database;
use crate::engine::{OcrEngine, RecognizeRequest};
use crate::error::{OcrbatchError, Result, RunError};
use crate::job::log::JobLogger;
use crate::job::JobLayout;
use crate::pdf;
use crate::sanitize;

use super::merge::{self, MergeSummary};

/// Summary of one runner invocation.
#[derive(Debug)]
pub struct RunOutcome {
    pub processed: usize,
    pub failed: usize,
    pub cancelled: bool,
    /// Present when the queue drained and the merge ran.
    pub merged: Option<MergeSummary>,
}

/// Processes pending tasks in FIFO order until the queue drains, the run is
/// cancelled, or (with `fail_fast`) a task fails. Store-level errors abort
/// the run and propagate; completed work stays committed.
pub fn run_queue(
    db: &Database,
    layout: &JobLayout,
    engine: &dyn OcrEngine,
    options: &RunOptions,
    cancel: &AtomicBool,
    logger: &JobLogger,
) -> Result<RunOutcome> {
    layout.ensure()?;

    let mut processed = 0;
    let mut failed = 0;
    let mut cancelled = false;
    let mut stopped_early = false;

    loop {
        if cancel.load(Ordering::SeqCst) {
            logger.append("cancellation requested; stopping");
            cancelled = true;
            stopped_early = true;
            break;
        }

        let Some(task) = task_repo::next_pending(db)? else {
            break;
        };

        let _span = info_span!(
            "task",
            task_id = task.id,
            source = %sanitize::redact_path(Path::new(&task.source_path)),
        )
        .entered();

        task_repo::mark_running(db, task.id)?;
        logger.append(&format!(
            "task {} started ({} {})",
            task.id,
            task.kind.as_str(),
            task.source_path
        ));

        match process_task(layout, engine, options, &task) {
            Ok(fragment_path) => {
                task_repo::mark_completed(db, task.id, &fragment_path)?;
                processed += 1;
                logger.append(&format!("task {} completed", task.id));
            }
            Err(e) => {
                let message = e.to_string();
                task_repo::mark_failed(db, task.id, &message)?;
                failed += 1;
                warn!("Task {} failed: {}", task.id, message);
                logger.append(&format!("task {} failed: {}", task.id, message));
                if options.fail_fast {
                    logger.append("fail-fast enabled; stopping run");
                    stopped_early = true;
                    break;
                }
            }
        }
    }

    // Merge only when the queue actually drained; a cancelled or fail-fast
    // run leaves pending tasks, and the next completed run recomputes the
    // document anyway.
    let merged = if stopped_early {
        None
    } else {
        let summary = merge::merge(db, layout)?;
        logger.append(&format!(
            "merged {} fragment(s) into {}",
            summary.included_tasks,
            summary.merged_path.display()
        ));
        Some(summary)
    };

    logger.append(&format!(
        "run finished: processed={processed} failed={failed} cancelled={cancelled}"
    ));

    Ok(RunOutcome {
        processed,
        failed,
        cancelled,
        merged,
    })
}

fn process_task(
    layout: &JobLayout,
    engine: &dyn OcrEngine,
    options: &RunOptions,
    task: &TaskRow,
) -> Result<PathBuf> {
    let image_path = resolve_task_image(layout, task, options.settings.render_dpi)?;
    let request = RecognizeRequest::from_settings(&options.settings);
    let markdown = engine.recognize(&image_path, &request)?;

    let fragment_path = layout.fragment_path(task.id);
    if let Some(parent) = fragment_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| OcrbatchError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    std::fs::write(&fragment_path, markdown).map_err(|e| OcrbatchError::Io {
        path: fragment_path.clone(),
        source: e,
    })?;
    Ok(fragment_path)
}

/// The image handed to the engine: the source itself for image tasks, a
/// rendered (and cached) page image for PDF tasks.
fn resolve_task_image(layout: &JobLayout, task: &TaskRow, dpi: u32) -> Result<PathBuf> {
    match task.kind {
        TaskKind::Image => Ok(PathBuf::from(&task.source_path)),
        TaskKind::PdfPage => {
            let page_index = task.page_index.ok_or_else(|| RunError::InvalidTask {
                task_id: task.id,
                reason: "pdf_page task without page_index".to_string(),
            })?;
            let target = layout
                .work_dir()
                .join(format!("pdf_{}_page_{}.png", task.id, page_index + 1));
            let rendered =
                pdf::render_page(Path::new(&task.source_path), page_index, &target, dpi)?;
            Ok(rendered)
        }
    }
}
