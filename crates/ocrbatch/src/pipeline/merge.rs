//! Merge engine: concatenates completed task fragments into one Markdown
//! document, strictly ordered by ascending task id.
//!
//! The document is always recomputed from current queue state, never
//! appended to, so its content is a pure function of the task set and the
//! fragment files — calling merge twice with unchanged state yields
//! byte-identical output.

use std::path::{Path, PathBuf};

use crate::db::task_repo::{self, TaskKind, TaskRow, TaskStatus};
use crate::db::Database;
use crate::error::{OcrbatchError, Result};
use crate::job::JobLayout;

use super::normalize;

pub const MERGED_DOCUMENT_TITLE: &str = "# OCR Output";

/// Marker separating items in the merged document.
pub const ITEM_BOUNDARY: &str = "---";

#[derive(Debug)]
pub struct MergeSummary {
    pub merged_path: PathBuf,
    pub included_tasks: usize,
    /// Failed tasks omitted from the body. Surfaced so operators know
    /// content is missing.
    pub skipped_failed: usize,
    pub normalization_warnings: Vec<String>,
}

/// Writes the merged document for the job and returns a summary.
pub fn merge(db: &Database, layout: &JobLayout) -> Result<MergeSummary> {
    let tasks = task_repo::list(db, None)?;

    let mut lines: Vec<String> = vec![MERGED_DOCUMENT_TITLE.to_string(), String::new()];
    let mut included_tasks = 0;
    let mut skipped_failed = 0;
    let mut normalization_warnings = Vec::new();

    for task in &tasks {
        match task.status {
            TaskStatus::Completed => {}
            TaskStatus::Failed => {
                skipped_failed += 1;
                continue;
            }
            TaskStatus::Pending | TaskStatus::Running => continue,
        }

        let Some(output_path) = &task.output_path else {
            continue;
        };
        let fragment_path = Path::new(output_path);
        if !fragment_path.exists() {
            continue;
        }

        let raw = std::fs::read_to_string(fragment_path).map_err(|e| OcrbatchError::Io {
            path: fragment_path.to_path_buf(),
            source: e,
        })?;
        if raw.trim().is_empty() {
            continue;
        }

        // A fragment that fails normalization is still included, unnormalized.
        let body = match normalize::normalize_math_delimiters(&raw) {
            Ok(normalized) => normalized,
            Err(e) => {
                let warning = format!("task {}: {}", task.id, e);
                log::warn!("Keeping unnormalized fragment for {warning}");
                normalization_warnings.push(warning);
                raw
            }
        };

        lines.push(item_header(task));
        lines.push(String::new());
        lines.push(body.trim_end().to_string());
        lines.push(String::new());
        lines.push(ITEM_BOUNDARY.to_string());
        lines.push(String::new());
        included_tasks += 1;
    }

    let merged_path = layout.merged_markdown_path();
    if let Some(parent) = merged_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| OcrbatchError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    let document = format!("{}\n", lines.join("\n").trim_end());
    std::fs::write(&merged_path, document).map_err(|e| OcrbatchError::Io {
        path: merged_path.clone(),
        source: e,
    })?;

    Ok(MergeSummary {
        merged_path,
        included_tasks,
        skipped_failed,
        normalization_warnings,
    })
}

fn item_header(task: &TaskRow) -> String {
    match (task.kind, task.page_index, task.page_count) {
        (TaskKind::PdfPage, Some(page_index), Some(page_count)) => {
            format!(
                "## {} (page {}/{})",
                task.source_path,
                page_index + 1,
                page_count
            )
        }
        _ => format!("## {}", task.source_path),
    }
}
