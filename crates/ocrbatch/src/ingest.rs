//! Input discovery and decomposition into queue entries.
//!
//! Expansion preserves the caller's argument order; within a directory the
//! walk is lexicographic per level with depth-first recursion. That ordering
//! is load-bearing: it is the only ordering signal for folder inputs, so the
//! merged document's section order depends on it being deterministic.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::db::task_repo::{self, TaskKind, TaskSpec};
use crate::db::Database;
use crate::error::Result;
use crate::pdf;

pub const SUPPORTED_IMAGE_EXTENSIONS: &[&str] =
    &["png", "jpg", "jpeg", "webp", "bmp", "tif", "tiff"];
pub const SUPPORTED_PDF_EXTENSIONS: &[&str] = &["pdf"];

fn supported_kind(path: &Path) -> Option<TaskKind> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    if SUPPORTED_IMAGE_EXTENSIONS.contains(&extension.as_str()) {
        return Some(TaskKind::Image);
    }
    if SUPPORTED_PDF_EXTENSIONS.contains(&extension.as_str()) {
        return Some(TaskKind::PdfPage);
    }
    None
}

/// Classification of every given input path, for operator diagnostics.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    /// Supported files in enqueue order.
    pub supported: Vec<PathBuf>,
    /// Paths that do not exist.
    pub missing: Vec<PathBuf>,
    /// Files given explicitly but of an unsupported type.
    pub unsupported_files: Vec<PathBuf>,
    /// Directories that contain no supported files.
    pub empty_directories: Vec<PathBuf>,
    /// Paths that are neither files nor directories.
    pub unknown: Vec<PathBuf>,
}

impl DiscoveryReport {
    pub fn has_diagnostics(&self) -> bool {
        !self.missing.is_empty()
            || !self.unsupported_files.is_empty()
            || !self.empty_directories.is_empty()
            || !self.unknown.is_empty()
    }
}

/// Expands the given paths into supported files in deterministic enqueue
/// order, classifying everything else for diagnostics.
pub fn discover_inputs(inputs: &[PathBuf]) -> DiscoveryReport {
    let mut report = DiscoveryReport::default();

    for input in inputs {
        if !input.exists() {
            report.missing.push(input.clone());
            continue;
        }

        if input.is_file() {
            if supported_kind(input).is_some() {
                report.supported.push(input.clone());
            } else {
                report.unsupported_files.push(input.clone());
            }
            continue;
        }

        if input.is_dir() {
            let discovered = supported_files_in_directory(input);
            if discovered.is_empty() {
                report.empty_directories.push(input.clone());
            } else {
                report.supported.extend(discovered);
            }
            continue;
        }

        report.unknown.push(input.clone());
    }

    report
}

fn supported_files_in_directory(directory: &Path) -> Vec<PathBuf> {
    WalkDir::new(directory)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .filter(|entry| supported_kind(entry.path()).is_some())
        .map(|entry| entry.path().to_path_buf())
        .collect()
}

/// Turns supported files into task specs: one `image` task per image, one
/// contiguous block of `pdf_page` tasks per PDF.
pub fn decompose(supported_files: &[PathBuf]) -> Result<Vec<TaskSpec>> {
    let mut specs = Vec::new();

    for file in supported_files {
        match supported_kind(file) {
            Some(TaskKind::Image) => specs.push(TaskSpec::image(file)),
            Some(TaskKind::PdfPage) => {
                let page_count = pdf::page_count(file)?;
                if page_count == 0 {
                    log::warn!("Skipping PDF with no pages: {}", file.display());
                    continue;
                }
                for page_index in 0..page_count {
                    specs.push(TaskSpec::pdf_page(file, page_index, page_count));
                }
            }
            None => {}
        }
    }

    Ok(specs)
}

/// Result of an enqueue call. Zero tasks is an advisory outcome, not an
/// error: it usually means an operator path mistake, so the report is kept
/// for display.
#[derive(Debug)]
pub enum EnqueueOutcome {
    Enqueued {
        task_ids: Vec<i64>,
        report: DiscoveryReport,
    },
    NothingEnqueued {
        report: DiscoveryReport,
    },
}

impl EnqueueOutcome {
    pub fn enqueued_count(&self) -> usize {
        match self {
            EnqueueOutcome::Enqueued { task_ids, .. } => task_ids.len(),
            EnqueueOutcome::NothingEnqueued { .. } => 0,
        }
    }

    pub fn report(&self) -> &DiscoveryReport {
        match self {
            EnqueueOutcome::Enqueued { report, .. } => report,
            EnqueueOutcome::NothingEnqueued { report } => report,
        }
    }
}

/// Discovers, decomposes and enqueues the given inputs in one call.
pub fn enqueue_inputs(db: &Database, inputs: &[PathBuf]) -> Result<EnqueueOutcome> {
    let report = discover_inputs(inputs);
    let specs = decompose(&report.supported)?;

    if specs.is_empty() {
        return Ok(EnqueueOutcome::NothingEnqueued { report });
    }

    let task_ids = task_repo::enqueue(db, &specs)?;
    log::info!("Enqueued {} task(s)", task_ids.len());
    Ok(EnqueueOutcome::Enqueued { task_ids, report })
}
