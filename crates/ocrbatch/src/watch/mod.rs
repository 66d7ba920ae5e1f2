//! Watch-folder ingestion.
//!
//! An independent polling loop detects completed inbox bundles (signalled by
//! their `.ready` marker), claims them exclusively, copies their contents
//! into a fresh job root and drives the job through the same enqueue/run
//! path as a manually started job.

pub mod bundle;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::RunOptions;
use crate::engine::OcrEngine;
use crate::error::{OcrbatchError, WatchError};
use crate::ingest::{self, EnqueueOutcome};
use crate::job::{self, JobLayout, JobRegistry};
use crate::sanitize;
use bundle::{BundleState, MarkerFs, RealMarkerFs};

pub const DEFAULT_WATCH_POLL_INTERVAL_MILLIS: u64 = 1000;

#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub inbox_root: PathBuf,
    pub jobs_root: PathBuf,
    pub poll_interval: Duration,
    pub options: RunOptions,
}

impl WatchConfig {
    pub fn new(inbox_root: PathBuf, jobs_root: PathBuf) -> Self {
        Self {
            inbox_root,
            jobs_root,
            poll_interval: Duration::from_millis(DEFAULT_WATCH_POLL_INTERVAL_MILLIS),
            options: RunOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WatchStatus {
    pub is_running: bool,
    pub inbox_root: Option<String>,
    pub jobs_root: Option<String>,
    pub last_error_message: Option<String>,
}

#[derive(Default)]
pub struct WatchRuntimeState {
    running_thread: Option<thread::JoinHandle<()>>,
    stop_requested: Arc<AtomicBool>,
    inbox_root: Option<PathBuf>,
    jobs_root: Option<PathBuf>,
    last_error_message: Option<String>,
}

pub type SharedWatchState = Arc<Mutex<WatchRuntimeState>>;

pub fn new_shared_watch_state() -> SharedWatchState {
    Arc::new(Mutex::new(WatchRuntimeState::default()))
}

/// Default jobs root for watch-created jobs: `~/.ocrbatch/jobs`.
pub fn default_jobs_root() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".ocrbatch").join("jobs"))
}

pub fn watch_status(state: &SharedWatchState) -> WatchStatus {
    let locked = match state.lock() {
        Ok(value) => value,
        Err(_) => {
            return WatchStatus {
                is_running: false,
                inbox_root: None,
                jobs_root: None,
                last_error_message: Some("Watch state lock poisoned".to_string()),
            };
        }
    };

    WatchStatus {
        is_running: locked.running_thread.is_some(),
        inbox_root: locked
            .inbox_root
            .as_ref()
            .map(|p| p.to_string_lossy().to_string()),
        jobs_root: locked
            .jobs_root
            .as_ref()
            .map(|p| p.to_string_lossy().to_string()),
        last_error_message: locked.last_error_message.clone(),
    }
}

/// Stops the polling loop and waits for the current iteration to finish.
pub fn stop_watch(state: &SharedWatchState) {
    let join_handle = {
        let mut locked = match state.lock() {
            Ok(value) => value,
            Err(_) => return,
        };
        locked.stop_requested.store(true, Ordering::SeqCst);
        locked.running_thread.take()
    };

    // Join outside the lock so status queries stay responsive.
    if let Some(handle) = join_handle {
        let _ = handle.join();
    }
}

/// Starts the polling loop on a dedicated thread.
pub fn start_watch(
    state: &SharedWatchState,
    config: WatchConfig,
    registry: JobRegistry,
    engine: Arc<dyn OcrEngine>,
) -> Result<(), WatchError> {
    if !config.inbox_root.exists() {
        return Err(WatchError::InboxMissing(config.inbox_root.clone()));
    }
    if !config.inbox_root.is_dir() {
        return Err(WatchError::InboxNotADirectory(config.inbox_root.clone()));
    }
    std::fs::create_dir_all(&config.jobs_root).map_err(|e| WatchError::CreateJobsRoot {
        path: config.jobs_root.clone(),
        source: e,
    })?;

    let stop_flag = {
        let mut locked = state.lock().map_err(|_| WatchError::LockPoisoned)?;
        if locked.running_thread.is_some() {
            return Err(WatchError::AlreadyRunning);
        }
        locked.stop_requested = Arc::new(AtomicBool::new(false));
        locked.inbox_root = Some(config.inbox_root.clone());
        locked.jobs_root = Some(config.jobs_root.clone());
        locked.last_error_message = None;
        locked.stop_requested.clone()
    };

    let state_for_thread = state.clone();
    let thread_handle = thread::spawn(move || loop {
        if stop_flag.load(Ordering::SeqCst) {
            return;
        }

        if let Err(e) = poll_inbox_once(&config, &registry, engine.as_ref(), &RealMarkerFs) {
            // Keep the watcher alive; surface the error in status.
            warn!("Watch poll failed: {e}");
            if let Ok(mut locked) = state_for_thread.lock() {
                locked.last_error_message = Some(e.to_string());
            }
        }

        thread::sleep(config.poll_interval);
    });

    let mut locked = state.lock().map_err(|_| WatchError::LockPoisoned)?;
    locked.running_thread = Some(thread_handle);
    Ok(())
}

/// Bundles in `Ready` state, in stable (sorted) order. Claim order across
/// bundles carries no guarantee; each bundle's own transitions do.
pub fn list_ready_bundles(
    fs: &dyn MarkerFs,
    inbox_root: &Path,
) -> Result<Vec<PathBuf>, WatchError> {
    if !inbox_root.exists() {
        return Err(WatchError::InboxMissing(inbox_root.to_path_buf()));
    }
    if !inbox_root.is_dir() {
        return Err(WatchError::InboxNotADirectory(inbox_root.to_path_buf()));
    }

    let entries = std::fs::read_dir(inbox_root).map_err(|e| WatchError::ListInbox {
        path: inbox_root.to_path_buf(),
        source: e,
    })?;

    let mut ready = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| WatchError::ListInbox {
            path: inbox_root.to_path_buf(),
            source: e,
        })?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        if bundle::bundle_state(fs, &path) == BundleState::Ready {
            ready.push(path);
        }
    }

    ready.sort();
    Ok(ready)
}

/// One polling iteration: claim every ready bundle and convert it into a
/// job. A lost claim race is skipped silently; a failed ingest marks the
/// bundle `.failed` and the iteration moves on.
pub fn poll_inbox_once(
    config: &WatchConfig,
    registry: &JobRegistry,
    engine: &dyn OcrEngine,
    fs: &dyn MarkerFs,
) -> Result<(), WatchError> {
    for bundle_dir in list_ready_bundles(fs, &config.inbox_root)? {
        if !bundle::try_claim(fs, &bundle_dir)? {
            continue;
        }
        info!("Claimed bundle {}", bundle_dir.display());

        match ingest_bundle(config, registry, engine, &bundle_dir) {
            Ok(layout) => {
                bundle::mark_processed(fs, &bundle_dir)?;
                info!(
                    "Bundle {} processed into job {}",
                    bundle_dir.display(),
                    layout.job_root().display()
                );
            }
            Err(e) => {
                warn!("Bundle {} failed: {}", bundle_dir.display(), e);
                bundle::mark_failed(fs, &bundle_dir, &e.to_string())?;
            }
        }
    }

    Ok(())
}

/// Copies the claimed bundle into a fresh job root, enqueues it and runs it
/// to completion. The original bundle is left intact except for markers.
fn ingest_bundle(
    config: &WatchConfig,
    registry: &JobRegistry,
    engine: &dyn OcrEngine,
    bundle_dir: &Path,
) -> Result<JobLayout, OcrbatchError> {
    let bundle_name = bundle_dir
        .file_name()
        .map(sanitize::sanitize_filename)
        .unwrap_or_else(|| "bundle".to_string());

    let job_root = allocate_job_root(&config.jobs_root, &bundle_name)?;
    let layout = JobLayout::new(&job_root);
    layout.ensure()?;

    copy_bundle_contents(bundle_dir, &layout.input_dir())?;

    let db = job::open_queue(&layout)?;
    match ingest::enqueue_inputs(&db, &[layout.input_dir()])? {
        EnqueueOutcome::NothingEnqueued { .. } => {
            Err(WatchError::NoSupportedFiles(bundle_dir.to_path_buf()).into())
        }
        EnqueueOutcome::Enqueued { .. } => {
            job::run_blocking(registry, &layout, engine, &config.options)?;
            Ok(layout)
        }
    }
}

/// Reserves a unique job directory under the jobs root. `create_dir` is the
/// atomic check-and-claim; name conflicts get a numbered suffix.
fn allocate_job_root(jobs_root: &Path, bundle_name: &str) -> Result<PathBuf, OcrbatchError> {
    std::fs::create_dir_all(jobs_root).map_err(|e| OcrbatchError::Io {
        path: jobs_root.to_path_buf(),
        source: e,
    })?;

    for counter in 1..=1000 {
        let candidate_name = if counter == 1 {
            bundle_name.to_string()
        } else {
            format!("{bundle_name}_{counter}")
        };
        let candidate = jobs_root.join(candidate_name);
        match std::fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(OcrbatchError::Io {
                    path: candidate,
                    source: e,
                })
            }
        }
    }

    Err(OcrbatchError::Io {
        path: jobs_root.to_path_buf(),
        source: std::io::Error::other("exhausted job root name candidates"),
    })
}

/// Copies bundle contents into the job's input directory, preserving the
/// relative structure. Marker files (and other dotfiles) stay behind.
fn copy_bundle_contents(bundle_dir: &Path, input_dir: &Path) -> Result<(), WatchError> {
    let copy_error = |source: std::io::Error, to: PathBuf| WatchError::Copy {
        from: bundle_dir.to_path_buf(),
        to,
        source,
    };

    for entry in WalkDir::new(bundle_dir) {
        let entry =
            entry.map_err(|e| copy_error(e.into(), input_dir.to_path_buf()))?;
        let path = entry.path();
        if path.is_dir() {
            continue;
        }
        if is_hidden_file(path) {
            continue;
        }

        let relative = path
            .strip_prefix(bundle_dir)
            .map_err(|_| copy_error(std::io::Error::other("entry escaped bundle"), input_dir.to_path_buf()))?;
        let target = input_dir.join(relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| copy_error(e, parent.to_path_buf()))?;
        }
        std::fs::copy(path, &target).map_err(|e| copy_error(e, target.clone()))?;
    }

    Ok(())
}

fn is_hidden_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RecognizeRequest;
    use crate::error::EngineError;

    /// Engine stub returning a fixed fragment, so watch ingestion can run
    /// end-to-end without a real OCR engine.
    struct FixedEngine(&'static str);

    impl OcrEngine for FixedEngine {
        fn recognize(
            &self,
            _image_path: &Path,
            _request: &RecognizeRequest<'_>,
        ) -> Result<String, EngineError> {
            Ok(self.0.to_string())
        }
    }

    fn make_bundle(inbox: &Path, name: &str, files: &[&str], ready: bool) -> PathBuf {
        let bundle = inbox.join(name);
        std::fs::create_dir_all(&bundle).unwrap();
        for file in files {
            std::fs::write(bundle.join(file), b"content").unwrap();
        }
        if ready {
            std::fs::write(bundle.join(bundle::READY_MARKER), b"").unwrap();
        }
        bundle
    }

    fn watch_fixture() -> (tempfile::TempDir, WatchConfig) {
        let dir = tempfile::tempdir().unwrap();
        let inbox = dir.path().join("inbox");
        std::fs::create_dir_all(&inbox).unwrap();
        let config = WatchConfig::new(inbox, dir.path().join("jobs"));
        (dir, config)
    }

    #[test]
    fn test_list_ready_bundles_filters_states() {
        let (_dir, config) = watch_fixture();
        let ready = make_bundle(&config.inbox_root, "ready", &["a.png"], true);
        make_bundle(&config.inbox_root, "copying", &["b.png"], false);
        let done = make_bundle(&config.inbox_root, "done", &["c.png"], true);
        std::fs::write(done.join(bundle::PROCESSED_MARKER), b"").unwrap();
        // Loose files in the inbox are not bundles.
        std::fs::write(config.inbox_root.join("stray.png"), b"x").unwrap();

        let listed = list_ready_bundles(&RealMarkerFs, &config.inbox_root).unwrap();
        assert_eq!(listed, vec![ready]);
    }

    #[test]
    fn test_poll_processes_ready_bundle_into_job() {
        let (_dir, config) = watch_fixture();
        let bundle_dir = make_bundle(&config.inbox_root, "batch-1", &["page.png"], true);

        let registry = JobRegistry::new();
        let engine = FixedEngine("recognized page");
        poll_inbox_once(&config, &registry, &engine, &RealMarkerFs).unwrap();

        // Terminal marker replaced the claim marker.
        assert!(bundle_dir.join(bundle::PROCESSED_MARKER).exists());
        assert!(!bundle_dir.join(bundle::PROCESSING_MARKER).exists());
        // Original content is left intact.
        assert!(bundle_dir.join("page.png").exists());

        let job_root = config.jobs_root.join("batch-1");
        let layout = JobLayout::new(&job_root);
        assert!(layout.input_dir().join("page.png").exists());
        let merged = std::fs::read_to_string(layout.merged_markdown_path()).unwrap();
        assert!(merged.contains("recognized page"));
    }

    #[test]
    fn test_processed_bundle_is_not_reprocessed() {
        let (_dir, config) = watch_fixture();
        make_bundle(&config.inbox_root, "batch-1", &["page.png"], true);

        let registry = JobRegistry::new();
        let engine = FixedEngine("text");
        poll_inbox_once(&config, &registry, &engine, &RealMarkerFs).unwrap();
        poll_inbox_once(&config, &registry, &engine, &RealMarkerFs).unwrap();

        // Exactly one job directory was created.
        let job_dirs: Vec<_> = std::fs::read_dir(&config.jobs_root)
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(job_dirs.len(), 1);
    }

    #[test]
    fn test_bundle_without_supported_files_is_marked_failed() {
        let (_dir, config) = watch_fixture();
        let bundle_dir = make_bundle(&config.inbox_root, "notes", &["readme.txt"], true);

        let registry = JobRegistry::new();
        let engine = FixedEngine("text");
        poll_inbox_once(&config, &registry, &engine, &RealMarkerFs).unwrap();

        let failed_marker = bundle_dir.join(bundle::FAILED_MARKER);
        assert!(failed_marker.exists());
        let message = std::fs::read_to_string(&failed_marker).unwrap();
        assert!(message.contains("no supported files"));
    }

    #[test]
    fn test_allocate_job_root_numbers_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let jobs_root = dir.path().join("jobs");

        let first = allocate_job_root(&jobs_root, "batch").unwrap();
        let second = allocate_job_root(&jobs_root, "batch").unwrap();
        assert_eq!(first, jobs_root.join("batch"));
        assert_eq!(second, jobs_root.join("batch_2"));
    }

    #[test]
    fn test_copy_bundle_contents_skips_markers() {
        let dir = tempfile::tempdir().unwrap();
        let bundle_dir = dir.path().join("bundle");
        std::fs::create_dir_all(bundle_dir.join("nested")).unwrap();
        std::fs::write(bundle_dir.join("a.png"), b"x").unwrap();
        std::fs::write(bundle_dir.join("nested").join("b.png"), b"x").unwrap();
        std::fs::write(bundle_dir.join(bundle::READY_MARKER), b"").unwrap();
        std::fs::write(bundle_dir.join(bundle::PROCESSING_MARKER), b"").unwrap();

        let input_dir = dir.path().join("input");
        copy_bundle_contents(&bundle_dir, &input_dir).unwrap();

        assert!(input_dir.join("a.png").exists());
        assert!(input_dir.join("nested").join("b.png").exists());
        assert!(!input_dir.join(bundle::READY_MARKER).exists());
        assert!(!input_dir.join(bundle::PROCESSING_MARKER).exists());
    }

    #[test]
    fn test_start_and_stop_watch() {
        let (_dir, mut config) = watch_fixture();
        config.poll_interval = Duration::from_millis(20);

        let state = new_shared_watch_state();
        let registry = JobRegistry::new();
        start_watch(
            &state,
            config.clone(),
            registry.clone(),
            Arc::new(FixedEngine("text")),
        )
        .unwrap();

        let status = watch_status(&state);
        assert!(status.is_running);
        assert_eq!(
            status.inbox_root.as_deref(),
            Some(config.inbox_root.to_string_lossy().as_ref())
        );

        // Double-start is refused while running.
        let second = start_watch(
            &state,
            config.clone(),
            registry,
            Arc::new(FixedEngine("text")),
        );
        assert!(matches!(second, Err(WatchError::AlreadyRunning)));

        stop_watch(&state);
        assert!(!watch_status(&state).is_running);
    }

    #[test]
    fn test_start_watch_requires_existing_inbox() {
        let dir = tempfile::tempdir().unwrap();
        let config = WatchConfig::new(dir.path().join("missing"), dir.path().join("jobs"));

        let state = new_shared_watch_state();
        let result = start_watch(
            &state,
            config,
            JobRegistry::new(),
            Arc::new(FixedEngine("text")),
        );
        assert!(matches!(result, Err(WatchError::InboxMissing(_))));
    }
}
