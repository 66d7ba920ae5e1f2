//! Per-job-root run registry.
//!
//! Each job root is an independently lockable unit: at most one active
//! runner per root, while different roots may run concurrently. The registry
//! also owns each run's cancellation flag and start timestamp.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::RunError;

struct RunningJob {
    cancel: Arc<AtomicBool>,
    start_unix_timestamp_millis: i64,
}

#[derive(Clone, Default)]
pub struct JobRegistry {
    inner: Arc<Mutex<HashMap<PathBuf, RunningJob>>>,
}

fn now_unix_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as i64
}

/// Registry key: canonicalized when possible so `.` and an absolute path to
/// the same root collide as they should.
fn registry_key(job_root: &Path) -> PathBuf {
    job_root
        .canonicalize()
        .unwrap_or_else(|_| job_root.to_path_buf())
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the job root for a run, returning its cancellation flag.
    /// Refuses if a run is already active for the root.
    pub(crate) fn begin(&self, job_root: &Path) -> Result<Arc<AtomicBool>, RunError> {
        let mut inner = self.inner.lock().map_err(|_| RunError::LockPoisoned)?;
        let key = registry_key(job_root);
        if inner.contains_key(&key) {
            return Err(RunError::AlreadyRunning(job_root.to_path_buf()));
        }

        let cancel = Arc::new(AtomicBool::new(false));
        inner.insert(
            key,
            RunningJob {
                cancel: cancel.clone(),
                start_unix_timestamp_millis: now_unix_timestamp_millis(),
            },
        );
        Ok(cancel)
    }

    /// Releases the job root after a run concludes.
    pub(crate) fn finish(&self, job_root: &Path) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.remove(&registry_key(job_root));
        }
    }

    /// Sets the cancellation flag for an active run. Returns whether a run
    /// was active. The flag is only observed at task boundaries.
    pub fn cancel(&self, job_root: &Path) -> bool {
        let Ok(inner) = self.inner.lock() else {
            return false;
        };
        match inner.get(&registry_key(job_root)) {
            Some(job) => {
                job.cancel.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, job_root: &Path) -> bool {
        self.running_since_millis(job_root).is_some()
    }

    /// Start timestamp of the active run, if any.
    pub fn running_since_millis(&self, job_root: &Path) -> Option<i64> {
        let inner = self.inner.lock().ok()?;
        inner
            .get(&registry_key(job_root))
            .map(|job| job.start_unix_timestamp_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_claims_root_exclusively() {
        let registry = JobRegistry::new();
        let root = Path::new("/jobs/demo");

        let _cancel = registry.begin(root).unwrap();
        assert!(registry.is_running(root));

        let second = registry.begin(root);
        assert!(matches!(second, Err(RunError::AlreadyRunning(_))));
    }

    #[test]
    fn test_finish_releases_root() {
        let registry = JobRegistry::new();
        let root = Path::new("/jobs/demo");

        let _cancel = registry.begin(root).unwrap();
        registry.finish(root);
        assert!(!registry.is_running(root));

        // A new run can start afterwards.
        assert!(registry.begin(root).is_ok());
    }

    #[test]
    fn test_distinct_roots_run_concurrently() {
        let registry = JobRegistry::new();
        assert!(registry.begin(Path::new("/jobs/a")).is_ok());
        assert!(registry.begin(Path::new("/jobs/b")).is_ok());
    }

    #[test]
    fn test_cancel_sets_flag_for_active_run() {
        let registry = JobRegistry::new();
        let root = Path::new("/jobs/demo");

        let cancel = registry.begin(root).unwrap();
        assert!(!cancel.load(Ordering::SeqCst));

        assert!(registry.cancel(root));
        assert!(cancel.load(Ordering::SeqCst));
    }

    #[test]
    fn test_cancel_without_active_run() {
        let registry = JobRegistry::new();
        assert!(!registry.cancel(Path::new("/jobs/idle")));
    }

    #[test]
    fn test_relative_and_canonical_roots_collide() {
        let dir = tempfile::tempdir().unwrap();
        let registry = JobRegistry::new();

        let _cancel = registry.begin(dir.path()).unwrap();
        // A non-canonical spelling of the same directory is still the same job.
        let alias = dir.path().join(".");
        assert!(matches!(
            registry.begin(&alias),
            Err(RunError::AlreadyRunning(_))
        ));
    }
}
