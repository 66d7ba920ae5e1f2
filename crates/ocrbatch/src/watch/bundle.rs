//! Marker-file state machine for inbox bundles.
//!
//! A bundle's state is derived entirely by probing for marker files. The
//! probing goes through an injectable filesystem abstraction so the
//! invariants (monotonic transitions, at-most-one claim) are unit-testable
//! without real I/O.

use std::io;
use std::path::Path;

use crate::error::WatchError;

/// Producer signals the bundle copy is complete. Until this exists the
/// producer may still be copying files, so the bundle is ignored entirely.
pub const READY_MARKER: &str = ".ready";
/// Consumer claims exclusivity.
pub const PROCESSING_MARKER: &str = ".processing";
/// Terminal success.
pub const PROCESSED_MARKER: &str = ".processed";
/// Terminal failure; the file carries the error message.
pub const FAILED_MARKER: &str = ".failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleState {
    Unclaimed,
    Ready,
    Claimed,
    Processed,
    Failed,
}

/// Minimal filesystem surface the state machine needs.
pub trait MarkerFs: Send + Sync {
    fn exists(&self, path: &Path) -> bool;
    /// Creates the file if absent. `Ok(false)` means it already existed.
    fn create_exclusive(&self, path: &Path) -> io::Result<bool>;
    fn write(&self, path: &Path, contents: &str) -> io::Result<()>;
    fn remove(&self, path: &Path) -> io::Result<()>;
}

/// Production implementation over std::fs. Exclusive creation maps to
/// `create_new` (O_CREAT | O_EXCL), which is the sole concurrency-safety
/// mechanism between watcher instances.
pub struct RealMarkerFs;

impl MarkerFs for RealMarkerFs {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn create_exclusive(&self, path: &Path) -> io::Result<bool> {
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn write(&self, path: &Path, contents: &str) -> io::Result<()> {
        std::fs::write(path, contents)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }
}

/// Derives the bundle's state from its markers. Terminal markers take
/// precedence, so a bundle is never reconsidered once `.processed` or
/// `.failed` exists — even if `.ready` is still present.
pub fn bundle_state(fs: &dyn MarkerFs, bundle_dir: &Path) -> BundleState {
    if fs.exists(&bundle_dir.join(PROCESSED_MARKER)) {
        return BundleState::Processed;
    }
    if fs.exists(&bundle_dir.join(FAILED_MARKER)) {
        return BundleState::Failed;
    }
    if fs.exists(&bundle_dir.join(PROCESSING_MARKER)) {
        return BundleState::Claimed;
    }
    if fs.exists(&bundle_dir.join(READY_MARKER)) {
        return BundleState::Ready;
    }
    BundleState::Unclaimed
}

/// Attempts to claim the bundle by exclusively creating `.processing`.
/// `Ok(false)` is the expected race outcome: another watcher already owns it.
pub fn try_claim(fs: &dyn MarkerFs, bundle_dir: &Path) -> Result<bool, WatchError> {
    let marker = bundle_dir.join(PROCESSING_MARKER);
    fs.create_exclusive(&marker).map_err(|e| WatchError::Marker {
        path: marker.clone(),
        source: e,
    })
}

/// Replaces `.processing` with the terminal `.processed` marker.
pub fn mark_processed(fs: &dyn MarkerFs, bundle_dir: &Path) -> Result<(), WatchError> {
    let processed = bundle_dir.join(PROCESSED_MARKER);
    fs.write(&processed, "").map_err(|e| WatchError::Marker {
        path: processed.clone(),
        source: e,
    })?;

    let processing = bundle_dir.join(PROCESSING_MARKER);
    if fs.exists(&processing) {
        let _ = fs.remove(&processing);
    }
    Ok(())
}

/// Replaces `.processing` with the terminal `.failed` marker, writing the
/// failure message as the marker's content.
pub fn mark_failed(
    fs: &dyn MarkerFs,
    bundle_dir: &Path,
    error_message: &str,
) -> Result<(), WatchError> {
    let failed = bundle_dir.join(FAILED_MARKER);
    fs.write(&failed, error_message)
        .map_err(|e| WatchError::Marker {
            path: failed.clone(),
            source: e,
        })?;

    let processing = bundle_dir.join(PROCESSING_MARKER);
    if fs.exists(&processing) {
        let _ = fs.remove(&processing);
    }
    Ok(())
}
