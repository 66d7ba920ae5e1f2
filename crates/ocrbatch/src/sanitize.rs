//! Helpers for sanitizing paths and filenames.
//!
//! Span attributes only ever carry redacted paths, so traces stay safe to
//! share; copied-in filenames are stripped of separators so a hostile name
//! cannot escape the input directory.

use std::ffi::OsStr;
use std::path::Path;

/// Returns only the filename component of a path (no directory).
///
/// Safe for span fields — reveals file name without exposing the full path.
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Makes a filename safe to place inside a job's `input/` directory.
/// Separators and drive markers are replaced; an empty name gets a stable
/// fallback.
pub fn sanitize_filename(candidate: &OsStr) -> String {
    let name = candidate.to_string_lossy().to_string();
    if name.trim().is_empty() {
        return "input".to_string();
    }
    name.replace('\\', "_").replace('/', "_").replace(':', "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;

    #[test]
    fn test_redact_path_returns_filename() {
        assert_eq!(
            redact_path(Path::new("/home/user/Documents/scan.png")),
            "scan.png"
        );
    }

    #[test]
    fn test_redact_path_no_filename() {
        assert_eq!(redact_path(Path::new("/")), "<unknown>");
    }

    #[test]
    fn test_sanitize_filename_replaces_separators() {
        assert_eq!(
            sanitize_filename(&OsString::from("a/b\\c:d.png")),
            "a_b_c_d.png"
        );
    }

    #[test]
    fn test_sanitize_filename_empty_fallback() {
        assert_eq!(sanitize_filename(&OsString::from("  ")), "input");
    }

    #[test]
    fn test_sanitize_filename_plain_name_unchanged() {
        assert_eq!(sanitize_filename(&OsString::from("scan.png")), "scan.png");
    }
}
