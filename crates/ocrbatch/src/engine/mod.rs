//! OCR engine boundary.
//!
//! The engine itself (model loading, tokenization, GPU execution) is an
//! external collaborator. This module owns only the calling convention:
//! one image in, Markdown text out, bounded in time. The accelerator behind
//! the engine cannot be shared, so callers invoke it strictly one task at a
//! time.

use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::config::EngineSettings;
use crate::error::EngineError;

/// How often a running engine process is polled for completion.
const ENGINE_POLL_INTERVAL_MILLIS: u64 = 100;

/// Parameters for a single engine invocation.
#[derive(Debug, Clone)]
pub struct RecognizeRequest<'a> {
    pub prompt: &'a str,
    pub base_image_size_pixels: u32,
    pub inference_image_size_pixels: u32,
    pub enable_crop_mode: bool,
    pub timeout: Duration,
}

impl<'a> RecognizeRequest<'a> {
    pub fn from_settings(settings: &'a EngineSettings) -> Self {
        Self {
            prompt: &settings.markdown_prompt,
            base_image_size_pixels: settings.base_image_size_pixels,
            inference_image_size_pixels: settings.inference_image_size_pixels,
            enable_crop_mode: settings.enable_crop_mode,
            timeout: settings.timeout,
        }
    }
}

/// The OCR collaborator interface: given an image and run parameters, return
/// extracted Markdown or fail within the request's timeout.
pub trait OcrEngine: Send + Sync {
    fn recognize(
        &self,
        image_path: &Path,
        request: &RecognizeRequest<'_>,
    ) -> Result<String, EngineError>;
}

/// Engine adapter that invokes a configured external command.
///
/// The image path is appended as the final argument; request parameters are
/// exported through `OCRBATCH_*` environment variables. The command's stdout
/// is the Markdown result. The child is killed once the timeout elapses.
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
}

impl CommandEngine {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Builds an engine from a whitespace-separated command line, e.g. the
    /// value of `OCRBATCH_ENGINE_COMMAND`. Returns `None` for a blank value.
    pub fn from_command_line(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace();
        let program = parts.next()?.to_string();
        let args = parts.map(str::to_string).collect();
        Some(Self { program, args })
    }
}

impl OcrEngine for CommandEngine {
    fn recognize(
        &self,
        image_path: &Path,
        request: &RecognizeRequest<'_>,
    ) -> Result<String, EngineError> {
        if !image_path.exists() {
            return Err(EngineError::Io {
                path: image_path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "image not found"),
            });
        }

        // Redirect stdout/stderr to temp files instead of pipes so a large
        // result cannot deadlock the poll loop on a full pipe buffer.
        let capture_id = uuid::Uuid::new_v4();
        let stdout_path = std::env::temp_dir().join(format!("ocrbatch_stdout_{capture_id}"));
        let stderr_path = std::env::temp_dir().join(format!("ocrbatch_stderr_{capture_id}"));
        let stdout_file = std::fs::File::create(&stdout_path).map_err(spawn_error)?;
        let stderr_file = std::fs::File::create(&stderr_path).map_err(spawn_error)?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(image_path)
            .env("OCRBATCH_MARKDOWN_PROMPT", request.prompt)
            .env(
                "OCRBATCH_BASE_IMAGE_SIZE_PIXELS",
                request.base_image_size_pixels.to_string(),
            )
            .env(
                "OCRBATCH_INFERENCE_IMAGE_SIZE_PIXELS",
                request.inference_image_size_pixels.to_string(),
            )
            .env(
                "OCRBATCH_ENABLE_CROP_MODE",
                if request.enable_crop_mode { "1" } else { "0" },
            )
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout_file))
            .stderr(Stdio::from(stderr_file))
            .spawn()
            .map_err(|e| EngineError::Failed(format!("Failed to start engine command: {e}")))?;

        let deadline = Instant::now() + request.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        cleanup_captures(&stdout_path, &stderr_path);
                        return Err(EngineError::Timeout(request.timeout));
                    }
                    std::thread::sleep(Duration::from_millis(ENGINE_POLL_INTERVAL_MILLIS));
                }
                Err(e) => {
                    cleanup_captures(&stdout_path, &stderr_path);
                    return Err(EngineError::Failed(format!(
                        "Failed to wait for engine command: {e}"
                    )));
                }
            }
        };

        let stdout_bytes = read_capture(&stdout_path);
        let stderr_bytes = read_capture(&stderr_path);
        cleanup_captures(&stdout_path, &stderr_path);

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr_bytes);
            return Err(EngineError::Failed(format!(
                "Engine command exited with {status}: {}",
                stderr.trim()
            )));
        }

        String::from_utf8(stdout_bytes)
            .map_err(|_| EngineError::MalformedOutput("engine output is not UTF-8".to_string()))
    }
}

fn spawn_error(e: std::io::Error) -> EngineError {
    EngineError::Failed(format!("Failed to prepare engine output capture: {e}"))
}

fn read_capture(path: &Path) -> Vec<u8> {
    let mut bytes = Vec::new();
    if let Ok(mut file) = std::fs::File::open(path) {
        let _ = file.read_to_end(&mut bytes);
    }
    bytes
}

fn cleanup_captures(stdout_path: &Path, stderr_path: &Path) {
    let _ = std::fs::remove_file(stdout_path);
    let _ = std::fs::remove_file(stderr_path);
}
