//! Engine settings and run options.
//!
//! Settings are resolved from `OCRBATCH_*` environment variables with named
//! defaults, so runs stay reproducible without a config file.

use std::env;
use std::time::Duration;

/// Prompt sent to the engine for Markdown conversion.
pub const DEFAULT_MARKDOWN_PROMPT: &str = "<image>\n<|grounding|>Convert the document to markdown. ";

// Model-card suggested sizes.
pub const DEFAULT_BASE_IMAGE_SIZE_PIXELS: u32 = 1024;
pub const DEFAULT_INFERENCE_IMAGE_SIZE_PIXELS: u32 = 768;
pub const DEFAULT_ENABLE_CROP_MODE: bool = true;

pub const DEFAULT_PDF_RENDER_DPI: u32 = 200;

/// Hard per-task timeout for engine invocations. Distinct from cooperative
/// job cancellation, which is only checked between tasks.
pub const DEFAULT_ENGINE_TIMEOUT_SECONDS: u64 = 600;

const ENV_MARKDOWN_PROMPT: &str = "OCRBATCH_MARKDOWN_PROMPT";
const ENV_BASE_IMAGE_SIZE: &str = "OCRBATCH_BASE_IMAGE_SIZE_PIXELS";
const ENV_INFERENCE_IMAGE_SIZE: &str = "OCRBATCH_INFERENCE_IMAGE_SIZE_PIXELS";
const ENV_ENABLE_CROP_MODE: &str = "OCRBATCH_ENABLE_CROP_MODE";
const ENV_PDF_RENDER_DPI: &str = "OCRBATCH_PDF_RENDER_DPI";
const ENV_ENGINE_TIMEOUT: &str = "OCRBATCH_ENGINE_TIMEOUT_SECONDS";

/// Environment variable naming the external engine command line.
pub const ENV_ENGINE_COMMAND: &str = "OCRBATCH_ENGINE_COMMAND";

/// Per-run engine parameters passed along with every task.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub markdown_prompt: String,
    pub base_image_size_pixels: u32,
    pub inference_image_size_pixels: u32,
    pub enable_crop_mode: bool,
    pub render_dpi: u32,
    pub timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            markdown_prompt: DEFAULT_MARKDOWN_PROMPT.to_string(),
            base_image_size_pixels: DEFAULT_BASE_IMAGE_SIZE_PIXELS,
            inference_image_size_pixels: DEFAULT_INFERENCE_IMAGE_SIZE_PIXELS,
            enable_crop_mode: DEFAULT_ENABLE_CROP_MODE,
            render_dpi: DEFAULT_PDF_RENDER_DPI,
            timeout: Duration::from_secs(DEFAULT_ENGINE_TIMEOUT_SECONDS),
        }
    }
}

impl EngineSettings {
    pub fn from_environment() -> Self {
        Self {
            markdown_prompt: env::var(ENV_MARKDOWN_PROMPT)
                .unwrap_or_else(|_| DEFAULT_MARKDOWN_PROMPT.to_string()),
            base_image_size_pixels: env_u32(ENV_BASE_IMAGE_SIZE, DEFAULT_BASE_IMAGE_SIZE_PIXELS),
            inference_image_size_pixels: env_u32(
                ENV_INFERENCE_IMAGE_SIZE,
                DEFAULT_INFERENCE_IMAGE_SIZE_PIXELS,
            ),
            enable_crop_mode: env_bool(ENV_ENABLE_CROP_MODE, DEFAULT_ENABLE_CROP_MODE),
            render_dpi: env_u32(ENV_PDF_RENDER_DPI, DEFAULT_PDF_RENDER_DPI),
            timeout: Duration::from_secs(env_u64(
                ENV_ENGINE_TIMEOUT,
                DEFAULT_ENGINE_TIMEOUT_SECONDS,
            )),
        }
    }
}

/// Options for a single run of the pipeline runner.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub settings: EngineSettings,
    /// Stop the loop after the first task failure instead of continuing.
    pub fail_fast: bool,
}

fn env_u32(name: &str, default: u32) -> u32 {
    match env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                log::warn!("Ignoring invalid {name}='{raw}', using {default}");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    match env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                log::warn!("Ignoring invalid {name}='{raw}', using {default}");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(raw) => parse_bool(&raw),
        Err(_) => default,
    }
}

fn parse_bool(raw: &str) -> bool {
    !matches!(raw.trim(), "0" | "false" | "False" | "no" | "off")
}
