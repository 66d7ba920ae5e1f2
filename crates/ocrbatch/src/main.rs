//! Thin command surface over the ocrbatch library: enqueue, run, status,
//! logs, reset and watch. A desktop front end drives the same library
//! operations; this binary exists for scripted and container use.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer as _};

use ocrbatch::config::{EngineSettings, RunOptions, ENV_ENGINE_COMMAND};
use ocrbatch::engine::CommandEngine;
use ocrbatch::error::{EngineError, OcrbatchError};
use ocrbatch::ingest::{DiscoveryReport, EnqueueOutcome};
use ocrbatch::ingest::{SUPPORTED_IMAGE_EXTENSIONS, SUPPORTED_PDF_EXTENSIONS};
use ocrbatch::job::{self, JobLayout, JobRegistry};
use ocrbatch::watch::{self, WatchConfig};

const EXIT_CODE_FAILURE: u8 = 1;
const EXIT_CODE_NOTHING_ENQUEUED: u8 = 2;

#[derive(Debug, Parser)]
#[clap(
    version,
    about = "Durable OCR batch queue: images and PDFs in, one ordered Markdown document out",
    after_help = r#"Environment Variables:
  - OCRBATCH_ENGINE_COMMAND: External OCR engine command line.
  - OCRBATCH_MARKDOWN_PROMPT, OCRBATCH_BASE_IMAGE_SIZE_PIXELS,
    OCRBATCH_INFERENCE_IMAGE_SIZE_PIXELS, OCRBATCH_ENABLE_CROP_MODE,
    OCRBATCH_PDF_RENDER_DPI, OCRBATCH_ENGINE_TIMEOUT_SECONDS:
    Engine invocation parameters.
"#
)]
struct Opts {
    #[clap(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Enqueue images, folders or PDFs into a job's queue.
    Enqueue {
        /// Input paths (files or folders).
        #[clap(required = true)]
        inputs: Vec<PathBuf>,
        #[clap(long, default_value = ".")]
        job_root: PathBuf,
    },
    /// Process pending tasks and write the merged Markdown document.
    Run {
        #[clap(long, default_value = ".")]
        job_root: PathBuf,
        /// Stop immediately when a task fails.
        #[clap(long)]
        fail_fast: bool,
        /// Engine command line; defaults to $OCRBATCH_ENGINE_COMMAND.
        #[clap(long)]
        engine_command: Option<String>,
    },
    /// Show the job's status snapshot as JSON.
    Status {
        #[clap(long, default_value = ".")]
        job_root: PathBuf,
    },
    /// Show the tail of the job's run log.
    Logs {
        #[clap(long, default_value = ".")]
        job_root: PathBuf,
        #[clap(long, default_value_t = 100)]
        lines: usize,
    },
    /// Delete all tasks and (optionally) output artifacts.
    Reset {
        #[clap(long, default_value = ".")]
        job_root: PathBuf,
        /// Also delete per-task fragments and the merged document.
        #[clap(long)]
        delete_outputs: bool,
        /// Confirm the destructive reset.
        #[clap(long)]
        yes: bool,
    },
    /// Watch an inbox for completed bundles and convert them into jobs.
    Watch {
        inbox_root: PathBuf,
        /// Where watch-created job roots go; defaults to ~/.ocrbatch/jobs.
        #[clap(long)]
        jobs_root: Option<PathBuf>,
        #[clap(long)]
        engine_command: Option<String>,
    },
}

fn main() -> ExitCode {
    init_tracing();

    match real_main() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(EXIT_CODE_FAILURE)
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(env_filter);
    tracing_subscriber::registry().with(subscriber).init();

    // Route `log` records from the library into tracing.
    let _ = tracing_log::LogTracer::init();
}

fn real_main() -> Result<ExitCode, OcrbatchError> {
    let opts = Opts::parse();

    match opts.cmd {
        Cmd::Enqueue { inputs, job_root } => {
            let layout = JobLayout::new(job_root);
            let outcome = job::enqueue(&layout, &inputs)?;
            print_discovery_report(outcome.report());

            match outcome {
                EnqueueOutcome::Enqueued { ref task_ids, .. } => {
                    println!("Enqueued {} task(s).", task_ids.len());
                    Ok(ExitCode::SUCCESS)
                }
                EnqueueOutcome::NothingEnqueued { .. } => {
                    println!("Nothing was enqueued. Check your input paths and file types.");
                    println!("{}", supported_file_types_help());
                    Ok(ExitCode::from(EXIT_CODE_NOTHING_ENQUEUED))
                }
            }
        }

        Cmd::Run {
            job_root,
            fail_fast,
            engine_command,
        } => {
            let layout = JobLayout::new(job_root);
            let engine = resolve_engine(engine_command)?;
            let options = RunOptions {
                settings: EngineSettings::from_environment(),
                fail_fast,
            };
            let registry = JobRegistry::new();

            let outcome = job::run_blocking(&registry, &layout, &engine, &options)?;
            match &outcome.merged {
                Some(summary) => println!(
                    "Processed {} task(s), failed {} task(s). Merged into {}",
                    outcome.processed,
                    outcome.failed,
                    summary.merged_path.display()
                ),
                None => println!(
                    "Processed {} task(s), failed {} task(s). Run stopped early; no merge.",
                    outcome.processed, outcome.failed
                ),
            }
            Ok(ExitCode::SUCCESS)
        }

        Cmd::Status { job_root } => {
            let layout = JobLayout::new(job_root);
            let status = job::job_status(&JobRegistry::new(), &layout)?;
            match serde_json::to_string_pretty(&status) {
                Ok(rendered) => println!("{rendered}"),
                Err(e) => eprintln!("Failed to render status: {e}"),
            }
            Ok(ExitCode::SUCCESS)
        }

        Cmd::Logs { job_root, lines } => {
            let layout = JobLayout::new(job_root);
            for line in job::logs(&layout, lines)? {
                println!("{line}");
            }
            Ok(ExitCode::SUCCESS)
        }

        Cmd::Reset {
            job_root,
            delete_outputs,
            yes,
        } => {
            if !yes {
                println!("Refusing to reset without --yes.");
                return Ok(ExitCode::from(EXIT_CODE_FAILURE));
            }

            let layout = JobLayout::new(job_root);
            let summary = job::reset(&layout, delete_outputs)?;
            println!("Deleted {} task(s) from queue.", summary.deleted_tasks);
            if summary.outputs_deleted {
                println!("Deleted output artifacts.");
            }
            Ok(ExitCode::SUCCESS)
        }

        Cmd::Watch {
            inbox_root,
            jobs_root,
            engine_command,
        } => {
            let jobs_root = jobs_root.or_else(watch::default_jobs_root).ok_or_else(|| {
                OcrbatchError::Engine(EngineError::Failed(
                    "No jobs root given and no home directory found".to_string(),
                ))
            })?;
            let engine = Arc::new(resolve_engine(engine_command)?);

            let mut config = WatchConfig::new(inbox_root, jobs_root);
            config.options.settings = EngineSettings::from_environment();

            let state = watch::new_shared_watch_state();
            let registry = JobRegistry::new();
            watch::start_watch(&state, config.clone(), registry, engine)?;
            println!(
                "Watching {} (jobs under {}). Press Ctrl-C to stop.",
                config.inbox_root.display(),
                config.jobs_root.display()
            );

            let state_for_handler = state.clone();
            if let Err(e) = ctrlc::set_handler(move || {
                watch::stop_watch(&state_for_handler);
            }) {
                tracing::warn!("Failed to install Ctrl-C handler: {e}");
            }

            while watch::watch_status(&state).is_running {
                std::thread::sleep(Duration::from_millis(500));
            }

            let status = watch::watch_status(&state);
            if let Some(message) = status.last_error_message {
                eprintln!("Watcher stopped; last error: {message}");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn resolve_engine(engine_command: Option<String>) -> Result<CommandEngine, OcrbatchError> {
    let command_line = engine_command
        .or_else(|| std::env::var(ENV_ENGINE_COMMAND).ok())
        .unwrap_or_default();

    CommandEngine::from_command_line(&command_line).ok_or_else(|| {
        OcrbatchError::Engine(EngineError::Failed(format!(
            "No engine command configured. Set {ENV_ENGINE_COMMAND} or pass --engine-command."
        )))
    })
}

fn print_discovery_report(report: &DiscoveryReport) {
    if !report.missing.is_empty() {
        println!("Missing input path(s):");
        print_paths(&report.missing);
    }
    if !report.unsupported_files.is_empty() {
        println!("Unsupported input file(s):");
        print_paths(&report.unsupported_files);
        println!("{}", supported_file_types_help());
    }
    if !report.empty_directories.is_empty() {
        println!("Directory contains no supported files:");
        print_paths(&report.empty_directories);
    }
    if !report.unknown.is_empty() {
        println!("Unknown input path type (not a file or directory):");
        print_paths(&report.unknown);
    }
}

fn print_paths(paths: &[PathBuf]) {
    for path in paths {
        println!("- {}", path.display());
    }
}

fn supported_file_types_help() -> String {
    format!(
        "Supported file types:\n- Images: {}\n- PDFs: {}",
        SUPPORTED_IMAGE_EXTENSIONS.join(", "),
        SUPPORTED_PDF_EXTENSIONS.join(", ")
    )
}
