//! CLI binary for scanscribe.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `PipelineConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use scanscribe::{
    discover_inputs, run, DevicePreference, InputItem, ItemReport, ItemStatus, ModelSource,
    PipelineConfig, ProgressCallback, RunProgressCallback, RunSummary,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn page_label(page: Option<usize>) -> String {
    page.map(|p| format!("page {p}")).unwrap_or_default()
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar over input items, one log line per
/// page. Works when items complete out of order (`--concurrency > 1`).
struct CliProgressCallback {
    bar: ProgressBar,
    page_errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_run_start` reports how many items there are.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);

        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Loading model…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            page_errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} files  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Transcribing");
        self.bar.reset_eta();
    }
}

impl RunProgressCallback for CliProgressCallback {
    fn on_run_start(&self, images: usize, pdfs: usize) {
        self.activate_bar(images + pdfs);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Found {images} image(s) and {pdfs} PDF(s)"))
        ));
    }

    fn on_item_start(&self, item: &InputItem, pages: usize) {
        let suffix = if pages > 1 {
            format!(" ({pages} pages)")
        } else {
            String::new()
        };
        self.bar.set_message(format!("{}{}", file_name(&item.path), suffix));
    }

    fn on_page_complete(&self, input: &Path, page: Option<usize>, preview: &str) {
        let one_line = preview.replace('\n', " ");
        self.bar.println(format!(
            "  {} {} {}  {}",
            green("✓"),
            file_name(input),
            dim(&page_label(page)),
            dim(&format!("{one_line}…")),
        ));
    }

    fn on_page_error(&self, input: &Path, page: Option<usize>, error: &str) {
        self.page_errors.fetch_add(1, Ordering::SeqCst);

        // Truncate very long error messages to keep output tidy.
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} {} {}  {}",
            red("✗"),
            file_name(input),
            dim(&page_label(page)),
            red(&msg),
        ));
    }

    fn on_item_complete(&self, report: &ItemReport) {
        match report.status {
            ItemStatus::Done => {}
            // Page-level failures were already printed; show item-level ones.
            ItemStatus::Partial | ItemStatus::Failed if report.pages.is_empty() => {
                if let Some(e) = &report.error {
                    self.bar.println(format!("  {} {}", red("✗"), red(&e.to_string())));
                }
            }
            ItemStatus::Partial | ItemStatus::Failed => {}
        }
        self.bar.inc(1);
    }

    fn on_run_complete(&self, summary: &RunSummary) {
        self.bar.finish_and_clear();
        let total = summary.items.len();

        if summary.failed == 0 && summary.partial == 0 {
            eprintln!(
                "{} {} file(s) transcribed, {} page file(s) written",
                green("✔"),
                bold(&summary.succeeded.to_string()),
                summary.pages_written
            );
        } else {
            eprintln!(
                "{} {}/{} file(s) transcribed  ({} partial, {} failed)",
                if summary.succeeded == 0 {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&summary.succeeded.to_string()),
                total,
                summary.partial,
                red(&summary.failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Transcribe everything in ./input/val/images into ./output
  scanscribe

  # Other folders
  scanscribe --input-dir scans/ --output-dir transcripts/

  # A local model export instead of the hub
  scanscribe --model ./models/prescription-ocr

  # Force CPU, two files at a time
  scanscribe --device cpu --concurrency 2

  # Machine-readable report
  scanscribe --json > report.json

OUTPUT LAYOUT:
  rx1.png       →  rx1.txt
  script.pdf    →  script_page1.txt, script_page2.txt, …, script_complete.txt

  script_complete.txt holds every page under a "--- Page N ---" header and is
  only written when every page of the PDF succeeded.

MODEL FILES:
  encoder_model.onnx, decoder_model.onnx (at the root or under onnx/),
  tokenizer.json, preprocessor_config.json, config.json

ENVIRONMENT VARIABLES:
  SCANSCRIBE_CACHE_DIR    Where downloaded models and PDFium are kept
  HF_ENDPOINT             Alternative model hub base URL
  HF_TOKEN                Token for gated or private model repositories
  PDFIUM_LIB_PATH         Path to an existing libpdfium — skips auto-download
  RUST_LOG                Log filter (overrides -v / -q)

SETUP:
  The model (~hundreds of MB) and PDFium (~30 MB) are downloaded on first
  run and cached. Later runs work offline.
"#;

/// Transcribe scanned images and PDFs to plain text.
#[derive(Parser, Debug)]
#[command(
    name = "scanscribe",
    version,
    about = "Transcribe scanned images and PDFs to plain text with a pretrained OCR model",
    long_about = "Transcribe every image (jpg, jpeg, png) and PDF in a folder to plain-text \
files using a pretrained image-to-sequence transcription model. One text file per image, \
one per PDF page, and a combined file per PDF.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Folder with the images and PDFs to transcribe (not searched recursively).
    #[arg(long, env = "SCANSCRIBE_INPUT_DIR", default_value = scanscribe::config::DEFAULT_INPUT_DIR)]
    input_dir: PathBuf,

    /// Folder receiving the .txt files. Created if missing.
    #[arg(long, env = "SCANSCRIBE_OUTPUT_DIR", default_value = scanscribe::config::DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,

    /// Model repository id (owner/name) or local model directory.
    #[arg(long, env = "SCANSCRIBE_MODEL", default_value = scanscribe::engine::DEFAULT_MODEL_ID)]
    model: String,

    /// Model repository revision (branch, tag or commit).
    #[arg(long, env = "SCANSCRIBE_MODEL_REVISION", default_value = "main")]
    revision: String,

    /// Subfolder holding the ONNX graphs. Default: root, then onnx/.
    #[arg(long, env = "SCANSCRIBE_ONNX_SUBFOLDER")]
    onnx_subfolder: Option<String>,

    /// Execution device: auto, cpu, cuda.
    #[arg(long, env = "SCANSCRIBE_DEVICE", default_value = "auto")]
    device: DevicePreference,

    /// Path to libpdfium (file or directory). Default: cached download.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_path: Option<PathBuf>,

    /// Longest edge of a rendered PDF page, in pixels.
    #[arg(long, env = "SCANSCRIBE_MAX_PIXELS", default_value_t = 2000,
          value_parser = clap::value_parser!(u32).range(100..=10000))]
    max_rendered_pixels: u32,

    /// Number of files processed at once.
    #[arg(short, long, env = "SCANSCRIBE_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// Print the run summary as JSON on stdout.
    #[arg(long, env = "SCANSCRIBE_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "SCANSCRIBE_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "SCANSCRIBE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "SCANSCRIBE_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Fetch PDFium up front when PDFs are waiting ──────────────────────
    // Downloading here gives the download its own progress bar; the path is
    // memoised, so the pipeline's own lookup is instant afterwards.
    let inputs = discover_inputs(&cli.input_dir).context("Cannot read input directory")?;
    if !inputs.pdfs.is_empty() && cli.pdfium_path.is_none() && !artifact_cache::pdfium::is_cached()
    {
        if show_progress {
            let dl_bar = ProgressBar::new(0);
            dl_bar.set_style(
                ProgressStyle::with_template(
                    "{spinner:.cyan} {prefix:.bold}  \
                     [{bar:42.green/238}] {bytes}/{total_bytes}  ETA {eta_precise}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▉▊▋▌▍▎▏  ")
                .tick_strings(TICKS),
            );
            dl_bar.set_prefix("PDF engine");
            dl_bar.enable_steady_tick(Duration::from_millis(80));

            let bar = dl_bar.clone();
            tokio::task::block_in_place(|| {
                artifact_cache::pdfium::resolve_library(
                    None,
                    Some(&|downloaded, total| {
                        if let Some(t) = total {
                            if bar.length().unwrap_or(0) != t {
                                bar.set_length(t);
                            }
                        }
                        bar.set_position(downloaded);
                    }),
                )
            })
            .context("Failed to download PDFium engine")?;

            dl_bar.finish_with_message("ready ✓");
        } else {
            tokio::task::block_in_place(|| artifact_cache::pdfium::resolve_library(None, None))
                .context("Failed to download PDFium engine")?;
        }
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new_dynamic() as Arc<dyn RunProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb)?;

    // ── Run ──────────────────────────────────────────────────────────────
    let summary = run(&config).await.context("Transcription run failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?;
        println!("{json}");
    } else if !cli.quiet {
        if !show_progress {
            eprintln!(
                "{} done, {} partial, {} failed  ({} page file(s), {}ms)",
                summary.succeeded,
                summary.partial,
                summary.failed,
                summary.pages_written,
                summary.total_duration_ms
            );
        }
        eprintln!(
            "Processing complete! Results are saved in '{}'",
            bold(&summary.output_dir.display().to_string())
        );
    }

    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut model = ModelSource::new(&cli.model).with_revision(&cli.revision);
    if let Some(ref sub) = cli.onnx_subfolder {
        model = model.with_onnx_subfolder(sub);
    }

    let mut builder = PipelineConfig::builder()
        .input_dir(&cli.input_dir)
        .output_dir(&cli.output_dir)
        .model(model)
        .device(cli.device)
        .max_rendered_pixels(cli.max_rendered_pixels)
        .concurrency(cli.concurrency);

    if let Some(ref path) = cli.pdfium_path {
        builder = builder.pdfium_path(path);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
