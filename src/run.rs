//! Batch entry points: discover → rasterise → transcribe → write.
//!
//! Each input item moves through
//! `Discovered → Loaded → Rasterized (PDF) → TranscribedPerPage → Written → Done`
//! or ends `Failed`/`Partial`. A failure is logged with the item path (and
//! page number for PDFs), recorded in its [`ItemReport`], and the run moves
//! on. Only configuration and model-loading problems abort a run.

use crate::config::PipelineConfig;
use crate::engine::{Transcriber, TranscriptionEngine};
use crate::error::{ItemError, ScanError};
use crate::output::{InputItem, InputKind, ItemReport, ItemStatus, PageResult, RunSummary};
use crate::pipeline::discover::{discover_inputs, DiscoveredInputs};
use crate::pipeline::postprocess::preview;
use crate::pipeline::render::{load_image, PdfiumRasterizer, Rasterizer};
use crate::pipeline::write::OutputWriter;
use crate::progress::{NoopProgressCallback, ProgressCallback};
use futures::stream::{self, StreamExt};
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Transcribe every supported file in `config.input_dir`.
///
/// Loads the model (unless `config.transcriber` is set) and PDFium (only
/// when PDFs were found and `config.rasterizer` is unset), then processes
/// every item.
///
/// # Returns
/// `Ok(RunSummary)` whenever the run got as far as processing, even if every
/// item failed; inspect `summary.failed`.
///
/// # Errors
/// Fatal problems only: missing input directory, invalid configuration,
/// model or PDFium that cannot be loaded, output directory that cannot be
/// created.
pub async fn run(config: &PipelineConfig) -> Result<RunSummary, ScanError> {
    // ── Step 1: Discover inputs ──────────────────────────────────────────
    let inputs = discover_inputs(&config.input_dir)?;
    info!(
        "Found {} image(s) and {} PDF(s) in {}",
        inputs.images.len(),
        inputs.pdfs.len(),
        config.input_dir.display()
    );

    if inputs.is_empty() {
        warn!("Nothing to do: no images or PDFs in {}", config.input_dir.display());
        return execute(config, inputs, None, None).await;
    }

    // ── Step 2: Load the model ───────────────────────────────────────────
    let transcriber = match &config.transcriber {
        Some(t) => Arc::clone(t),
        None => {
            let model = config.model.clone();
            let device = config.device;
            let engine = tokio::task::spawn_blocking(move || {
                TranscriptionEngine::load(&model, device)
            })
            .await
            .map_err(|e| ScanError::Internal(format!("Model load task panicked: {}", e)))??;
            Arc::new(engine) as Arc<dyn Transcriber>
        }
    };

    // ── Step 3: Bind PDFium (only if needed) ─────────────────────────────
    let rasterizer = match (&config.rasterizer, inputs.pdfs.is_empty()) {
        (Some(r), _) => Some(Arc::clone(r)),
        (None, true) => None,
        (None, false) => {
            let location = config.pdfium_path.clone();
            let max_pixels = config.max_rendered_pixels;
            let r = tokio::task::spawn_blocking(move || {
                PdfiumRasterizer::new(location.as_deref(), max_pixels)
            })
            .await
            .map_err(|e| ScanError::Internal(format!("PDFium setup task panicked: {}", e)))??;
            Some(Arc::new(r) as Arc<dyn Rasterizer>)
        }
    };

    // ── Step 4: Process ──────────────────────────────────────────────────
    execute(config, inputs, Some(transcriber), rasterizer).await
}

/// [`run`] with caller-supplied components.
///
/// `rasterizer` may be `None` when the input directory is known to hold no
/// PDFs; any PDF found then fails as a rasterisation error.
pub async fn run_with(
    config: &PipelineConfig,
    transcriber: Arc<dyn Transcriber>,
    rasterizer: Option<Arc<dyn Rasterizer>>,
) -> Result<RunSummary, ScanError> {
    let inputs = discover_inputs(&config.input_dir)?;
    execute(config, inputs, Some(transcriber), rasterizer).await
}

/// Synchronous wrapper around [`run`].
///
/// Creates a temporary tokio runtime internally.
pub fn run_sync(config: &PipelineConfig) -> Result<RunSummary, ScanError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ScanError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(run(config))
}

/// Everything a worker needs for one item.
struct Context {
    transcriber: Option<Arc<dyn Transcriber>>,
    rasterizer: Option<Arc<dyn Rasterizer>>,
    writer: OutputWriter,
    progress: ProgressCallback,
}

async fn execute(
    config: &PipelineConfig,
    inputs: DiscoveredInputs,
    transcriber: Option<Arc<dyn Transcriber>>,
    rasterizer: Option<Arc<dyn Rasterizer>>,
) -> Result<RunSummary, ScanError> {
    let start = Instant::now();

    // Created up front so even an empty run leaves the directory behind.
    std::fs::create_dir_all(&config.output_dir).map_err(|source| {
        ScanError::OutputDirUnwritable {
            path: config.output_dir.clone(),
            source,
        }
    })?;
    let (images_found, pdfs_found) = (inputs.images.len(), inputs.pdfs.len());

    let ctx = Arc::new(Context {
        transcriber,
        rasterizer,
        writer: OutputWriter::new(&config.output_dir),
        progress: config
            .progress_callback
            .clone()
            .unwrap_or_else(|| Arc::new(NoopProgressCallback)),
    });

    ctx.progress.on_run_start(images_found, pdfs_found);

    // buffer_unordered(1) is strictly sequential: the next item's future is
    // not polled until the previous one has finished.
    let reports: Vec<ItemReport> = stream::iter(inputs.into_items().into_iter().map(|item| {
        let ctx = Arc::clone(&ctx);
        async move {
            let report = process_item(&ctx, item).await;
            ctx.progress.on_item_complete(&report);
            report
        }
    }))
    .buffer_unordered(config.concurrency.max(1))
    .collect()
    .await;

    let summary = RunSummary::from_items(
        config.output_dir.clone(),
        reports,
        images_found,
        pdfs_found,
        start.elapsed().as_millis() as u64,
    );

    info!(
        "Run complete: {} done, {} partial, {} failed, {} page file(s) in {}ms",
        summary.succeeded,
        summary.partial,
        summary.failed,
        summary.pages_written,
        summary.total_duration_ms
    );
    ctx.progress.on_run_complete(&summary);
    Ok(summary)
}

async fn process_item(ctx: &Arc<Context>, item: InputItem) -> ItemReport {
    let start = Instant::now();
    let mut report = match item.kind {
        InputKind::Image => process_image(ctx, &item).await,
        InputKind::Pdf => process_pdf(ctx, &item).await,
    };
    report.duration_ms = start.elapsed().as_millis() as u64;

    // An image's single page has already logged its own failure.
    let logged_by_page = item.kind == InputKind::Image && !report.pages.is_empty();
    match (&report.status, &report.error) {
        (ItemStatus::Done, _) => debug!("{}: done", item.path.display()),
        _ if logged_by_page => {}
        (_, Some(e)) => error!("{}", e),
        (_, None) => error!("{}: failed", item.path.display()),
    }
    report
}

// ── Images ───────────────────────────────────────────────────────────────────

async fn process_image(ctx: &Arc<Context>, item: &InputItem) -> ItemReport {
    info!("Processing image {}", item.path.display());
    ctx.progress.on_item_start(item, 1);

    let Some(transcriber) = ctx.transcriber.clone() else {
        return failed(item, missing_component(item, "transcriber"));
    };

    let worker_ctx = Arc::clone(ctx);
    let path = item.path.clone();
    let base = item.base_name();
    let joined = tokio::task::spawn_blocking(move || -> Result<PageResult, ItemError> {
        let image = load_image(&path)?;
        Ok(transcribe_page(
            transcriber.as_ref(),
            &worker_ctx.writer,
            &path,
            &base,
            None,
            &image,
        ))
    })
    .await;

    let page = match joined {
        Ok(Ok(page)) => page,
        Ok(Err(e)) => return failed(item, e),
        Err(e) => return failed(item, worker_error(item, e)),
    };

    report_page(ctx, &item.path, &page);
    let status = if page.succeeded() {
        ItemStatus::Done
    } else {
        ItemStatus::Failed
    };
    let error = page.error.clone();

    ItemReport {
        input: item.path.clone(),
        kind: item.kind,
        status,
        pages: vec![page],
        combined_path: None,
        error,
        duration_ms: 0,
    }
}

// ── PDFs ─────────────────────────────────────────────────────────────────────

async fn process_pdf(ctx: &Arc<Context>, item: &InputItem) -> ItemReport {
    info!("Processing PDF {}", item.path.display());

    let (Some(transcriber), Some(rasterizer)) = (ctx.transcriber.clone(), ctx.rasterizer.clone())
    else {
        let missing = if ctx.transcriber.is_none() {
            "transcriber"
        } else {
            "rasterizer"
        };
        return failed(item, missing_component(item, missing));
    };

    // Rasterise the whole document first; nothing is written on failure.
    let path = item.path.clone();
    let rendered =
        tokio::task::spawn_blocking(move || rasterizer.rasterize(&path)).await;
    let images = match rendered {
        Ok(Ok(images)) => images,
        Ok(Err(e)) => {
            return failed(
                item,
                ItemError::Rasterization {
                    path: item.path.clone(),
                    detail: e.to_string(),
                },
            )
        }
        Err(e) => return failed(item, worker_error(item, e)),
    };

    let total = images.len();
    info!("{}: {} page(s)", item.path.display(), total);
    ctx.progress.on_item_start(item, total);

    let base = item.base_name();
    let mut pages = Vec::with_capacity(total);

    // Pages strictly in order; each page is written before the next starts.
    for (idx, image) in images.into_iter().enumerate() {
        let page_index = idx + 1;
        let worker_ctx = Arc::clone(ctx);
        let transcriber = Arc::clone(&transcriber);
        let path = item.path.clone();
        let page_base = base.clone();

        let page = tokio::task::spawn_blocking(move || {
            transcribe_page(
                transcriber.as_ref(),
                &worker_ctx.writer,
                &path,
                &page_base,
                Some(page_index),
                &image,
            )
        })
        .await
        .unwrap_or_else(|e| PageResult {
            page_index: Some(page_index),
            text: String::new(),
            output_path: None,
            duration_ms: 0,
            error: Some(worker_error(item, e)),
        });

        report_page(ctx, &item.path, &page);
        pages.push(page);
    }

    let failed_pages = pages.iter().filter(|p| !p.succeeded()).count();

    // ── Combined artifact, only when every page made it ──
    let (status, combined_path, error) = if failed_pages == 0 {
        let texts: Vec<&str> = pages.iter().map(|p| p.text.as_str()).collect();
        match ctx.writer.write_combined(&base, &texts) {
            Ok(p) => {
                info!("{}: wrote {}", item.path.display(), p.display());
                (ItemStatus::Done, Some(p), None)
            }
            Err(e) => (ItemStatus::Partial, None, Some(e)),
        }
    } else {
        let status = if failed_pages == total {
            ItemStatus::Failed
        } else {
            ItemStatus::Partial
        };
        warn!(
            "{}: {}/{} page(s) failed; skipping {}",
            item.path.display(),
            failed_pages,
            total,
            ctx.writer.combined_path(&base).display()
        );
        let error = ItemError::PartialDocument {
            path: item.path.clone(),
            failed: failed_pages,
            total,
        };
        (status, None, Some(error))
    };

    ItemReport {
        input: item.path.clone(),
        kind: item.kind,
        status,
        pages,
        combined_path,
        error,
        duration_ms: 0,
    }
}

// ── Shared helpers ───────────────────────────────────────────────────────────

/// Transcribe one page and write its artifact. Blocking.
fn transcribe_page(
    transcriber: &dyn Transcriber,
    writer: &OutputWriter,
    input: &Path,
    base: &str,
    page_index: Option<usize>,
    image: &RgbImage,
) -> PageResult {
    let start = Instant::now();
    let outcome = transcriber
        .transcribe(image)
        .map_err(|e| ItemError::Transcription {
            path: input.to_path_buf(),
            page: page_index,
            detail: e.to_string(),
        })
        .and_then(|text| {
            let written = writer.write_page(base, page_index, &text)?;
            Ok((text, written))
        });

    let duration_ms = start.elapsed().as_millis() as u64;
    match outcome {
        Ok((text, written)) => {
            debug!("Wrote {} in {}ms", written.display(), duration_ms);
            PageResult {
                page_index,
                text,
                output_path: Some(written),
                duration_ms,
                error: None,
            }
        }
        Err(e) => PageResult {
            page_index,
            text: String::new(),
            output_path: None,
            duration_ms,
            error: Some(e),
        },
    }
}

fn report_page(ctx: &Context, input: &Path, page: &PageResult) {
    match &page.error {
        None => {
            let shown = preview(&page.text);
            info!("Extracted text: {}...", shown);
            ctx.progress.on_page_complete(input, page.page_index, shown);
        }
        Some(e) => {
            error!("{}", e);
            ctx.progress.on_page_error(input, page.page_index, &e.to_string());
        }
    }
}

fn failed(item: &InputItem, error: ItemError) -> ItemReport {
    ItemReport {
        input: item.path.clone(),
        kind: item.kind,
        status: ItemStatus::Failed,
        pages: Vec::new(),
        combined_path: None,
        error: Some(error),
        duration_ms: 0,
    }
}

fn worker_error(item: &InputItem, e: tokio::task::JoinError) -> ItemError {
    ItemError::Worker {
        path: item.path.clone(),
        detail: e.to_string(),
    }
}

fn missing_component(item: &InputItem, what: &str) -> ItemError {
    let path: PathBuf = item.path.clone();
    match item.kind {
        InputKind::Pdf => ItemError::Rasterization {
            path,
            detail: format!("no {what} configured"),
        },
        InputKind::Image => ItemError::Transcription {
            path,
            page: None,
            detail: format!("no {what} configured"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    struct Echo;

    impl Transcriber for Echo {
        fn transcribe(&self, image: &RgbImage) -> Result<String, EngineError> {
            Ok(format!("{}x{}", image.width(), image.height()))
        }
    }

    fn config(input: &Path, output: &Path) -> PipelineConfig {
        PipelineConfig::builder()
            .input_dir(input)
            .output_dir(output)
            .build()
            .unwrap()
    }

    #[test]
    fn empty_directory_creates_only_the_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let summary =
            tokio_test::block_on(run_with(&config(dir.path(), &out), Arc::new(Echo), None))
                .unwrap();
        assert!(summary.items.is_empty());
        assert!(out.is_dir());
        assert_eq!(std::fs::read_dir(&out).unwrap().count(), 0);
    }

    #[test]
    fn pdf_without_rasterizer_fails_alone() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        std::fs::write(dir.path().join("doc.pdf"), b"%PDF-1.4\n").unwrap();
        image::RgbImage::new(3, 2)
            .save(dir.path().join("rx.png"))
            .unwrap();

        let summary =
            tokio_test::block_on(run_with(&config(dir.path(), &out), Arc::new(Echo), None))
                .unwrap();
        assert_eq!((summary.succeeded, summary.failed), (1, 1));
        assert_eq!(std::fs::read_to_string(out.join("rx.txt")).unwrap(), "3x2");
        assert!(matches!(
            summary.items[1].error,
            Some(ItemError::Rasterization { .. })
        ));
    }

    struct Refuse;

    impl Transcriber for Refuse {
        fn transcribe(&self, _image: &RgbImage) -> Result<String, EngineError> {
            Err(EngineError::Inference {
                stage: "decoder",
                detail: "out of memory".into(),
            })
        }
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_image_is_logged_once() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        image::RgbImage::new(3, 2)
            .save(dir.path().join("rx.png"))
            .unwrap();

        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .with_writer(move || writer.clone())
            .finish();

        let summary = tracing::subscriber::with_default(subscriber, || {
            tokio_test::block_on(run_with(&config(dir.path(), &out), Arc::new(Refuse), None))
        })
        .unwrap();
        assert_eq!(summary.failed, 1);

        let text = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert_eq!(text.matches("transcription failed").count(), 1, "{text}");
        assert!(text.contains("ERROR"), "{text}");
    }

    #[test]
    fn run_sync_reports_missing_input_dir() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_sync(&config(&dir.path().join("missing"), &dir.path().join("out")))
            .unwrap_err();
        assert!(matches!(err, ScanError::InputDirNotFound { .. }));
    }
}
