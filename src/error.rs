//! Error types for the scanscribe library.
//!
//! Two levels of failure, mirroring the pipeline's isolation boundary:
//!
//! * [`ScanError`] — **Fatal**: the run cannot start (missing input
//!   directory, invalid configuration, model cannot be loaded). Returned as
//!   `Err(ScanError)` from [`crate::run::run`].
//!
//! * [`ItemError`] — **Non-fatal**: one input file, or one page of it,
//!   failed. Stored inside [`crate::output::ItemReport`] and
//!   [`crate::output::PageResult`]; the run moves on to the next item.
//!
//! [`EngineError`] and [`RasterError`] are the component-level errors of the
//! transcription engine and the rasteriser. The driver folds them into an
//! [`ItemError`] together with the path and page context.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the scanscribe library.
#[derive(Debug, Error)]
pub enum ScanError {
    // ── Configuration errors ──────────────────────────────────────────────
    /// The configured input directory does not exist.
    #[error("Input directory not found: '{path}'\nCheck --input-dir points at an existing folder.")]
    InputDirNotFound { path: PathBuf },

    /// The configured input path exists but is not a directory.
    #[error("Input path '{path}' is not a directory")]
    InputNotADirectory { path: PathBuf },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Model errors ──────────────────────────────────────────────────────
    /// A model file could not be downloaded or located.
    #[error("Failed to fetch model artifact '{artifact}': {reason}")]
    ArtifactFetch { artifact: String, reason: String },

    /// Model files were present but could not be loaded.
    #[error("Failed to load model from '{source_id}': {detail}")]
    ModelLoad { source_id: String, detail: String },

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not locate or bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
PDFium is normally downloaded automatically on first run.\n\
If the auto-download failed, you can:\n\
  • Check your internet connection and try again.\n\
  • Pass --pdfium-path /path/to/libpdfium (or set PDFIUM_LIB_PATH).\n"
    )]
    PdfiumBindingFailed(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// The input directory exists but could not be listed.
    #[error("Failed to read input directory '{path}': {source}")]
    InputDirUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The output directory could not be created.
    #[error("Failed to create output directory '{path}': {source}")]
    OutputDirUnwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for one input item or one page of it.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum ItemError {
    /// A standalone image could not be opened or decoded.
    #[error("{path}: image could not be decoded: {detail}")]
    ImageDecode { path: PathBuf, detail: String },

    /// The PDF could not be rasterised; no page of it was processed.
    #[error("{path}: rasterisation failed: {detail}")]
    Rasterization { path: PathBuf, detail: String },

    /// The model failed on one page. `page` is `None` for standalone images.
    #[error("{path}{}: transcription failed: {detail}", .page.map(|p| format!(" (page {p})")).unwrap_or_default())]
    Transcription {
        path: PathBuf,
        page: Option<usize>,
        detail: String,
    },

    /// An output file could not be written.
    #[error("failed to write '{path}': {detail}")]
    Write { path: PathBuf, detail: String },

    /// One or more pages of a PDF failed; the combined file was not written.
    #[error("{path}: {failed}/{total} pages failed; combined output skipped")]
    PartialDocument {
        path: PathBuf,
        failed: usize,
        total: usize,
    },

    /// A blocking worker panicked.
    #[error("{path}: worker task failed: {detail}")]
    Worker { path: PathBuf, detail: String },
}

/// Errors raised inside the transcription engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The image could not be turned into model input.
    #[error("preprocessing failed: {0}")]
    Preprocess(String),

    /// ONNX Runtime rejected the inputs or failed mid-graph.
    #[error("inference failed during {stage}: {detail}")]
    Inference { stage: &'static str, detail: String },

    /// Encoding the task prompt or decoding the output ids failed.
    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    /// The model produced a tensor with an unexpected shape or type.
    #[error("unexpected model output: {0}")]
    InvalidOutput(String),

    /// The decoding configuration cannot be honoured.
    #[error("unsupported generation config: {0}")]
    UnsupportedGeneration(String),

    /// The requested execution device cannot be used.
    #[error("execution device unavailable: {0}")]
    Device(String),
}

impl EngineError {
    pub(crate) fn inference(stage: &'static str, e: impl std::fmt::Display) -> Self {
        Self::Inference {
            stage,
            detail: e.to_string(),
        }
    }
}

/// Errors raised while rasterising a PDF.
#[derive(Debug, Error)]
pub enum RasterError {
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF is corrupt: {0}")]
    Corrupt(String),

    /// PDF requires a password.
    #[error("PDF is encrypted and requires a password")]
    PasswordRequired,

    /// pdfium-render returned an error for a specific page.
    #[error("page {page} failed to render: {detail}")]
    Page { page: usize, detail: String },

    /// The document has no pages.
    #[error("PDF has no pages")]
    Empty,

    /// The pdfium library could not be bound.
    #[error("pdfium unavailable: {0}")]
    Binding(String),
}
