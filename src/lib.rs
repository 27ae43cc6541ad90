//! # scanscribe
//!
//! Batch-transcribe scanned images and PDFs to plain text with a pretrained
//! image-to-sequence model.
//!
//! Point it at a flat folder of `*.jpg`, `*.jpeg`, `*.png` and `*.pdf`
//! files; it writes one `.txt` per image, one `.txt` per PDF page, and a
//! combined `_complete.txt` per PDF. A file that fails is logged and
//! skipped; the rest of the batch carries on.
//!
//! ## Pipeline Overview
//!
//! ```text
//! input dir
//!  │
//!  ├─ 1. Discover  flat scan, images first, then PDFs, sorted by name
//!  ├─ 2. Render    PDF pages via pdfium / decode images (spawn_blocking)
//!  ├─ 3. Model     Donut preprocessing → ONNX encoder → greedy decode (≤ 512 tokens)
//!  ├─ 4. Polish    strip leaked task tags, normalise whitespace
//!  └─ 5. Output    {base}.txt · {base}_page{i}.txt · {base}_complete.txt
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scanscribe::{run, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Model and PDFium are downloaded into the cache on first use.
//!     let config = PipelineConfig::builder()
//!         .input_dir("input/val/images")
//!         .output_dir("output")
//!         .build()?;
//!     let summary = run(&config).await?;
//!     eprintln!("{} done, {} failed", summary.succeeded, summary.failed);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `scanscribe` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `cuda`  | off     | Registers the CUDA execution provider with ONNX Runtime |
//!
//! ## Model files
//!
//! The engine loads an ONNX export of a vision-encoder/text-decoder model:
//! `encoder_model.onnx`, `decoder_model.onnx` (optionally under `onnx/`),
//! `tokenizer.json`, `preprocessor_config.json` and `config.json`, either
//! from a local directory or by repository id from the Hugging Face hub
//! (default `chinmays18/medical-prescription-ocr`).

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod engine;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod run;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use engine::{
    greedy_decode, DevicePreference, GenerationConfig, ModelSource, OnnxSeq2Seq, Seq2SeqModel,
    Transcriber, TranscriptionEngine,
};
pub use error::{EngineError, ItemError, RasterError, ScanError};
pub use output::{InputItem, InputKind, ItemReport, ItemStatus, PageResult, RunSummary};
pub use pipeline::discover::{discover_inputs, DiscoveredInputs};
pub use pipeline::render::{load_image, PdfiumRasterizer, Rasterizer};
pub use pipeline::write::OutputWriter;
pub use progress::{NoopProgressCallback, ProgressCallback, RunProgressCallback};
pub use run::{run, run_sync, run_with};
