//! Pipeline stages for batch transcription.
//!
//! Each submodule implements exactly one step; the driver in [`crate::run`]
//! strings them together per input item.
//!
//! ## Data Flow
//!
//! ```text
//! discover ──▶ render ──▶ engine ──▶ postprocess ──▶ write
//! (input dir)  (pdfium)   (model)    (cleanup)       (.txt)
//! ```
//!
//! 1. [`discover`] — list images and PDFs in the input directory
//! 2. [`render`]   — rasterise PDFs / decode images to RGB; blocking
//! 3. [`crate::engine`] — image → text, the only model-dependent stage
//! 4. [`postprocess`] — strip leaked task tags, normalise whitespace
//! 5. [`write`]    — deterministic, atomic `.txt` artifacts

pub mod discover;
pub mod postprocess;
pub mod render;
pub mod write;
