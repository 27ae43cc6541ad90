//! Configuration types for a transcription run.
//!
//! All run behaviour is controlled through [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. The builder validates on [`build`] so a bad
//! value fails before the model is loaded rather than halfway through a
//! batch.
//!
//! [`build`]: PipelineConfigBuilder::build

use crate::engine::{DevicePreference, ModelSource, Transcriber};
use crate::error::ScanError;
use crate::pipeline::render::Rasterizer;
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Folder scanned when no input directory is configured.
pub const DEFAULT_INPUT_DIR: &str = "input/val/images";

/// Folder written when no output directory is configured.
pub const DEFAULT_OUTPUT_DIR: &str = "output";

/// Configuration for one batch transcription run.
///
/// # Example
/// ```rust
/// use scanscribe::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .input_dir("scans")
///     .output_dir("transcripts")
///     .build()
///     .unwrap();
/// assert_eq!(config.concurrency, 1);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Flat directory holding `*.jpg`, `*.jpeg`, `*.png` and `*.pdf` inputs.
    pub input_dir: PathBuf,

    /// Directory receiving the `.txt` artifacts. Created if absent.
    pub output_dir: PathBuf,

    /// Where the pretrained model comes from. Default: the hub repository
    /// `chinmays18/medical-prescription-ocr` at `main`.
    pub model: ModelSource,

    /// Execution device policy, evaluated once when the engine loads.
    pub device: DevicePreference,

    /// Explicit PDFium library (file or directory). `None` resolves through
    /// `PDFIUM_LIB_PATH` and then the download cache.
    pub pdfium_path: Option<PathBuf>,

    /// Cap on the longest edge of a rendered PDF page, in pixels. Default: 2000.
    ///
    /// The model resizes every page to its own input size anyway; the cap
    /// only bounds rendering memory for oversized pages.
    pub max_rendered_pixels: u32,

    /// Number of input items processed at once. Default: 1 (sequential).
    ///
    /// Pages inside one PDF are always processed in order. Output names do
    /// not depend on completion order, so the final layout is the same for
    /// any value.
    pub concurrency: usize,

    /// Pre-constructed transcriber. Takes precedence over `model`.
    pub transcriber: Option<Arc<dyn Transcriber>>,

    /// Pre-constructed rasteriser. Takes precedence over `pdfium_path`.
    pub rasterizer: Option<Arc<dyn Rasterizer>>,

    /// Optional per-item progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from(DEFAULT_INPUT_DIR),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            model: ModelSource::default(),
            device: DevicePreference::default(),
            pdfium_path: None,
            max_rendered_pixels: 2000,
            concurrency: 1,
            transcriber: None,
            rasterizer: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("input_dir", &self.input_dir)
            .field("output_dir", &self.output_dir)
            .field("model", &self.model)
            .field("device", &self.device)
            .field("pdfium_path", &self.pdfium_path)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("concurrency", &self.concurrency)
            .field("transcriber", &self.transcriber.as_ref().map(|_| "<dyn Transcriber>"))
            .field("rasterizer", &self.rasterizer.as_ref().map(|_| "<dyn Rasterizer>"))
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn input_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.input_dir = dir.into();
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn model(mut self, source: ModelSource) -> Self {
        self.config.model = source;
        self
    }

    pub fn device(mut self, device: DevicePreference) -> Self {
        self.config.device = device;
        self
    }

    pub fn pdfium_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_path = Some(path.into());
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.config.transcriber = Some(transcriber);
        self
    }

    pub fn rasterizer(mut self, rasterizer: Arc<dyn Rasterizer>) -> Self {
        self.config.rasterizer = Some(rasterizer);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, ScanError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(ScanError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.output_dir.as_os_str().is_empty() {
            return Err(ScanError::InvalidConfig(
                "Output directory must not be empty".into(),
            ));
        }
        if c.input_dir == c.output_dir {
            return Err(ScanError::InvalidConfig(format!(
                "Input and output directory are the same ('{}')",
                c.input_dir.display()
            )));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_the_batch_script_layout() {
        let c = PipelineConfig::default();
        assert_eq!(c.input_dir, PathBuf::from("input/val/images"));
        assert_eq!(c.output_dir, PathBuf::from("output"));
        assert_eq!(c.concurrency, 1);
        assert_eq!(c.max_rendered_pixels, 2000);
        assert!(c.pdfium_path.is_none());
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let err = PipelineConfig::builder().concurrency(0).build().unwrap_err();
        assert!(matches!(err, ScanError::InvalidConfig(_)));
    }

    #[test]
    fn same_input_and_output_is_rejected() {
        let err = PipelineConfig::builder()
            .input_dir("data")
            .output_dir("data")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("same"));
    }

    #[test]
    fn max_rendered_pixels_has_a_floor() {
        let c = PipelineConfig::builder()
            .max_rendered_pixels(10)
            .build()
            .unwrap();
        assert_eq!(c.max_rendered_pixels, 100);
    }

    #[test]
    fn debug_hides_trait_objects() {
        let s = format!("{:?}", PipelineConfig::default());
        assert!(s.contains("input_dir"));
        assert!(s.contains("transcriber: None"));
    }
}
