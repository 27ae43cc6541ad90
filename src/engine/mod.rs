//! Transcription engine: page image in, text out.
//!
//! The production engine runs an ONNX export of a Donut-style
//! vision-encoder/text-decoder model through ONNX Runtime:
//!
//! ```text
//! RgbImage ──▶ preprocess ──▶ encoder ──▶ greedy decode ──▶ tokenizer ──▶ cleanup
//!            [1,3,H,W] f32   hidden states  token ids       string
//! ```
//!
//! Everything model-specific sits behind two seams:
//!
//! * [`Transcriber`], the only thing the pipeline driver sees, so tests can
//!   substitute a fake and skip the model entirely;
//! * [`Seq2SeqModel`], the two forward passes the decode loop needs, so
//!   [`greedy_decode`] is testable without ONNX Runtime.

pub mod artifacts;
pub mod generate;
pub mod onnx;
pub mod preprocess;

pub use artifacts::ModelFiles;
pub use generate::{
    greedy_decode, EncoderOutput, GenerationConfig, Seq2SeqModel, MAX_LENGTH, TASK_PROMPT,
};
pub use onnx::OnnxSeq2Seq;
pub use preprocess::DonutPreprocessor;

use crate::error::{EngineError, ScanError};
use crate::pipeline::postprocess::clean_transcript;
use image::RgbImage;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tokenizers::Tokenizer;
use tracing::{debug, info};

/// Repository loaded when no model is configured.
pub const DEFAULT_MODEL_ID: &str = "chinmays18/medical-prescription-ocr";

/// Converts one page image into text.
///
/// Implementations must be stateless across calls and safe to share
/// between worker threads behind an `Arc`.
pub trait Transcriber: Send + Sync {
    fn transcribe(&self, image: &RgbImage) -> Result<String, EngineError>;
}

// ── Model source ─────────────────────────────────────────────────────────────

/// Where the pretrained model comes from.
///
/// `id` is either a local directory holding the model files or a hub
/// repository id (`owner/name`). An existing directory always wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSource {
    pub id: String,
    /// Hub revision (branch, tag or commit). Ignored for local directories.
    pub revision: String,
    /// Directory holding `encoder_model.onnx`/`decoder_model.onnx`,
    /// relative to the model root. `None` tries the root, then `onnx/`.
    pub onnx_subfolder: Option<String>,
}

impl Default for ModelSource {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL_ID)
    }
}

impl ModelSource {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            revision: "main".to_string(),
            onnx_subfolder: None,
        }
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = revision.into();
        self
    }

    pub fn with_onnx_subfolder(mut self, subfolder: impl Into<String>) -> Self {
        self.onnx_subfolder = Some(subfolder.into());
        self
    }

    /// The local directory, when `id` names one.
    pub fn local_dir(&self) -> Option<PathBuf> {
        let p = PathBuf::from(&self.id);
        p.is_dir().then_some(p)
    }
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.local_dir() {
            Some(dir) => write!(f, "{}", dir.display()),
            None => write!(f, "{}@{}", self.id, self.revision),
        }
    }
}

// ── Device ───────────────────────────────────────────────────────────────────

/// Execution device policy, applied once when the engine loads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DevicePreference {
    /// CUDA when compiled in and available, CPU otherwise.
    #[default]
    Auto,
    Cpu,
    /// CUDA or fail. Requires the `cuda` feature.
    Cuda,
}

impl FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda),
            other => Err(format!("unknown device '{other}' (expected auto, cpu or cuda)")),
        }
    }
}

/// The device actually selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Cuda,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Device::Cpu => "cpu",
            Device::Cuda => "cuda",
        })
    }
}

// ── Engine ───────────────────────────────────────────────────────────────────

/// The production [`Transcriber`]: preprocessor, ONNX model and tokenizer
/// loaded once and reused for every page.
pub struct TranscriptionEngine {
    preprocessor: DonutPreprocessor,
    model: OnnxSeq2Seq,
    tokenizer: Tokenizer,
    generation: GenerationConfig,
    /// Tokenised task prompt; every decode starts from it.
    seed: Vec<i64>,
}

impl fmt::Debug for TranscriptionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranscriptionEngine")
            .field("device", &self.model.device())
            .field("generation", &self.generation)
            .field("seed", &self.seed)
            .finish()
    }
}

impl TranscriptionEngine {
    /// Resolve, download if needed, and load the model. Blocking.
    ///
    /// # Errors
    /// [`ScanError::ArtifactFetch`] when a file cannot be located or
    /// downloaded, [`ScanError::ModelLoad`] when a file is present but
    /// unusable.
    pub fn load(source: &ModelSource, device: DevicePreference) -> Result<Self, ScanError> {
        let files = artifacts::resolve(source)?;
        Self::from_files(&files, device, &source.to_string())
    }

    /// Load from already-resolved files.
    pub fn from_files(
        files: &ModelFiles,
        device: DevicePreference,
        source_id: &str,
    ) -> Result<Self, ScanError> {
        let load_error = |detail: String| ScanError::ModelLoad {
            source_id: source_id.to_string(),
            detail,
        };

        let preprocessor = DonutPreprocessor::from_file(&files.preprocessor_config)
            .map_err(|e| load_error(e.to_string()))?;

        let tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| load_error(format!("tokenizer.json: {e}")))?;

        let generation = GenerationConfig::from_model_config(&files.config, &tokenizer)
            .map_err(|e| load_error(e.to_string()))?;

        let seed = encode_prompt(&tokenizer, &generation.task_prompt)
            .map_err(|e| load_error(e.to_string()))?;

        let model = OnnxSeq2Seq::load(&files.encoder, &files.decoder, device)
            .map_err(|e| load_error(e.to_string()))?;

        info!(
            "Model loaded from {} on {} (input {}x{}, eos {})",
            source_id,
            model.device(),
            preprocessor.target_width(),
            preprocessor.target_height(),
            generation.eos_token_id
        );

        Ok(Self {
            preprocessor,
            model,
            tokenizer,
            generation,
            seed,
        })
    }

    /// Device chosen at load time.
    pub fn device(&self) -> Device {
        self.model.device()
    }

    pub fn generation_config(&self) -> &GenerationConfig {
        &self.generation
    }
}

impl Transcriber for TranscriptionEngine {
    fn transcribe(&self, image: &RgbImage) -> Result<String, EngineError> {
        let pixels = self.preprocessor.preprocess(image)?;
        let ids = greedy_decode(&self.model, &pixels, &self.seed, &self.generation)?;
        debug!("Decoded {} tokens", ids.len());

        let ids: Vec<u32> = ids
            .iter()
            .map(|&id| u32::try_from(id))
            .collect::<Result<_, _>>()
            .map_err(|_| EngineError::InvalidOutput("negative token id".into()))?;

        let text = self
            .tokenizer
            .decode(&ids, true)
            .map_err(|e| EngineError::Tokenizer(e.to_string()))?;

        Ok(clean_transcript(&text))
    }
}

/// Tokenise the task prompt with the tokenizer's own special tokens, as
/// the model saw it during fine-tuning.
fn encode_prompt(tokenizer: &Tokenizer, prompt: &str) -> Result<Vec<i64>, EngineError> {
    let encoding = tokenizer
        .encode(prompt, true)
        .map_err(|e| EngineError::Tokenizer(e.to_string()))?;
    let ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
    if ids.is_empty() {
        return Err(EngineError::Tokenizer(format!(
            "task prompt '{prompt}' encoded to zero tokens"
        )));
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_preference_parses() {
        assert_eq!("auto".parse::<DevicePreference>(), Ok(DevicePreference::Auto));
        assert_eq!("CPU".parse::<DevicePreference>(), Ok(DevicePreference::Cpu));
        assert_eq!("gpu".parse::<DevicePreference>(), Ok(DevicePreference::Cuda));
        assert!("tpu".parse::<DevicePreference>().is_err());
    }

    #[test]
    fn model_source_defaults() {
        let s = ModelSource::default();
        assert_eq!(s.id, DEFAULT_MODEL_ID);
        assert_eq!(s.revision, "main");
        assert!(s.onnx_subfolder.is_none());
        assert_eq!(s.to_string(), "chinmays18/medical-prescription-ocr@main");
    }

    #[test]
    fn existing_directory_is_a_local_source() {
        let dir = tempfile::tempdir().unwrap();
        let s = ModelSource::new(dir.path().to_string_lossy()).with_revision("v2");
        assert_eq!(s.local_dir().as_deref(), Some(dir.path()));
        assert!(!s.to_string().contains("@v2"));
    }
}
