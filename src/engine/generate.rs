//! Fixed decoding configuration and the greedy decode loop.

use crate::error::EngineError;
use ndarray::Array4;
use serde::Deserialize;
use std::path::Path;
use tokenizers::Tokenizer;

/// Task prompt the decoder is seeded with.
pub const TASK_PROMPT: &str = "<s_ocr>";

/// Hard cap on the decoder sequence, seed tokens included.
pub const MAX_LENGTH: usize = 512;

/// Generation parameters. Only greedy search is implemented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationConfig {
    pub task_prompt: String,
    pub max_length: usize,
    pub num_beams: usize,
    /// Beam-search stopping rule. Greedy search ignores it and always ends
    /// at the first end-of-sequence token.
    pub early_stopping: bool,
    pub eos_token_id: i64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            task_prompt: TASK_PROMPT.to_string(),
            max_length: MAX_LENGTH,
            num_beams: 1,
            early_stopping: true,
            eos_token_id: 2,
        }
    }
}

#[derive(Deserialize)]
struct DecoderSection {
    eos_token_id: Option<i64>,
}

/// Fields of `config.json` relevant to decoding.
#[derive(Deserialize)]
struct ModelConfig {
    eos_token_id: Option<i64>,
    decoder: Option<DecoderSection>,
}

impl GenerationConfig {
    /// Fixed parameters plus the EOS id from `config.json`, falling back to
    /// the tokenizer's `</s>` token.
    pub fn from_model_config(path: &Path, tokenizer: &Tokenizer) -> Result<Self, EngineError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EngineError::InvalidOutput(format!("{}: {e}", path.display())))?;
        let config: ModelConfig = serde_json::from_str(&raw)
            .map_err(|e| EngineError::InvalidOutput(format!("config.json: {e}")))?;

        let eos = config
            .eos_token_id
            .or_else(|| config.decoder.and_then(|d| d.eos_token_id))
            .or_else(|| tokenizer.token_to_id("</s>").map(i64::from))
            .ok_or_else(|| {
                EngineError::Tokenizer("no eos_token_id in config.json and no </s> token".into())
            })?;

        Ok(Self {
            eos_token_id: eos,
            ..Self::default()
        })
    }
}

/// The two forward passes greedy decoding needs.
pub trait Seq2SeqModel {
    /// Encoder states for one preprocessed image, flattened row-major, with
    /// their shape.
    fn encode(&self, pixel_values: &Array4<f32>) -> Result<EncoderOutput, EngineError>;

    /// Logits over the vocabulary for the token following `input_ids`.
    fn next_token_logits(
        &self,
        encoder: &EncoderOutput,
        input_ids: &[i64],
    ) -> Result<Vec<f32>, EngineError>;
}

/// Encoder hidden states, kept as a flat buffer for reuse across steps.
#[derive(Debug, Clone)]
pub struct EncoderOutput {
    pub shape: Vec<i64>,
    pub data: Vec<f32>,
}

/// Greedy search from `seed` until EOS or `max_length` tokens.
///
/// Returns the whole sequence including `seed`. Never longer than
/// `config.max_length` unless the seed itself already is.
pub fn greedy_decode(
    model: &dyn Seq2SeqModel,
    pixel_values: &Array4<f32>,
    seed: &[i64],
    config: &GenerationConfig,
) -> Result<Vec<i64>, EngineError> {
    if config.num_beams != 1 {
        return Err(EngineError::UnsupportedGeneration(format!(
            "num_beams = {} (only greedy search is implemented)",
            config.num_beams
        )));
    }
    if seed.is_empty() {
        return Err(EngineError::UnsupportedGeneration(
            "empty decoder seed".into(),
        ));
    }

    let encoder = model.encode(pixel_values)?;
    let mut ids = seed.to_vec();

    while ids.len() < config.max_length {
        let logits = model.next_token_logits(&encoder, &ids)?;
        let next = argmax(&logits)
            .ok_or_else(|| EngineError::InvalidOutput("empty logits".into()))?;
        ids.push(next as i64);

        if next as i64 == config.eos_token_id {
            break;
        }
    }

    Ok(ids)
}

/// Index of the largest logit; ties go to the lowest index. NaN never wins.
fn argmax(logits: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in logits.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// Emits `script` token by token, then repeats `fill` forever.
    struct Scripted {
        script: Vec<usize>,
        fill: usize,
        vocab: usize,
        calls: Cell<usize>,
        seed_len: usize,
    }

    impl Scripted {
        fn new(script: Vec<usize>, fill: usize, seed_len: usize) -> Self {
            Self {
                script,
                fill,
                vocab: 16,
                calls: Cell::new(0),
                seed_len,
            }
        }
    }

    impl Seq2SeqModel for Scripted {
        fn encode(&self, _pixel_values: &Array4<f32>) -> Result<EncoderOutput, EngineError> {
            Ok(EncoderOutput {
                shape: vec![1, 1, 1],
                data: vec![0.0],
            })
        }

        fn next_token_logits(
            &self,
            _encoder: &EncoderOutput,
            input_ids: &[i64],
        ) -> Result<Vec<f32>, EngineError> {
            self.calls.set(self.calls.get() + 1);
            let step = input_ids.len() - self.seed_len;
            let token = self.script.get(step).copied().unwrap_or(self.fill);
            let mut logits = vec![0.0; self.vocab];
            logits[token] = 5.0;
            Ok(logits)
        }
    }

    fn pixels() -> Array4<f32> {
        Array4::zeros((1, 3, 2, 2))
    }

    #[test]
    fn stops_at_eos_and_keeps_seed() {
        let model = Scripted::new(vec![7, 8, 2, 9], 9, 3);
        let ids = greedy_decode(&model, &pixels(), &[0, 5, 2], &GenerationConfig::default()).unwrap();
        assert_eq!(ids, [0, 5, 2, 7, 8, 2]);
        assert_eq!(model.calls.get(), 3);
    }

    #[test]
    fn never_exceeds_max_length() {
        let model = Scripted::new(vec![], 4, 1);
        let ids = greedy_decode(&model, &pixels(), &[0], &GenerationConfig::default()).unwrap();
        assert_eq!(ids.len(), MAX_LENGTH);
        assert_eq!(model.calls.get(), MAX_LENGTH - 1);
    }

    #[test]
    fn seed_at_max_length_generates_nothing() {
        let model = Scripted::new(vec![], 4, 4);
        let config = GenerationConfig {
            max_length: 4,
            ..GenerationConfig::default()
        };
        let ids = greedy_decode(&model, &pixels(), &[0, 1, 1, 1], &config).unwrap();
        assert_eq!(ids.len(), 4);
        assert_eq!(model.calls.get(), 0);
    }

    #[test]
    fn beam_search_is_rejected() {
        let model = Scripted::new(vec![], 2, 1);
        let config = GenerationConfig {
            num_beams: 4,
            ..GenerationConfig::default()
        };
        let err = greedy_decode(&model, &pixels(), &[0], &config).unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedGeneration(_)));
    }

    #[test]
    fn greedy_stops_at_eos_even_without_early_stopping() {
        let model = Scripted::new(vec![7, 2], 2, 1);
        let config = GenerationConfig {
            early_stopping: false,
            max_length: 6,
            ..GenerationConfig::default()
        };
        let ids = greedy_decode(&model, &pixels(), &[0], &config).unwrap();
        assert_eq!(ids, [0, 7, 2]);
        assert_eq!(model.calls.get(), 2);
    }

    #[test]
    fn argmax_behaviour() {
        assert_eq!(argmax(&[0.1, 0.9, 0.9, -1.0]), Some(1));
        assert_eq!(argmax(&[f32::NAN, -3.0]), Some(1));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn defaults_match_fixed_decoding() {
        let c = GenerationConfig::default();
        assert_eq!(c.task_prompt, "<s_ocr>");
        assert_eq!((c.max_length, c.num_beams, c.early_stopping), (512, 1, true));
    }
}
