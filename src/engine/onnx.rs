//! ONNX Runtime implementation of [`Seq2SeqModel`].
//!
//! Expects the split export of a vision-encoder/text-decoder model:
//!
//! * `encoder_model.onnx`: `pixel_values [b,3,H,W]` → `last_hidden_state`
//! * `decoder_model.onnx`: `input_ids [b,seq]` + `encoder_hidden_states` →
//!   `logits [b,seq,vocab]`
//!
//! The decoder is run without a key/value cache, re-reading the whole
//! sequence at every step. Merged decoders with `past_key_values` inputs
//! are rejected at load time.

use super::generate::{EncoderOutput, Seq2SeqModel};
use super::{Device, DevicePreference};
use crate::error::EngineError;
use ndarray::Array4;
use ort::execution_providers::CPUExecutionProvider;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::{Session, SessionInputValue, SessionInputs};
use ort::value::TensorRef;
use std::borrow::Cow;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, warn};

const ENCODER_INPUT: &str = "pixel_values";
const DECODER_IDS: &str = "input_ids";
const DECODER_STATES: &str = "encoder_hidden_states";
const DECODER_STATES_MASK: &str = "encoder_attention_mask";
const DECODER_MASK: &str = "attention_mask";

/// Encoder and decoder sessions.
///
/// `Session::run` takes `&mut self`, so each session sits behind a mutex.
/// Pages are decoded one at a time per item, so contention is limited to
/// concurrent items.
pub struct OnnxSeq2Seq {
    encoder: Mutex<Session>,
    decoder: Mutex<Session>,
    encoder_output: String,
    decoder_output: String,
    decoder_inputs: Vec<String>,
    device: Device,
}

impl OnnxSeq2Seq {
    /// Load both sessions on the device chosen by `preference`.
    pub fn load(
        encoder_path: &Path,
        decoder_path: &Path,
        preference: DevicePreference,
    ) -> Result<Self, EngineError> {
        let device = select_device(preference)?;

        info!("Loading ONNX encoder from {:?}", encoder_path);
        let encoder = build_session(encoder_path, device)
            .map_err(|e| EngineError::inference("loading encoder", e))?;
        info!("Loading ONNX decoder from {:?}", decoder_path);
        let decoder = build_session(decoder_path, device)
            .map_err(|e| EngineError::inference("loading decoder", e))?;

        let encoder_output = encoder
            .outputs
            .iter()
            .map(|o| o.name.clone())
            .find(|n| n == "last_hidden_state")
            .or_else(|| encoder.outputs.first().map(|o| o.name.clone()))
            .ok_or_else(|| EngineError::InvalidOutput("encoder declares no outputs".into()))?;

        let decoder_output = decoder
            .outputs
            .iter()
            .map(|o| o.name.clone())
            .find(|n| n == "logits")
            .ok_or_else(|| EngineError::InvalidOutput("decoder has no 'logits' output".into()))?;

        let decoder_inputs: Vec<String> = decoder.inputs.iter().map(|i| i.name.clone()).collect();
        for name in &decoder_inputs {
            if ![DECODER_IDS, DECODER_STATES, DECODER_STATES_MASK, DECODER_MASK]
                .contains(&name.as_str())
            {
                return Err(EngineError::InvalidOutput(format!(
                    "decoder input '{name}' is not supported; export the decoder without past key values"
                )));
            }
        }
        if !encoder.inputs.iter().any(|i| i.name == ENCODER_INPUT) {
            return Err(EngineError::InvalidOutput(format!(
                "encoder has no '{ENCODER_INPUT}' input"
            )));
        }

        debug!(
            "Encoder output '{}', decoder inputs {:?}",
            encoder_output, decoder_inputs
        );

        Ok(Self {
            encoder: Mutex::new(encoder),
            decoder: Mutex::new(decoder),
            encoder_output,
            decoder_output,
            decoder_inputs,
            device,
        })
    }

    pub fn device(&self) -> Device {
        self.device
    }

    fn wants(&self, input: &str) -> bool {
        self.decoder_inputs.iter().any(|n| n == input)
    }
}

impl Seq2SeqModel for OnnxSeq2Seq {
    fn encode(&self, pixel_values: &Array4<f32>) -> Result<EncoderOutput, EngineError> {
        let dims: Vec<i64> = pixel_values.shape().iter().map(|&d| d as i64).collect();
        let data = pixel_values
            .as_slice()
            .ok_or_else(|| EngineError::Preprocess("pixel tensor is not contiguous".into()))?;
        let tensor = TensorRef::from_array_view((dims, data))
            .map_err(|e| EngineError::inference("encoder input", e))?;

        let inputs: Vec<(Cow<'_, str>, SessionInputValue<'_>)> =
            vec![(Cow::Borrowed(ENCODER_INPUT), tensor.into())];

        let mut session = self
            .encoder
            .lock()
            .map_err(|_| EngineError::inference("encoder", "session lock poisoned"))?;
        let outputs = session
            .run(SessionInputs::<'_, '_, 0>::ValueMap(inputs))
            .map_err(|e| EngineError::inference("encoder", e))?;

        let (shape, data) = outputs[self.encoder_output.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| EngineError::InvalidOutput(format!("encoder output: {e}")))?;

        Ok(EncoderOutput {
            shape: shape.iter().copied().collect(),
            data: data.to_vec(),
        })
    }

    fn next_token_logits(
        &self,
        encoder: &EncoderOutput,
        input_ids: &[i64],
    ) -> Result<Vec<f32>, EngineError> {
        let seq = input_ids.len();
        let stage = "decoder";

        let ids = TensorRef::from_array_view((vec![1_i64, seq as i64], input_ids))
            .map_err(|e| EngineError::inference(stage, e))?;
        let states = TensorRef::from_array_view((encoder.shape.clone(), encoder.data.as_slice()))
            .map_err(|e| EngineError::inference(stage, e))?;

        let mut inputs: Vec<(Cow<'_, str>, SessionInputValue<'_>)> = vec![
            (Cow::Borrowed(DECODER_IDS), ids.into()),
            (Cow::Borrowed(DECODER_STATES), states.into()),
        ];

        // Masks are all ones: a single unpadded sequence.
        let decoder_mask = vec![1_i64; seq];
        if self.wants(DECODER_MASK) {
            let mask = TensorRef::from_array_view((vec![1_i64, seq as i64], decoder_mask.as_slice()))
                .map_err(|e| EngineError::inference(stage, e))?;
            inputs.push((Cow::Borrowed(DECODER_MASK), mask.into()));
        }
        let states_len = encoder.shape.get(1).copied().unwrap_or(0);
        let states_mask = vec![1_i64; states_len.max(0) as usize];
        if self.wants(DECODER_STATES_MASK) {
            let mask = TensorRef::from_array_view((vec![1_i64, states_len], states_mask.as_slice()))
                .map_err(|e| EngineError::inference(stage, e))?;
            inputs.push((Cow::Borrowed(DECODER_STATES_MASK), mask.into()));
        }

        let mut session = self
            .decoder
            .lock()
            .map_err(|_| EngineError::inference(stage, "session lock poisoned"))?;
        let outputs = session
            .run(SessionInputs::<'_, '_, 0>::ValueMap(inputs))
            .map_err(|e| EngineError::inference(stage, e))?;

        let (shape, logits) = outputs[self.decoder_output.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| EngineError::InvalidOutput(format!("decoder logits: {e}")))?;

        let vocab = match shape.len() {
            3 => shape[2] as usize,
            n => {
                return Err(EngineError::InvalidOutput(format!(
                    "logits have rank {n}, expected 3"
                )))
            }
        };
        if vocab == 0 || logits.len() < seq * vocab {
            return Err(EngineError::InvalidOutput(format!(
                "logits shape {:?} does not cover {seq} positions",
                shape.iter().collect::<Vec<_>>()
            )));
        }

        Ok(logits[(seq - 1) * vocab..seq * vocab].to_vec())
    }
}

/// Resolve the device preference once.
fn select_device(preference: DevicePreference) -> Result<Device, EngineError> {
    match preference {
        DevicePreference::Cpu => Ok(Device::Cpu),
        DevicePreference::Auto => {
            if cuda_available() {
                Ok(Device::Cuda)
            } else {
                Ok(Device::Cpu)
            }
        }
        DevicePreference::Cuda => {
            if cuda_available() {
                Ok(Device::Cuda)
            } else if cfg!(feature = "cuda") {
                Err(EngineError::Device(
                    "CUDA requested but the CUDA execution provider is unavailable".into(),
                ))
            } else {
                Err(EngineError::Device(
                    "CUDA requested but scanscribe was built without the 'cuda' feature".into(),
                ))
            }
        }
    }
}

#[cfg(feature = "cuda")]
fn cuda_available() -> bool {
    use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};
    match CUDAExecutionProvider::default().is_available() {
        Ok(available) => available,
        Err(e) => {
            warn!("Could not query CUDA availability: {}", e);
            false
        }
    }
}

#[cfg(not(feature = "cuda"))]
fn cuda_available() -> bool {
    false
}

fn build_session(path: &Path, device: Device) -> Result<Session, ort::Error> {
    let threads = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);

    let builder = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(threads)?;

    let builder = match device {
        #[cfg(feature = "cuda")]
        Device::Cuda => builder.with_execution_providers([
            ort::execution_providers::CUDAExecutionProvider::default().build(),
            CPUExecutionProvider::default().build(),
        ])?,
        #[cfg(not(feature = "cuda"))]
        Device::Cuda => {
            warn!("CUDA selected without CUDA support; running on CPU");
            builder.with_execution_providers([CPUExecutionProvider::default().build()])?
        }
        Device::Cpu => builder.with_execution_providers([CPUExecutionProvider::default().build()])?,
    };

    builder.commit_from_file(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_is_always_selectable() {
        assert_eq!(select_device(DevicePreference::Cpu).unwrap(), Device::Cpu);
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn auto_falls_back_to_cpu_without_cuda_support() {
        assert_eq!(select_device(DevicePreference::Auto).unwrap(), Device::Cpu);
        assert!(matches!(
            select_device(DevicePreference::Cuda),
            Err(EngineError::Device(_))
        ));
    }

    #[test]
    fn missing_model_file_is_an_inference_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = OnnxSeq2Seq::load(
            &dir.path().join("encoder_model.onnx"),
            &dir.path().join("decoder_model.onnx"),
            DevicePreference::Cpu,
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("loading encoder"), "got: {err}");
    }
}
