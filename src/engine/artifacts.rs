//! Locating model files in a local directory or the hub cache.

use super::ModelSource;
use crate::error::ScanError;
use artifact_cache::hub::{self, RepoId};
use artifact_cache::CacheError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const ENCODER: &str = "encoder_model.onnx";
const DECODER: &str = "decoder_model.onnx";
const TOKENIZER: &str = "tokenizer.json";
const PREPROCESSOR: &str = "preprocessor_config.json";
const CONFIG: &str = "config.json";

/// Subfolder tried for the ONNX graphs when none is configured.
const DEFAULT_ONNX_SUBFOLDER: &str = "onnx";

/// Absolute paths of every file the engine loads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFiles {
    pub encoder: PathBuf,
    pub decoder: PathBuf,
    pub tokenizer: PathBuf,
    pub preprocessor_config: PathBuf,
    pub config: PathBuf,
}

/// Find (or download) the model files for `source`.
pub fn resolve(source: &ModelSource) -> Result<ModelFiles, ScanError> {
    match source.local_dir() {
        Some(dir) => resolve_local(&dir, source.onnx_subfolder.as_deref()),
        None => resolve_hub(source),
    }
}

/// Files from a local directory. Graphs are looked up in the configured
/// subfolder, or at the root and then in `onnx/`.
pub fn resolve_local(dir: &Path, onnx_subfolder: Option<&str>) -> Result<ModelFiles, ScanError> {
    let require = |path: PathBuf| {
        if path.is_file() {
            Ok(path)
        } else {
            Err(ScanError::ArtifactFetch {
                artifact: path.display().to_string(),
                reason: "file not found".into(),
            })
        }
    };

    let graph_dir = match onnx_subfolder {
        Some(sub) => dir.join(sub),
        None if dir.join(ENCODER).is_file() => dir.to_path_buf(),
        None => dir.join(DEFAULT_ONNX_SUBFOLDER),
    };
    debug!("ONNX graphs expected in {}", graph_dir.display());

    Ok(ModelFiles {
        encoder: require(graph_dir.join(ENCODER))?,
        decoder: require(graph_dir.join(DECODER))?,
        tokenizer: require(dir.join(TOKENIZER))?,
        preprocessor_config: require(dir.join(PREPROCESSOR))?,
        config: require(dir.join(CONFIG))?,
    })
}

fn resolve_hub(source: &ModelSource) -> Result<ModelFiles, ScanError> {
    let repo = RepoId::parse(&source.id).map_err(|e| fetch_error(&source.id, e))?;
    let rev = source.revision.as_str();
    info!("Resolving model {}@{}", repo, rev);

    let fetch = |name: &str| {
        hub::fetch_file(&repo, rev, name, None).map_err(|e| fetch_error(name, e))
    };

    let tokenizer = fetch(TOKENIZER)?;
    let preprocessor_config = fetch(PREPROCESSOR)?;
    let config = fetch(CONFIG)?;

    let (encoder, decoder) = match source.onnx_subfolder.as_deref() {
        Some(sub) => (
            fetch(&format!("{sub}/{ENCODER}"))?,
            fetch(&format!("{sub}/{DECODER}"))?,
        ),
        None => match fetch(ENCODER) {
            Ok(encoder) => (encoder, fetch(DECODER)?),
            Err(_) => {
                debug!("No {} at repository root; trying {}/", ENCODER, DEFAULT_ONNX_SUBFOLDER);
                (
                    fetch(&format!("{DEFAULT_ONNX_SUBFOLDER}/{ENCODER}"))?,
                    fetch(&format!("{DEFAULT_ONNX_SUBFOLDER}/{DECODER}"))?,
                )
            }
        },
    };

    Ok(ModelFiles {
        encoder,
        decoder,
        tokenizer,
        preprocessor_config,
        config,
    })
}

fn fetch_error(artifact: &str, e: CacheError) -> ScanError {
    ScanError::ArtifactFetch {
        artifact: artifact.to_string(),
        reason: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(dir: &Path, names: &[&str]) {
        for n in names {
            let p = dir.join(n);
            fs::create_dir_all(p.parent().unwrap()).unwrap();
            fs::write(p, b"{}").unwrap();
        }
    }

    const SIDE_FILES: [&str; 3] = [TOKENIZER, PREPROCESSOR, CONFIG];

    #[test]
    fn graphs_at_root() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), &SIDE_FILES);
        touch(dir.path(), &[ENCODER, DECODER]);

        let files = resolve_local(dir.path(), None).unwrap();
        assert_eq!(files.encoder, dir.path().join(ENCODER));
    }

    #[test]
    fn graphs_in_default_subfolder() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), &SIDE_FILES);
        touch(dir.path(), &["onnx/encoder_model.onnx", "onnx/decoder_model.onnx"]);

        let files = resolve_local(dir.path(), None).unwrap();
        assert_eq!(files.decoder, dir.path().join("onnx").join(DECODER));
    }

    #[test]
    fn explicit_subfolder_wins() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), &SIDE_FILES);
        touch(dir.path(), &[ENCODER, DECODER]);
        touch(dir.path(), &["fp16/encoder_model.onnx", "fp16/decoder_model.onnx"]);

        let files = resolve_local(dir.path(), Some("fp16")).unwrap();
        assert_eq!(files.encoder, dir.path().join("fp16").join(ENCODER));
    }

    #[test]
    fn missing_file_is_named() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), &[ENCODER, DECODER, TOKENIZER, CONFIG]);

        let err = resolve_local(dir.path(), None).unwrap_err();
        assert!(err.to_string().contains(PREPROCESSOR), "got: {err}");
    }

    #[test]
    fn malformed_repo_id_is_a_fetch_error() {
        let err = resolve(&ModelSource::new("not a repo id")).unwrap_err();
        assert!(matches!(err, ScanError::ArtifactFetch { .. }));
    }
}
