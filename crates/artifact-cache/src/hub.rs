//! Model files fetched by repository id from the Hugging Face hub.
//!
//! Files are addressed as `{endpoint}/{owner}/{name}/resolve/{revision}/{file}`
//! and cached at `{cache_root}/models/{owner}--{name}/{revision}/{file}`.
//! A file already present in the cache is returned without touching the
//! network, which makes repeated runs work offline.
//!
//! Environment:
//!
//! - `HF_ENDPOINT` — alternative hub base URL (mirrors, self-hosted).
//! - `HF_TOKEN`    — bearer token for gated or private repositories.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::{cache_root, download_to_file, CacheError, ProgressFn};

/// Public hub used when `HF_ENDPOINT` is unset.
pub const DEFAULT_ENDPOINT: &str = "https://huggingface.co";

/// A validated `owner/name` repository id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoId {
    owner: String,
    name: String,
}

impl RepoId {
    /// Parses `owner/name`. Rejects empty segments, extra slashes, and
    /// segments that would escape the cache directory.
    pub fn parse(id: &str) -> Result<Self, CacheError> {
        let invalid = || CacheError::InvalidRepoId(id.to_string());
        let (owner, name) = id.split_once('/').ok_or_else(invalid)?;

        let segment_ok = |s: &str| {
            !s.is_empty()
                && s != "."
                && s != ".."
                && s.chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        };

        if !segment_ok(owner) || !segment_ok(name) {
            return Err(invalid());
        }

        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    /// `owner--name`, the on-disk directory name.
    fn cache_key(&self) -> String {
        format!("{}--{}", self.owner, self.name)
    }
}

impl std::fmt::Display for RepoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

fn endpoint() -> String {
    std::env::var("HF_ENDPOINT")
        .ok()
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
}

fn token() -> Option<String> {
    std::env::var("HF_TOKEN").ok().filter(|t| !t.is_empty())
}

/// Download URL for one file of a repository.
pub fn file_url(endpoint: &str, repo: &RepoId, revision: &str, filename: &str) -> String {
    format!(
        "{}/{}/resolve/{}/{}",
        endpoint.trim_end_matches('/'),
        repo,
        revision,
        filename
    )
}

/// Cache directory holding the files of `repo` at `revision`.
pub fn repo_cache_dir(root: &Path, repo: &RepoId, revision: &str) -> PathBuf {
    root.join("models").join(repo.cache_key()).join(revision)
}

/// Returns the local path of `filename`, downloading it on first use.
///
/// `filename` may contain `/` for files inside repository subfolders.
pub fn fetch_file(
    repo: &RepoId,
    revision: &str,
    filename: &str,
    on_progress: Option<ProgressFn<'_>>,
) -> Result<PathBuf, CacheError> {
    fetch_file_in(&cache_root(), &endpoint(), repo, revision, filename, on_progress)
}

/// [`fetch_file`] against an explicit cache root and endpoint.
pub fn fetch_file_in(
    root: &Path,
    endpoint: &str,
    repo: &RepoId,
    revision: &str,
    filename: &str,
    on_progress: Option<ProgressFn<'_>>,
) -> Result<PathBuf, CacheError> {
    check_segments("file name", filename)?;
    check_segments("revision", revision)?;

    let dest = repo_cache_dir(root, repo, revision).join(filename);
    if dest.exists() {
        return Ok(dest);
    }

    let url = file_url(endpoint, repo, revision, filename);
    info!("Fetching {} ({}@{})", filename, repo, revision);
    download_to_file(&url, &dest, token().as_deref(), on_progress)?;

    Ok(dest)
}

/// `value` is joined onto the cache root, so every `/`-separated segment
/// must be a plain name.
fn check_segments(what: &str, value: &str) -> Result<(), CacheError> {
    let bad = |s: &str| s.is_empty() || s == "." || s == ".." || s.contains('\\');
    if value.split('/').any(bad) {
        return Err(CacheError::Download(format!(
            "refusing suspicious {what} '{value}'"
        )));
    }
    Ok(())
}
