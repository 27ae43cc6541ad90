//! # artifact-cache
//!
//! Download-once, cache-forever storage for the two runtime artifacts that
//! scanscribe cannot ship inside its binary:
//!
//! * the PDFium shared library used to rasterise PDF pages ([`pdfium`]), and
//! * the pretrained model files fetched by repository id from the
//!   Hugging Face model registry ([`hub`]).
//!
//! Both live under a single cache root:
//!
//! | OS      | Default root                              |
//! |---------|-------------------------------------------|
//! | macOS   | `~/Library/Caches/scanscribe/`            |
//! | Linux   | `~/.cache/scanscribe/`                    |
//! | Windows | `%LOCALAPPDATA%\scanscribe\`              |
//!
//! Override with `SCANSCRIBE_CACHE_DIR`.
//!
//! Every download is written to a `.part` sibling first and renamed into
//! place, so a killed process never leaves a truncated artifact that later
//! runs would mistake for a cached one.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

pub mod hub;
pub mod pdfium;

/// Progress hook: `(bytes_downloaded, total_bytes_if_known)`.
pub type ProgressFn<'a> = &'a dyn Fn(u64, Option<u64>);

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by artifact-cache operations.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The current OS/architecture combination has no prebuilt PDFium.
    #[error("Unsupported platform: {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },

    /// Could not create or write inside the local cache directory.
    #[error("Cache directory error: {0}")]
    CacheDir(#[source] std::io::Error),

    /// Network download failed.
    #[error("Download failed: {0}")]
    Download(String),

    /// gzip/tar extraction failed.
    #[error("Archive extraction failed: {0}")]
    Extract(String),

    /// An explicitly configured path does not exist.
    #[error("'{path}' does not exist")]
    Missing { path: PathBuf },

    /// A repository id is malformed (expected `owner/name`).
    #[error("Invalid repository id '{0}': expected 'owner/name'")]
    InvalidRepoId(String),

    /// `pdfium-render` could not load the library.
    #[error("Failed to bind PDFium from '{path}': {reason}")]
    Bind { path: PathBuf, reason: String },
}

// ── Cache root ───────────────────────────────────────────────────────────────

/// Returns the root directory shared by all cached artifacts.
pub fn cache_root() -> PathBuf {
    if let Ok(dir) = std::env::var("SCANSCRIBE_CACHE_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }

    dirs::cache_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".cache")))
        .unwrap_or_else(std::env::temp_dir)
        .join("scanscribe")
}

// ── Download helpers ─────────────────────────────────────────────────────────

/// Streams `url` into memory, calling `on_progress` every 64 KiB.
///
/// `bearer` is sent as an `Authorization: Bearer` header when present.
pub fn download_bytes(
    url: &str,
    bearer: Option<&str>,
    on_progress: Option<ProgressFn<'_>>,
) -> Result<Vec<u8>, CacheError> {
    let mut buf = Vec::new();
    download_into(url, bearer, on_progress, &mut buf)?;
    Ok(buf)
}

/// Downloads `url` to `dest`, going through a `.part` file and a rename.
///
/// Parent directories are created as needed.
pub fn download_to_file(
    url: &str,
    dest: &Path,
    bearer: Option<&str>,
    on_progress: Option<ProgressFn<'_>>,
) -> Result<(), CacheError> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(CacheError::CacheDir)?;
    }

    let part = part_path(dest);
    let mut file = std::fs::File::create(&part).map_err(CacheError::CacheDir)?;
    let result = download_into(url, bearer, on_progress, &mut file);
    drop(file);

    if let Err(e) = result {
        let _ = std::fs::remove_file(&part);
        return Err(e);
    }

    std::fs::rename(&part, dest).map_err(CacheError::CacheDir)?;
    debug!("Cached {} → {}", url, dest.display());
    Ok(())
}

/// Sibling path used while a download is in flight.
fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

fn download_into<W: Write>(
    url: &str,
    bearer: Option<&str>,
    on_progress: Option<ProgressFn<'_>>,
    sink: &mut W,
) -> Result<u64, CacheError> {
    let client = reqwest::blocking::Client::builder()
        .user_agent(concat!("scanscribe/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(|e| CacheError::Download(e.to_string()))?;

    let mut request = client.get(url);
    if let Some(token) = bearer {
        request = request.bearer_auth(token);
    }

    let mut response = request
        .send()
        .map_err(|e| CacheError::Download(format!("GET {url}: {e}")))?;

    if !response.status().is_success() {
        return Err(CacheError::Download(format!(
            "HTTP {} for {url}",
            response.status()
        )));
    }

    let total = response.content_length();
    let mut chunk = vec![0u8; 64 * 1024];
    let mut downloaded: u64 = 0;

    loop {
        match response.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                sink.write_all(&chunk[..n]).map_err(CacheError::CacheDir)?;
                downloaded += n as u64;
                if let Some(cb) = on_progress {
                    cb(downloaded, total);
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CacheError::Download(format!("Read error: {e}"))),
        }
    }

    Ok(downloaded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_path_appends_suffix() {
        let p = part_path(Path::new("/tmp/models/tokenizer.json"));
        assert_eq!(p, PathBuf::from("/tmp/models/tokenizer.json.part"));
    }

    #[test]
    fn cache_root_ends_with_project_dir_by_default() {
        if std::env::var("SCANSCRIBE_CACHE_DIR").is_ok() {
            return;
        }
        assert!(cache_root().ends_with("scanscribe"));
    }

    #[test]
    fn download_error_for_unroutable_url() {
        // Port 9 (discard) on localhost refuses connections on CI hosts.
        let err = download_bytes("http://127.0.0.1:9/nothing", None, None).unwrap_err();
        assert!(matches!(err, CacheError::Download(_)), "got: {err}");
    }
}
