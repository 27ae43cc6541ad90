//! PDFium library resolution and binding.
//!
//! Resolution order, first match wins:
//!
//! 1. An explicit tool location passed by the caller (a library file, or a
//!    directory containing the platform library). Missing → error; an
//!    explicit location is never silently replaced by a download.
//! 2. `PDFIUM_LIB_PATH`, when it points to an existing file.
//! 3. `{cache_root}/pdfium-{VERSION}/{lib}` from an earlier download.
//! 4. Download the platform archive from
//!    [bblanchon/pdfium-binaries](https://github.com/bblanchon/pdfium-binaries)
//!    and extract the library into the cache.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use pdfium_render::prelude::Pdfium;
use tracing::{info, warn};

use crate::{cache_root, download_bytes, CacheError, ProgressFn};

/// The pdfium-binaries release tag used for downloads.
pub const PDFIUM_VERSION: &str = "7690";

const BASE_URL: &str = "https://github.com/bblanchon/pdfium-binaries/releases/download";

struct PlatformInfo {
    /// Asset filename in the GitHub release, e.g. `pdfium-mac-arm64.tgz`.
    archive_name: &'static str,
    /// Relative path inside the archive, e.g. `lib/libpdfium.dylib`.
    lib_path_in_archive: &'static str,
    /// Filename on disk, e.g. `libpdfium.dylib`.
    lib_name: &'static str,
}

fn detect_platform() -> Result<PlatformInfo, CacheError> {
    const DYLIB: (&str, &str) = ("lib/libpdfium.dylib", "libpdfium.dylib");
    const SO: (&str, &str) = ("lib/libpdfium.so", "libpdfium.so");
    const DLL: (&str, &str) = ("bin/pdfium.dll", "pdfium.dll");

    let (archive_name, (lib_path_in_archive, lib_name)) =
        match (std::env::consts::OS, std::env::consts::ARCH) {
            ("macos", "aarch64") => ("pdfium-mac-arm64.tgz", DYLIB),
            ("macos", "x86_64") => ("pdfium-mac-x64.tgz", DYLIB),
            ("linux", "x86_64") => ("pdfium-linux-x64.tgz", SO),
            ("linux", "aarch64") => ("pdfium-linux-arm64.tgz", SO),
            ("windows", "x86_64") => ("pdfium-win-x64.tgz", DLL),
            ("windows", "aarch64") => ("pdfium-win-arm64.tgz", DLL),
            ("windows", "x86") => ("pdfium-win-x86.tgz", DLL),
            (os, arch) => {
                return Err(CacheError::UnsupportedPlatform {
                    os: os.to_string(),
                    arch: arch.to_string(),
                })
            }
        };

    Ok(PlatformInfo {
        archive_name,
        lib_path_in_archive,
        lib_name,
    })
}

/// Per-version cache directory for the PDFium library.
pub fn pdfium_cache_dir() -> PathBuf {
    cache_root().join(format!("pdfium-{PDFIUM_VERSION}"))
}

static DEFAULT_PATH: OnceLock<PathBuf> = OnceLock::new();

/// Returns `true` when no network access is needed to obtain the library.
pub fn is_cached() -> bool {
    if let Ok(p) = std::env::var("PDFIUM_LIB_PATH") {
        if Path::new(&p).exists() {
            return true;
        }
    }
    detect_platform()
        .map(|info| pdfium_cache_dir().join(info.lib_name).exists())
        .unwrap_or(false)
}

/// Resolves the PDFium library path, downloading it on first use.
///
/// `tool_location` is the caller's explicit override. When it is `None` the
/// resolved default path is memoised for the rest of the process.
pub fn resolve_library(
    tool_location: Option<&Path>,
    on_progress: Option<ProgressFn<'_>>,
) -> Result<PathBuf, CacheError> {
    if let Some(location) = tool_location {
        return resolve_explicit(location);
    }

    if let Some(path) = DEFAULT_PATH.get() {
        return Ok(path.clone());
    }

    let path = resolve_default(on_progress)?;
    let _ = DEFAULT_PATH.set(path.clone());
    Ok(path)
}

/// Binds `pdfium-render` to the library at `path`.
pub fn bind(path: &Path) -> Result<Pdfium, CacheError> {
    Pdfium::bind_to_library(path)
        .map(Pdfium::new)
        .map_err(|e| CacheError::Bind {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

fn resolve_explicit(location: &Path) -> Result<PathBuf, CacheError> {
    let candidate = if location.is_dir() {
        location.join(detect_platform()?.lib_name)
    } else {
        location.to_path_buf()
    };

    if candidate.exists() {
        Ok(candidate)
    } else {
        Err(CacheError::Missing { path: candidate })
    }
}

fn resolve_default(on_progress: Option<ProgressFn<'_>>) -> Result<PathBuf, CacheError> {
    if let Ok(env_path) = std::env::var("PDFIUM_LIB_PATH") {
        let p = PathBuf::from(env_path);
        if p.exists() {
            return Ok(p);
        }
        warn!(
            "PDFIUM_LIB_PATH '{}' not found; falling back to the cached download",
            p.display()
        );
    }

    let info = detect_platform()?;
    let cache_dir = pdfium_cache_dir();
    let lib_path = cache_dir.join(info.lib_name);

    if lib_path.exists() {
        return Ok(lib_path);
    }

    let url = format!(
        "{}/chromium%2F{}/{}",
        BASE_URL, PDFIUM_VERSION, info.archive_name
    );
    info!("Downloading PDFium {} from {}", PDFIUM_VERSION, url);

    std::fs::create_dir_all(&cache_dir).map_err(CacheError::CacheDir)?;
    let archive = download_bytes(&url, None, on_progress)?;
    extract_member(&archive, info.lib_path_in_archive, &lib_path)?;

    Ok(lib_path)
}

/// Extracts a single file from a gzipped tar archive into `dest`.
fn extract_member(archive_bytes: &[u8], member: &str, dest: &Path) -> Result<(), CacheError> {
    use flate2::read::GzDecoder;
    use tar::Archive;

    let mut archive = Archive::new(GzDecoder::new(archive_bytes));
    let entries = archive
        .entries()
        .map_err(|e| CacheError::Extract(e.to_string()))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| CacheError::Extract(e.to_string()))?;
        let matches = entry
            .path()
            .map_err(|e| CacheError::Extract(e.to_string()))?
            .to_string_lossy()
            == member;

        if matches {
            entry
                .unpack(dest)
                .map_err(|e| CacheError::Extract(format!("Unpack failed: {e}")))?;
            return Ok(());
        }
    }

    Err(CacheError::Extract(format!(
        "'{member}' not found in archive"
    )))
}
