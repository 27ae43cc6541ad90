//! Input discovery: list the images and PDFs directly inside the input root.
//!
//! The scan is flat. Subdirectories, hidden files and unsupported extensions
//! are skipped without comment; only the four recognised extensions count.

use crate::error::ScanError;
use crate::output::{InputItem, InputKind};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

/// The two disjoint input sequences, each sorted by file name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveredInputs {
    pub images: Vec<InputItem>,
    pub pdfs: Vec<InputItem>,
}

impl DiscoveredInputs {
    /// Total number of inputs.
    pub fn len(&self) -> usize {
        self.images.len() + self.pdfs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty() && self.pdfs.is_empty()
    }

    /// Processing order: every image, then every PDF.
    pub fn into_items(self) -> Vec<InputItem> {
        let mut items = self.images;
        items.extend(self.pdfs);
        items
    }
}

/// Enumerate the supported files in `dir`.
///
/// # Errors
/// * [`ScanError::InputDirNotFound`] when `dir` does not exist.
/// * [`ScanError::InputNotADirectory`] when `dir` is a file.
/// * [`ScanError::InputDirUnreadable`] when it cannot be listed.
pub fn discover_inputs(dir: &Path) -> Result<DiscoveredInputs, ScanError> {
    if !dir.exists() {
        return Err(ScanError::InputDirNotFound {
            path: dir.to_path_buf(),
        });
    }
    if !dir.is_dir() {
        return Err(ScanError::InputNotADirectory {
            path: dir.to_path_buf(),
        });
    }

    let unreadable = |source| ScanError::InputDirUnreadable {
        path: dir.to_path_buf(),
        source,
    };

    let mut found = DiscoveredInputs::default();
    for entry in std::fs::read_dir(dir).map_err(unreadable)? {
        let entry = entry.map_err(unreadable)?;
        let path = entry.path();

        // Dotfiles include macOS `._name` resource forks, which are not scans.
        if entry.file_name().to_string_lossy().starts_with('.') {
            debug!("Skipping hidden file {}", path.display());
            continue;
        }
        // `is_file` follows symlinks, so linked scans are picked up.
        if !path.is_file() {
            continue;
        }
        match InputKind::from_path(&path) {
            Some(InputKind::Image) => found.images.push(InputItem::new(path, InputKind::Image)),
            Some(InputKind::Pdf) => found.pdfs.push(InputItem::new(path, InputKind::Pdf)),
            None => debug!("Skipping unsupported file {}", path.display()),
        }
    }

    found.images.sort_by(|a, b| a.path.cmp(&b.path));
    found.pdfs.sort_by(|a, b| a.path.cmp(&b.path));

    warn_on_shared_base_names(&found.images);
    warn_on_shared_base_names(&found.pdfs);

    debug!(
        "Discovered {} image(s) and {} PDF(s) in {}",
        found.images.len(),
        found.pdfs.len(),
        dir.display()
    );
    Ok(found)
}

/// `scan.jpg` and `scan.png` both write `scan.txt`; the later one wins.
fn warn_on_shared_base_names(items: &[InputItem]) {
    let mut seen: HashMap<String, &Path> = HashMap::new();
    for item in items {
        if let Some(first) = seen.insert(item.base_name(), &item.path) {
            warn!(
                "{} and {} share a base name; the later one overwrites the earlier one's output",
                first.display(),
                item.path.display()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn names(items: &[InputItem]) -> Vec<String> {
        items
            .iter()
            .map(|i| i.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn splits_images_and_pdfs_and_sorts_them() {
        let dir = tempfile::tempdir().unwrap();
        for f in ["b.png", "a.JPG", "c.jpeg", "script.pdf", "other.PDF", "notes.txt", "scan.tiff"] {
            fs::write(dir.path().join(f), b"x").unwrap();
        }

        let found = discover_inputs(dir.path()).unwrap();
        assert_eq!(names(&found.images), ["a.JPG", "b.png", "c.jpeg"]);
        assert_eq!(names(&found.pdfs), ["other.PDF", "script.pdf"]);
        assert_eq!(found.len(), 5);
    }

    #[test]
    fn skips_hidden_files() {
        let dir = tempfile::tempdir().unwrap();
        for f in ["rx1.png", "._rx1.png", ".hidden.pdf"] {
            fs::write(dir.path().join(f), b"x").unwrap();
        }

        let found = discover_inputs(dir.path()).unwrap();
        assert_eq!(names(&found.images), ["rx1.png"]);
        assert!(found.pdfs.is_empty());
    }

    #[test]
    fn does_not_recurse() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("deep.png"), b"x").unwrap();
        fs::create_dir(dir.path().join("folder.pdf")).unwrap();

        let found = discover_inputs(dir.path()).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn images_come_before_pdfs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.pdf"), b"x").unwrap();
        fs::write(dir.path().join("z.png"), b"x").unwrap();

        let items = discover_inputs(dir.path()).unwrap().into_items();
        assert_eq!(items[0].kind, InputKind::Image);
        assert_eq!(items[1].kind, InputKind::Pdf);
    }

    #[test]
    fn missing_directory_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = discover_inputs(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, ScanError::InputDirNotFound { .. }));
    }

    #[test]
    fn file_instead_of_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("rx1.png");
        fs::write(&file, b"x").unwrap();

        let err = discover_inputs(&file).unwrap_err();
        assert!(matches!(err, ScanError::InputNotADirectory { .. }));
    }

    #[test]
    fn empty_directory_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(discover_inputs(dir.path()).unwrap(), DiscoveredInputs::default());
    }
}
