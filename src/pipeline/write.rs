//! Output artifacts: deterministic names, atomic writes.
//!
//! | Source              | Artifact                       |
//! |---------------------|--------------------------------|
//! | image `rx1.png`     | `rx1.txt`                      |
//! | PDF page `i`        | `{base}_page{i}.txt`           |
//! | whole PDF           | `{base}_complete.txt`          |
//!
//! Names are a pure function of base name and page index, so the final
//! output layout does not depend on processing order.

use crate::error::ItemError;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Writes transcriptions into one output directory.
#[derive(Debug, Clone)]
pub struct OutputWriter {
    dir: PathBuf,
}

impl OutputWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `{out}/{base}.txt` for an image, `{out}/{base}_page{i}.txt` for page `i`.
    pub fn page_path(&self, base: &str, page_index: Option<usize>) -> PathBuf {
        match page_index {
            None => self.dir.join(format!("{base}.txt")),
            Some(i) => self.dir.join(format!("{base}_page{i}.txt")),
        }
    }

    /// `{out}/{base}_complete.txt`.
    pub fn combined_path(&self, base: &str) -> PathBuf {
        self.dir.join(format!("{base}_complete.txt"))
    }

    /// Persist the text of one page, replacing any earlier artifact.
    pub fn write_page(
        &self,
        base: &str,
        page_index: Option<usize>,
        text: &str,
    ) -> Result<PathBuf, ItemError> {
        let path = self.page_path(base, page_index);
        self.write_atomic(&path, text)?;
        Ok(path)
    }

    /// Persist the combined document.
    ///
    /// `pages` must be in ascending page order starting at 1; entry `k`
    /// becomes `--- Page {k+1} ---\n{text}\n`.
    pub fn write_combined(&self, base: &str, pages: &[&str]) -> Result<PathBuf, ItemError> {
        let path = self.combined_path(base);
        self.write_atomic(&path, &combine_pages(pages))?;
        Ok(path)
    }

    /// Temp file in the target directory, then rename over the target.
    fn write_atomic(&self, path: &Path, contents: &str) -> Result<(), ItemError> {
        let write_error = |e: &dyn std::fmt::Display| ItemError::Write {
            path: path.to_path_buf(),
            detail: e.to_string(),
        };

        std::fs::create_dir_all(&self.dir).map_err(|e| write_error(&e))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir).map_err(|e| write_error(&e))?;
        tmp.write_all(contents.as_bytes())
            .map_err(|e| write_error(&e))?;
        tmp.persist(path).map_err(|e| write_error(&e.error))?;

        debug!("Wrote {} ({} bytes)", path.display(), contents.len());
        Ok(())
    }
}

/// Concatenate page texts under `--- Page i ---` headers.
pub fn combine_pages(pages: &[&str]) -> String {
    let mut out = String::with_capacity(pages.iter().map(|p| p.len() + 20).sum());
    for (i, text) in pages.iter().enumerate() {
        out.push_str(&format!("--- Page {} ---\n{}\n", i + 1, text));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn path_naming() {
        let w = OutputWriter::new("output");
        assert_eq!(w.page_path("rx1", None), PathBuf::from("output/rx1.txt"));
        assert_eq!(w.page_path("script", Some(2)), PathBuf::from("output/script_page2.txt"));
        assert_eq!(w.combined_path("script"), PathBuf::from("output/script_complete.txt"));
    }

    #[test]
    fn combined_layout() {
        assert_eq!(
            combine_pages(&["first", "second"]),
            "--- Page 1 ---\nfirst\n--- Page 2 ---\nsecond\n"
        );
        assert_eq!(combine_pages(&[]), "");
    }

    #[test]
    fn creates_missing_output_directory() {
        let root = tempfile::tempdir().unwrap();
        let w = OutputWriter::new(root.path().join("a").join("b"));

        let path = w.write_page("rx1", None, "Paracetamol").unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), "Paracetamol");
    }

    #[test]
    fn overwrites_and_leaves_no_temp_files() {
        let root = tempfile::tempdir().unwrap();
        let w = OutputWriter::new(root.path());

        w.write_page("script", Some(1), "old text that is longer").unwrap();
        let path = w.write_page("script", Some(1), "new").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "new");

        let entries: Vec<_> = fs::read_dir(root.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn writes_utf8_verbatim() {
        let root = tempfile::tempdir().unwrap();
        let w = OutputWriter::new(root.path());
        let path = w.write_combined("doc", &["5 µg — bid", ""]).unwrap();
        assert_eq!(
            fs::read_to_string(path).unwrap(),
            "--- Page 1 ---\n5 µg — bid\n--- Page 2 ---\n\n"
        );
    }

    #[test]
    fn unwritable_target_is_a_write_error() {
        let root = tempfile::tempdir().unwrap();
        let blocker = root.path().join("out");
        fs::write(&blocker, b"a file where the directory should be").unwrap();

        let err = OutputWriter::new(&blocker).write_page("x", None, "t").unwrap_err();
        assert!(matches!(err, ItemError::Write { .. }));
    }
}
