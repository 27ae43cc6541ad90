//! Run inputs and results: what was found, what was written, what failed.

use crate::error::ItemError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The two kinds of input file the pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    /// A standalone `.jpg`, `.jpeg` or `.png`; exactly one page.
    Image,
    /// A `.pdf`; one page image per PDF page.
    Pdf,
}

impl InputKind {
    /// Classifies a path by its extension (case-insensitive).
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" | "png" => Some(Self::Image),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }
}

/// One discovered input file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputItem {
    pub path: PathBuf,
    pub kind: InputKind,
}

impl InputItem {
    pub fn new(path: impl Into<PathBuf>, kind: InputKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    /// File name without its extension; the stem of every output name.
    pub fn base_name(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Outcome of one attempted page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResult {
    /// 1-indexed PDF page, or `None` for a standalone image.
    pub page_index: Option<usize>,

    /// Cleaned transcription. Empty when the page failed.
    pub text: String,

    /// Artifact written for this page, if any.
    pub output_path: Option<PathBuf>,

    /// Wall-clock time spent transcribing and writing this page.
    pub duration_ms: u64,

    /// Why this page has no artifact.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ItemError>,
}

impl PageResult {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Final state of one input item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    /// Every page was transcribed and written (plus the combined file for PDFs).
    Done,
    /// Some PDF pages were written, at least one failed; no combined file.
    Partial,
    /// Nothing was written for this item.
    Failed,
}

/// Report for one input item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemReport {
    pub input: PathBuf,
    pub kind: InputKind,
    pub status: ItemStatus,
    pub pages: Vec<PageResult>,

    /// `{base}_complete.txt`, only for fully successful PDFs.
    pub combined_path: Option<PathBuf>,

    /// Item-level failure (rasterisation, decode, partial document).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ItemError>,

    pub duration_ms: u64,
}

impl ItemReport {
    /// Paths of every artifact written for this item, pages first.
    pub fn written_paths(&self) -> Vec<&Path> {
        self.pages
            .iter()
            .filter_map(|p| p.output_path.as_deref())
            .chain(self.combined_path.as_deref())
            .collect()
    }
}

/// Aggregate result of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub output_dir: PathBuf,
    pub items: Vec<ItemReport>,
    pub images_found: usize,
    pub pdfs_found: usize,
    pub succeeded: usize,
    pub partial: usize,
    pub failed: usize,
    /// Per-page artifacts written (combined files not counted).
    pub pages_written: usize,
    pub total_duration_ms: u64,
}

impl RunSummary {
    /// Builds the totals from the item reports.
    pub fn from_items(
        output_dir: PathBuf,
        mut items: Vec<ItemReport>,
        images_found: usize,
        pdfs_found: usize,
        total_duration_ms: u64,
    ) -> Self {
        // Concurrent runs finish in any order; report in input order.
        items.sort_by(|a, b| {
            (a.kind == InputKind::Pdf, &a.input).cmp(&(b.kind == InputKind::Pdf, &b.input))
        });

        let count = |s: ItemStatus| items.iter().filter(|i| i.status == s).count();
        let pages_written = items
            .iter()
            .flat_map(|i| &i.pages)
            .filter(|p| p.output_path.is_some())
            .count();

        Self {
            succeeded: count(ItemStatus::Done),
            partial: count(ItemStatus::Partial),
            failed: count(ItemStatus::Failed),
            output_dir,
            items,
            images_found,
            pdfs_found,
            pages_written,
            total_duration_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(idx: Option<usize>, written: bool) -> PageResult {
        PageResult {
            page_index: idx,
            text: "x".into(),
            output_path: written.then(|| PathBuf::from(format!("out/p{}.txt", idx.unwrap_or(0)))),
            duration_ms: 1,
            error: None,
        }
    }

    fn report(input: &str, kind: InputKind, status: ItemStatus, pages: Vec<PageResult>) -> ItemReport {
        ItemReport {
            input: PathBuf::from(input),
            kind,
            status,
            pages,
            combined_path: None,
            error: None,
            duration_ms: 1,
        }
    }

    #[test]
    fn kind_from_extension_is_case_insensitive() {
        assert_eq!(InputKind::from_path(Path::new("a.JPG")), Some(InputKind::Image));
        assert_eq!(InputKind::from_path(Path::new("a.jpeg")), Some(InputKind::Image));
        assert_eq!(InputKind::from_path(Path::new("a.Png")), Some(InputKind::Image));
        assert_eq!(InputKind::from_path(Path::new("a.PDF")), Some(InputKind::Pdf));
        assert_eq!(InputKind::from_path(Path::new("a.tiff")), None);
        assert_eq!(InputKind::from_path(Path::new("README")), None);
    }

    #[test]
    fn base_name_drops_only_the_last_extension() {
        let item = InputItem::new("scans/rx.2024.png", InputKind::Image);
        assert_eq!(item.base_name(), "rx.2024");
    }

    #[test]
    fn summary_counts_and_orders_items() {
        let items = vec![
            report("in/b.pdf", InputKind::Pdf, ItemStatus::Partial, vec![page(Some(1), true), page(Some(2), false)]),
            report("in/z.png", InputKind::Image, ItemStatus::Done, vec![page(None, true)]),
            report("in/a.pdf", InputKind::Pdf, ItemStatus::Failed, vec![]),
        ];
        let s = RunSummary::from_items(PathBuf::from("out"), items, 1, 2, 10);

        assert_eq!((s.succeeded, s.partial, s.failed), (1, 1, 1));
        assert_eq!(s.pages_written, 2);
        let order: Vec<_> = s.items.iter().map(|i| i.input.to_str().unwrap()).collect();
        assert_eq!(order, ["in/z.png", "in/a.pdf", "in/b.pdf"]);
    }

    #[test]
    fn status_serialises_lowercase() {
        assert_eq!(serde_json::to_string(&ItemStatus::Partial).unwrap(), "\"partial\"");
        assert_eq!(serde_json::to_string(&InputKind::Pdf).unwrap(), "\"pdf\"");
    }
}
