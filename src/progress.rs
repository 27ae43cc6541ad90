//! Progress-callback trait for per-item and per-page run events.
//!
//! Inject an [`Arc<dyn RunProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the pipeline works through the input directory.
//!
//! # Example
//!
//! ```rust
//! use scanscribe::{PipelineConfig, RunProgressCallback};
//! use std::path::Path;
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct PageCounter(AtomicUsize);
//!
//! impl RunProgressCallback for PageCounter {
//!     fn on_page_complete(&self, input: &Path, page: Option<usize>, preview: &str) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{} {:?}: {}", input.display(), page, preview);
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(PageCounter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::{InputItem, ItemReport, RunSummary};
use std::path::Path;
use std::sync::Arc;

/// Called by the pipeline driver as it processes each item.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
///
/// # Thread safety
///
/// With `concurrency > 1`, events for different items may arrive
/// interleaved and from different threads. Events for pages of one PDF are
/// always delivered in page order.
pub trait RunProgressCallback: Send + Sync {
    /// Called once after discovery, before any item is processed.
    fn on_run_start(&self, images: usize, pdfs: usize) {
        let _ = (images, pdfs);
    }

    /// Called when work on one input begins.
    ///
    /// `pages` is known for PDFs only once rasterisation has finished;
    /// it is `1` for images.
    fn on_item_start(&self, item: &InputItem, pages: usize) {
        let _ = (item, pages);
    }

    /// Called after a page has been transcribed and written.
    ///
    /// # Arguments
    /// * `page`    — 1-indexed PDF page, or `None` for an image
    /// * `preview` — the first 100 characters of the transcription
    fn on_page_complete(&self, input: &Path, page: Option<usize>, preview: &str) {
        let _ = (input, page, preview);
    }

    /// Called when one page fails (transcription or write).
    fn on_page_error(&self, input: &Path, page: Option<usize>, error: &str) {
        let _ = (input, page, error);
    }

    /// Called once per item with its final report.
    fn on_item_complete(&self, report: &ItemReport) {
        let _ = report;
    }

    /// Called once after every item has been attempted.
    fn on_run_complete(&self, summary: &RunSummary) {
        let _ = summary;
    }
}

/// A no-op implementation; the default when no callback is configured.
pub struct NoopProgressCallback;

impl RunProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn RunProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{InputKind, ItemStatus};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Tracking {
        pages: AtomicUsize,
        errors: AtomicUsize,
        previews: Mutex<Vec<String>>,
    }

    impl RunProgressCallback for Tracking {
        fn on_page_complete(&self, _input: &Path, _page: Option<usize>, preview: &str) {
            self.pages.fetch_add(1, Ordering::SeqCst);
            self.previews.lock().unwrap().push(preview.to_string());
        }

        fn on_page_error(&self, _input: &Path, _page: Option<usize>, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        let item = InputItem::new("a.png", InputKind::Image);
        cb.on_run_start(1, 0);
        cb.on_item_start(&item, 1);
        cb.on_page_complete(&item.path, None, "text");
        cb.on_page_error(&item.path, Some(2), "boom");
        cb.on_item_complete(&ItemReport {
            input: item.path.clone(),
            kind: item.kind,
            status: ItemStatus::Failed,
            pages: vec![],
            combined_path: None,
            error: None,
            duration_ms: 0,
        });
    }

    #[test]
    fn overridden_methods_receive_events() {
        let tracker = Arc::new(Tracking::default());
        let cb: ProgressCallback = tracker.clone();
        let path = PathBuf::from("script.pdf");

        cb.on_run_start(0, 1);
        cb.on_page_complete(&path, Some(1), "one");
        cb.on_page_complete(&path, Some(2), "two");
        cb.on_page_error(&path, Some(3), "inference failed");

        assert_eq!(tracker.pages.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(*tracker.previews.lock().unwrap(), ["one", "two"]);
    }
}
