//! Page images: rasterise PDFs via pdfium and decode standalone images.
//!
//! Everything here is blocking. The driver calls into this module from
//! `tokio::task::spawn_blocking` because pdfium and the image decoders are
//! CPU-bound and pdfium is not async-safe.
//!
//! Rendering is capped by `max_rendered_pixels` on the longest edge rather
//! than by DPI: page sizes vary wildly and the model resizes every page to
//! its own input size anyway.

use crate::error::{ItemError, RasterError, ScanError};
use image::{DynamicImage, RgbImage};
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Converts a PDF into its ordered page images.
///
/// All-or-nothing: an implementation returns every page or an error, never
/// a prefix. Every image is 3-channel RGB.
pub trait Rasterizer: Send + Sync {
    fn rasterize(&self, pdf_path: &Path) -> Result<Vec<RgbImage>, RasterError>;
}

/// [`Rasterizer`] backed by the PDFium shared library.
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    library: PathBuf,
    max_pixels: u32,
}

impl PdfiumRasterizer {
    /// Locate PDFium and check that it binds.
    ///
    /// `tool_location` is an explicit library file or directory; `None`
    /// falls back to `PDFIUM_LIB_PATH` and then to the cached download
    /// (fetched on first use). Blocking: may download.
    pub fn new(tool_location: Option<&Path>, max_pixels: u32) -> Result<Self, ScanError> {
        let library = artifact_cache::pdfium::resolve_library(tool_location, None)
            .map_err(|e| ScanError::PdfiumBindingFailed(e.to_string()))?;

        artifact_cache::pdfium::bind(&library)
            .map_err(|e| ScanError::PdfiumBindingFailed(e.to_string()))?;

        info!("Using PDFium at {}", library.display());
        Ok(Self {
            library,
            max_pixels,
        })
    }

    /// Path of the bound library.
    pub fn library_path(&self) -> &Path {
        &self.library
    }
}

impl Rasterizer for PdfiumRasterizer {
    fn rasterize(&self, pdf_path: &Path) -> Result<Vec<RgbImage>, RasterError> {
        let pdfium = artifact_cache::pdfium::bind(&self.library)
            .map_err(|e| RasterError::Binding(e.to_string()))?;

        let document = pdfium
            .load_pdf_from_file(pdf_path, None)
            .map_err(|e| {
                let detail = format!("{:?}", e);
                if detail.contains("Password") || detail.contains("password") {
                    RasterError::PasswordRequired
                } else {
                    RasterError::Corrupt(detail)
                }
            })?;

        let pages = document.pages();
        let total = pages.len() as usize;
        if total == 0 {
            return Err(RasterError::Empty);
        }
        debug!("{}: {} page(s)", pdf_path.display(), total);

        let render_config = PdfRenderConfig::new()
            .set_target_width(self.max_pixels as i32)
            .set_maximum_height(self.max_pixels as i32);

        let mut images = Vec::with_capacity(total);
        for idx in 0..total {
            let page_error = |e: PdfiumError| RasterError::Page {
                page: idx + 1,
                detail: format!("{:?}", e),
            };

            let page = pages.get(idx as u16).map_err(page_error)?;
            let bitmap = page.render_with_config(&render_config).map_err(page_error)?;
            let image = bitmap.as_image().to_rgb8();

            debug!(
                "Rendered page {} → {}x{} px",
                idx + 1,
                image.width(),
                image.height()
            );
            images.push(image);
        }

        Ok(images)
    }
}

/// Decode a standalone image file into 3-channel RGB.
///
/// Grayscale, RGBA, 16-bit and paletted inputs are all converted; alpha is
/// dropped.
pub fn load_image(path: &Path) -> Result<RgbImage, ItemError> {
    let decode_error = |detail: String| ItemError::ImageDecode {
        path: path.to_path_buf(),
        detail,
    };

    let image: DynamicImage = image::ImageReader::open(path)
        .map_err(|e| decode_error(e.to_string()))?
        .with_guessed_format()
        .map_err(|e| decode_error(e.to_string()))?
        .decode()
        .map_err(|e| decode_error(e.to_string()))?;

    Ok(match image {
        DynamicImage::ImageRgb8(rgb) => rgb,
        other => other.to_rgb8(),
    })
}
