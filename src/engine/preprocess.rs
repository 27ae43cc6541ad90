//! Image preprocessing with Donut image-processor semantics.
//!
//! Steps, each switchable from `preprocessor_config.json`:
//!
//! 1. align long axis: rotate 90° when the page orientation disagrees with
//!    the target (off unless `do_align_long_axis`)
//! 2. resize so the shortest edge equals `min(height, width)` of the target,
//!    keeping aspect ratio
//! 3. thumbnail: shrink to fit inside the target, keeping aspect ratio
//! 4. pad with zeros, centred, to exactly the target size
//! 5. rescale (`× rescale_factor`) and normalise (`(x − mean) / std`)
//!
//! The result is a CHW `[1, 3, H, W]` f32 tensor.

use crate::error::EngineError;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use ndarray::Array4;
use serde::Deserialize;
use std::path::Path;

fn yes() -> bool {
    true
}

fn half() -> [f32; 3] {
    [0.5, 0.5, 0.5]
}

fn default_rescale() -> f32 {
    1.0 / 255.0
}

/// Target size as written by different exporter versions.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
enum SizeSpec {
    HeightWidth { height: u32, width: u32 },
    /// Older configs: `[width, height]`.
    WidthHeight([u32; 2]),
}

impl SizeSpec {
    fn height_width(self) -> (u32, u32) {
        match self {
            SizeSpec::HeightWidth { height, width } => (height, width),
            SizeSpec::WidthHeight([width, height]) => (height, width),
        }
    }
}

/// The subset of `preprocessor_config.json` the engine honours.
#[derive(Debug, Clone, Deserialize)]
struct PreprocessorConfig {
    #[serde(default)]
    do_align_long_axis: bool,
    #[serde(default = "yes")]
    do_resize: bool,
    #[serde(default = "yes")]
    do_thumbnail: bool,
    #[serde(default = "yes")]
    do_pad: bool,
    #[serde(default = "yes")]
    do_rescale: bool,
    #[serde(default = "yes")]
    do_normalize: bool,
    size: SizeSpec,
    #[serde(default = "default_rescale")]
    rescale_factor: f32,
    #[serde(default = "half")]
    image_mean: [f32; 3],
    #[serde(default = "half")]
    image_std: [f32; 3],
}

/// Turns page images into encoder input tensors.
#[derive(Debug, Clone)]
pub struct DonutPreprocessor {
    config: PreprocessorConfig,
    height: u32,
    width: u32,
}

impl DonutPreprocessor {
    /// Read `preprocessor_config.json`.
    pub fn from_file(path: &Path) -> Result<Self, EngineError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Preprocess(format!("{}: {e}", path.display())))?;
        Self::from_json(&raw)
    }

    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let config: PreprocessorConfig = serde_json::from_str(json)
            .map_err(|e| EngineError::Preprocess(format!("preprocessor_config.json: {e}")))?;
        let (height, width) = config.size.height_width();
        if height == 0 || width == 0 {
            return Err(EngineError::Preprocess(format!(
                "target size {width}x{height} is empty"
            )));
        }
        if config.image_std.iter().any(|&s| s == 0.0) {
            return Err(EngineError::Preprocess("image_std contains zero".into()));
        }
        Ok(Self {
            config,
            height,
            width,
        })
    }

    pub fn target_height(&self) -> u32 {
        self.height
    }

    pub fn target_width(&self) -> u32 {
        self.width
    }

    /// Produce the `[1, 3, H, W]` pixel tensor for one page.
    pub fn preprocess(&self, image: &RgbImage) -> Result<Array4<f32>, EngineError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(EngineError::Preprocess("image has no pixels".into()));
        }
        let c = &self.config;

        // ── Step 1: Orientation ──
        let mut img = if c.do_align_long_axis && self.orientation_mismatch(image) {
            imageops::rotate90(image)
        } else {
            image.clone()
        };

        // ── Step 2: Shortest-edge resize ──
        if c.do_resize {
            img = self.resize_shortest_edge(&img);
        }

        // ── Step 3: Thumbnail ──
        if c.do_thumbnail {
            img = self.thumbnail(&img);
        }

        // ── Step 4: Centre padding ──
        let (img, offset_x, offset_y) = if c.do_pad {
            self.pad_centered(&img)
        } else {
            (img, 0, 0)
        };

        // ── Step 5: Rescale + normalise into CHW ──
        Ok(self.to_tensor(&img, offset_x, offset_y))
    }

    fn orientation_mismatch(&self, image: &RgbImage) -> bool {
        let (in_w, in_h) = image.dimensions();
        (self.width < self.height && in_w > in_h) || (self.width > self.height && in_w < in_h)
    }

    fn resize_shortest_edge(&self, img: &RgbImage) -> RgbImage {
        let target = self.height.min(self.width) as u64;
        let (w, h) = (img.width() as u64, img.height() as u64);
        let (new_w, new_h) = if w <= h {
            (target, target * h / w)
        } else {
            (target * w / h, target)
        };
        resize(img, new_w as u32, new_h as u32, FilterType::Triangle)
    }

    fn thumbnail(&self, img: &RgbImage) -> RgbImage {
        let (in_w, in_h) = img.dimensions();
        let mut h = in_h.min(self.height);
        let mut w = in_w.min(self.width);

        if h == in_h && w == in_w {
            return img.clone();
        }
        if in_h > in_w {
            w = (in_w as u64 * h as u64 / in_h as u64) as u32;
        } else if in_w > in_h {
            h = (in_h as u64 * w as u64 / in_w as u64) as u32;
        }
        resize(img, w, h, FilterType::CatmullRom)
    }

    /// Returns the image unchanged plus its offset inside the target canvas;
    /// the zero border is produced by [`Self::to_tensor`].
    fn pad_centered(&self, img: &RgbImage) -> (RgbImage, u32, u32) {
        let dx = self.width.saturating_sub(img.width());
        let dy = self.height.saturating_sub(img.height());
        (img.clone(), dx / 2, dy / 2)
    }

    fn to_tensor(&self, img: &RgbImage, offset_x: u32, offset_y: u32) -> Array4<f32> {
        let c = &self.config;
        let (h, w) = (self.height as usize, self.width as usize);

        let normalise = |channel: usize, raw: f32| {
            let mut v = raw;
            if c.do_rescale {
                v *= c.rescale_factor;
            }
            if c.do_normalize {
                v = (v - c.image_mean[channel]) / c.image_std[channel];
            }
            v
        };

        // Padding pixels are black before rescale/normalise.
        let mut tensor = Array4::<f32>::zeros((1, 3, h, w));
        for ch in 0..3 {
            tensor
                .slice_mut(ndarray::s![0, ch, .., ..])
                .fill(normalise(ch, 0.0));
        }

        for (x, y, Rgb(px)) in img.enumerate_pixels() {
            let (tx, ty) = ((x + offset_x) as usize, (y + offset_y) as usize);
            if tx >= w || ty >= h {
                continue;
            }
            for ch in 0..3 {
                tensor[[0, ch, ty, tx]] = normalise(ch, px[ch] as f32);
            }
        }
        tensor
    }
}

fn resize(img: &RgbImage, w: u32, h: u32, filter: FilterType) -> RgbImage {
    let (w, h) = (w.max(1), h.max(1));
    if img.dimensions() == (w, h) {
        return img.clone();
    }
    imageops::resize(img, w, h, filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMALL: &str = r#"{
        "do_align_long_axis": false,
        "size": {"height": 8, "width": 6},
        "image_mean": [0.5, 0.5, 0.5],
        "image_std": [0.5, 0.5, 0.5]
    }"#;

    fn white(w: u32, h: u32) -> RgbImage {
        RgbImage::from_pixel(w, h, Rgb([255, 255, 255]))
    }

    fn row(t: &Array4<f32>, y: usize) -> Vec<f32> {
        t.slice(ndarray::s![0, 0, y, ..]).to_vec()
    }

    #[test]
    fn reads_both_size_layouts() {
        let p = DonutPreprocessor::from_json(SMALL).unwrap();
        assert_eq!((p.target_width(), p.target_height()), (6, 8));

        let p = DonutPreprocessor::from_json(r#"{"size": [1920, 2560]}"#).unwrap();
        assert_eq!((p.target_width(), p.target_height()), (1920, 2560));
    }

    #[test]
    fn output_shape_is_fixed() {
        let p = DonutPreprocessor::from_json(SMALL).unwrap();
        for (w, h) in [(1, 1), (3, 3), (100, 7), (7, 100)] {
            let t = p.preprocess(&white(w, h)).unwrap();
            assert_eq!(t.shape(), &[1, 3, 8, 6], "input {w}x{h}");
        }
    }

    #[test]
    fn square_input_is_padded_top_and_bottom() {
        let p = DonutPreprocessor::from_json(SMALL).unwrap();
        // 3x3 → shortest edge 6 → 6x6, padded by 1 row above and below.
        let t = p.preprocess(&white(3, 3)).unwrap();

        assert!(row(&t, 0).iter().all(|&v| v == -1.0));
        assert!(row(&t, 7).iter().all(|&v| v == -1.0));
        for y in 1..7 {
            assert!(row(&t, y).iter().all(|&v| (v - 1.0).abs() < 1e-6), "row {y}");
        }
    }

    #[test]
    fn wide_input_keeps_aspect_ratio() {
        let p = DonutPreprocessor::from_json(SMALL).unwrap();
        // 10x4 → 15x6 → thumbnail 6x2 → centred at rows 3..5.
        let t = p.preprocess(&white(10, 4)).unwrap();

        for y in [0, 1, 2, 5, 6, 7] {
            assert!(row(&t, y).iter().all(|&v| v == -1.0), "row {y} should be padding");
        }
        for y in [3, 4] {
            assert!(row(&t, y).iter().all(|&v| v > 0.99), "row {y} should be content");
        }
    }

    #[test]
    fn long_axis_alignment_rotates_landscape_pages() {
        let json = r#"{"do_align_long_axis": true, "do_resize": false,
                       "do_thumbnail": false, "size": {"height": 8, "width": 6}}"#;
        let p = DonutPreprocessor::from_json(json).unwrap();

        // A 6x4 landscape page becomes 4x6 portrait, centred with 1 column each side.
        let t = p.preprocess(&white(6, 4)).unwrap();
        let first_row = row(&t, 1);
        assert_eq!(first_row[0], -1.0);
        assert!(first_row[1] > 0.99);
        assert_eq!(first_row[5], -1.0);
    }

    #[test]
    fn rescale_and_normalise_can_be_disabled() {
        let json = r#"{"do_rescale": false, "do_normalize": false, "do_pad": true,
                       "size": {"height": 2, "width": 2}}"#;
        let p = DonutPreprocessor::from_json(json).unwrap();
        let t = p.preprocess(&RgbImage::from_pixel(2, 2, Rgb([10, 20, 30]))).unwrap();
        assert_eq!(t[[0, 0, 0, 0]], 10.0);
        assert_eq!(t[[0, 2, 1, 1]], 30.0);
    }

    #[test]
    fn rejects_degenerate_configs() {
        assert!(DonutPreprocessor::from_json(r#"{"size": {"height": 0, "width": 4}}"#).is_err());
        assert!(DonutPreprocessor::from_json(r#"{"size": [4, 4], "image_std": [0, 1, 1]}"#).is_err());
        assert!(DonutPreprocessor::from_json("{}").is_err());
    }
}
