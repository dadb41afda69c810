//! Face detection seam
//!
//! Tracked mode asks a `FaceDetector` for a face rectangle every frame. The
//! built-in `SkinBoxDetector` needs no model: it returns the bounding box of
//! skin-coloured pixels, which is good enough for a single well-lit face.

use super::frame::{Frame, Rect};
use super::skin::is_skin;

/// Pluggable per-frame face detector
pub trait FaceDetector: Send {
    /// Detect the most prominent face, `None` if there is none
    fn detect(&mut self, frame: &Frame) -> Option<Rect>;
}

/// Bounding box of skin pixels on a sparse sampling grid
#[derive(Debug, Clone)]
pub struct SkinBoxDetector {
    /// Smallest accepted box side in pixels
    pub min_size: u32,
    /// Sampling stride in pixels
    pub stride: u32,
    /// Minimum fraction of sampled box pixels that must be skin
    pub min_fill: f64,
}

impl Default for SkinBoxDetector {
    fn default() -> Self {
        Self {
            min_size: 24,
            stride: 2,
            min_fill: 0.3,
        }
    }
}

impl FaceDetector for SkinBoxDetector {
    fn detect(&mut self, frame: &Frame) -> Option<Rect> {
        let Frame::Rgb(img) = frame else {
            return None;
        };
        let stride = self.stride.max(1) as usize;

        let mut hits = 0usize;
        let (mut x0, mut y0) = (u32::MAX, u32::MAX);
        let (mut x1, mut y1) = (0u32, 0u32);
        for y in (0..img.height()).step_by(stride) {
            for x in (0..img.width()).step_by(stride) {
                let [r, g, b] = img.get_pixel(x, y).0;
                if is_skin(r, g, b) {
                    hits += 1;
                    x0 = x0.min(x);
                    y0 = y0.min(y);
                    x1 = x1.max(x);
                    y1 = y1.max(y);
                }
            }
        }
        if hits == 0 {
            return None;
        }

        let width = x1 - x0 + 1;
        let height = y1 - y0 + 1;
        if width < self.min_size || height < self.min_size {
            return None;
        }

        let sampled = (width as f64 / stride as f64).ceil() * (height as f64 / stride as f64).ceil();
        if (hits as f64) < self.min_fill * sampled {
            return None;
        }

        Some(Rect::new(x0 as i32, y0 as i32, width as i32, height as i32))
    }
}
