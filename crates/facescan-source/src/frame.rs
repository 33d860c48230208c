//! Frame type and cheap per-frame checks.

use image::RgbImage;
use std::time::Instant;

/// Fraction of near-black pixels above which a frame counts as dark.
pub const DARK_FRAME_FRACTION: f32 = 0.95;
/// Luma below this value counts as near-black.
const DARK_LUMA: u8 = 32;

/// A decoded RGB frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
    pub sequence: u32,
    pub is_dark: bool,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u32) -> Self {
        let (width, height) = image.dimensions();
        let is_dark = is_dark_frame(&image, DARK_FRAME_FRACTION);
        Self {
            image,
            width,
            height,
            timestamp: Instant::now(),
            sequence,
            is_dark,
        }
    }

    /// Average luma (0.0 to 255.0).
    pub fn avg_brightness(&self) -> f32 {
        let n = (self.width as usize) * (self.height as usize);
        if n == 0 {
            return 0.0;
        }
        self.image.pixels().map(|p| luma(p.0) as f32).sum::<f32>() / n as f32
    }
}

/// BT.601 integer luma.
fn luma([r, g, b]: [u8; 3]) -> u8 {
    ((299 * r as u32 + 587 * g as u32 + 114 * b as u32) / 1000) as u8
}

/// True if more than `threshold_pct` of pixels are near-black.
///
/// Empty frames are dark.
pub fn is_dark_frame(image: &RgbImage, threshold_pct: f32) -> bool {
    let total = (image.width() as usize) * (image.height() as usize);
    if total == 0 {
        return true;
    }
    let dark = image.pixels().filter(|p| luma(p.0) < DARK_LUMA).count();
    (dark as f32 / total as f32) > threshold_pct
}
