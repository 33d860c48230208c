//! Cutting detector boxes out of a frame for the landmark stage.

use crate::types::{BoundingBox, Point};
use image::{imageops, RgbImage};

/// A sub-image of a frame plus the offset that maps it back.
#[derive(Debug, Clone, PartialEq)]
pub struct CropRegion {
    pub image: RgbImage,
    /// Top-left corner in frame pixels.
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRegion {
    /// Offset that maps crop-local coordinates back into the frame.
    pub fn origin(&self) -> (f32, f32) {
        (self.x as f32, self.y as f32)
    }

    pub fn to_source(&self, (x, y): Point) -> Point {
        (x + self.x as f32, y + self.y as f32)
    }
}

/// Integer bounds `(x, y, width, height)` of `bbox` grown by `margin` of its
/// size on each side and clamped to the frame. `None` if nothing of the box
/// lies inside the frame.
pub fn crop_bounds(bbox: &BoundingBox, margin: f32, frame_width: u32, frame_height: u32) -> Option<(u32, u32, u32, u32)> {
    let mx = bbox.width() * margin;
    let my = bbox.height() * margin;

    let x1 = (bbox.x1 - mx).floor().max(0.0);
    let y1 = (bbox.y1 - my).floor().max(0.0);
    let x2 = (bbox.x2 + mx).ceil().min(frame_width as f32);
    let y2 = (bbox.y2 + my).ceil().min(frame_height as f32);

    if !(x2 > x1 && y2 > y1) {
        return None;
    }

    Some((x1 as u32, y1 as u32, (x2 - x1) as u32, (y2 - y1) as u32))
}

/// Copy the (margin-expanded, clamped) box region out of `frame`.
pub fn crop_region(frame: &RgbImage, bbox: &BoundingBox, margin: f32) -> Option<CropRegion> {
    let (x, y, width, height) = crop_bounds(bbox, margin, frame.width(), frame.height())?;
    let image = imageops::crop_imm(frame, x, y, width, height).to_image();
    Some(CropRegion {
        image,
        x,
        y,
        width,
        height,
    })
}
