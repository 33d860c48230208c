//! Face box detector.
//!
//! Runs a single-output detection network on a letterboxed frame and decodes
//! rows of `[cx, cy, w, h, confidence, class]` back into source-frame boxes.

use crate::model::{InferenceError, InferenceModel, Tensor};
use crate::nms::nms;
use crate::types::{BoundingBox, FaceCandidate};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use std::borrow::Cow;

pub const DETECTOR_INPUT_SIZE: u32 = 640;
pub const DETECTOR_CONFIDENCE_THRESHOLD: f32 = 0.5;
pub const DETECTOR_NMS_THRESHOLD: f32 = 0.4;
/// Letterbox padding value, the usual YOLO gray.
const LETTERBOX_FILL: f32 = 114.0;
const PIXEL_SCALE: f32 = 255.0;
const VALUES_PER_ROW: usize = 6;

/// Metadata for coordinate de-mapping after letterbox resize.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxInfo {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub source_width: f32,
    pub source_height: f32,
}

impl LetterboxInfo {
    /// Map a point from letterboxed input space back to the source frame.
    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Resize `frame` into a `size × size` canvas preserving aspect ratio.
///
/// The image is centered with gray padding and normalized to `[0, 1]` in
/// planar RGB (NCHW) order.
pub fn letterbox(frame: &RgbImage, size: u32) -> (Array4<f32>, LetterboxInfo) {
    let (width, height) = frame.dimensions();
    let scale = (size as f32 / width as f32).min(size as f32 / height as f32);

    let new_w = ((width as f32 * scale).round() as u32).clamp(1, size);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, size);
    // Whole-pixel offsets, the same ones the pixels are written at.
    let pad_x = ((size - new_w) / 2) as f32;
    let pad_y = ((size - new_h) / 2) as f32;

    let info = LetterboxInfo {
        scale,
        pad_x,
        pad_y,
        source_width: width as f32,
        source_height: height as f32,
    };

    let resized = imageops::resize(frame, new_w, new_h, FilterType::Triangle);

    let side = size as usize;
    let mut tensor = Array4::<f32>::from_elem((1, 3, side, side), LETTERBOX_FILL / PIXEL_SCALE);

    let (pad_x_start, pad_y_start) = (pad_x as usize, pad_y as usize);
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = (x as usize + pad_x_start, y as usize + pad_y_start);
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = pixel[c] as f32 / PIXEL_SCALE;
        }
    }

    (tensor, info)
}

/// Decode raw detector output into source-frame candidates.
///
/// Rows below `threshold` are rejected; surviving boxes are un-padded,
/// un-scaled and clamped to the source frame. Candidates carry no landmarks.
pub fn decode_detections(
    raw: &Tensor,
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<FaceCandidate> {
    let rows = row_major(raw);

    rows.chunks_exact(VALUES_PER_ROW)
        .filter_map(|row| {
            let (cx, cy, w, h, confidence) = (row[0], row[1], row[2], row[3], row[4]);
            // Negated comparison also rejects NaN scores.
            if !(confidence >= threshold) {
                return None;
            }

            let (x1, y1) = letterbox.to_source(cx - w / 2.0, cy - h / 2.0);
            let (x2, y2) = letterbox.to_source(cx + w / 2.0, cy + h / 2.0);
            let bbox = BoundingBox::new(x1, y1, x2, y2)
                .clamped(letterbox.source_width, letterbox.source_height);

            Some(FaceCandidate {
                bbox,
                confidence,
                landmarks: None,
            })
        })
        .collect()
}

/// Return detector rows in `[N, 6]` order.
///
/// Some exports emit `[1, 6, N]` (attribute-major); those are transposed.
fn row_major(raw: &Tensor) -> Cow<'_, [f32]> {
    let dims: Vec<usize> = raw.shape.iter().copied().filter(|&d| d != 1).collect();
    match dims.as_slice() {
        [VALUES_PER_ROW, n] if *n != VALUES_PER_ROW && raw.data.len() == VALUES_PER_ROW * n => {
            let n = *n;
            let mut rows = vec![0.0f32; raw.data.len()];
            for attr in 0..VALUES_PER_ROW {
                for i in 0..n {
                    rows[i * VALUES_PER_ROW + attr] = raw.data[attr * n + i];
                }
            }
            Cow::Owned(rows)
        }
        _ => Cow::Borrowed(&raw.data),
    }
}

/// Whole-frame face box detector.
pub struct FaceDetector<M> {
    model: M,
    input_size: u32,
    confidence_threshold: f32,
    nms_threshold: f32,
}

impl<M: InferenceModel> FaceDetector<M> {
    pub fn new(model: M, input_size: u32, confidence_threshold: f32, nms_threshold: f32) -> Self {
        Self {
            model,
            input_size,
            confidence_threshold,
            nms_threshold,
        }
    }

    /// Detect faces in an RGB frame, returning boxes sorted by confidence.
    pub async fn detect(&mut self, frame: &RgbImage) -> Result<Vec<FaceCandidate>, InferenceError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Ok(Vec::new());
        }

        let (input, letterbox) = letterbox(frame, self.input_size);
        let outputs = self.model.run(input).await?;
        let raw = outputs.get(0).ok_or(InferenceError::MissingOutput(0))?;

        let candidates = decode_detections(raw, &letterbox, self.confidence_threshold);
        let kept = nms(candidates, self.nms_threshold);
        tracing::debug!(faces = kept.len(), "box stage decoded");

        Ok(kept)
    }
}
