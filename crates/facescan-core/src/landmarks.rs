//! SCRFD-style landmark detector.
//!
//! Runs on a face crop resized to a square input and decodes the three
//! stride levels (8/16/32) of anchor-free score, box and keypoint tensors
//! into candidates carrying five facial landmarks.

use crate::config::ConfigError;
use crate::model::{InferenceError, InferenceModel};
use crate::nms::nms;
use crate::types::{BoundingBox, FaceCandidate, Landmarks};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use thiserror::Error;

pub const LANDMARK_INPUT_SIZE: u32 = 640;
pub const LANDMARK_CONFIDENCE_THRESHOLD: f32 = 0.6;
pub const LANDMARK_NMS_THRESHOLD: f32 = 0.4;
pub const LANDMARK_STRIDES: [usize; 3] = [8, 16, 32];
const LANDMARK_MEAN: f32 = 127.5;
const LANDMARK_STD: f32 = 128.0;

/// Anchors per feature-map cell assumed when tensor lengths don't reveal it.
pub const FALLBACK_ANCHORS_PER_CELL: usize = 2;
/// Score channels per anchor assumed when tensor lengths don't reveal it.
pub const FALLBACK_SCORES_PER_ANCHOR: usize = 1;
const BOX_VALUES: usize = 4;
const KPS_VALUES: usize = 10;

/// Output tensor indices for one stride: (score_idx, bbox_idx, kps_idx).
pub type StrideOutputIndices = (usize, usize, usize);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("feature map has no cells")]
    EmptyGrid,
    #[error("{tensor} tensor too short: need {needed} values, got {actual}")]
    TooShort {
        tensor: &'static str,
        needed: usize,
        actual: usize,
    },
}

/// Per-stride tensor layout recovered from raw tensor lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrideLayout {
    pub anchors_per_cell: usize,
    pub scores_per_anchor: usize,
    pub has_keypoints: bool,
}

/// Work out the anchor layout of one stride level from its tensor lengths.
///
/// `anchors_per_cell = box_len / (cells × 4)` when that divides evenly and is
/// nonzero, else [`FALLBACK_ANCHORS_PER_CELL`]. `scores_per_anchor` is derived
/// the same way from `score_len`, else [`FALLBACK_SCORES_PER_ANCHOR`].
/// Keypoints are usable only if `kps_len` covers 10 values per anchor.
pub fn negotiate_layout(
    cells: usize,
    score_len: usize,
    box_len: usize,
    kps_len: usize,
) -> Result<StrideLayout, LayoutError> {
    if cells == 0 {
        return Err(LayoutError::EmptyGrid);
    }

    let per_anchor_boxes = cells * BOX_VALUES;
    let anchors_per_cell = match box_len / per_anchor_boxes {
        n if n > 0 && box_len % per_anchor_boxes == 0 => n,
        _ => FALLBACK_ANCHORS_PER_CELL,
    };
    let anchors = cells * anchors_per_cell;

    let scores_per_anchor = match score_len / anchors {
        n if n > 0 && score_len % anchors == 0 => n,
        _ => FALLBACK_SCORES_PER_ANCHOR,
    };

    if box_len < anchors * BOX_VALUES {
        return Err(LayoutError::TooShort {
            tensor: "bbox",
            needed: anchors * BOX_VALUES,
            actual: box_len,
        });
    }
    if score_len < anchors * scores_per_anchor {
        return Err(LayoutError::TooShort {
            tensor: "score",
            needed: anchors * scores_per_anchor,
            actual: score_len,
        });
    }

    Ok(StrideLayout {
        anchors_per_cell,
        scores_per_anchor,
        has_keypoints: kps_len >= anchors * KPS_VALUES,
    })
}

/// Discover output tensor ordering by name.
///
/// SCRFD models may export tensors with named outputs ("score_8", "bbox_16", ...) or
/// generic numeric names. If the named pattern is present for every stride it is
/// used; otherwise falls back to the standard positional ordering:
///   [0..n)   = scores
///   [n..2n)  = bboxes
///   [2n..3n) = kps
pub fn discover_output_indices(names: &[String], strides: &[usize]) -> Vec<StrideOutputIndices> {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named: Option<Vec<StrideOutputIndices>> = strides
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?, find("kps", stride)?)))
        .collect();

    match named {
        Some(indices) => {
            tracing::info!("landmark model: using name-based output tensor mapping");
            indices
        }
        None => {
            let n = strides.len();
            tracing::info!(
                ?names,
                "landmark model: output names not recognized, using positional mapping"
            );
            (0..n).map(|i| (i, n + i, 2 * n + i)).collect()
        }
    }
}

/// Geometry of one stride level and the mapping back to crop pixels.
#[derive(Debug, Clone, Copy)]
pub struct StrideGeometry {
    pub stride: usize,
    /// Feature-map side length, `input_size / stride`.
    pub grid: usize,
    /// Crop width / input size.
    pub scale_x: f32,
    /// Crop height / input size.
    pub scale_y: f32,
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Decode candidates for a single stride level.
///
/// The last score channel of each anchor is passed through a sigmoid and
/// compared with `threshold`. Boxes are `center ∓ offset × stride` per side
/// (left, top, right, bottom); keypoints are `center + (dx, dy) × stride`.
pub fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    geometry: &StrideGeometry,
    layout: &StrideLayout,
    threshold: f32,
) -> Vec<FaceCandidate> {
    let stride = geometry.stride as f32;
    let num_anchors = geometry.grid * geometry.grid * layout.anchors_per_cell;
    let spa = layout.scores_per_anchor;

    let mut detections = Vec::new();

    for idx in 0..num_anchors {
        let Some(&logit) = scores.get(idx * spa + spa - 1) else {
            break;
        };
        let score = sigmoid(logit);
        if !(score >= threshold) {
            continue;
        }

        let cell = idx / layout.anchors_per_cell;
        let cx = ((cell % geometry.grid) as f32 + 0.5) * stride;
        let cy = ((cell / geometry.grid) as f32 + 0.5) * stride;

        let Some(off) = bboxes.get(idx * BOX_VALUES..idx * BOX_VALUES + BOX_VALUES) else {
            continue;
        };
        let bbox = BoundingBox::new(
            (cx - off[0] * stride) * geometry.scale_x,
            (cy - off[1] * stride) * geometry.scale_y,
            (cx + off[2] * stride) * geometry.scale_x,
            (cy + off[3] * stride) * geometry.scale_y,
        );

        let landmarks: Option<Landmarks> = if layout.has_keypoints {
            kps.get(idx * KPS_VALUES..idx * KPS_VALUES + KPS_VALUES).map(|k| {
                std::array::from_fn(|i| {
                    (
                        (cx + k[i * 2] * stride) * geometry.scale_x,
                        (cy + k[i * 2 + 1] * stride) * geometry.scale_y,
                    )
                })
            })
        } else {
            None
        };

        detections.push(FaceCandidate {
            bbox,
            confidence: score,
            landmarks,
        });
    }

    detections
}

/// Landmark detector running on face crops.
pub struct LandmarkDetector<M> {
    model: M,
    input_size: u32,
    strides: Vec<usize>,
    confidence_threshold: f32,
    nms_threshold: f32,
    /// Per-stride output indices, discovered by name at construction.
    stride_indices: Vec<StrideOutputIndices>,
}

impl<M: InferenceModel> LandmarkDetector<M> {
    /// Wrap a loaded landmark model, resolving its output tensor layout.
    ///
    /// Fails on an empty, zero or oversized stride, or if the model exposes
    /// fewer than three outputs per stride.
    pub fn new(
        model: M,
        input_size: u32,
        strides: Vec<usize>,
        confidence_threshold: f32,
        nms_threshold: f32,
    ) -> Result<Self, InferenceError> {
        if strides.is_empty() || strides.iter().any(|&s| s == 0 || s > input_size as usize) {
            return Err(ConfigError::Invalid(format!(
                "landmark strides {strides:?} must be non-empty and in 1..={input_size}"
            ))
            .into());
        }

        let names = model.output_names();
        let expected = strides.len() * 3;
        if names.len() < expected {
            return Err(InferenceError::UnexpectedOutputs {
                expected,
                actual: names.len(),
            });
        }

        let stride_indices = discover_output_indices(names, &strides);
        tracing::debug!(?stride_indices, "landmark output tensor mapping");

        Ok(Self {
            model,
            input_size,
            strides,
            confidence_threshold,
            nms_threshold,
            stride_indices,
        })
    }

    /// Detect faces with landmarks in a crop; coordinates are crop-local.
    pub async fn detect(&mut self, crop: &RgbImage) -> Result<Vec<FaceCandidate>, InferenceError> {
        if crop.width() == 0 || crop.height() == 0 {
            return Ok(Vec::new());
        }

        let input = preprocess(crop, self.input_size);
        let outputs = self.model.run(input).await?;

        let size = self.input_size as usize;
        let scale_x = crop.width() as f32 / self.input_size as f32;
        let scale_y = crop.height() as f32 / self.input_size as f32;

        let mut all_detections = Vec::new();

        for (&stride, &(score_idx, bbox_idx, kps_idx)) in
            self.strides.iter().zip(self.stride_indices.iter())
        {
            let (Some(scores), Some(bboxes), Some(kps)) = (
                outputs.get(score_idx),
                outputs.get(bbox_idx),
                outputs.get(kps_idx),
            ) else {
                tracing::warn!(stride, "landmark model output missing; skipping stride");
                continue;
            };

            let grid = size / stride;
            let layout = match negotiate_layout(grid * grid, scores.len(), bboxes.len(), kps.len()) {
                Ok(layout) => layout,
                Err(e) => {
                    tracing::warn!(stride, error = %e, "cannot decode stride; skipping");
                    continue;
                }
            };

            let geometry = StrideGeometry {
                stride,
                grid,
                scale_x,
                scale_y,
            };
            all_detections.extend(decode_stride(
                &scores.data,
                &bboxes.data,
                &kps.data,
                &geometry,
                &layout,
                self.confidence_threshold,
            ));
        }

        Ok(nms(all_detections, self.nms_threshold))
    }
}

/// Resize a crop to the square input (no letterbox) and normalize to NCHW.
fn preprocess(crop: &RgbImage, size: u32) -> Array4<f32> {
    let resized = imageops::resize(crop, size, size, FilterType::Triangle);
    let side = size as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, side, side));

    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - LANDMARK_MEAN) / LANDMARK_STD;
        }
    }

    tensor
}
