//! ArcFace embedding extractor.
//!
//! Turns an aligned face canvas into an L2-normalized identity embedding.
//! Inference failures are contained here: callers get `None` and the frame
//! loop keeps running.

use crate::alignment::AlignedFace;
use crate::geometry::l2_normalize;
use crate::model::{InferenceError, InferenceModel};
use crate::types::Embedding;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use std::borrow::Cow;

pub const ARCFACE_INPUT_SIZE: u32 = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 128.0;

/// Embedding extractor wrapping a recognition model.
pub struct EmbeddingExtractor<M> {
    model: M,
    input_size: u32,
    model_version: Option<String>,
    /// Output dimensionality, fixed by the first successful forward pass.
    dimension: Option<usize>,
}

impl<M: InferenceModel> EmbeddingExtractor<M> {
    pub fn new(model: M, input_size: u32) -> Self {
        Self {
            model,
            input_size,
            model_version: None,
            dimension: None,
        }
    }

    /// Tag produced embeddings with the model name (e.g., "w600k_mbf").
    pub fn with_model_version(mut self, version: impl Into<String>) -> Self {
        self.model_version = Some(version.into());
        self
    }

    /// Embedding dimensionality, known after the first successful extraction.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Extract an embedding, reporting failures as `None`.
    pub async fn extract(&mut self, aligned: Option<&AlignedFace>) -> Option<Embedding> {
        let Some(aligned) = aligned else {
            tracing::debug!("no aligned face; skipping embedding");
            return None;
        };

        match self.try_extract(&aligned.image).await {
            Ok(embedding) => Some(embedding),
            Err(e) => {
                tracing::warn!(error = %e, "embedding extraction failed");
                None
            }
        }
    }

    /// Extract an embedding from a face canvas, surfacing inference errors.
    pub async fn try_extract(&mut self, face: &RgbImage) -> Result<Embedding, InferenceError> {
        let input = preprocess(face, self.input_size);
        let outputs = self.model.run(input).await?;

        let raw = outputs.get(0).ok_or(InferenceError::MissingOutput(0))?;
        if raw.is_empty() {
            return Err(InferenceError::InferenceFailed("empty embedding output".into()));
        }

        match self.dimension {
            Some(dim) if dim != raw.len() => {
                return Err(InferenceError::InferenceFailed(format!(
                    "expected {dim}-dim embedding, got {}",
                    raw.len()
                )));
            }
            Some(_) => {}
            None => {
                tracing::info!(dimension = raw.len(), "embedding dimension detected");
                self.dimension = Some(raw.len());
            }
        }

        Ok(Embedding {
            values: l2_normalize(&raw.data),
            model_version: self.model_version.clone(),
        })
    }
}

/// Resample a face canvas to `size × size` and normalize into a planar NCHW tensor.
pub fn preprocess(face: &RgbImage, size: u32) -> Array4<f32> {
    let resized: Cow<'_, RgbImage> = if face.dimensions() == (size, size) {
        Cow::Borrowed(face)
    } else {
        Cow::Owned(imageops::resize(face, size, size, FilterType::Triangle))
    };

    let side = size as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
        }
    }

    tensor
}
