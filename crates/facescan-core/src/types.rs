use serde::{Deserialize, Serialize};

use crate::geometry;

/// A 2-D point in pixel coordinates.
pub type Point = (f32, f32);

/// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
pub type Landmarks = [Point; 5];

/// Axis-aligned box in corner form, in the pixel frame of the image it was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    /// Build a box from two corners, ordering them so that `x2 >= x1` and `y2 >= y1`.
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        geometry::box_area(self)
    }

    pub fn center(&self) -> Point {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn translated(&self, dx: f32, dy: f32) -> Self {
        Self {
            x1: self.x1 + dx,
            y1: self.y1 + dy,
            x2: self.x2 + dx,
            y2: self.y2 + dy,
        }
    }

    /// Clamp both corners into `[0, width] × [0, height]`.
    pub fn clamped(&self, width: f32, height: f32) -> Self {
        Self {
            x1: self.x1.clamp(0.0, width),
            y1: self.y1.clamp(0.0, height),
            x2: self.x2.clamp(0.0, width),
            y2: self.y2.clamp(0.0, height),
        }
    }
}

/// A face hypothesis produced by one of the decoders.
///
/// Candidates are produced fresh per frame and are only ever filtered or
/// selected, never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceCandidate {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub landmarks: Option<Landmarks>,
}

impl FaceCandidate {
    pub fn area(&self) -> f32 {
        self.bbox.area()
    }

    /// Shift box and landmarks by `(dx, dy)`; maps crop-local coordinates back to the source frame.
    pub fn translated(&self, dx: f32, dy: f32) -> Self {
        Self {
            bbox: self.bbox.translated(dx, dy),
            confidence: self.confidence,
            landmarks: self
                .landmarks
                .map(|lms| lms.map(|(x, y)| (x + dx, y + dy))),
        }
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model that produced this embedding (e.g., "w600k_mbf").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    ///
    /// Norms are recomputed so the result is correct even for embeddings
    /// that were not normalized; a zero vector compares as 0.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Euclidean norm of the raw values.
    pub fn norm(&self) -> f32 {
        self.values.iter().map(|v| v * v).sum::<f32>().sqrt()
    }
}

/// Outcome of a gallery search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Success,
    NoMatch,
}

/// Result of matching one query embedding against a gallery.
///
/// Created per search call and never cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub person: Option<String>,
    /// Cosine similarity of the closest gallery entry, in [-1, 1].
    pub similarity: Option<f32>,
    pub status: MatchStatus,
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        self.status == MatchStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounding_box_orders_corners() {
        let b = BoundingBox::new(10.0, 20.0, 0.0, 5.0);
        assert_eq!(b, BoundingBox { x1: 0.0, y1: 5.0, x2: 10.0, y2: 20.0 });
        assert_eq!(b.width(), 10.0);
        assert_eq!(b.height(), 15.0);
    }

    #[test]
    fn test_bounding_box_clamped() {
        let b = BoundingBox::new(-5.0, -5.0, 700.0, 300.0).clamped(640.0, 480.0);
        assert_eq!(b, BoundingBox { x1: 0.0, y1: 0.0, x2: 640.0, y2: 300.0 });
    }

    #[test]
    fn test_candidate_translated_moves_landmarks() {
        let c = FaceCandidate {
            bbox: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
            confidence: 0.9,
            landmarks: Some([(1.0, 1.0); 5]),
        };
        let t = c.translated(100.0, 50.0);
        assert_eq!(t.bbox, BoundingBox::new(100.0, 50.0, 110.0, 60.0));
        assert_eq!(t.landmarks.unwrap()[4], (101.0, 51.0));
        assert_eq!(t.confidence, 0.9);
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = Embedding { values: vec![1.0, 0.0, 0.0], model_version: None };
        let b = Embedding { values: vec![1.0, 0.0, 0.0], model_version: None };
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = Embedding { values: vec![1.0, 0.0], model_version: None };
        let b = Embedding { values: vec![-1.0, 0.0], model_version: None };
        assert!((a.similarity(&b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = Embedding { values: vec![0.0, 0.0], model_version: None };
        let b = Embedding { values: vec![1.0, 0.0], model_version: None };
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_match_status_serializes_snake_case() {
        let json = serde_json::to_string(&MatchStatus::NoMatch).unwrap();
        assert_eq!(json, "\"no_match\"");
    }
}
