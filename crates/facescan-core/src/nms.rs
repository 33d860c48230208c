//! Greedy Non-Maximum Suppression, shared by the box and landmark stages.

use crate::geometry::iou;
use crate::types::{BoundingBox, FaceCandidate};

/// Anything NMS can rank and compare by overlap.
pub trait Scored {
    fn bbox(&self) -> &BoundingBox;
    fn confidence(&self) -> f32;
}

impl Scored for FaceCandidate {
    fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    fn confidence(&self) -> f32 {
        self.confidence
    }
}

/// Remove overlapping detections, keeping the most confident of each cluster.
///
/// Candidates are sorted by descending confidence with a stable sort, so
/// equal scores keep their input order. A candidate survives only if its IoU
/// with every already-kept candidate is at most `iou_threshold`. The result is
/// always a subset of the input.
pub fn nms<T: Scored>(mut candidates: Vec<T>, iou_threshold: f32) -> Vec<T> {
    candidates.sort_by(|a, b| b.confidence().total_cmp(&a.confidence()));

    let mut keep: Vec<T> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let overlaps = keep
            .iter()
            .any(|kept| iou(kept.bbox(), candidate.bbox()) > iou_threshold);
        if !overlaps {
            keep.push(candidate);
        }
    }

    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_candidate(x: f32, y: f32, w: f32, h: f32, conf: f32) -> FaceCandidate {
        FaceCandidate {
            bbox: BoundingBox::new(x, y, x + w, y + h),
            confidence: conf,
            landmarks: None,
        }
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let detections = vec![
            make_candidate(5.0, 5.0, 100.0, 100.0, 0.8),
            make_candidate(0.0, 0.0, 100.0, 100.0, 0.9),
            make_candidate(200.0, 200.0, 50.0, 50.0, 0.7),
        ];
        let result = nms(detections, 0.4);
        assert_eq!(result.len(), 2);
        assert!((result[0].confidence - 0.9).abs() < 1e-6);
        assert!((result[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_no_suppression() {
        let detections = vec![
            make_candidate(0.0, 0.0, 10.0, 10.0, 0.9),
            make_candidate(50.0, 50.0, 10.0, 10.0, 0.8),
        ];
        let result = nms(detections, 0.4);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_nms_empty() {
        let result: Vec<FaceCandidate> = nms(vec![], 0.4);
        assert!(result.is_empty());
    }

    #[test]
    fn test_nms_ties_keep_input_order() {
        let first = make_candidate(0.0, 0.0, 10.0, 10.0, 0.9);
        let second = make_candidate(1.0, 0.0, 10.0, 10.0, 0.9);
        let result = nms(vec![first.clone(), second], 0.4);
        assert_eq!(result, vec![first]);
    }

    #[test]
    fn test_nms_threshold_is_inclusive() {
        // IoU of these two is 50/150 ≈ 0.333; at threshold 1/3 + ε both survive.
        let a = make_candidate(0.0, 0.0, 10.0, 10.0, 0.9);
        let b = make_candidate(5.0, 0.0, 10.0, 10.0, 0.8);
        assert_eq!(nms(vec![a.clone(), b.clone()], 0.34).len(), 2);
        assert_eq!(nms(vec![a, b], 0.3).len(), 1);
    }
}
