//! Deterministic choice of the one face a frame is about.

use crate::types::FaceCandidate;

/// Confidences closer than this are considered tied.
pub const CONFIDENCE_TIE_EPSILON: f32 = 1e-6;

/// Pick the best candidate: highest confidence, then larger box on a tie.
///
/// Remaining ties keep the earliest candidate. `None` means "no face this
/// frame" and is not an error.
pub fn select_best_face(candidates: &[FaceCandidate]) -> Option<&FaceCandidate> {
    best_index(candidates).map(|i| &candidates[i])
}

/// Owning variant of [`select_best_face`].
pub fn into_best_face(mut candidates: Vec<FaceCandidate>) -> Option<FaceCandidate> {
    best_index(&candidates).map(|i| candidates.swap_remove(i))
}

fn best_index(candidates: &[FaceCandidate]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, candidate) in candidates.iter().enumerate() {
        match best {
            Some(b) if !is_better(candidate, &candidates[b]) => {}
            _ => best = Some(i),
        }
    }
    best
}

fn is_better(candidate: &FaceCandidate, current: &FaceCandidate) -> bool {
    let diff = candidate.confidence - current.confidence;
    if diff.abs() <= CONFIDENCE_TIE_EPSILON {
        candidate.area() > current.area()
    } else {
        diff > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;

    fn candidate(conf: f32, side: f32) -> FaceCandidate {
        FaceCandidate {
            bbox: BoundingBox::new(0.0, 0.0, side, side),
            confidence: conf,
            landmarks: None,
        }
    }

    #[test]
    fn test_empty_input_is_none() {
        assert!(select_best_face(&[]).is_none());
        assert!(into_best_face(Vec::new()).is_none());
    }

    #[test]
    fn test_tie_prefers_larger_area() {
        // area 100 vs area 50 (sides 10 and √50), confidences within 1e-6
        let faces = vec![candidate(0.9, 50f32.sqrt()), candidate(0.900_000_5, 10.0)];
        let best = select_best_face(&faces).unwrap();
        assert!((best.area() - 100.0).abs() < 1e-3);

        let faces = vec![candidate(0.9, 10.0), candidate(0.9, 50f32.sqrt())];
        assert!((select_best_face(&faces).unwrap().area() - 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_higher_confidence_wins_regardless_of_area() {
        let faces = vec![candidate(0.80, 100.0), candidate(0.95, 1.0)];
        let best = select_best_face(&faces).unwrap();
        assert_eq!(best.confidence, 0.95);
    }

    #[test]
    fn test_full_tie_keeps_first() {
        let mut first = candidate(0.9, 10.0);
        first.bbox = first.bbox.translated(5.0, 5.0);
        let faces = vec![first.clone(), candidate(0.9, 10.0)];
        assert_eq!(select_best_face(&faces), Some(&first));
        assert_eq!(into_best_face(faces), Some(first));
    }
}
