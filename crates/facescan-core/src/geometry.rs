//! Box overlap, 2×2 SVD and vector normalization shared by the decoders and the aligner.

use crate::types::BoundingBox;

/// Added to the IoU denominator so degenerate boxes never divide by zero.
pub const IOU_EPSILON: f32 = 1e-6;

/// Below this magnitude an off-diagonal Gram term or singular value is treated as zero.
const SVD_EPSILON: f64 = 1e-12;

/// Row-major 2×2 matrix.
pub type Mat2 = [[f64; 2]; 2];

pub const IDENTITY: Mat2 = [[1.0, 0.0], [0.0, 1.0]];

/// Area of a box; boxes with negative extent have zero area.
pub fn box_area(b: &BoundingBox) -> f32 {
    (b.x2 - b.x1).max(0.0) * (b.y2 - b.y1).max(0.0)
}

/// Intersection-over-Union of two boxes.
///
/// Returns exactly 0 for disjoint boxes and `area / (area + ε)` for identical ones.
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union_area = box_area(a) + box_area(b) - inter_area;

    inter_area / (union_area + IOU_EPSILON)
}

/// Singular value decomposition `A = U · diag(s) · Vᵗ` of a 2×2 matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Svd2x2 {
    pub u: Mat2,
    /// Singular values, descending, never negative.
    pub s: [f64; 2],
    pub v: Mat2,
}

/// Analytic SVD of `[[a, b], [c, d]]`.
///
/// The right singular vectors are the eigenvectors of the Gram matrix `AᵗA`,
/// whose eigenvalues come from its trace and determinant in closed form.
/// `U` follows as `A·vᵢ / sᵢ`. When the Gram matrix is already diagonal, or a
/// singular value vanishes, axis-aligned bases are used instead of dividing
/// by zero.
pub fn svd2x2(a: f64, b: f64, c: f64, d: f64) -> Svd2x2 {
    // AᵗA = [[p, q], [q, r]]
    let p = a * a + c * c;
    let q = a * b + c * d;
    let r = b * b + d * d;

    let half_trace = (p + r) / 2.0;
    let det = p * r - q * q;
    let disc = (half_trace * half_trace - det).max(0.0).sqrt();
    let s = [
        (half_trace + disc).max(0.0).sqrt(),
        (half_trace - disc).max(0.0).sqrt(),
    ];

    let v = if q.abs() > SVD_EPSILON {
        let (x, y) = (half_trace + disc - r, q);
        let n = (x * x + y * y).sqrt();
        let (x, y) = (x / n, y / n);
        [[x, -y], [y, x]]
    } else if p >= r {
        IDENTITY
    } else {
        // Larger eigenvalue belongs to the second axis.
        [[0.0, -1.0], [1.0, 0.0]]
    };

    let apply = |col: usize| -> (f64, f64) {
        (
            a * v[0][col] + b * v[1][col],
            c * v[0][col] + d * v[1][col],
        )
    };

    let u0 = if s[0] > SVD_EPSILON {
        let (x, y) = apply(0);
        (x / s[0], y / s[0])
    } else {
        (1.0, 0.0)
    };
    let u1 = if s[1] > SVD_EPSILON * s[0].max(1.0) {
        let (x, y) = apply(1);
        (x / s[1], y / s[1])
    } else {
        (-u0.1, u0.0)
    };

    Svd2x2 {
        u: [[u0.0, u1.0], [u0.1, u1.1]],
        s,
        v,
    }
}

pub fn det2(m: &Mat2) -> f64 {
    m[0][0] * m[1][1] - m[0][1] * m[1][0]
}

pub fn mul2(a: &Mat2, b: &Mat2) -> Mat2 {
    std::array::from_fn(|i| std::array::from_fn(|j| a[i][0] * b[0][j] + a[i][1] * b[1][j]))
}

pub fn transpose2(m: &Mat2) -> Mat2 {
    [[m[0][0], m[1][0]], [m[0][1], m[1][1]]]
}

/// Scale a vector to unit Euclidean length.
///
/// A zero vector is returned unchanged (divisor 1), never NaN.
pub fn l2_normalize(values: &[f32]) -> Vec<f32> {
    let norm = values
        .iter()
        .map(|&v| (v as f64) * (v as f64))
        .sum::<f64>()
        .sqrt();
    let norm = if norm > 0.0 { norm } else { 1.0 };
    values.iter().map(|&v| (v as f64 / norm) as f32).collect()
}

/// Cosine similarity of two unit-length vectors, i.e. their dot product.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reconstruct(svd: &Svd2x2) -> Mat2 {
        let us = [
            [svd.u[0][0] * svd.s[0], svd.u[0][1] * svd.s[1]],
            [svd.u[1][0] * svd.s[0], svd.u[1][1] * svd.s[1]],
        ];
        mul2(&us, &transpose2(&svd.v))
    }

    fn assert_mat_close(a: &Mat2, b: &Mat2, tol: f64) {
        for i in 0..2 {
            for j in 0..2 {
                assert!((a[i][j] - b[i][j]).abs() < tol, "{a:?} vs {b:?}");
            }
        }
    }

    #[test]
    fn test_box_area_degenerate_is_zero() {
        let b = BoundingBox { x1: 10.0, y1: 10.0, x2: 5.0, y2: 20.0 };
        assert_eq!(box_area(&b), 0.0);
    }

    #[test]
    fn test_iou_identical() {
        let a = BoundingBox::new(0.0, 0.0, 100.0, 100.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_no_overlap() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(20.0, 20.0, 30.0, 30.0);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_iou_partial() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 0.0, 15.0, 10.0);
        // Overlap: 5x10 = 50, union: 100+100-50 = 150
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(iou(&a, &b), iou(&b, &a));
    }

    #[test]
    fn test_iou_zero_area_boxes() {
        let a = BoundingBox::new(5.0, 5.0, 5.0, 5.0);
        assert_eq!(iou(&a, &a), 0.0);
    }

    #[test]
    fn test_svd_diagonal() {
        let svd = svd2x2(3.0, 0.0, 0.0, 2.0);
        assert!((svd.s[0] - 3.0).abs() < 1e-12);
        assert!((svd.s[1] - 2.0).abs() < 1e-12);
        assert_mat_close(&reconstruct(&svd), &[[3.0, 0.0], [0.0, 2.0]], 1e-12);
    }

    #[test]
    fn test_svd_diagonal_swapped_axes() {
        let svd = svd2x2(1.0, 0.0, 0.0, 4.0);
        assert!((svd.s[0] - 4.0).abs() < 1e-12);
        assert!((svd.s[1] - 1.0).abs() < 1e-12);
        assert_mat_close(&reconstruct(&svd), &[[1.0, 0.0], [0.0, 4.0]], 1e-12);
    }

    #[test]
    fn test_svd_rotation_has_unit_singular_values() {
        let (sin, cos) = 0.3f64.sin_cos();
        let svd = svd2x2(cos, -sin, sin, cos);
        assert!((svd.s[0] - 1.0).abs() < 1e-9);
        assert!((svd.s[1] - 1.0).abs() < 1e-9);
        assert_mat_close(&reconstruct(&svd), &[[cos, -sin], [sin, cos]], 1e-9);
    }

    #[test]
    fn test_svd_general_reconstructs() {
        let m = [[2.0, -1.5], [0.7, 3.2]];
        let svd = svd2x2(m[0][0], m[0][1], m[1][0], m[1][1]);
        assert!(svd.s[0] >= svd.s[1]);
        assert_mat_close(&reconstruct(&svd), &m, 1e-9);
        assert!((det2(&svd.u).abs() - 1.0).abs() < 1e-9);
        assert!((det2(&svd.v).abs() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_svd_rank_one() {
        let m = [[1.0, 2.0], [2.0, 4.0]];
        let svd = svd2x2(m[0][0], m[0][1], m[1][0], m[1][1]);
        assert!(svd.s[1].abs() < 1e-6);
        assert!(svd.s.iter().all(|s| s.is_finite()));
        assert_mat_close(&reconstruct(&svd), &m, 1e-6);
    }

    #[test]
    fn test_svd_zero_matrix() {
        let svd = svd2x2(0.0, 0.0, 0.0, 0.0);
        assert_eq!(svd.s, [0.0, 0.0]);
        assert_eq!(svd.u, IDENTITY);
        assert_eq!(svd.v, IDENTITY);
    }

    #[test]
    fn test_l2_normalize_unit_norm() {
        let v = l2_normalize(&[3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_vector() {
        let v = l2_normalize(&[0.0, 0.0, 0.0]);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_cosine_similarity_self_and_negation() {
        let v = l2_normalize(&[0.2, -1.0, 3.5, 0.0]);
        let neg: Vec<f32> = v.iter().map(|x| -x).collect();
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&v, &neg) + 1.0).abs() < 1e-6);
    }
}
