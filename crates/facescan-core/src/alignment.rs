//! Face alignment via Umeyama similarity transform.
//!
//! Aligns detected faces to the canonical 112×112 ArcFace pose using the five
//! reference landmarks: a least-squares similarity transform (uniform scale,
//! rotation, translation; never a reflection) is estimated from the detected
//! landmarks and the face is resampled into a fixed-size canvas.

use crate::geometry::{det2, mul2, svd2x2, transpose2, Mat2};
use crate::types::Point;
use image::{Rgb, RgbImage};

/// ArcFace reference landmarks for a 112×112 output.
pub const REFERENCE_LANDMARKS_112: [Point; 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: u32 = 112;

/// Source point sets with less spread than this are treated as degenerate.
const MIN_SOURCE_VARIANCE: f64 = 1e-10;
/// Neutral gray for canvas pixels that fall outside the source image.
const FILL_GRAY: [u8; 3] = [128, 128, 128];

/// 2-D similarity transform:
/// ```text
/// x' = a·x + c·y + tx
/// y' = b·x + d·y + ty
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityTransform {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub tx: f32,
    pub ty: f32,
}

impl SimilarityTransform {
    pub const IDENTITY: Self = Self { a: 1.0, b: 0.0, c: 0.0, d: 1.0, tx: 0.0, ty: 0.0 };

    /// Compose uniform scale, counter-clockwise rotation (radians) and translation.
    pub fn from_parts(scale: f32, rotation: f32, tx: f32, ty: f32) -> Self {
        let (sin, cos) = rotation.sin_cos();
        Self {
            a: scale * cos,
            b: scale * sin,
            c: -scale * sin,
            d: scale * cos,
            tx,
            ty,
        }
    }

    pub fn apply(&self, (x, y): Point) -> Point {
        (
            self.a * x + self.c * y + self.tx,
            self.b * x + self.d * y + self.ty,
        )
    }

    /// Uniform scale factor.
    pub fn scale(&self) -> f32 {
        (self.a * self.d - self.b * self.c).abs().sqrt()
    }

    /// Rotation angle in radians.
    pub fn rotation(&self) -> f32 {
        self.b.atan2(self.a)
    }

    /// Inverse mapping, `None` if the linear part is singular.
    pub fn inverse(&self) -> Option<Self> {
        let det = self.a * self.d - self.b * self.c;
        if det.abs() < 1e-12 {
            return None;
        }
        let inv = 1.0 / det;
        let (a, b, c, d) = (self.d * inv, -self.b * inv, -self.c * inv, self.a * inv);
        Some(Self {
            a,
            b,
            c,
            d,
            tx: -(a * self.tx + c * self.ty),
            ty: -(b * self.tx + d * self.ty),
        })
    }
}

/// A face resampled into the canonical pose.
#[derive(Debug, Clone)]
pub struct AlignedFace {
    pub image: RgbImage,
    /// Source-frame → canvas mapping used to produce `image`.
    pub transform: SimilarityTransform,
}

fn centroid(points: &[Point]) -> (f64, f64) {
    let n = points.len() as f64;
    let (sx, sy) = points
        .iter()
        .fold((0.0f64, 0.0f64), |(sx, sy), &(x, y)| (sx + x as f64, sy + y as f64));
    (sx / n, sy / n)
}

/// Estimate the similarity transform mapping `src` onto `dst` (Umeyama 1991).
///
/// Returns `None` when the point sets differ in length, are empty, or the
/// source points are (nearly) coincident.
pub fn umeyama(src: &[Point], dst: &[Point]) -> Option<SimilarityTransform> {
    if src.is_empty() || src.len() != dst.len() {
        return None;
    }
    let n = src.len() as f64;

    let (smx, smy) = centroid(src);
    let (dmx, dmy) = centroid(dst);

    let mut src_var = 0.0f64;
    // cov = (1/n) Σ dst_c · src_cᵗ
    let mut cov: Mat2 = [[0.0; 2]; 2];
    for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst) {
        let (sx, sy) = (sx as f64 - smx, sy as f64 - smy);
        let (dx, dy) = (dx as f64 - dmx, dy as f64 - dmy);
        src_var += sx * sx + sy * sy;
        cov[0][0] += dx * sx;
        cov[0][1] += dx * sy;
        cov[1][0] += dy * sx;
        cov[1][1] += dy * sy;
    }
    src_var /= n;
    if src_var < MIN_SOURCE_VARIANCE {
        tracing::debug!(src_var, "degenerate landmark spread; skipping alignment");
        return None;
    }
    for row in cov.iter_mut() {
        for v in row.iter_mut() {
            *v /= n;
        }
    }

    let svd = svd2x2(cov[0][0], cov[0][1], cov[1][0], cov[1][1]);
    let mut v = svd.v;
    let mut s1 = svd.s[1];
    if det2(&svd.u) * det2(&v) < 0.0 {
        // Flip the weakest axis so R is a proper rotation.
        v[0][1] = -v[0][1];
        v[1][1] = -v[1][1];
        s1 = -s1;
    }

    let r = mul2(&svd.u, &transpose2(&v));
    let scale = (svd.s[0] + s1) / src_var;

    let m = [
        [scale * r[0][0], scale * r[0][1]],
        [scale * r[1][0], scale * r[1][1]],
    ];
    let tx = dmx - (m[0][0] * smx + m[0][1] * smy);
    let ty = dmy - (m[1][0] * smx + m[1][1] * smy);

    Some(SimilarityTransform {
        a: m[0][0] as f32,
        b: m[1][0] as f32,
        c: m[0][1] as f32,
        d: m[1][1] as f32,
        tx: tx as f32,
        ty: ty as f32,
    })
}

/// Resample `image` through `transform` into an `out_size × out_size` canvas.
///
/// Each canvas pixel is mapped back into the source and bilinearly
/// interpolated; samples outside the source read as neutral gray.
pub fn warp_affine(image: &RgbImage, transform: &SimilarityTransform, out_size: u32) -> RgbImage {
    let Some(inv) = transform.inverse() else {
        return RgbImage::from_pixel(out_size, out_size, Rgb(FILL_GRAY));
    };

    let (width, height) = (image.width() as i64, image.height() as i64);
    let sample = |x: i64, y: i64| -> [f32; 3] {
        if x >= 0 && x < width && y >= 0 && y < height {
            let p = image.get_pixel(x as u32, y as u32);
            [p[0] as f32, p[1] as f32, p[2] as f32]
        } else {
            FILL_GRAY.map(|v| v as f32)
        }
    };

    RgbImage::from_fn(out_size, out_size, |ox, oy| {
        let (sx, sy) = inv.apply((ox as f32, oy as f32));
        if !sx.is_finite() || !sy.is_finite() {
            return Rgb(FILL_GRAY);
        }

        let x0 = sx.floor() as i64;
        let y0 = sy.floor() as i64;
        let fx = sx - x0 as f32;
        let fy = sy - y0 as f32;

        let tl = sample(x0, y0);
        let tr = sample(x0 + 1, y0);
        let bl = sample(x0, y0 + 1);
        let br = sample(x0 + 1, y0 + 1);

        Rgb(std::array::from_fn(|c| {
            let val = tl[c] * (1.0 - fx) * (1.0 - fy)
                + tr[c] * fx * (1.0 - fy)
                + bl[c] * (1.0 - fx) * fy
                + br[c] * fx * fy;
            val.round().clamp(0.0, 255.0) as u8
        }))
    })
}

/// Align a detected face to the canonical 112×112 pose.
///
/// Returns `None` when fewer than five landmarks are supplied or their
/// spread is degenerate.
pub fn align_face(image: &RgbImage, landmarks: &[Point]) -> Option<AlignedFace> {
    if landmarks.len() < REFERENCE_LANDMARKS_112.len() {
        tracing::debug!(count = landmarks.len(), "too few landmarks for alignment");
        return None;
    }
    let transform = umeyama(&landmarks[..5], &REFERENCE_LANDMARKS_112)?;
    Some(AlignedFace {
        image: warp_affine(image, &transform, ALIGNED_SIZE),
        transform,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transformed_reference(t: &SimilarityTransform) -> [Point; 5] {
        REFERENCE_LANDMARKS_112.map(|p| t.apply(p))
    }

    #[test]
    fn test_identity_transform() {
        let pts = REFERENCE_LANDMARKS_112;
        let m = umeyama(&pts, &pts).unwrap();

        assert!((m.a - 1.0).abs() < 1e-4, "a = {}", m.a);
        assert!(m.b.abs() < 1e-4, "b = {}", m.b);
        assert!(m.c.abs() < 1e-4, "c = {}", m.c);
        assert!((m.d - 1.0).abs() < 1e-4, "d = {}", m.d);
        assert!(m.tx.abs() < 1e-3, "tx = {}", m.tx);
        assert!(m.ty.abs() < 1e-3, "ty = {}", m.ty);
    }

    #[test]
    fn test_scaled_transform() {
        // Source landmarks at 2x scale → transform scale ≈ 0.5
        let src = REFERENCE_LANDMARKS_112.map(|(x, y)| (x * 2.0, y * 2.0));
        let m = umeyama(&src, &REFERENCE_LANDMARKS_112).unwrap();
        assert!((m.scale() - 0.5).abs() < 1e-4, "scale = {}", m.scale());
        assert!(m.rotation().abs() < 1e-4);
    }

    #[test]
    fn test_recovers_known_transform() {
        let known = SimilarityTransform::from_parts(1.7, 0.4, -23.0, 41.5);
        let dst = transformed_reference(&known);
        let est = umeyama(&REFERENCE_LANDMARKS_112, &dst).unwrap();

        assert!((est.scale() - 1.7).abs() < 1e-3, "scale = {}", est.scale());
        assert!((est.rotation() - 0.4).abs() < 1e-3, "rotation = {}", est.rotation());
        assert!((est.tx + 23.0).abs() < 1e-2, "tx = {}", est.tx);
        assert!((est.ty - 41.5).abs() < 1e-2, "ty = {}", est.ty);
    }

    #[test]
    fn test_mirrored_points_yield_proper_rotation() {
        // Mirror the reference horizontally: best fit must still be a rotation.
        let dst = REFERENCE_LANDMARKS_112.map(|(x, y)| (112.0 - x, y));
        let est = umeyama(&REFERENCE_LANDMARKS_112, &dst).unwrap();
        let det = est.a * est.d - est.b * est.c;
        assert!(det > 0.0, "reflection leaked into transform: det = {det}");
        assert!((est.a - est.d).abs() < 1e-4);
        assert!((est.b + est.c).abs() < 1e-4);
    }

    #[test]
    fn test_degenerate_points() {
        let src = [(10.0, 10.0); 5];
        assert!(umeyama(&src, &REFERENCE_LANDMARKS_112).is_none());
        assert!(umeyama(&[], &[]).is_none());
        assert!(umeyama(&src[..3], &REFERENCE_LANDMARKS_112).is_none());
    }

    #[test]
    fn test_inverse_roundtrip() {
        let t = SimilarityTransform::from_parts(0.8, -1.1, 5.0, -7.0);
        let inv = t.inverse().unwrap();
        let p = (13.0, 29.0);
        let back = inv.apply(t.apply(p));
        assert!((back.0 - p.0).abs() < 1e-4 && (back.1 - p.1).abs() < 1e-4);
    }

    #[test]
    fn test_warp_output_size_and_fill() {
        let frame = RgbImage::from_pixel(64, 48, Rgb([10, 20, 30]));
        let out = warp_affine(&frame, &SimilarityTransform::IDENTITY, 112);
        assert_eq!(out.dimensions(), (112, 112));
        assert_eq!(out.get_pixel(5, 5), &Rgb([10, 20, 30]));
        // Past the source extent: neutral gray.
        assert_eq!(out.get_pixel(100, 100), &Rgb(FILL_GRAY));
    }

    #[test]
    fn test_align_face_requires_five_landmarks() {
        let frame = RgbImage::new(200, 200);
        assert!(align_face(&frame, &REFERENCE_LANDMARKS_112[..4]).is_none());
        let aligned = align_face(&frame, &REFERENCE_LANDMARKS_112).unwrap();
        assert_eq!(aligned.image.dimensions(), (ALIGNED_SIZE, ALIGNED_SIZE));
    }

    #[test]
    fn test_landmark_roundtrip() {
        // Place a bright patch at a landmark position, verify it lands near the
        // reference position after alignment.
        let (w, h) = (200u32, 200u32);
        let mut frame = RgbImage::new(w, h);

        let src_landmarks: [Point; 5] = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];

        let (lx, ly) = (src_landmarks[0].0 as u32, src_landmarks[0].1 as u32);
        for y in ly - 2..=ly + 2 {
            for x in lx - 2..=lx + 2 {
                frame.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }

        let aligned = align_face(&frame, &src_landmarks).unwrap();

        let (ref_x, ref_y) = aligned.transform.apply(src_landmarks[0]);
        let (ref_x, ref_y) = (ref_x.round() as u32, ref_y.round() as u32);
        let mut max_val = 0u8;
        for y in ref_y - 1..=ref_y + 1 {
            for x in ref_x - 1..=ref_x + 1 {
                max_val = max_val.max(aligned.image.get_pixel(x, y)[0]);
            }
        }
        assert!(
            max_val > 100,
            "Expected bright patch near mapped left eye ({ref_x}, {ref_y}), max={max_val}"
        );
    }
}
