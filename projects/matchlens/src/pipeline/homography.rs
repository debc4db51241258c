//! Planar homographies between the camera image and the pitch model.

use crate::pipeline::keypoints::Keypoint;
use crate::pipeline::types::Point;
use nalgebra::{DMatrix, Matrix3, Vector3};

/// Fewest correspondences that determine a homography.
pub const MIN_PAIRS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ImageToPitch,
    PitchToImage,
}

/// A 3x3 planar homography. Only obtainable through [`Transform::fit`].
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    matrix: Matrix3<f64>,
    direction: Direction,
}

impl Transform {
    /// Fit `src -> dst` with the normalized DLT. Returns `None` with fewer than
    /// [`MIN_PAIRS`] pairs or when the points do not determine a proper
    /// homography (e.g. all collinear).
    pub fn fit(src: &[Point], dst: &[Point], direction: Direction) -> Option<Self> {
        if src.len() != dst.len() || src.len() < MIN_PAIRS {
            return None;
        }

        if is_collinear(src) || is_collinear(dst) {
            return None;
        }
        let (src_norm, t_src) = normalize(src)?;
        let (dst_norm, t_dst) = normalize(dst)?;

        let rows = (2 * src.len()).max(9);
        let mut a = DMatrix::<f64>::zeros(rows, 9);
        for (i, (&(x, y), &(u, v))) in src_norm.iter().zip(&dst_norm).enumerate() {
            let r = 2 * i;
            a.row_mut(r)
                .copy_from_slice(&[-x, -y, -1.0, 0.0, 0.0, 0.0, u * x, u * y, u]);
            a.row_mut(r + 1)
                .copy_from_slice(&[0.0, 0.0, 0.0, -x, -y, -1.0, v * x, v * y, v]);
        }

        let svd = a.svd(false, true);
        let v_t = svd.v_t?;
        let smallest = svd
            .singular_values
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)?;
        let h = v_t.row(smallest);
        let h_norm = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

        // h_norm has unit norm, so its determinant is scale-free
        let det = h_norm.determinant();
        if !det.is_finite() || det.abs() < 1e-8 {
            return None;
        }

        let mut matrix = t_dst.try_inverse()? * h_norm * t_src;
        if matrix[(2, 2)].abs() > f64::EPSILON {
            matrix /= matrix[(2, 2)];
        }

        Some(Self { matrix, direction })
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn apply_point(&self, p: Point) -> Point {
        let v = self.matrix * Vector3::new(p.x as f64, p.y as f64, 1.0);
        if v.z.abs() < f64::EPSILON {
            return Point::new(f32::NAN, f32::NAN);
        }
        Point::new((v.x / v.z) as f32, (v.y / v.z) as f32)
    }

    /// Points mapping to infinity come back as NaN.
    pub fn apply(&self, points: &[Point]) -> Vec<Point> {
        points.iter().map(|p| self.apply_point(*p)).collect()
    }
}

/// Similarity transform moving the centroid to the origin with mean
/// distance sqrt(2).
fn normalize(points: &[Point]) -> Option<(Vec<(f64, f64)>, Matrix3<f64>)> {
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.x as f64).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.y as f64).sum::<f64>() / n;
    let mean_dist = points
        .iter()
        .map(|p| ((p.x as f64 - cx).powi(2) + (p.y as f64 - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if mean_dist <= f64::EPSILON {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;
    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let normalized = points
        .iter()
        .map(|p| (s * (p.x as f64 - cx), s * (p.y as f64 - cy)))
        .collect();
    Some((normalized, t))
}

/// True when all points lie (numerically) on one line.
fn is_collinear(points: &[Point]) -> bool {
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.x as f64).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.y as f64).sum::<f64>() / n;
    let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
    for p in points {
        let dx = p.x as f64 - cx;
        let dy = p.y as f64 - cy;
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }
    let trace = sxx + syy;
    if trace <= f64::EPSILON {
        return true;
    }
    // smaller eigenvalue of the scatter matrix
    let half_gap = ((sxx - syy) / 2.0).hypot(sxy);
    (trace / 2.0 - half_gap) / trace < 1e-9
}

/// Pitch/image point pairs that passed the confidence filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorrespondenceSet {
    pub pitch: Vec<Point>,
    pub image: Vec<Point>,
}

impl CorrespondenceSet {
    /// Keep keypoints scoring strictly above `threshold`, paired with the
    /// pitch vertex of the same index.
    pub fn from_keypoints(keypoints: &[Keypoint], vertices: &[Point], threshold: f32) -> Self {
        let (pitch, image) = keypoints
            .iter()
            .zip(vertices)
            .filter(|(kp, _)| kp.confidence > threshold)
            .map(|(kp, vertex)| (*vertex, Point::new(kp.x, kp.y)))
            .unzip();
        Self { pitch, image }
    }

    pub fn len(&self) -> usize {
        self.pitch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pitch.is_empty()
    }
}

/// Result of homography estimation for one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameHomography {
    Valid {
        image_to_pitch: Transform,
        pitch_to_image: Transform,
    },
    Degenerate {
        pairs: usize,
    },
}

impl FrameHomography {
    pub fn estimate(keypoints: &[Keypoint], vertices: &[Point], threshold: f32) -> Self {
        let set = CorrespondenceSet::from_keypoints(keypoints, vertices, threshold);
        let degenerate = FrameHomography::Degenerate { pairs: set.len() };
        if set.len() < MIN_PAIRS {
            return degenerate;
        }

        let image_to_pitch = Transform::fit(&set.image, &set.pitch, Direction::ImageToPitch);
        let pitch_to_image = Transform::fit(&set.pitch, &set.image, Direction::PitchToImage);
        match (image_to_pitch, pitch_to_image) {
            (Some(image_to_pitch), Some(pitch_to_image)) => FrameHomography::Valid {
                image_to_pitch,
                pitch_to_image,
            },
            _ => degenerate,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, FrameHomography::Valid { .. })
    }

    pub fn image_to_pitch(&self) -> Option<&Transform> {
        match self {
            FrameHomography::Valid { image_to_pitch, .. } => Some(image_to_pitch),
            FrameHomography::Degenerate { .. } => None,
        }
    }

    pub fn pitch_to_image(&self) -> Option<&Transform> {
        match self {
            FrameHomography::Valid { pitch_to_image, .. } => Some(pitch_to_image),
            FrameHomography::Degenerate { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::pitch::SoccerPitchConfiguration;

    /// A perspective-ish mapping from pitch centimeters to a 1280x720 image.
    fn project(p: Point) -> Point {
        let m = Matrix3::new(0.08, 0.02, 100.0, 0.0, 0.07, 80.0, 0.0, 0.000005, 1.0);
        let v = m * Vector3::new(p.x as f64, p.y as f64, 1.0);
        Point::new((v.x / v.z) as f32, (v.y / v.z) as f32)
    }

    fn keypoints_for(vertices: &[Point], visible: &[usize], confidence: f32) -> Vec<Keypoint> {
        vertices
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let img = project(*v);
                Keypoint {
                    x: img.x,
                    y: img.y,
                    confidence: if visible.contains(&i) { confidence } else { 0.1 },
                }
            })
            .collect()
    }

    #[test]
    fn test_fit_recovers_mapping_and_round_trips() {
        let vertices = SoccerPitchConfiguration::default().vertices();
        let keypoints = keypoints_for(&vertices, &[0, 5, 13, 16, 24, 29], 0.9);
        let homography = FrameHomography::estimate(&keypoints, &vertices, 0.5);

        let to_pitch = homography.image_to_pitch().unwrap();
        let to_image = homography.pitch_to_image().unwrap();
        assert_eq!(to_pitch.direction(), Direction::ImageToPitch);

        // A vertex that was not used for fitting
        let vertex = vertices[8];
        let image = project(vertex);
        assert!(to_image.apply_point(vertex).distance(&image) < 0.5);
        let back = to_image.apply_point(to_pitch.apply_point(image));
        assert!(back.distance(&image) < 0.5);
        assert!(to_pitch.apply_point(image).distance(&vertex) < 5.0);
    }

    #[test]
    fn test_three_pairs_are_degenerate() {
        let vertices = SoccerPitchConfiguration::default().vertices();
        let keypoints = keypoints_for(&vertices, &[0, 5, 29], 0.9);
        assert_eq!(
            FrameHomography::estimate(&keypoints, &vertices, 0.5),
            FrameHomography::Degenerate { pairs: 3 }
        );
    }

    #[test]
    fn test_threshold_is_strict() {
        let vertices = SoccerPitchConfiguration::default().vertices();
        let keypoints = keypoints_for(&vertices, &[0, 5, 13, 16, 24, 29], 0.5);
        let homography = FrameHomography::estimate(&keypoints, &vertices, 0.5);
        assert!(!homography.is_valid());
    }

    #[test]
    fn test_collinear_points_are_rejected() {
        let src: Vec<Point> = (0..5).map(|i| Point::new(i as f32 * 10.0, 0.0)).collect();
        let dst: Vec<Point> = (0..5).map(|i| Point::new(i as f32 * 5.0, 3.0)).collect();
        assert!(Transform::fit(&src, &dst, Direction::PitchToImage).is_none());
    }

    #[test]
    fn test_exact_four_pairs() {
        let src = [
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(1.0, 1.0),
            Point::new(0.0, 1.0),
        ];
        let dst = [
            Point::new(10.0, 10.0),
            Point::new(30.0, 12.0),
            Point::new(28.0, 35.0),
            Point::new(8.0, 30.0),
        ];
        let t = Transform::fit(&src, &dst, Direction::PitchToImage).unwrap();
        for (s, d) in src.iter().zip(&dst) {
            assert!(t.apply_point(*s).distance(d) < 1e-3);
        }
    }
}
