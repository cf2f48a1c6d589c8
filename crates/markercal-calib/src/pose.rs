//! Marker pose from four corners and known intrinsics.

use crate::lm::{minimize, LmOptions, NllsProblem};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_line_segment_mut;
use markercal_aruco::Marker;
use markercal_core::{homography_from_4pt, Homography, Intrinsics, Pose};
use nalgebra::{DVector, Point2, Point3};

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PoseError {
    #[error("camera is not calibrated")]
    NotCalibrated,
    #[error("marker side length must be positive and finite, got {0}")]
    InvalidMarkerSide(f64),
}

/// Marker corners on the object plane in canonical order, `y` up.
pub fn marker_object_points(side: f64) -> [Point3<f64>; 4] {
    let h = side / 2.0;
    [
        Point3::new(-h, h, 0.0),
        Point3::new(h, h, 0.0),
        Point3::new(h, -h, 0.0),
        Point3::new(-h, -h, 0.0),
    ]
}

#[derive(Clone, Debug)]
pub struct PoseEstimator {
    intrinsics: Option<Intrinsics>,
    lm: LmOptions,
}

impl PoseEstimator {
    pub fn new(intrinsics: Option<Intrinsics>) -> Self {
        Self {
            intrinsics,
            lm: LmOptions {
                max_iterations: 30,
                ..LmOptions::default()
            },
        }
    }

    pub fn intrinsics(&self) -> Option<&Intrinsics> {
        self.intrinsics.as_ref()
    }

    /// One entry per marker, index-aligned with `markers`. A marker whose
    /// corners admit no homography gets `None`; the others are unaffected.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, markers), fields(markers = markers.len()))
    )]
    pub fn estimate(
        &self,
        markers: &[Marker],
        marker_side: f64,
    ) -> Result<Vec<Option<Pose>>, PoseError> {
        let intrinsics = self.intrinsics.as_ref().ok_or(PoseError::NotCalibrated)?;
        if !(marker_side.is_finite() && marker_side > 0.0) {
            return Err(PoseError::InvalidMarkerSide(marker_side));
        }
        Ok(markers
            .iter()
            .map(|m| self.estimate_corners(intrinsics, &m.corners, marker_side))
            .collect())
    }

    fn estimate_corners(
        &self,
        intrinsics: &Intrinsics,
        corners: &[Point2<f32>; 4],
        side: f64,
    ) -> Option<Pose> {
        let object = marker_object_points(side);
        let image = corners.map(|p| Point2::new(p.x as f64, p.y as f64));

        let mut normalized = [Point2::origin(); 4];
        for (n, p) in normalized.iter_mut().zip(&image) {
            *n = intrinsics.undistort_normalized(*p)?;
        }
        let plane = object.map(|p| Point2::new(p.x, p.y));
        let h: Homography = homography_from_4pt(&plane, &normalized)?;
        let initial = Pose::from_plane_homography(&h)?;

        let problem = MarkerReprojection {
            intrinsics,
            object: &object,
            image: &image,
        };
        let (x, report) = minimize(
            &problem,
            DVector::from_row_slice(&initial.to_params()),
            &self.lm,
        );
        let refined = Pose::from_params(x.as_slice());
        if report.final_cost <= report.initial_cost && refined.tvec.z > 0.0 {
            Some(refined)
        } else {
            Some(initial)
        }
    }
}

struct MarkerReprojection<'a> {
    intrinsics: &'a Intrinsics,
    object: &'a [Point3<f64>; 4],
    image: &'a [Point2<f64>; 4],
}

impl NllsProblem for MarkerReprojection<'_> {
    fn num_params(&self) -> usize {
        6
    }

    fn num_residuals(&self) -> usize {
        8
    }

    fn residuals(&self, x: &DVector<f64>) -> DVector<f64> {
        let pose = Pose::from_params(x.as_slice());
        let mut r = DVector::zeros(8);
        for (k, (obj, img)) in self.object.iter().zip(self.image).enumerate() {
            let (du, dv) = match self.intrinsics.project(&pose, obj) {
                Some(p) => (p.x - img.x, p.y - img.y),
                None => (1e6, 1e6),
            };
            r[2 * k] = du;
            r[2 * k + 1] = dv;
        }
        r
    }
}

/// Image positions of the pose origin and the tips of its x, y and z axes.
pub fn project_axes(
    intrinsics: &Intrinsics,
    pose: &Pose,
    length: f64,
) -> Option<[Point2<f64>; 4]> {
    let points = [
        Point3::origin(),
        Point3::new(length, 0.0, 0.0),
        Point3::new(0.0, length, 0.0),
        Point3::new(0.0, 0.0, length),
    ];
    let mut out = [Point2::origin(); 4];
    for (dst, p) in out.iter_mut().zip(&points) {
        *dst = intrinsics.project(pose, p)?;
    }
    Some(out)
}

const AXIS_COLORS: [Rgb<u8>; 3] = [Rgb([255, 0, 0]), Rgb([0, 255, 0]), Rgb([0, 0, 255])];

/// Draw the pose axes: x red, y green, z blue. Returns `false` when an axis
/// point is behind the camera and nothing was drawn.
pub fn draw_axes(image: &mut RgbImage, intrinsics: &Intrinsics, pose: &Pose, length: f64) -> bool {
    let Some(axes) = project_axes(intrinsics, pose, length) else {
        return false;
    };
    let o = axes[0];
    for (tip, color) in axes[1..].iter().zip(AXIS_COLORS) {
        // Two pixels wide.
        for (dx, dy) in [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0)] {
            draw_line_segment_mut(
                image,
                ((o.x + dx) as f32, (o.y + dy) as f32),
                ((tip.x + dx) as f32, (tip.y + dy) as f32),
                color,
            );
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use markercal_core::{CameraMatrix, Distortion};
    use nalgebra::{Rotation3, Vector3};

    fn intrinsics() -> Intrinsics {
        Intrinsics::new(
            CameraMatrix::new(600.0, 600.0, 320.0, 240.0),
            Distortion {
                k1: -0.1,
                k2: 0.02,
                ..Distortion::default()
            },
        )
    }

    fn marker_from_pose(intr: &Intrinsics, pose: &Pose, side: f64) -> Marker {
        let corners = marker_object_points(side).map(|p| {
            let q = intr.project(pose, &p).unwrap();
            Point2::new(q.x as f32, q.y as f32)
        });
        Marker { id: 0, corners }
    }

    #[test]
    fn recovers_pose_from_exact_corners() {
        let intr = intrinsics();
        let rotation = Rotation3::from_euler_angles(std::f64::consts::PI + 0.3, 0.2, 0.4);
        let truth = Pose::from_rotation(&rotation, Vector3::new(0.05, -0.03, 0.8));
        let marker = marker_from_pose(&intr, &truth, 0.1);

        let poses = PoseEstimator::new(Some(intr))
            .estimate(&[marker], 0.1)
            .unwrap();
        assert_eq!(poses.len(), 1);
        let pose = poses[0].unwrap();
        assert!((pose.tvec - truth.tvec).norm() < 1e-3, "{pose:?}");
        let angle = (pose.rotation().inverse() * truth.rotation()).angle();
        assert!(angle < 1e-2, "rotation off by {angle}");
    }

    #[test]
    fn translation_scales_with_side_length() {
        let intr = intrinsics();
        let rotation = Rotation3::from_euler_angles(std::f64::consts::PI, 0.1, 0.0);
        let truth = Pose::from_rotation(&rotation, Vector3::new(0.0, 0.0, 1.0));
        let marker = marker_from_pose(&intr, &truth, 0.2);

        let est = PoseEstimator::new(Some(intr));
        let a = est.estimate(&[marker], 0.2).unwrap()[0].unwrap();
        let b = est.estimate(&[marker], 0.4).unwrap()[0].unwrap();
        assert!((b.tvec - a.tvec * 2.0).norm() < 1e-3);
    }

    #[test]
    fn preconditions() {
        let est = PoseEstimator::new(None);
        assert_eq!(est.estimate(&[], 1.0), Err(PoseError::NotCalibrated));

        let est = PoseEstimator::new(Some(intrinsics()));
        assert_eq!(est.estimate(&[], 1.0), Ok(vec![]));
        assert_eq!(est.estimate(&[], 0.0), Err(PoseError::InvalidMarkerSide(0.0)));
        assert!(matches!(
            est.estimate(&[], f64::NAN),
            Err(PoseError::InvalidMarkerSide(_))
        ));
    }

    #[test]
    fn collapsed_marker_leaves_the_others_intact() {
        let intr = intrinsics();
        let rotation = Rotation3::from_euler_angles(std::f64::consts::PI + 0.2, -0.1, 0.3);
        let truth = Pose::from_rotation(&rotation, Vector3::new(-0.04, 0.02, 0.7));
        let good = marker_from_pose(&intr, &truth, 0.1);
        let flat = Marker {
            id: 1,
            corners: [Point2::new(100.0, 100.0); 4],
        };

        let est = PoseEstimator::new(Some(intr));
        let poses = est.estimate(&[good, flat, good], 0.1).unwrap();
        assert_eq!(poses.len(), 3);
        assert_eq!(poses[1], None);
        for pose in [poses[0], poses[2]] {
            let pose = pose.expect("valid marker keeps its pose");
            assert!((pose.tvec - truth.tvec).norm() < 1e-3, "{pose:?}");
        }
        assert_eq!(est.estimate(&[flat], 0.1), Ok(vec![None]));
    }

    #[test]
    fn axes_start_at_the_projected_origin() {
        let intr = Intrinsics::new(
            CameraMatrix::new(500.0, 500.0, 160.0, 120.0),
            Distortion::default(),
        );
        let pose = Pose::new(Vector3::zeros(), Vector3::new(0.0, 0.0, 2.0));
        let axes = project_axes(&intr, &pose, 0.4).unwrap();
        let expected = [(160.0, 120.0), (260.0, 120.0), (160.0, 220.0)];
        for (got, (x, y)) in axes.iter().zip(expected) {
            assert!((got - Point2::new(x, y)).norm() < 1e-9, "{got:?}");
        }

        let mut img = RgbImage::new(320, 240);
        assert!(draw_axes(&mut img, &intr, &pose, 0.4));
        assert_eq!(*img.get_pixel(200, 120), Rgb([255, 0, 0]));
        assert_eq!(*img.get_pixel(160, 180), Rgb([0, 255, 0]));

        let behind = Pose::new(Vector3::zeros(), Vector3::new(0.0, 0.0, -2.0));
        assert!(!draw_axes(&mut img, &intr, &behind, 0.4));
    }
}
