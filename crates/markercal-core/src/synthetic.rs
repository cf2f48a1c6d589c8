//! Synthetic planar scenes rendered through the full camera model.
//!
//! Used by tests and demos to produce images with known ground truth: a
//! texture defined on the object plane `z = 0` is ray-cast through
//! [`Intrinsics`] (including distortion) and a [`Pose`].

use crate::{ImageSize, Intrinsics, Pose};
use image::{GrayImage, Luma};
use nalgebra::{Point2, Point3, Rotation3, Vector3};

/// Pose that maps object point `target` to `camera_point` in the camera frame.
pub fn pose_through(
    rotation: Rotation3<f64>,
    target: Point3<f64>,
    camera_point: Point3<f64>,
) -> Pose {
    let t = camera_point.coords - rotation * target.coords;
    Pose::from_rotation(&rotation, t)
}

/// Project object points; `None` if any point falls behind the camera.
pub fn project_points(
    intrinsics: &Intrinsics,
    pose: &Pose,
    points: &[Point3<f64>],
) -> Option<Vec<Point2<f64>>> {
    points.iter().map(|p| intrinsics.project(pose, p)).collect()
}

/// Render a plane texture.
///
/// `texture(x, y)` returns the intensity at object-plane coordinates, or
/// `None` outside the target, where `background` is used. Each pixel averages
/// a `supersample × supersample` grid of rays.
pub fn render_plane<F>(
    intrinsics: &Intrinsics,
    pose: &Pose,
    size: ImageSize,
    supersample: u32,
    background: u8,
    texture: F,
) -> GrayImage
where
    F: Fn(f64, f64) -> Option<u8>,
{
    let n = supersample.max(1);
    let rotation = pose.rotation();
    let r_inv = rotation.inverse();
    let normal = rotation * Vector3::z();
    let plane_d = normal.dot(&pose.tvec);

    let sample = |u: f64, v: f64| -> f64 {
        let Some(ray) = intrinsics.undistort_normalized(Point2::new(u, v)) else {
            return background as f64;
        };
        let dir = Vector3::new(ray.x, ray.y, 1.0);
        let denom = normal.dot(&dir);
        if denom.abs() < 1e-12 {
            return background as f64;
        }
        let lambda = plane_d / denom;
        if lambda <= 0.0 {
            return background as f64;
        }
        let obj = r_inv * (dir * lambda - pose.tvec);
        texture(obj.x, obj.y).unwrap_or(background) as f64
    };

    let step = 1.0 / n as f64;
    GrayImage::from_fn(size.width, size.height, |x, y| {
        let mut acc = 0.0;
        for sy in 0..n {
            for sx in 0..n {
                let u = x as f64 - 0.5 + (sx as f64 + 0.5) * step;
                let v = y as f64 - 0.5 + (sy as f64 + 0.5) * step;
                acc += sample(u, v);
            }
        }
        Luma([(acc / (n * n) as f64).round().clamp(0.0, 255.0) as u8])
    })
}

/// Chessboard texture whose inner corners sit at `(c * square, r * square)`
/// for `c < cols`, `r < rows`, surrounded by one white square of margin.
pub fn chessboard_texture(
    rows: usize,
    cols: usize,
    square: f64,
) -> impl Fn(f64, f64) -> Option<u8> {
    const BLACK: u8 = 25;
    const WHITE: u8 = 235;
    move |x, y| {
        let i = (x / square).floor() as i64 + 1;
        let j = (y / square).floor() as i64 + 1;
        let (sq_x, sq_y) = (cols as i64 + 1, rows as i64 + 1);
        if i < -1 || j < -1 || i > sq_x || j > sq_y {
            return None;
        }
        if i < 0 || j < 0 || i >= sq_x || j >= sq_y {
            return Some(WHITE);
        }
        Some(if (i + j) % 2 == 0 { BLACK } else { WHITE })
    }
}

/// Render a `rows × cols` inner-corner chessboard seen from `pose`.
pub fn render_chessboard(
    intrinsics: &Intrinsics,
    pose: &Pose,
    size: ImageSize,
    rows: usize,
    cols: usize,
    square: f64,
) -> GrayImage {
    render_plane(
        intrinsics,
        pose,
        size,
        3,
        128,
        chessboard_texture(rows, cols, square),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CameraMatrix, Distortion};

    fn camera() -> Intrinsics {
        Intrinsics::new(
            CameraMatrix::new(400.0, 400.0, 160.0, 120.0),
            Distortion::default(),
        )
    }

    #[test]
    fn pose_through_places_target() {
        let rot = Rotation3::from_euler_angles(0.2, -0.1, 0.3);
        let pose = pose_through(rot, Point3::new(1.0, 2.0, 0.0), Point3::new(0.0, 0.0, 8.0));
        let p = pose.transform_point(&Point3::new(1.0, 2.0, 0.0));
        assert!((p - Point3::new(0.0, 0.0, 8.0)).norm() < 1e-12);
    }

    #[test]
    fn fronto_parallel_board_has_expected_squares() {
        let intr = camera();
        // Board origin at the principal point, 1 unit = 40 px at z = 10.
        let pose = Pose::new(Vector3::zeros(), Vector3::new(0.0, 0.0, 10.0));
        let img = render_chessboard(&intr, &pose, ImageSize::new(320, 240), 3, 3, 1.0);

        // Square (1,1) spans object [0,1]x[0,1] -> pixels [160,200]x[120,160]; i+j = 2 -> black.
        assert!(img.get_pixel(180, 140)[0] < 60);
        // Square (2,1) is white.
        assert!(img.get_pixel(220, 140)[0] > 200);
        // Far outside the board is background.
        assert_eq!(img.get_pixel(2, 2)[0], 128);
    }

    #[test]
    fn projection_matches_rendering_geometry() {
        let intr = camera();
        let pose = Pose::new(Vector3::zeros(), Vector3::new(0.0, 0.0, 10.0));
        let pts = project_points(&intr, &pose, &[Point3::new(1.0, 1.0, 0.0)]).expect("visible");
        assert!((pts[0] - Point2::new(200.0, 160.0)).norm() < 1e-9);
    }
}
