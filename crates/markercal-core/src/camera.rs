//! Pinhole intrinsics and the Brown–Conrady (OpenCV 5-coefficient) lens model.

use crate::Pose;
use nalgebra::{Matrix3, Point2, Point3};
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CameraError {
    #[error("invalid focal length (fx={fx}, fy={fy})")]
    InvalidFocalLength { fx: f64, fy: f64 },
    #[error("camera parameters must be finite")]
    NonFinite,
}

/// Image dimensions in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for ImageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Zero-skew 3×3 camera matrix `[fx 0 cx; 0 fy cy; 0 0 1]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraMatrix {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl CameraMatrix {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// The nine matrix entries in row-major order.
    pub fn to_row_major(&self) -> [f64; 9] {
        [self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0]
    }

    /// Read back from row-major entries. Skew and the last row are ignored.
    pub fn from_row_major(m: &[f64; 9]) -> Self {
        Self::new(m[0], m[4], m[2], m[5])
    }

    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::from_row_slice(&self.to_row_major())
    }

    pub fn validate(&self) -> Result<(), CameraError> {
        if ![self.fx, self.fy, self.cx, self.cy]
            .iter()
            .all(|v| v.is_finite())
        {
            return Err(CameraError::NonFinite);
        }
        if self.fx.abs() < 1e-12 || self.fy.abs() < 1e-12 {
            return Err(CameraError::InvalidFocalLength {
                fx: self.fx,
                fy: self.fy,
            });
        }
        Ok(())
    }

    #[inline]
    pub fn pixel_to_normalized(&self, p: Point2<f64>) -> Point2<f64> {
        Point2::new((p.x - self.cx) / self.fx, (p.y - self.cy) / self.fy)
    }

    #[inline]
    pub fn normalized_to_pixel(&self, n: Point2<f64>) -> Point2<f64> {
        Point2::new(self.fx * n.x + self.cx, self.fy * n.y + self.cy)
    }
}

/// Radial-tangential distortion coefficients.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

impl Distortion {
    /// Coefficients in OpenCV order: `k1, k2, p1, p2, k3`.
    pub fn to_array(&self) -> [f64; 5] {
        [self.k1, self.k2, self.p1, self.p2, self.k3]
    }

    pub fn from_array(d: &[f64; 5]) -> Self {
        Self {
            k1: d[0],
            k2: d[1],
            p1: d[2],
            p2: d[3],
            k3: d[4],
        }
    }

    pub fn is_zero(&self) -> bool {
        self.to_array().iter().all(|&v| v == 0.0)
    }

    /// Apply distortion to normalized coordinates.
    #[inline]
    pub fn distort(&self, n: Point2<f64>) -> Point2<f64> {
        let (x, y) = (n.x, n.y);
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let radial = 1.0 + self.k1 * r2 + self.k2 * r4 + self.k3 * r6;
        let x_tan = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let y_tan = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
        Point2::new(x * radial + x_tan, y * radial + y_tan)
    }

    /// Invert [`Self::distort`] by fixed-point iteration.
    ///
    /// Returns `None` when the iteration leaves the valid region of the model.
    pub fn undistort(&self, d: Point2<f64>) -> Option<Point2<f64>> {
        const MAX_ITERS: usize = 20;
        const EPS: f64 = 1e-14;

        if self.is_zero() {
            return Some(d);
        }

        let (mut x, mut y) = (d.x, d.y);
        for _ in 0..MAX_ITERS {
            let r2 = x * x + y * y;
            let r4 = r2 * r2;
            let r6 = r4 * r2;
            let radial = 1.0 + self.k1 * r2 + self.k2 * r4 + self.k3 * r6;
            if !radial.is_finite() || radial.abs() < 1e-12 {
                return None;
            }
            let dx_tan = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
            let dy_tan = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
            let x_next = (d.x - dx_tan) / radial;
            let y_next = (d.y - dy_tan) / radial;
            if !x_next.is_finite() || !y_next.is_finite() {
                return None;
            }
            let step = (x_next - x).powi(2) + (y_next - y).powi(2);
            x = x_next;
            y = y_next;
            if step <= EPS * EPS {
                break;
            }
        }
        Some(Point2::new(x, y))
    }
}

/// Camera matrix plus distortion; the unit persisted by the calibration store.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub camera: CameraMatrix,
    pub distortion: Distortion,
}

impl Intrinsics {
    pub fn new(camera: CameraMatrix, distortion: Distortion) -> Self {
        Self { camera, distortion }
    }

    pub fn validate(&self) -> Result<(), CameraError> {
        self.camera.validate()?;
        if !self.distortion.to_array().iter().all(|v| v.is_finite()) {
            return Err(CameraError::NonFinite);
        }
        Ok(())
    }

    /// Project a point given in camera coordinates. `None` behind the camera.
    #[inline]
    pub fn project_camera_point(&self, pc: &Point3<f64>) -> Option<Point2<f64>> {
        if pc.z <= 1e-12 {
            return None;
        }
        let n = Point2::new(pc.x / pc.z, pc.y / pc.z);
        Some(self.camera.normalized_to_pixel(self.distortion.distort(n)))
    }

    /// Project an object point through `pose` into distorted pixel coordinates.
    #[inline]
    pub fn project(&self, pose: &Pose, p: &Point3<f64>) -> Option<Point2<f64>> {
        self.project_camera_point(&pose.transform_point(p))
    }

    /// Map a distorted pixel to undistorted normalized image coordinates.
    pub fn undistort_normalized(&self, p: Point2<f64>) -> Option<Point2<f64>> {
        self.distortion
            .undistort(self.camera.pixel_to_normalized(p))
    }

    /// Map a distorted pixel to the undistorted pixel it would have on an ideal pinhole.
    pub fn undistort_pixel(&self, p: Point2<f64>) -> Option<Point2<f64>> {
        self.undistort_normalized(p)
            .map(|n| self.camera.normalized_to_pixel(n))
    }
}
