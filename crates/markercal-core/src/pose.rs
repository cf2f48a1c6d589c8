//! Rigid transforms as rotation vector + translation.

use crate::Homography;
use nalgebra::{Matrix3, Point3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

/// Object-to-camera transform: `X_cam = R(rvec) * X_obj + tvec`.
///
/// `rvec` is an axis-angle vector (direction = axis, norm = angle in radians).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub rvec: Vector3<f64>,
    pub tvec: Vector3<f64>,
}

impl Pose {
    pub fn new(rvec: Vector3<f64>, tvec: Vector3<f64>) -> Self {
        Self { rvec, tvec }
    }

    pub fn from_rotation(rotation: &Rotation3<f64>, tvec: Vector3<f64>) -> Self {
        Self {
            rvec: rotation.scaled_axis(),
            tvec,
        }
    }

    #[inline]
    pub fn rotation(&self) -> Rotation3<f64> {
        Rotation3::new(self.rvec)
    }

    #[inline]
    pub fn transform_point(&self, p: &Point3<f64>) -> Point3<f64> {
        self.rotation() * p + self.tvec
    }

    /// Pack as `[rx, ry, rz, tx, ty, tz]`.
    pub fn to_params(&self) -> [f64; 6] {
        [
            self.rvec.x,
            self.rvec.y,
            self.rvec.z,
            self.tvec.x,
            self.tvec.y,
            self.tvec.z,
        ]
    }

    pub fn from_params(p: &[f64]) -> Self {
        Self::new(
            Vector3::new(p[0], p[1], p[2]),
            Vector3::new(p[3], p[4], p[5]),
        )
    }

    /// Recover the pose of the `z = 0` plane from a homography expressed in
    /// normalized (undistorted, `K⁻¹`-applied) image coordinates.
    ///
    /// `H ~ [r1 r2 t]`; the rotation is re-orthonormalized through SVD and the
    /// sign is chosen so the plane lies in front of the camera.
    pub fn from_plane_homography(h: &Homography) -> Option<Self> {
        let h1 = h.h.column(0).into_owned();
        let h2 = h.h.column(1).into_owned();
        let h3 = h.h.column(2).into_owned();

        let norm = 0.5 * (h1.norm() + h2.norm());
        if !norm.is_finite() || norm < 1e-12 {
            return None;
        }
        let mut scale = 1.0 / norm;
        if h3.z * scale < 0.0 {
            scale = -scale;
        }

        let r1 = h1 * scale;
        let r2 = h2 * scale;
        let r3 = r1.cross(&r2);
        let t = h3 * scale;

        let svd = Matrix3::from_columns(&[r1, r2, r3]).svd(true, true);
        let (u, v_t) = (svd.u?, svd.v_t?);
        let mut r = u * v_t;
        if r.determinant() < 0.0 {
            // Reflection: flip the axis with the smallest singular value.
            let mut u_fixed = u;
            let (min_idx, _) = svd
                .singular_values
                .iter()
                .enumerate()
                .min_by(|a, b| a.1.total_cmp(b.1))?;
            u_fixed.column_mut(min_idx).neg_mut();
            r = u_fixed * v_t;
        }

        let rotation = Rotation3::from_matrix_unchecked(r);
        Some(Self::from_rotation(&rotation, t))
    }
}
