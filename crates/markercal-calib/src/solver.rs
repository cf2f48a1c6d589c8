//! Planar-target camera calibration.
//!
//! 1. One homography per view (normalized DLT).
//! 2. Closed-form intrinsics from the homographies (Zhang, zero skew) when at
//!    least three views are available, otherwise a principal-point-at-center
//!    focal estimate.
//! 3. Per-view extrinsics by decomposing `K⁻¹H`.
//! 4. Joint Levenberg–Marquardt refinement of intrinsics, distortion and all
//!    view poses on the reprojection error.

use crate::lm::{diff_step, minimize, LmOptions, NllsProblem};
use log::{debug, info, warn};
use markercal_core::{
    estimate_homography, CameraMatrix, Distortion, Homography, ImageSize, Intrinsics, Pose,
};
use nalgebra::{DMatrix, DVector, Matrix3, Point2, Point3, SVector};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("no calibration samples")]
    NoSamples,
    #[error("{objects} object point sets but {images} image point sets")]
    MismatchedSets { objects: usize, images: usize },
    #[error("view {view}: {objects} object points but {images} image points")]
    MismatchedPoints {
        view: usize,
        objects: usize,
        images: usize,
    },
    #[error("view {view}: {points} points, at least 4 are required")]
    TooFewPoints { view: usize, points: usize },
    #[error("image size must be non-zero")]
    EmptyImageSize,
    #[error("object points must lie on the z = 0 plane")]
    NonPlanarTarget,
    #[error("view {view}: degenerate point configuration")]
    DegenerateView { view: usize },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    /// Solver patience; the evaluation budget is `max_iterations * (n + 1)`.
    pub max_iterations: usize,
    pub function_tolerance: f64,
    pub parameter_tolerance: f64,
    pub gradient_tolerance: f64,
    /// Keep `p1 = p2 = 0`.
    pub fix_tangential: bool,
    /// RMS reprojection error (pixels) above which the fit is reported as poor.
    pub max_rms_warning: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            function_tolerance: 1e-10,
            parameter_tolerance: 1e-10,
            gradient_tolerance: 1e-10,
            fix_tangential: false,
            max_rms_warning: 1.0,
        }
    }
}

/// Calibration result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub intrinsics: Intrinsics,
    /// Target pose per view, index-aligned with the input.
    pub extrinsics: Vec<Pose>,
    pub image_size: ImageSize,
    /// RMS reprojection error in pixels.
    pub rms_error: f64,
    /// Residual evaluations spent by the solver.
    pub iterations: usize,
    pub converged: bool,
    /// Threshold the fit was judged against.
    pub rms_limit: f64,
}

impl Calibration {
    /// Converged with an RMS error within the configured limit.
    pub fn is_good_fit(&self) -> bool {
        self.converged && self.rms_error <= self.rms_limit
    }

    /// Target pose in the most recent view.
    pub fn last_extrinsics(&self) -> Option<&Pose> {
        self.extrinsics.last()
    }
}

#[derive(Clone, Debug, Default)]
pub struct CalibrationSolver {
    options: SolverOptions,
}

impl CalibrationSolver {
    pub fn new(options: SolverOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SolverOptions {
        &self.options
    }

    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(views = image_sets.len(), size = %image_size))
    )]
    pub fn solve<O: AsRef<[Point3<f64>]>>(
        &self,
        object_sets: &[O],
        image_sets: &[Vec<Point2<f64>>],
        image_size: ImageSize,
    ) -> Result<Calibration, CalibrationError> {
        validate_input(object_sets, image_sets, image_size)?;

        let planes: Vec<Vec<Point2<f64>>> = object_sets
            .iter()
            .map(|o| o.as_ref().iter().map(|p| Point2::new(p.x, p.y)).collect())
            .collect();

        let homographies = planes
            .iter()
            .zip(image_sets)
            .enumerate()
            .map(|(view, (obj, img))| {
                estimate_homography(obj, img).ok_or(CalibrationError::DegenerateView { view })
            })
            .collect::<Result<Vec<Homography>, _>>()?;

        let camera = initial_camera(&homographies, image_size);
        debug!(
            "initial camera: fx={:.2} fy={:.2} cx={:.2} cy={:.2}",
            camera.fx, camera.fy, camera.cx, camera.cy
        );

        let k_inv = camera
            .matrix()
            .try_inverse()
            .ok_or(CalibrationError::DegenerateView { view: 0 })?;
        let poses = homographies
            .iter()
            .enumerate()
            .map(|(view, h)| {
                Pose::from_plane_homography(&Homography::new(k_inv * h.h))
                    .ok_or(CalibrationError::DegenerateView { view })
            })
            .collect::<Result<Vec<Pose>, _>>()?;

        let problem = CalibrationProblem {
            objects: object_sets.iter().map(|o| o.as_ref()).collect(),
            images: image_sets,
            fix_tangential: self.options.fix_tangential,
        };
        let x0 = problem.pack(&Intrinsics::new(camera, Distortion::default()), &poses);
        let opts = LmOptions {
            max_iterations: self.options.max_iterations,
            ftol: self.options.function_tolerance,
            xtol: self.options.parameter_tolerance,
            gtol: self.options.gradient_tolerance,
        };
        let (x, report) = minimize(&problem, x0, &opts);
        let (intrinsics, extrinsics) = problem.unpack(&x);

        let residual_count = problem.num_residuals().max(1) as f64;
        let rms_error = (2.0 * report.final_cost / (residual_count / 2.0)).sqrt();
        info!(
            "calibrated {} views in {} evaluations: rms {:.4} px (converged: {})",
            image_sets.len(),
            report.iterations,
            rms_error,
            report.converged
        );
        if rms_error > self.options.max_rms_warning || !report.converged {
            warn!(
                "poor calibration fit: rms {:.4} px, limit {:.4} px, converged {}",
                rms_error, self.options.max_rms_warning, report.converged
            );
        }

        Ok(Calibration {
            intrinsics,
            extrinsics,
            image_size,
            rms_error,
            iterations: report.iterations,
            converged: report.converged,
            rms_limit: self.options.max_rms_warning,
        })
    }
}

fn validate_input<O: AsRef<[Point3<f64>]>>(
    object_sets: &[O],
    image_sets: &[Vec<Point2<f64>>],
    image_size: ImageSize,
) -> Result<(), CalibrationError> {
    if object_sets.is_empty() || image_sets.is_empty() {
        return Err(CalibrationError::NoSamples);
    }
    if object_sets.len() != image_sets.len() {
        return Err(CalibrationError::MismatchedSets {
            objects: object_sets.len(),
            images: image_sets.len(),
        });
    }
    if image_size.is_empty() {
        return Err(CalibrationError::EmptyImageSize);
    }
    for (view, (obj, img)) in object_sets.iter().zip(image_sets).enumerate() {
        let obj = obj.as_ref();
        if obj.len() != img.len() {
            return Err(CalibrationError::MismatchedPoints {
                view,
                objects: obj.len(),
                images: img.len(),
            });
        }
        if obj.len() < 4 {
            return Err(CalibrationError::TooFewPoints {
                view,
                points: obj.len(),
            });
        }
        if obj.iter().any(|p| p.z.abs() > 1e-9) {
            return Err(CalibrationError::NonPlanarTarget);
        }
    }
    Ok(())
}

/// Zhang's closed form when possible, otherwise a centered principal point
/// with a focal length from the homography orthogonality constraints.
fn initial_camera(homographies: &[Homography], size: ImageSize) -> CameraMatrix {
    // Pixel conditioning: center the image and scale its larger side to 1.
    let s = size.width.max(size.height) as f64;
    let (w2, h2) = (size.width as f64 / 2.0, size.height as f64 / 2.0);
    let t = Matrix3::new(1.0 / s, 0.0, -w2 / s, 0.0, 1.0 / s, -h2 / s, 0.0, 0.0, 1.0);
    let conditioned: Vec<Matrix3<f64>> = homographies.iter().map(|h| t * h.h).collect();

    let from_normalized = |fx: f64, fy: f64, cx: f64, cy: f64| {
        CameraMatrix::new(fx * s, fy * s, cx * s + w2, cy * s + h2)
    };

    if conditioned.len() >= 3 {
        if let Some((fx, fy, cx, cy)) = zhang_intrinsics(&conditioned) {
            let cam = from_normalized(fx, fy, cx, cy);
            let sane = (0.2..5.0).contains(&(cam.fx / cam.fy))
                && (-w2..3.0 * w2).contains(&cam.cx)
                && (-h2..3.0 * h2).contains(&cam.cy);
            if sane {
                return cam;
            }
            debug!("closed-form intrinsics rejected: {cam:?}");
        }
    }

    let f = centered_focal(&conditioned).unwrap_or(1.0);
    from_normalized(f, f, 0.0, 0.0)
}

fn v_ij(h: &Matrix3<f64>, i: usize, j: usize) -> SVector<f64, 6> {
    let hi = h.column(i);
    let hj = h.column(j);
    SVector::<f64, 6>::from_row_slice(&[
        hi[0] * hj[0],
        hi[0] * hj[1] + hi[1] * hj[0],
        hi[1] * hj[1],
        hi[2] * hj[0] + hi[0] * hj[2],
        hi[2] * hj[1] + hi[1] * hj[2],
        hi[2] * hj[2],
    ])
}

/// `(fx, fy, cx, cy)` from `B = K⁻ᵀK⁻¹`; the zero-skew constraint `B12 = 0`
/// is added as an extra row.
fn zhang_intrinsics(homographies: &[Matrix3<f64>]) -> Option<(f64, f64, f64, f64)> {
    let m = homographies.len();
    let mut v = DMatrix::<f64>::zeros(2 * m + 1, 6);
    for (k, h) in homographies.iter().enumerate() {
        let h = h / h.column(0).norm().max(1e-12);
        v.row_mut(2 * k).copy_from(&v_ij(&h, 0, 1).transpose());
        v.row_mut(2 * k + 1)
            .copy_from(&(v_ij(&h, 0, 0) - v_ij(&h, 1, 1)).transpose());
    }
    v[(2 * m, 1)] = 1.0;

    let svd = v.svd(false, true);
    let v_t = svd.v_t?;
    let (min_idx, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let b = v_t.row(min_idx);
    let (b11, b12, b22, b13, b23, b33) = (b[0], b[1], b[2], b[3], b[4], b[5]);

    let denom = b11 * b22 - b12 * b12;
    if denom.abs() < 1e-12 * (b11 * b11 + b22 * b22) || b11.abs() < 1e-15 {
        return None;
    }
    let v0 = (b12 * b13 - b11 * b23) / denom;
    let lambda = b33 - (b13 * b13 + v0 * (b12 * b13 - b11 * b23)) / b11;
    if lambda.signum() != b11.signum() {
        return None;
    }
    let alpha = (lambda / b11).sqrt();
    let beta = (lambda * b11 / denom).sqrt();
    let u0 = -b13 * alpha * alpha / lambda;

    [alpha, beta, u0, v0]
        .iter()
        .all(|v| v.is_finite())
        .then_some((alpha, beta, u0, v0))
        .filter(|&(a, b, _, _)| a > 0.0 && b > 0.0)
}

/// Square-pixel focal length with the principal point at the origin of the
/// conditioned frame; averages the per-view estimates.
fn centered_focal(homographies: &[Matrix3<f64>]) -> Option<f64> {
    let mut estimates = Vec::new();
    for h in homographies {
        let (a1, b1, c1) = (h[(0, 0)], h[(1, 0)], h[(2, 0)]);
        let (a2, b2, c2) = (h[(0, 1)], h[(1, 1)], h[(2, 1)]);
        let scale = (a1 * a1 + b1 * b1 + a2 * a2 + b2 * b2).max(1e-24);

        // h1ᵀ ω h2 = 0 and h1ᵀ ω h1 = h2ᵀ ω h2 with ω = diag(1/f², 1/f², 1).
        let orth = c1 * c2;
        if orth.abs() > 1e-9 * scale {
            estimates.push(-(a1 * a2 + b1 * b2) / orth);
        }
        let norm = c1 * c1 - c2 * c2;
        if norm.abs() > 1e-9 * scale {
            estimates.push(-(a1 * a1 + b1 * b1 - a2 * a2 - b2 * b2) / norm);
        }
    }
    let positive: Vec<f64> = estimates
        .into_iter()
        .filter(|f2| f2.is_finite() && *f2 > 0.0)
        .collect();
    if positive.is_empty() {
        return None;
    }
    Some((positive.iter().sum::<f64>() / positive.len() as f64).sqrt())
}

/// Reprojection error over all views.
///
/// Parameter layout: `fx, fy, cx, cy, k1, k2, [p1, p2,] k3`, then
/// `rx, ry, rz, tx, ty, tz` per view.
struct CalibrationProblem<'a> {
    objects: Vec<&'a [Point3<f64>]>,
    images: &'a [Vec<Point2<f64>>],
    fix_tangential: bool,
}

/// Residual used when a point falls behind the camera.
const BEHIND_CAMERA: f64 = 1e6;

impl CalibrationProblem<'_> {
    fn intrinsic_len(&self) -> usize {
        if self.fix_tangential {
            7
        } else {
            9
        }
    }

    fn pack(&self, intr: &Intrinsics, poses: &[Pose]) -> DVector<f64> {
        let c = &intr.camera;
        let d = &intr.distortion;
        let mut x = vec![c.fx, c.fy, c.cx, c.cy, d.k1, d.k2];
        if !self.fix_tangential {
            x.extend([d.p1, d.p2]);
        }
        x.push(d.k3);
        for pose in poses {
            x.extend(pose.to_params());
        }
        DVector::from_vec(x)
    }

    fn unpack_intrinsics(&self, x: &DVector<f64>) -> Intrinsics {
        let camera = CameraMatrix::new(x[0], x[1], x[2], x[3]);
        let distortion = if self.fix_tangential {
            Distortion::from_array(&[x[4], x[5], 0.0, 0.0, x[6]])
        } else {
            Distortion::from_array(&[x[4], x[5], x[6], x[7], x[8]])
        };
        Intrinsics::new(camera, distortion)
    }

    fn view_pose(&self, x: &DVector<f64>, view: usize) -> Pose {
        let start = self.intrinsic_len() + 6 * view;
        Pose::from_params(&x.as_slice()[start..start + 6])
    }

    fn unpack(&self, x: &DVector<f64>) -> (Intrinsics, Vec<Pose>) {
        let poses = (0..self.objects.len())
            .map(|v| self.view_pose(x, v))
            .collect();
        (self.unpack_intrinsics(x), poses)
    }

    /// First residual row of each view.
    fn row_offsets(&self) -> Vec<usize> {
        let mut offsets = Vec::with_capacity(self.objects.len());
        let mut row = 0;
        for obj in &self.objects {
            offsets.push(row);
            row += 2 * obj.len();
        }
        offsets
    }

    fn view_residuals(&self, intr: &Intrinsics, pose: &Pose, view: usize, out: &mut [f64]) {
        for (k, (obj, img)) in self.objects[view].iter().zip(&self.images[view]).enumerate() {
            let (du, dv) = match intr.project(pose, obj) {
                Some(p) => (p.x - img.x, p.y - img.y),
                None => (BEHIND_CAMERA, BEHIND_CAMERA),
            };
            out[2 * k] = du;
            out[2 * k + 1] = dv;
        }
    }
}

impl NllsProblem for CalibrationProblem<'_> {
    fn num_params(&self) -> usize {
        self.intrinsic_len() + 6 * self.objects.len()
    }

    fn num_residuals(&self) -> usize {
        self.objects.iter().map(|o| 2 * o.len()).sum()
    }

    fn residuals(&self, x: &DVector<f64>) -> DVector<f64> {
        let intr = self.unpack_intrinsics(x);
        let mut r = DVector::zeros(self.num_residuals());
        for (view, offset) in self.row_offsets().into_iter().enumerate() {
            let rows = 2 * self.objects[view].len();
            let pose = self.view_pose(x, view);
            self.view_residuals(&intr, &pose, view, &mut r.as_mut_slice()[offset..offset + rows]);
        }
        r
    }

    /// Central differences, block-sparse: intrinsic columns touch every row,
    /// pose columns only the rows of their own view.
    fn jacobian(&self, x: &DVector<f64>) -> DMatrix<f64> {
        let n_intr = self.intrinsic_len();
        let mut jac = DMatrix::zeros(self.num_residuals(), self.num_params());
        let mut xp = x.clone();

        for j in 0..n_intr {
            let h = diff_step(x[j]);
            xp[j] = x[j] + h;
            let rp = self.residuals(&xp);
            xp[j] = x[j] - h;
            let rm = self.residuals(&xp);
            xp[j] = x[j];
            jac.set_column(j, &((rp - rm) / (2.0 * h)));
        }

        let intr = self.unpack_intrinsics(x);
        for (view, offset) in self.row_offsets().into_iter().enumerate() {
            let rows = 2 * self.objects[view].len();
            let base = self.view_pose(x, view).to_params();
            let mut rp = vec![0.0; rows];
            let mut rm = vec![0.0; rows];
            for k in 0..6 {
                let h = diff_step(base[k]);
                let mut plus = base;
                plus[k] += h;
                let mut minus = base;
                minus[k] -= h;
                self.view_residuals(&intr, &Pose::from_params(&plus), view, &mut rp);
                self.view_residuals(&intr, &Pose::from_params(&minus), view, &mut rm);
                let col = n_intr + 6 * view + k;
                for row in 0..rows {
                    jac[(offset + row, col)] = (rp[row] - rm[row]) / (2.0 * h);
                }
            }
        }
        jac
    }
}
