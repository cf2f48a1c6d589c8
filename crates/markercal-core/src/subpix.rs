//! Gradient-based subpixel corner refinement.
//!
//! For the true corner `q`, every image gradient `g(p)` in a small window is
//! orthogonal to `p - q`. Summing `g gᵀ (p - q) = 0` over the window gives a
//! 2×2 linear system that is solved iteratively around the current estimate.

use crate::{sample_bilinear, GrayImageView};
use nalgebra::{Matrix2, Point2, Vector2};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubpixParams {
    /// Window half size in pixels; the window is `(2h + 1)²`.
    pub half_window: usize,
    pub max_iters: usize,
    /// Stop when the update is shorter than this (pixels).
    pub epsilon: f32,
}

impl Default for SubpixParams {
    fn default() -> Self {
        Self {
            half_window: 4,
            max_iters: 30,
            epsilon: 0.01,
        }
    }
}

/// Refine `corners` in place.
///
/// Corners whose refinement is ill-conditioned, leaves the image, or drifts
/// further than the window half size keep their input position.
pub fn refine_corners_subpix(
    img: &GrayImageView<'_>,
    corners: &mut [Point2<f32>],
    params: &SubpixParams,
) {
    if params.half_window == 0 || img.width < 3 || img.height < 3 {
        return;
    }
    for c in corners.iter_mut() {
        if let Some(refined) = refine_one(img, *c, params) {
            *c = refined;
        }
    }
}

fn refine_one(
    img: &GrayImageView<'_>,
    start: Point2<f32>,
    params: &SubpixParams,
) -> Option<Point2<f32>> {
    let hw = params.half_window as i32;
    let sigma = (params.half_window as f32 * 0.5).max(0.5);
    let inv_two_sigma2 = 1.0 / (2.0 * sigma * sigma);
    let max_drift = params.half_window as f32;

    let mut q = Vector2::new(start.x, start.y);
    for _ in 0..params.max_iters.max(1) {
        let mut a = Matrix2::<f32>::zeros();
        let mut b = Vector2::<f32>::zeros();

        for dy in -hw..=hw {
            for dx in -hw..=hw {
                let px = q.x + dx as f32;
                let py = q.y + dy as f32;
                if !img.contains(px - 1.0, py - 1.0) || !img.contains(px + 1.0, py + 1.0) {
                    continue;
                }
                let gx = 0.5
                    * (sample_bilinear(img, px + 1.0, py) - sample_bilinear(img, px - 1.0, py));
                let gy = 0.5
                    * (sample_bilinear(img, px, py + 1.0) - sample_bilinear(img, px, py - 1.0));
                let w = (-((dx * dx + dy * dy) as f32) * inv_two_sigma2).exp();

                let gxx = w * gx * gx;
                let gxy = w * gx * gy;
                let gyy = w * gy * gy;
                a[(0, 0)] += gxx;
                a[(0, 1)] += gxy;
                a[(1, 0)] += gxy;
                a[(1, 1)] += gyy;
                b.x += gxx * px + gxy * py;
                b.y += gxy * px + gyy * py;
            }
        }

        let det = a.determinant();
        let scale = a.trace().max(1e-6);
        if det.abs() < 1e-6 * scale * scale {
            return None;
        }
        let next = a.try_inverse()? * b;
        if !next.x.is_finite() || !next.y.is_finite() {
            return None;
        }

        let shift = (next - q).norm();
        q = next;
        if shift < params.epsilon {
            break;
        }
    }

    let drift = (q - Vector2::new(start.x, start.y)).norm();
    if drift > max_drift || !img.contains(q.x, q.y) {
        return None;
    }
    Some(Point2::new(q.x, q.y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gray_view;
    use image::{GrayImage, Luma};

    /// X-junction centered at a non-integer location, rendered with 8×8 supersampling.
    fn x_junction(cx: f32, cy: f32) -> GrayImage {
        GrayImage::from_fn(40, 40, |x, y| {
            let mut acc = 0u32;
            for sy in 0..8 {
                for sx in 0..8 {
                    let px = x as f32 + (sx as f32 + 0.5) / 8.0 - 0.5;
                    let py = y as f32 + (sy as f32 + 0.5) / 8.0 - 0.5;
                    let dark = (px < cx) ^ (py < cy);
                    acc += if dark { 20 } else { 230 };
                }
            }
            Luma([(acc / 64) as u8])
        })
    }

    #[test]
    fn converges_to_x_junction() {
        let img = x_junction(20.3, 18.7);
        let view = gray_view(&img);
        let mut corners = [Point2::new(21.0_f32, 18.0)];
        refine_corners_subpix(&view, &mut corners, &SubpixParams::default());
        assert!((corners[0].x - 20.3).abs() < 0.1, "x = {}", corners[0].x);
        assert!((corners[0].y - 18.7).abs() < 0.1, "y = {}", corners[0].y);
    }

    #[test]
    fn flat_region_keeps_input() {
        let img = GrayImage::from_pixel(30, 30, Luma([128]));
        let view = gray_view(&img);
        let mut corners = [Point2::new(15.0_f32, 15.0)];
        refine_corners_subpix(&view, &mut corners, &SubpixParams::default());
        assert_eq!(corners[0], Point2::new(15.0, 15.0));
    }
}
