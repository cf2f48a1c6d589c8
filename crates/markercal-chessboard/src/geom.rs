use nalgebra::Vector2;
use std::f32::consts::PI;

/// Compute the absolute difference between two angles (radians),
/// normalized into `[0, π]`.
pub fn angle_diff_abs(a: f32, b: f32) -> f32 {
    let two_pi = 2.0 * PI;
    let mut diff = (b - a).rem_euclid(two_pi);
    if diff >= PI {
        diff -= two_pi;
    }
    diff.abs()
}

/// Dominant grid direction of a set of edge vectors, in `[-π/4, π/4)`.
///
/// Grid edges repeat every 90°, so directions are accumulated in
/// quadruple-angle space; `None` when there is no dominant direction.
pub fn dominant_grid_angle(vectors: &[Vector2<f32>]) -> Option<f32> {
    let mut sum = Vector2::<f32>::zeros();
    let mut count = 0usize;
    for v in vectors {
        if v.norm_squared() <= f32::EPSILON {
            continue;
        }
        let four_theta = 4.0 * v.y.atan2(v.x);
        sum += Vector2::new(four_theta.cos(), four_theta.sin());
        count += 1;
    }
    if count == 0 {
        return None;
    }
    let mean = sum / count as f32;
    if mean.norm_squared() < 1e-4 {
        return None;
    }
    Some(0.25 * mean.y.atan2(mean.x))
}

#[inline]
pub fn angle_to_unit(theta: f32) -> Vector2<f32> {
    Vector2::new(theta.cos(), theta.sin())
}

/// 2D cross product `a × b`; positive when `b` is clockwise of `a` in
/// y-down image coordinates.
#[inline]
pub fn cross(a: &Vector2<f32>, b: &Vector2<f32>) -> f32 {
    a.x * b.y - a.y * b.x
}
