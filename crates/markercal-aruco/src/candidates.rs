//! Square marker candidate extraction.
//!
//! Every configured window size produces an inverted local-mean threshold;
//! outer contours of that binary image are simplified with Douglas–Peucker and
//! the convex 4-gons that survive the size filters become candidates.
//! Near-duplicates produced by different windows are merged.

use crate::threshold::adaptive_threshold_inv;
use image::GrayImage;
use imageproc::contours::{find_contours, BorderType};
use imageproc::geometry::approximate_polygon_dp;
use imageproc::point::Point;
use log::debug;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CandidateParams {
    /// Smallest adaptive-threshold window (pixels, odd).
    pub window_min: u32,
    /// Largest adaptive-threshold window (pixels).
    pub window_max: u32,
    pub window_step: u32,
    /// Pixels must be this much darker than the local mean to be foreground.
    pub threshold_offset: f32,
    /// Contour length bounds relative to the larger image side.
    pub min_perimeter_rate: f32,
    pub max_perimeter_rate: f32,
    /// Polygon approximation tolerance relative to the contour length.
    pub polygon_accuracy_rate: f32,
    /// Minimal quad side relative to the contour length.
    pub min_corner_distance_rate: f32,
    /// Minimal distance of any corner to the image border (pixels).
    pub min_distance_to_border: u32,
    /// Candidates whose corners are closer than this (relative to the
    /// perimeter) are treated as duplicates.
    pub min_marker_distance_rate: f32,
}

impl Default for CandidateParams {
    fn default() -> Self {
        Self {
            window_min: 3,
            window_max: 23,
            window_step: 10,
            threshold_offset: 7.0,
            min_perimeter_rate: 0.03,
            max_perimeter_rate: 4.0,
            polygon_accuracy_rate: 0.03,
            min_corner_distance_rate: 0.05,
            min_distance_to_border: 3,
            min_marker_distance_rate: 0.05,
        }
    }
}

impl CandidateParams {
    pub fn window_sizes(&self) -> Vec<u32> {
        let min = self.window_min.max(3);
        let max = self.window_max.max(min);
        let step = self.window_step.max(1) as usize;
        (min..=max).step_by(step).collect()
    }
}

/// A candidate quad, corners clockwise in image coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Quad {
    pub corners: [Point2<f32>; 4],
    pub perimeter: f32,
}

impl Quad {
    pub fn new(corners: [Point2<f32>; 4]) -> Self {
        let corners = order_clockwise(corners);
        let perimeter = (0..4)
            .map(|k| (corners[(k + 1) % 4] - corners[k]).norm())
            .sum();
        Self { corners, perimeter }
    }

    pub fn min_side(&self) -> f32 {
        (0..4)
            .map(|k| (self.corners[(k + 1) % 4] - self.corners[k]).norm())
            .fold(f32::INFINITY, f32::min)
    }
}

/// Find square candidates in a grayscale image.
pub fn find_quad_candidates(img: &GrayImage, params: &CandidateParams) -> Vec<Quad> {
    let mut quads = Vec::new();
    for window in params.window_sizes() {
        let bin = adaptive_threshold_inv(img, window, params.threshold_offset);
        let found = quads_in_binary(&bin, params);
        debug!("window {window}: {} quad candidates", found.len());
        quads.extend(found);
    }
    merge_close_candidates(quads, params.min_marker_distance_rate)
}

fn quads_in_binary(bin: &GrayImage, params: &CandidateParams) -> Vec<Quad> {
    let (w, h) = (bin.width() as f32, bin.height() as f32);
    let max_dim = w.max(h);
    let min_len = (params.min_perimeter_rate * max_dim).max(4.0) as usize;
    let max_len = (params.max_perimeter_rate * max_dim) as usize;
    let border = params.min_distance_to_border as f32;

    find_contours::<i32>(bin)
        .into_iter()
        .filter(|c| matches!(c.border_type, BorderType::Outer))
        .filter(|c| (min_len..=max_len).contains(&c.points.len()))
        .filter_map(|c| {
            let len = c.points.len() as f64;
            let eps = (len * params.polygon_accuracy_rate as f64).max(1.0);
            let quad = Quad::new(approximate_quad(&c.points, eps)?);
            if !is_convex(&quad.corners) {
                return None;
            }
            let min_side = len as f32 * params.min_corner_distance_rate;
            if quad.min_side() < min_side {
                return None;
            }
            let inside = quad.corners.iter().all(|p| {
                p.x >= border && p.y >= border && p.x < w - border && p.y < h - border
            });
            inside.then_some(quad)
        })
        .collect()
}

/// Simplify a closed contour and keep it only if it has exactly 4 vertices.
///
/// The contour is split at two far-apart points so each half is an open
/// polyline with distinct endpoints.
pub(crate) fn approximate_quad(
    points: &[Point<i32>],
    epsilon: f64,
) -> Option<[Point2<f32>; 4]> {
    if points.len() < 4 || epsilon <= 0.0 {
        return None;
    }
    let n = points.len() as f64;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x as f64, sy + p.y as f64));
    let (cx, cy) = (sx / n, sy / n);

    let farthest_from = |x: f64, y: f64| {
        points
            .iter()
            .enumerate()
            .map(|(i, p)| (i, (p.x as f64 - x).powi(2) + (p.y as f64 - y).powi(2)))
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i)
    };
    let a = farthest_from(cx, cy)?;
    let b = farthest_from(points[a].x as f64, points[a].y as f64)?;
    let (lo, hi) = (a.min(b), a.max(b));
    if lo == hi {
        return None;
    }

    let first: Vec<Point<i32>> = points[lo..=hi].to_vec();
    let second: Vec<Point<i32>> = points[hi..]
        .iter()
        .chain(&points[..=lo])
        .copied()
        .collect();
    let p1 = approximate_polygon_dp(&first, epsilon, false);
    let p2 = approximate_polygon_dp(&second, epsilon, false);
    if p1.len() < 2 || p2.len() < 2 {
        return None;
    }

    let vertices: Vec<Point<i32>> = p1[..p1.len() - 1]
        .iter()
        .chain(&p2[..p2.len() - 1])
        .copied()
        .collect();
    if vertices.len() != 4 {
        return None;
    }
    Some(std::array::from_fn(|k| {
        Point2::new(vertices[k].x as f32, vertices[k].y as f32)
    }))
}

fn signed_area(q: &[Point2<f32>; 4]) -> f32 {
    (0..4)
        .map(|k| {
            let (p, r) = (q[k], q[(k + 1) % 4]);
            p.x * r.y - r.x * p.y
        })
        .sum::<f32>()
        * 0.5
}

/// Order corners clockwise as seen in the image (positive shoelace area in
/// y-down coordinates), keeping the first corner.
pub fn order_clockwise(mut q: [Point2<f32>; 4]) -> [Point2<f32>; 4] {
    if signed_area(&q) < 0.0 {
        q.swap(1, 3);
    }
    q
}

fn is_convex(q: &[Point2<f32>; 4]) -> bool {
    let mut sign = 0.0f32;
    for k in 0..4 {
        let e1 = q[(k + 1) % 4] - q[k];
        let e2 = q[(k + 2) % 4] - q[(k + 1) % 4];
        let c = e1.x * e2.y - e1.y * e2.x;
        if c.abs() < 1e-6 {
            return false;
        }
        if sign == 0.0 {
            sign = c.signum();
        } else if c.signum() != sign {
            return false;
        }
    }
    true
}

/// Mean corner distance between two quads, minimized over cyclic shifts.
fn quad_distance(a: &Quad, b: &Quad) -> f32 {
    (0..4)
        .map(|shift| {
            (0..4)
                .map(|k| (a.corners[k] - b.corners[(k + shift) % 4]).norm())
                .sum::<f32>()
                / 4.0
        })
        .fold(f32::INFINITY, f32::min)
}

/// Drop candidates that duplicate a larger one.
fn merge_close_candidates(mut quads: Vec<Quad>, rate: f32) -> Vec<Quad> {
    quads.sort_by(|a, b| b.perimeter.total_cmp(&a.perimeter));
    let mut kept: Vec<Quad> = Vec::with_capacity(quads.len());
    for q in quads {
        let duplicate = kept
            .iter()
            .any(|k| quad_distance(k, &q) < rate * k.perimeter.min(q.perimeter));
        if !duplicate {
            kept.push(q);
        }
    }
    kept
}
