use crate::geom::cross;
use crate::geometry::PatternGeometry;
use crate::gridgraph::{assign_grid_coordinates, connected_components, GridGraph};
use crate::params::ChessboardParams;
use chess_corners::{find_chess_corners_image, ChessConfig, CornerDescriptor};
use image::{DynamicImage, GrayImage, RgbImage};
use log::debug;
use markercal_core::{gray_view, refine_corners_subpix, Corner};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Smaller images cannot hold a ChESS sampling ring around any pixel.
const MIN_IMAGE_SIDE: u32 = 16;

/// Reasonable default settings for the `chess-corners` ChESS detector.
pub fn default_chess_config() -> ChessConfig {
    let mut cfg = ChessConfig::single_scale();
    cfg.params.threshold_rel = 0.2;
    cfg.params.nms_radius = 2;
    cfg
}

fn adapt_chess_corner(c: &CornerDescriptor) -> Corner {
    Corner::new(c.x, c.y, c.response)
}

/// A complete chessboard: `rows × cols` corners in row-major order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChessboardDetection {
    pub geometry: PatternGeometry,
    pub corners: Vec<Corner>,
}

impl ChessboardDetection {
    pub fn positions(&self) -> Vec<Point2<f32>> {
        self.corners.iter().map(|c| c.position).collect()
    }

    /// Corner positions in `f64`, index-aligned with
    /// [`PatternGeometry::object_points`].
    pub fn image_points(&self) -> Vec<Point2<f64>> {
        self.corners
            .iter()
            .map(|c| Point2::new(c.position.x as f64, c.position.y as f64))
            .collect()
    }
}

/// Chessboard detector for a fixed inner-corner layout.
pub struct ChessboardDetector {
    geometry: PatternGeometry,
    params: ChessboardParams,
    chess: ChessConfig,
}

impl ChessboardDetector {
    pub fn new(geometry: PatternGeometry, params: ChessboardParams) -> Self {
        Self {
            geometry,
            params,
            chess: default_chess_config(),
        }
    }

    pub fn with_chess_config(mut self, chess: ChessConfig) -> Self {
        self.chess = chess;
        self
    }

    pub fn geometry(&self) -> PatternGeometry {
        self.geometry
    }

    pub fn params(&self) -> &ChessboardParams {
        &self.params
    }

    /// Find the full pattern in a grayscale image.
    ///
    /// Returns `None` whenever the complete grid is not visible; a partial
    /// board is never reported.
    #[cfg_attr(
        feature = "tracing",
        instrument(
            level = "info",
            skip(self, img),
            fields(
                width = img.width(),
                height = img.height(),
                rows = self.geometry.rows(),
                cols = self.geometry.cols()
            )
        )
    )]
    pub fn detect(&self, img: &GrayImage) -> Option<ChessboardDetection> {
        if img.width() < MIN_IMAGE_SIDE || img.height() < MIN_IMAGE_SIDE {
            return None;
        }
        let corners: Vec<Corner> = find_chess_corners_image(img, &self.chess)
            .iter()
            .map(adapt_chess_corner)
            .collect();

        let mut found = self.detect_from_corners(&corners)?;
        if let Some(refine) = &self.params.refine {
            let mut positions = found.positions();
            refine_corners_subpix(&gray_view(img), &mut positions, refine);
            for (corner, p) in found.corners.iter_mut().zip(positions) {
                corner.position = p;
            }
        }
        Some(found)
    }

    pub fn detect_rgb(&self, img: &RgbImage) -> Option<ChessboardDetection> {
        self.detect(&image::imageops::grayscale(img))
    }

    pub fn detect_dynamic(&self, img: &DynamicImage) -> Option<ChessboardDetection> {
        self.detect(&img.to_luma8())
    }

    /// Assemble the pattern from an already detected corner cloud.
    pub fn detect_from_corners(&self, corners: &[Corner]) -> Option<ChessboardDetection> {
        let strong: Vec<Corner> = corners
            .iter()
            .copied()
            .filter(|c| {
                c.strength >= self.params.min_corner_strength
                    && c.position.x.is_finite()
                    && c.position.y.is_finite()
            })
            .collect();

        debug!(
            "{} of {} corners pass the strength filter",
            strong.len(),
            corners.len()
        );
        if strong.len() < self.geometry.corner_count() {
            return None;
        }

        let graph = GridGraph::new(&strong, &self.params.grid);
        let mut best: Option<(f32, Vec<usize>)> = None;
        for component in connected_components(&graph) {
            if component.len() < self.geometry.corner_count() {
                continue;
            }
            let Some(coords) = assign_grid_coordinates(&graph, &component) else {
                debug!("dropping component of {} corners: inconsistent grid", component.len());
                continue;
            };
            if let Some((score, order)) = best_window(&coords, &strong, self.geometry) {
                if best.as_ref().is_none_or(|(s, _)| score > *s) {
                    best = Some((score, order));
                }
            }
        }

        let (_, order) = best?;
        let mut grid: Vec<Vec<usize>> = order
            .chunks(self.geometry.cols())
            .map(<[usize]>::to_vec)
            .collect();
        canonicalize(&mut grid, &strong);

        Some(ChessboardDetection {
            geometry: self.geometry,
            corners: grid.into_iter().flatten().map(|i| strong[i]).collect(),
        })
    }
}

/// Strongest complete window of the pattern inside a component.
///
/// Returns the summed strength and the node indices in row-major order, where
/// a row holds `cols` corners (either along `i` or along `j`).
fn best_window(
    coords: &[(usize, i32, i32)],
    corners: &[Corner],
    geometry: PatternGeometry,
) -> Option<(f32, Vec<usize>)> {
    let node_at: HashMap<(i32, i32), usize> =
        coords.iter().map(|&(n, i, j)| ((i, j), n)).collect();
    let min_i = coords.iter().map(|c| c.1).min()?;
    let max_i = coords.iter().map(|c| c.1).max()?;
    let min_j = coords.iter().map(|c| c.2).min()?;
    let max_j = coords.iter().map(|c| c.2).max()?;

    let (rows, cols) = (geometry.rows() as i32, geometry.cols() as i32);
    // (extent along i, extent along j, rows run along i)
    let mut shapes = vec![(cols, rows, true)];
    if rows != cols {
        shapes.push((rows, cols, false));
    }

    let mut best: Option<(f32, Vec<usize>)> = None;
    for (w, h, rows_along_i) in shapes {
        if max_i - min_i + 1 < w || max_j - min_j + 1 < h {
            continue;
        }
        for j0 in min_j..=max_j - h + 1 {
            for i0 in min_i..=max_i - w + 1 {
                let mut order = Vec::with_capacity((rows * cols) as usize);
                let mut score = 0.0f32;
                'fill: for r in 0..rows {
                    for c in 0..cols {
                        let key = if rows_along_i {
                            (i0 + c, j0 + r)
                        } else {
                            (i0 + r, j0 + c)
                        };
                        let Some(&n) = node_at.get(&key) else {
                            break 'fill;
                        };
                        score += corners[n].strength;
                        order.push(n);
                    }
                }
                if order.len() == (rows * cols) as usize
                    && best.as_ref().is_none_or(|(s, _)| score > *s)
                {
                    best = Some((score, order));
                }
            }
        }
    }
    best
}

/// Orient the grid so rows run toward image `+x` and successive rows lie
/// clockwise of the row direction (toward `+y` for an upright board).
fn canonicalize(grid: &mut [Vec<usize>], corners: &[Corner]) {
    let rows = grid.len();
    let cols = grid.first().map_or(0, Vec::len);
    if rows == 0 || cols == 0 {
        return;
    }
    let at = |grid: &[Vec<usize>], r: usize, c: usize| corners[grid[r][c]].position;

    let row_dir = at(&*grid, 0, cols - 1) - at(&*grid, 0, 0);
    let eps = 1e-3 * row_dir.norm();
    if row_dir.x < -eps || (row_dir.x.abs() <= eps && row_dir.y < 0.0) {
        grid.iter_mut().for_each(|row| row.reverse());
    }

    let row_dir = at(&*grid, 0, cols - 1) - at(&*grid, 0, 0);
    let col_dir = at(&*grid, rows - 1, 0) - at(&*grid, 0, 0);
    if cross(&row_dir, &col_dir) < 0.0 {
        grid.reverse();
    }
}
