use nalgebra::Point3;
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GeometryError {
    #[error("pattern needs at least 2x2 inner corners (got {rows}x{cols})")]
    TooSmall { rows: usize, cols: usize },
}

/// Inner-corner layout of a chessboard: `rows × cols` corners.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatternGeometry {
    rows: usize,
    cols: usize,
}

impl PatternGeometry {
    pub fn new(rows: usize, cols: usize) -> Result<Self, GeometryError> {
        if rows < 2 || cols < 2 {
            return Err(GeometryError::TooSmall { rows, cols });
        }
        Ok(Self { rows, cols })
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn corner_count(&self) -> usize {
        self.rows * self.cols
    }

    /// Canonical object template: corner `k` sits at
    /// `(k % cols * square, k / cols * square, 0)`.
    pub fn object_points(&self, square: f64) -> Vec<Point3<f64>> {
        (0..self.rows)
            .flat_map(|r| {
                (0..self.cols).map(move |c| Point3::new(c as f64 * square, r as f64 * square, 0.0))
            })
            .collect()
    }
}
