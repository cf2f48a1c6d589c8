use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Canonical 2D corner used by the grid detectors.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Corner {
    /// Subpixel position in image pixel coordinates (pixel centers at integers).
    pub position: Point2<f32>,
    /// Detector response; larger is stronger.
    pub strength: f32,
}

impl Corner {
    pub fn new(x: f32, y: f32, strength: f32) -> Self {
        Self {
            position: Point2::new(x, y),
            strength,
        }
    }
}
