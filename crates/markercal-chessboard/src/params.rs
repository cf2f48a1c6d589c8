use markercal_core::SubpixParams;
use serde::{Deserialize, Serialize};

/// Neighbor-graph construction parameters.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GridGraphParams {
    /// Number of nearest corners examined per node.
    pub k_neighbors: usize,
    /// Minimal edge length relative to the base spacing.
    pub min_spacing_rel: f32,
    /// Maximal edge length relative to the base spacing.
    pub max_spacing_rel: f32,
    /// Maximal angle between an edge and its grid axis.
    pub axis_tolerance_deg: f32,
}

impl Default for GridGraphParams {
    fn default() -> Self {
        Self {
            k_neighbors: 8,
            min_spacing_rel: 0.5,
            max_spacing_rel: 1.8,
            axis_tolerance_deg: 30.0,
        }
    }
}

/// Parameters specific to the chessboard detector.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ChessboardParams {
    /// Minimal ChESS response to consider a corner.
    pub min_corner_strength: f32,
    pub grid: GridGraphParams,
    /// Subpixel refinement of the final corners; `None` keeps ChESS positions.
    pub refine: Option<SubpixParams>,
}

impl Default for ChessboardParams {
    fn default() -> Self {
        Self {
            min_corner_strength: 0.0,
            grid: GridGraphParams::default(),
            refine: Some(SubpixParams {
                half_window: 3,
                ..SubpixParams::default()
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_takes_defaults() {
        let params: ChessboardParams =
            serde_json::from_str(r#"{ "grid": { "k_neighbors": 12 } }"#).unwrap();
        assert_eq!(params.grid.k_neighbors, 12);
        assert_eq!(params.grid.axis_tolerance_deg, 30.0);
        assert_eq!(params.refine.as_ref().map(|r| r.half_window), Some(3));
    }

    #[test]
    fn refinement_can_be_disabled() {
        let params: ChessboardParams = serde_json::from_str(r#"{ "refine": null }"#).unwrap();
        assert!(params.refine.is_none());
    }
}
