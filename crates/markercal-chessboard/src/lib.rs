//! Chessboard inner-corner detector built on top of ChESS corners.
//!
//! Pipeline (graph-based, perspective-tolerant):
//! 1. Detect ChESS corners with `chess-corners` and filter by strength.
//! 2. Estimate a base spacing (median nearest-neighbor distance) and two
//!    global grid axes `u`, `v` from nearest-neighbor directions.
//! 3. For each corner, keep at most one neighbor per direction
//!    (right/left/up/down) among its k nearest corners: distance must sit in
//!    a window around the base spacing and the edge must align with `±u`/`±v`.
//!    Only mutual edges survive.
//! 4. BFS each connected component and assign integer coordinates `(i, j)`;
//!    components with coordinate conflicts are dropped.
//! 5. Search each component for a complete `cols × rows` window (or its
//!    transpose) and keep the strongest.
//! 6. Canonicalise the order: rows run toward `+x`, successive rows toward
//!    `+y`, output is row-major.
//! 7. Optionally refine every corner with gradient-based subpixel refinement.
//!
//! ```no_run
//! use markercal_chessboard::{ChessboardDetector, ChessboardParams, PatternGeometry};
//!
//! let img = image::open("board.png").unwrap().to_luma8();
//! let geometry = PatternGeometry::new(6, 9).unwrap();
//! let detector = ChessboardDetector::new(geometry, ChessboardParams::default());
//! if let Some(found) = detector.detect(&img) {
//!     println!("{} corners", found.corners.len());
//! }
//! ```

mod detector;
mod draw;
mod geom;
mod geometry;
mod gridgraph;
mod params;

pub use detector::{default_chess_config, ChessboardDetection, ChessboardDetector};
pub use draw::draw_chessboard_corners;
pub use geometry::{GeometryError, PatternGeometry};
pub use gridgraph::{GridAxes, GridGraph, NeighborDirection, NodeNeighbor};
pub use params::{ChessboardParams, GridGraphParams};
