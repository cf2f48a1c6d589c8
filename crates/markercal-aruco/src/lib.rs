//! Square fiducial marker detection with ArUco dictionaries.
//!
//! This crate covers:
//! - embedded built-in dictionaries (compiled into the binary),
//! - matching observed marker codes against a dictionary in all four rotations,
//! - finding square candidates with an adaptive threshold and contour polygons,
//! - decoding the cells of each candidate and reporting markers with their
//!   corners in canonical (printed) order.
//!
//! ```no_run
//! use markercal_aruco::{DictionaryKind, MarkerDetector, MarkerDetectorParams};
//!
//! let img = image::open("frame.png").unwrap().to_luma8();
//! let detector = MarkerDetector::new(DictionaryKind::ArucoOriginal, MarkerDetectorParams::default());
//! for marker in detector.detect(&img).markers {
//!     println!("id {} at {:?}", marker.id, marker.corners[0]);
//! }
//! ```

pub mod builtins;
mod candidates;
mod detector;
mod dictionary;
mod draw;
mod matcher;
mod render;
mod scan;
mod threshold;

pub use candidates::{find_quad_candidates, order_clockwise, CandidateParams, Quad};
pub use detector::{Marker, MarkerDetection, MarkerDetector, MarkerDetectorParams};
pub use dictionary::{Dictionary, DictionaryError, DictionaryKind};
pub use draw::{draw_detected_markers, draw_rejected_candidates};
pub use matcher::{rotate_code_u64, Match, Matcher, MatcherError};
pub use render::{marker_texture, render_marker};
pub use scan::{decode_marker_in_quad, QuadDecode, ScanDecodeConfig};
pub use threshold::adaptive_threshold_inv;
