//! Camera calibration from chessboard views and marker pose estimation.
//!
//! The pieces are meant to be chained:
//!
//! 1. [`SampleCollector`] feeds frames to a chessboard detector and keeps the
//!    corner sets of the views where the full pattern was found;
//! 2. once enough views are in, [`CalibrationSolver`] estimates the camera
//!    matrix, lens distortion and one pose per view with a closed-form start
//!    and a Levenberg–Marquardt refinement;
//! 3. [`CalibrationStore`] persists the result through a small key/value
//!    [`PreferenceBackend`];
//! 4. [`PoseEstimator`] turns detected markers into object-to-camera poses
//!    using the stored intrinsics.
//!
//! ```no_run
//! use markercal_calib::{PatternGeometry, SampleCollector, Observation};
//!
//! let geometry = PatternGeometry::new(6, 9)?;
//! let mut collector = SampleCollector::new(geometry, 10)?;
//! for path in ["a.png", "b.png"] {
//!     let mut frame = image::open(path)?.to_rgb8();
//!     if let Observation::Calibrated(c) = collector.observe(&mut frame, false)? {
//!         println!("rms {:.3} px", c.rms_error);
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod collector;
pub mod lm;
mod pose;
mod solver;
mod store;

pub use collector::{CollectorError, CollectorState, Observation, Sample, SampleCollector};
pub use pose::{draw_axes, marker_object_points, project_axes, PoseError, PoseEstimator};
pub use solver::{Calibration, CalibrationError, CalibrationSolver, SolverOptions};
pub use store::{
    CalibrationStore, JsonPreferences, MemoryPreferences, PreferenceBackend, StoreError,
    DEFAULT_SCOPE,
};

pub use markercal_chessboard::PatternGeometry;
pub use markercal_core::{CameraMatrix, Distortion, ImageSize, Intrinsics, Pose};
