//! Facade crate for the `markercal-*` workspace.
//!
//! Two modes, matching how the library is used on a camera feed:
//!
//! - **calibration**: a [`CalibrationSession`] takes frames at a fixed pace,
//!   collects chessboard views and, once enough are in, calibrates the camera
//!   and stores the result;
//! - **detection**: a [`MarkerTracker`] loads the stored calibration, finds
//!   ArUco markers in each frame, estimates their poses and draws overlays.
//!
//! Both are configured through [`AppConfig`].
//!
//! ## Quickstart
//!
//! ```no_run
//! use markercal::{AppConfig, CalibrationStore, JsonPreferences, MarkerTracker};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load_json("markercal.json")?;
//! let store = CalibrationStore::with_scope(
//!     JsonPreferences::new("prefs.json"),
//!     config.calibration_scope.clone(),
//! );
//! let mut tracker = MarkerTracker::from_store(&store, &config)?;
//! let mut frame = image::open("frame.png")?.to_rgb8();
//! let report = tracker.process(&mut frame);
//! for (marker, pose) in report.markers.iter().zip(&report.poses) {
//!     if let Some(pose) = pose {
//!         println!("marker {} at {:?}", marker.id, pose.tvec);
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `markercal::core`: camera model, poses, homographies, synthetic scenes.
//! - `markercal::chessboard`: chessboard inner-corner detection.
//! - `markercal::aruco`: dictionaries and marker detection.
//! - `markercal::calib`: calibration solver, sample collector, store, pose
//!   estimation.

pub use markercal_aruco as aruco;
pub use markercal_calib as calib;
pub use markercal_chessboard as chessboard;
pub use markercal_core as core;

mod config;
mod session;
mod tracker;

pub use config::{AppConfig, ConfigError};
pub use session::{CalibrationSession, Progress, SessionError, SessionStep, Throttle};
pub use tracker::{FrameReport, MarkerTracker, TrackerError};

pub use markercal_aruco::{DictionaryKind, Marker};
pub use markercal_calib::{
    Calibration, CalibrationStore, JsonPreferences, MemoryPreferences, PatternGeometry,
    PreferenceBackend,
};
pub use markercal_core::{Intrinsics, Pose};
