//! Detection mode: markers, poses and overlays for each frame.

use crate::config::{AppConfig, ConfigError};
use image::RgbImage;
use log::debug;
use markercal_aruco::{
    draw_detected_markers, draw_rejected_candidates, Marker, MarkerDetector, MarkerDetectorParams,
};
use markercal_calib::{
    draw_axes, CalibrationStore, PoseError, PoseEstimator, PreferenceBackend, StoreError,
};
use markercal_core::{Intrinsics, Pose};
use nalgebra::Point2;
use serde::{Serialize, Serializer};

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug)]
pub enum TrackerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Everything found in one frame.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct FrameReport {
    pub markers: Vec<Marker>,
    pub rejected: Vec<[Point2<f32>; 4]>,
    /// Index-aligned with `markers`, `None` for a marker whose corners gave
    /// no pose. Empty when `pose_error` is set.
    pub poses: Vec<Option<Pose>>,
    #[serde(serialize_with = "error_message")]
    pub pose_error: Option<PoseError>,
}

fn error_message<S: Serializer>(err: &Option<PoseError>, s: S) -> Result<S::Ok, S::Error> {
    match err {
        Some(e) => s.serialize_some(&e.to_string()),
        None => s.serialize_none(),
    }
}

pub struct MarkerTracker {
    detector: MarkerDetector,
    estimator: PoseEstimator,
    config: AppConfig,
    frames: u64,
}

impl MarkerTracker {
    pub fn new(intrinsics: Option<Intrinsics>, config: &AppConfig) -> Result<Self, TrackerError> {
        config.validate()?;
        Ok(Self {
            detector: MarkerDetector::new(config.dictionary, MarkerDetectorParams::default()),
            estimator: PoseEstimator::new(intrinsics),
            config: config.clone(),
            frames: 0,
        })
    }

    /// Tracker using whatever calibration `store` holds. Without one, markers
    /// are still detected but no poses are estimated.
    pub fn from_store<B: PreferenceBackend>(
        store: &CalibrationStore<B>,
        config: &AppConfig,
    ) -> Result<Self, TrackerError> {
        let intrinsics = store.load()?;
        if intrinsics.is_none() {
            debug!("scope `{}` holds no calibration", store.scope());
        }
        Self::new(intrinsics, config)
    }

    pub fn intrinsics(&self) -> Option<&Intrinsics> {
        self.estimator.intrinsics()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames
    }

    /// Detect markers in `frame`, estimate their poses and draw the overlays
    /// enabled in the configuration.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(frame = self.frames))
    )]
    pub fn process(&mut self, frame: &mut RgbImage) -> FrameReport {
        self.frames += 1;
        let detection = self.detector.detect_rgb(frame);
        let (poses, pose_error) = match self
            .estimator
            .estimate(&detection.markers, self.config.marker_side_length)
        {
            Ok(poses) => (poses, None),
            Err(e) => (Vec::new(), Some(e)),
        };

        if self.config.show_rejected_overlay {
            draw_rejected_candidates(frame, &detection.rejected);
        }
        if self.config.show_detected_overlay {
            draw_detected_markers(frame, &detection.markers);
        }
        if self.config.show_pose_axes {
            if let Some(intrinsics) = self.estimator.intrinsics() {
                for pose in poses.iter().flatten() {
                    draw_axes(frame, intrinsics, pose, self.config.axis_length);
                }
            }
        }

        FrameReport {
            markers: detection.markers,
            rejected: detection.rejected,
            poses,
            pose_error,
        }
    }

    /// [`Self::process`] for callers that hand over the frame.
    pub fn process_owned(&mut self, mut frame: RgbImage) -> (RgbImage, FrameReport) {
        let report = self.process(&mut frame);
        (frame, report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgb};
    use markercal_aruco::{marker_texture, DictionaryKind};
    use markercal_calib::MemoryPreferences;
    use markercal_core::synthetic::{pose_through, render_plane};
    use markercal_core::{CameraMatrix, Distortion, ImageSize};
    use nalgebra::{Point3, Rotation3, Vector3};

    fn camera() -> Intrinsics {
        Intrinsics::new(
            CameraMatrix::new(600.0, 600.0, 320.0, 240.0),
            Distortion::default(),
        )
    }

    /// Marker id 5 facing the camera, centered, 5 units away.
    fn frame() -> RgbImage {
        let upright = Rotation3::from_axis_angle(&Vector3::x_axis(), std::f64::consts::PI);
        let pose = pose_through(upright, Point3::origin(), Point3::new(0.0, 0.0, 5.0));
        let texture = marker_texture(&DictionaryKind::ArucoOriginal.dictionary(), 5, 1.0).unwrap();
        let gray = render_plane(&camera(), &pose, ImageSize::new(640, 480), 3, 235, texture);
        DynamicImage::ImageLuma8(gray).to_rgb8()
    }

    #[test]
    fn uncalibrated_tracker_still_detects() {
        let store = CalibrationStore::new(MemoryPreferences::new());
        let mut tracker = MarkerTracker::from_store(&store, &AppConfig::default()).unwrap();
        assert!(tracker.intrinsics().is_none());

        let report = tracker.process(&mut frame());
        assert_eq!(report.markers.len(), 1);
        assert_eq!(report.markers[0].id, 5);
        assert!(report.poses.is_empty());
        assert_eq!(report.pose_error, Some(PoseError::NotCalibrated));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["pose_error"], "camera is not calibrated");
    }

    #[test]
    fn calibrated_tracker_reports_pose_and_draws_axes() {
        let mut store = CalibrationStore::new(MemoryPreferences::new());
        store.save(&camera()).unwrap();
        let cfg = AppConfig {
            show_pose_axes: true,
            axis_length: 0.5,
            ..AppConfig::default()
        };
        let mut tracker = MarkerTracker::from_store(&store, &cfg).unwrap();

        let (out, report) = tracker.process_owned(frame());
        assert_eq!(report.pose_error, None);
        assert_eq!(report.poses.len(), 1);
        let t = report.poses[0].expect("marker pose").tvec;
        assert!((t - Vector3::new(0.0, 0.0, 5.0)).norm() < 0.1, "{t:?}");

        // The x axis runs right from the image center, 60 px long.
        let red = (236..=244).any(|y| *out.get_pixel(350, y) == Rgb([255, 0, 0]));
        assert!(red);
        assert_eq!(tracker.frames_processed(), 1);
    }

    #[test]
    fn overlays_are_off_by_default() {
        let mut tracker = MarkerTracker::new(None, &AppConfig::default()).unwrap();
        let input = frame();
        let (out, _) = tracker.process_owned(input.clone());
        assert_eq!(out, input);
    }
}
