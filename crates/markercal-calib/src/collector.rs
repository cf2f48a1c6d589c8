//! Sample accumulation toward a one-shot calibration.

use crate::solver::{Calibration, CalibrationError, CalibrationSolver, SolverOptions};
use image::{GrayImage, RgbImage};
use log::{debug, info, warn};
use markercal_chessboard::{
    draw_chessboard_corners, ChessboardDetector, ChessboardParams, PatternGeometry,
};
use markercal_core::ImageSize;
use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CollectorError {
    #[error("min_samples must be at least 1")]
    InvalidMinSamples,
    #[error("frame is {width}x{height}, earlier samples are {expected_width}x{expected_height}")]
    DimensionMismatch {
        width: u32,
        height: u32,
        expected_width: u32,
        expected_height: u32,
    },
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectorState {
    Collecting,
    /// Terminal: the calibration has been computed.
    Calibrated,
    /// Terminal: the solve failed.
    Failed,
}

/// Image points of one accepted view, index-aligned with the object template.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub image_points: Vec<Point2<f64>>,
}

/// Outcome of a single frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Observation {
    /// The collector no longer takes samples.
    Ignored,
    NotFound,
    Accepted { samples: usize, required: usize },
    /// The frame completed the sample set and calibration ran.
    Calibrated(Box<Calibration>),
}

impl Observation {
    /// Whether the pattern was found in the frame.
    pub fn pattern_found(&self) -> bool {
        matches!(self, Observation::Accepted { .. } | Observation::Calibrated(_))
    }
}

/// Collects chessboard views until `min_samples` are available, then
/// calibrates once.
pub struct SampleCollector {
    detector: ChessboardDetector,
    solver: CalibrationSolver,
    template: Arc<[Point3<f64>]>,
    samples: Vec<Sample>,
    min_samples: usize,
    image_size: Option<ImageSize>,
    state: CollectorState,
    calibration: Option<Calibration>,
}

impl SampleCollector {
    pub fn new(geometry: PatternGeometry, min_samples: usize) -> Result<Self, CollectorError> {
        Self::with_params(
            geometry,
            min_samples,
            ChessboardParams::default(),
            SolverOptions::default(),
        )
    }

    pub fn with_params(
        geometry: PatternGeometry,
        min_samples: usize,
        detector: ChessboardParams,
        solver: SolverOptions,
    ) -> Result<Self, CollectorError> {
        if min_samples == 0 {
            return Err(CollectorError::InvalidMinSamples);
        }
        Ok(Self {
            detector: ChessboardDetector::new(geometry, detector),
            solver: CalibrationSolver::new(solver),
            template: geometry.object_points(1.0).into(),
            samples: Vec::with_capacity(min_samples),
            min_samples,
            image_size: None,
            state: CollectorState::Collecting,
            calibration: None,
        })
    }

    /// Observe a color frame, drawing the found corners into it when
    /// `draw_overlay` is set.
    pub fn observe(
        &mut self,
        image: &mut RgbImage,
        draw_overlay: bool,
    ) -> Result<Observation, CollectorError> {
        if !self.accepting() {
            return Ok(Observation::Ignored);
        }
        self.check_dimensions(image.width(), image.height())?;
        let gray = image::imageops::grayscale(image);
        let Some(points) = self.find(&gray) else {
            return Ok(Observation::NotFound);
        };
        if draw_overlay {
            let corners: Vec<Point2<f32>> = points
                .iter()
                .map(|p| Point2::new(p.x as f32, p.y as f32))
                .collect();
            draw_chessboard_corners(image, self.geometry(), &corners, true);
        }
        self.accept(points, ImageSize::new(image.width(), image.height()))
    }

    /// Observe a grayscale frame.
    pub fn observe_gray(&mut self, image: &GrayImage) -> Result<Observation, CollectorError> {
        if !self.accepting() {
            return Ok(Observation::Ignored);
        }
        self.check_dimensions(image.width(), image.height())?;
        let Some(points) = self.find(image) else {
            return Ok(Observation::NotFound);
        };
        self.accept(points, ImageSize::new(image.width(), image.height()))
    }

    fn accepting(&self) -> bool {
        self.state == CollectorState::Collecting && self.samples.len() < self.min_samples
    }

    fn check_dimensions(&self, width: u32, height: u32) -> Result<(), CollectorError> {
        match self.image_size {
            Some(expected) if expected != ImageSize::new(width, height) => {
                Err(CollectorError::DimensionMismatch {
                    width,
                    height,
                    expected_width: expected.width,
                    expected_height: expected.height,
                })
            }
            _ => Ok(()),
        }
    }

    fn find(&self, gray: &GrayImage) -> Option<Vec<Point2<f64>>> {
        self.detector.detect(gray).map(|d| d.image_points())
    }

    fn accept(
        &mut self,
        image_points: Vec<Point2<f64>>,
        size: ImageSize,
    ) -> Result<Observation, CollectorError> {
        self.image_size.get_or_insert(size);
        self.samples.push(Sample { image_points });
        debug!("sample {}/{} accepted", self.samples.len(), self.min_samples);

        if self.samples.len() < self.min_samples {
            return Ok(Observation::Accepted {
                samples: self.samples.len(),
                required: self.min_samples,
            });
        }

        info!("{} samples collected, calibrating", self.samples.len());
        let objects = vec![self.template.clone(); self.samples.len()];
        let images: Vec<Vec<Point2<f64>>> = self
            .samples
            .iter()
            .map(|s| s.image_points.clone())
            .collect();
        match self.solver.solve(&objects, &images, size) {
            Ok(calibration) => {
                self.state = CollectorState::Calibrated;
                self.calibration = Some(calibration.clone());
                Ok(Observation::Calibrated(Box::new(calibration)))
            }
            Err(e) => {
                warn!("calibration failed: {e}");
                self.state = CollectorState::Failed;
                Err(e.into())
            }
        }
    }

    pub fn state(&self) -> CollectorState {
        self.state
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn min_samples(&self) -> usize {
        self.min_samples
    }

    pub fn geometry(&self) -> PatternGeometry {
        self.detector.geometry()
    }

    /// Object points shared by every sample.
    pub fn template(&self) -> &Arc<[Point3<f64>]> {
        &self.template
    }

    /// Size of the first accepted frame.
    pub fn image_size(&self) -> Option<ImageSize> {
        self.image_size
    }

    pub fn is_calibrated(&self) -> bool {
        self.state == CollectorState::Calibrated
    }

    pub fn calibration(&self) -> Option<&Calibration> {
        self.calibration.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn zero_samples_is_rejected() {
        let g = PatternGeometry::new(3, 4).unwrap();
        assert!(matches!(
            SampleCollector::new(g, 0),
            Err(CollectorError::InvalidMinSamples)
        ));
    }

    #[test]
    fn blank_frame_is_not_found() {
        let g = PatternGeometry::new(3, 4).unwrap();
        let mut collector = SampleCollector::new(g, 2).unwrap();
        let frame = GrayImage::from_pixel(64, 48, Luma([128]));
        assert_eq!(collector.observe_gray(&frame), Ok(Observation::NotFound));
        assert_eq!(collector.sample_count(), 0);
        // Nothing accepted yet, so no size reference either.
        assert_eq!(collector.image_size(), None);
        let other = GrayImage::from_pixel(32, 32, Luma([128]));
        assert_eq!(collector.observe_gray(&other), Ok(Observation::NotFound));
    }

    #[test]
    fn failed_solve_is_terminal() {
        let g = PatternGeometry::new(3, 4).unwrap();
        let mut collector = SampleCollector::new(g, 1).unwrap();
        let size = ImageSize::new(64, 48);

        // A view whose point count disagrees with the template cannot be solved.
        let short = vec![Point2::new(10.0, 10.0); 3];
        assert_eq!(
            collector.accept(short, size),
            Err(CollectorError::Calibration(
                CalibrationError::MismatchedPoints {
                    view: 0,
                    objects: 12,
                    images: 3,
                }
            ))
        );
        assert_eq!(collector.state(), CollectorState::Failed);
        assert!(!collector.is_calibrated());
        assert!(collector.calibration().is_none());

        let frame = GrayImage::from_pixel(64, 48, Luma([128]));
        assert_eq!(collector.observe_gray(&frame), Ok(Observation::Ignored));
        let mut color = RgbImage::new(64, 48);
        assert_eq!(collector.observe(&mut color, true), Ok(Observation::Ignored));
        assert_eq!(collector.sample_count(), 1);
    }

    #[test]
    fn template_follows_geometry() {
        let g = PatternGeometry::new(3, 4).unwrap();
        let collector = SampleCollector::new(g, 5).unwrap();
        assert_eq!(collector.template().len(), 12);
        assert_eq!(collector.template()[5], Point3::new(1.0, 1.0, 0.0));
        assert_eq!(collector.state(), CollectorState::Collecting);
        assert!(!Observation::NotFound.pattern_found());
        assert!(Observation::Accepted {
            samples: 1,
            required: 5
        }
        .pattern_found());
    }
}
