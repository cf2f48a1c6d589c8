//! Calibration mode: throttled sample capture with optional persistence.

use crate::config::{AppConfig, ConfigError};
use image::RgbImage;
use log::{info, warn};
use markercal_calib::{
    Calibration, CalibrationStore, CollectorError, CollectorState, MemoryPreferences, Observation,
    PreferenceBackend, SampleCollector, StoreError,
};
use serde::Serialize;
use std::time::Duration;

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Collector(#[from] CollectorError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Lets one frame through per `interval`, measured between attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Throttle {
    interval: Duration,
    last: Option<Duration>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// A throttle that lets every frame through.
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether a frame stamped `now` may be processed. Marks the attempt when
    /// it may.
    pub fn admit(&mut self, now: Duration) -> bool {
        let ready = self.interval.is_zero()
            || match self.last {
                None => true,
                Some(last) => now.saturating_sub(last) > self.interval,
            };
        if ready {
            self.last = Some(now);
        }
        ready
    }
}

/// "n/m samples collected".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub samples: usize,
    pub required: usize,
}

impl std::fmt::Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{} samples collected", self.samples, self.required)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SessionStep {
    /// Arrived inside the capture interval.
    Skipped,
    /// Processed, no chessboard found.
    NotFound(Progress),
    Captured(Progress),
    /// The last sample came in and the calibration finished (and was
    /// persisted when a store is attached).
    Calibrated(Box<Calibration>),
    /// Already calibrated; frames are passed through.
    Done,
}

/// Feeds camera frames to a [`SampleCollector`] at the configured pace.
pub struct CalibrationSession<B: PreferenceBackend = MemoryPreferences> {
    collector: SampleCollector,
    throttle: Throttle,
    draw_overlay: bool,
    store: Option<CalibrationStore<B>>,
}

impl CalibrationSession {
    /// Session without persistence.
    pub fn new(config: &AppConfig) -> Result<Self, SessionError> {
        config.validate()?;
        let collector = SampleCollector::new(config.pattern_geometry()?, config.min_sample_count)?;
        Ok(Self {
            collector,
            throttle: Throttle::new(config.capture_interval()),
            draw_overlay: config.draw_pattern_overlay,
            store: None,
        })
    }
}

impl<B: PreferenceBackend> CalibrationSession<B> {
    /// Persist the calibration through `store` once it completes.
    pub fn with_store<C: PreferenceBackend>(
        self,
        store: CalibrationStore<C>,
    ) -> CalibrationSession<C> {
        CalibrationSession {
            collector: self.collector,
            throttle: self.throttle,
            draw_overlay: self.draw_overlay,
            store: Some(store),
        }
    }

    pub fn with_throttle(mut self, throttle: Throttle) -> Self {
        self.throttle = throttle;
        self
    }

    /// Process a frame stamped `now` (any monotonic clock).
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self, frame)))]
    pub fn process(
        &mut self,
        frame: &mut RgbImage,
        now: Duration,
    ) -> Result<SessionStep, SessionError> {
        if self.collector.state() != CollectorState::Collecting {
            return Ok(SessionStep::Done);
        }
        if !self.throttle.admit(now) {
            return Ok(SessionStep::Skipped);
        }
        match self.collector.observe(frame, self.draw_overlay)? {
            Observation::Ignored => Ok(SessionStep::Done),
            Observation::NotFound => Ok(SessionStep::NotFound(self.progress())),
            Observation::Accepted { .. } => {
                let progress = self.progress();
                info!("{progress}");
                Ok(SessionStep::Captured(progress))
            }
            Observation::Calibrated(calibration) => {
                self.persist(&calibration)?;
                if let Some(pose) = calibration.last_extrinsics() {
                    info!(
                        "camera calibrated, last target position ({:.2}, {:.2}, {:.2})",
                        pose.tvec.x, pose.tvec.y, pose.tvec.z
                    );
                }
                if !calibration.is_good_fit() {
                    warn!(
                        "calibration rms {:.3} px exceeds {:.3} px",
                        calibration.rms_error, calibration.rms_limit
                    );
                }
                Ok(SessionStep::Calibrated(calibration))
            }
        }
    }

    fn persist(&mut self, calibration: &Calibration) -> Result<(), StoreError> {
        match self.store.as_mut() {
            Some(store) => store.save(&calibration.intrinsics),
            None => Ok(()),
        }
    }

    pub fn progress(&self) -> Progress {
        Progress {
            samples: self.collector.sample_count(),
            required: self.collector.min_samples(),
        }
    }

    pub fn collector(&self) -> &SampleCollector {
        &self.collector
    }

    pub fn store(&self) -> Option<&CalibrationStore<B>> {
        self.store.as_ref()
    }

    pub fn calibration(&self) -> Option<&Calibration> {
        self.collector.calibration()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn throttle_spacing_follows_attempts() {
        let mut t = Throttle::new(Duration::from_millis(2000));
        assert!(t.admit(Duration::from_millis(100)));
        assert!(!t.admit(Duration::from_millis(1500)));
        assert!(!t.admit(Duration::from_millis(2100)));
        assert!(t.admit(Duration::from_millis(2101)));
        assert!(!t.admit(Duration::from_millis(3000)));

        let mut open = Throttle::disabled();
        assert!(open.admit(Duration::ZERO));
        assert!(open.admit(Duration::ZERO));
    }

    #[test]
    fn skipped_frames_do_not_touch_the_collector() {
        let cfg = AppConfig {
            min_sample_count: 2,
            pattern_rows: 3,
            pattern_columns: 4,
            ..AppConfig::default()
        };
        let mut session = CalibrationSession::new(&cfg).unwrap();
        let mut frame = RgbImage::from_pixel(64, 48, Rgb([128, 128, 128]));

        let progress = Progress {
            samples: 0,
            required: 2,
        };
        assert_eq!(
            session.process(&mut frame, Duration::ZERO).unwrap(),
            SessionStep::NotFound(progress)
        );
        assert_eq!(
            session.process(&mut frame, Duration::from_millis(10)).unwrap(),
            SessionStep::Skipped
        );
        assert_eq!(progress.to_string(), "0/2 samples collected");
        assert!(session.calibration().is_none());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let cfg = AppConfig {
            min_sample_count: 0,
            ..AppConfig::default()
        };
        assert!(matches!(
            CalibrationSession::new(&cfg),
            Err(SessionError::Config(_))
        ));
    }
}
