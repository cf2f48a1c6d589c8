//! Application configuration, loaded from JSON.

use markercal_aruco::DictionaryKind;
use markercal_calib::{PatternGeometry, DEFAULT_SCOPE};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("invalid `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// User-facing settings shared by calibration and detection mode.
///
/// Missing keys take their defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Chessboard views collected before calibrating.
    pub min_sample_count: usize,
    /// Inner corners per chessboard row.
    pub pattern_rows: usize,
    /// Inner corners per chessboard column.
    pub pattern_columns: usize,
    pub dictionary: DictionaryKind,
    /// Printed marker side, in the unit the poses should be reported in.
    pub marker_side_length: f64,
    pub show_detected_overlay: bool,
    pub show_rejected_overlay: bool,
    pub show_pose_axes: bool,
    pub axis_length: f64,
    /// Minimum time between two calibration captures.
    pub capture_interval_ms: u64,
    /// Draw found chessboard corners into calibration frames.
    pub draw_pattern_overlay: bool,
    /// Preference scope the calibration is stored under.
    pub calibration_scope: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            min_sample_count: 20,
            pattern_rows: 7,
            pattern_columns: 7,
            dictionary: DictionaryKind::ArucoOriginal,
            marker_side_length: 1.0,
            show_detected_overlay: false,
            show_rejected_overlay: false,
            show_pose_axes: false,
            axis_length: 0.1,
            capture_interval_ms: 2000,
            draw_pattern_overlay: true,
            calibration_scope: DEFAULT_SCOPE.to_string(),
        }
    }
}

impl AppConfig {
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let data = serde_json::to_string_pretty(self)?;
        fs::write(path, data)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_sample_count == 0 {
            return Err(invalid("min_sample_count", "must be at least 1"));
        }
        self.pattern_geometry()?;
        if !(self.marker_side_length.is_finite() && self.marker_side_length > 0.0) {
            return Err(invalid(
                "marker_side_length",
                format!("must be positive, got {}", self.marker_side_length),
            ));
        }
        if !(self.axis_length.is_finite() && self.axis_length > 0.0) {
            return Err(invalid(
                "axis_length",
                format!("must be positive, got {}", self.axis_length),
            ));
        }
        if self.calibration_scope.is_empty() {
            return Err(invalid("calibration_scope", "must not be empty"));
        }
        Ok(())
    }

    pub fn pattern_geometry(&self) -> Result<PatternGeometry, ConfigError> {
        PatternGeometry::new(self.pattern_rows, self.pattern_columns)
            .map_err(|e| invalid("pattern_rows/pattern_columns", e.to_string()))
    }

    pub fn capture_interval(&self) -> Duration {
        Duration::from_millis(self.capture_interval_ms)
    }
}
