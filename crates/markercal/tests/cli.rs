use assert_cmd::Command;
use markercal::aruco::{marker_texture, DictionaryKind};
use markercal::core::synthetic::{pose_through, render_chessboard, render_plane};
use markercal::core::{CameraMatrix, Distortion, ImageSize, Intrinsics};
use markercal::AppConfig;
use nalgebra::{Point3, Rotation3, Vector3};
use predicates::prelude::*;
use std::path::{Path, PathBuf};

const ROWS: usize = 5;
const COLS: usize = 7;
const SIZE: ImageSize = ImageSize {
    width: 480,
    height: 360,
};

fn camera() -> Intrinsics {
    Intrinsics::new(
        CameraMatrix::new(500.0, 500.0, 240.0, 180.0),
        Distortion::default(),
    )
}

fn markercal() -> Command {
    Command::cargo_bin("markercal").unwrap()
}

fn write_config(dir: &Path, min_samples: usize) -> PathBuf {
    let path = dir.join("config.json");
    AppConfig {
        min_sample_count: min_samples,
        pattern_rows: ROWS,
        pattern_columns: COLS,
        ..AppConfig::default()
    }
    .write_json(&path)
    .unwrap();
    path
}

fn write_board_views(dir: &Path) -> Vec<PathBuf> {
    let center = Point3::new((COLS - 1) as f64 / 2.0, (ROWS - 1) as f64 / 2.0, 0.0);
    [
        (0.3, 0.0, 0.0),
        (-0.3, 0.1, 0.05),
        (0.0, 0.3, -0.05),
        (0.1, -0.3, 0.1),
    ]
    .into_iter()
    .enumerate()
    .map(|(i, (rx, ry, rz))| {
        let pose = pose_through(
            Rotation3::from_euler_angles(rx, ry, rz),
            center,
            Point3::new(0.0, 0.0, 14.0),
        );
        let path = dir.join(format!("board_{i}.png"));
        render_chessboard(&camera(), &pose, SIZE, ROWS, COLS, 1.0)
            .save(&path)
            .unwrap();
        path
    })
    .collect()
}

fn write_marker_frame(dir: &Path, id: u32) -> PathBuf {
    let rotation = Rotation3::from_euler_angles(0.2, 0.0, 0.0)
        * Rotation3::from_axis_angle(&Vector3::x_axis(), std::f64::consts::PI);
    let pose = pose_through(rotation, Point3::origin(), Point3::new(0.0, 0.0, 5.0));
    let texture = marker_texture(&DictionaryKind::ArucoOriginal.dictionary(), id, 1.0).unwrap();
    let path = dir.join("marker.png");
    render_plane(&camera(), &pose, SIZE, 3, 235, texture)
        .save(&path)
        .unwrap();
    path
}

#[test]
fn show_without_calibration() {
    let dir = tempfile::tempdir().unwrap();
    markercal()
        .args(["show", "--prefs"])
        .arg(dir.path().join("prefs.json"))
        .assert()
        .success()
        .stdout(predicate::str::contains("not calibrated"));
}

#[test]
fn calibrate_fails_without_enough_samples() {
    let dir = tempfile::tempdir().unwrap();
    let blank = dir.path().join("blank.png");
    image::GrayImage::from_pixel(160, 120, image::Luma([128]))
        .save(&blank)
        .unwrap();

    markercal()
        .arg("calibrate")
        .arg("--config")
        .arg(write_config(dir.path(), 2))
        .arg("--prefs")
        .arg(dir.path().join("prefs.json"))
        .arg(&blank)
        .assert()
        .failure()
        .stderr(predicate::str::contains("not enough samples: 0 of 2"));
    assert!(!dir.path().join("prefs.json").exists());
}

#[test]
fn calibrate_then_detect() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), 4);
    let prefs = dir.path().join("prefs.json");

    markercal()
        .arg("calibrate")
        .arg("--config")
        .arg(&config)
        .arg("--prefs")
        .arg(&prefs)
        .args(write_board_views(dir.path()))
        .assert()
        .success()
        .stdout(predicate::str::contains("rms_error"))
        .stderr(predicate::str::contains("1/4 samples collected"));

    markercal()
        .args(["show", "--prefs"])
        .arg(&prefs)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"fx\""));

    let annotated = dir.path().join("annotated.png");
    let out = markercal()
        .arg("detect")
        .arg("--config")
        .arg(&config)
        .arg("--prefs")
        .arg(&prefs)
        .arg(write_marker_frame(dir.path(), 7))
        .arg("--output")
        .arg(&annotated)
        .output()
        .unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let report: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(report["markers"][0]["id"], 7);
    assert_eq!(report["poses"].as_array().map(Vec::len), Some(1));
    assert!(report["poses"][0]["tvec"].is_array());
    assert!(report["pose_error"].is_null());
    assert!(annotated.exists());
}
