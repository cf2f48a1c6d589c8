//! Core types and utilities shared by the markercal crates.
//!
//! This crate is small and purely geometric: grayscale views with bilinear
//! sampling, homography estimation, the pinhole + Brown–Conrady camera model,
//! rotation-vector poses, and a synthetic renderer used by tests across the
//! workspace. It does *not* depend on any concrete corner or marker detector.

mod camera;
mod corner;
mod gray;
mod homography;
#[cfg(feature = "tracing")]
mod logger;
mod pose;
mod subpix;
pub mod synthetic;

pub use camera::{CameraError, CameraMatrix, Distortion, ImageSize, Intrinsics};
pub use corner::Corner;
pub use gray::{gray_view, sample_bilinear, sample_bilinear_u8, GrayImageView};
pub use homography::{estimate_homography, homography_from_4pt, Homography};
pub use pose::Pose;
pub use subpix::{refine_corners_subpix, SubpixParams};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;
