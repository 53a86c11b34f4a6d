//! Core types and utilities for checkerboard camera calibration.
//!
//! This crate is intentionally small and purely geometric. It knows about
//! pattern grids, the pinhole + Brown–Conrady camera model, frames and a
//! plane-to-image homography estimator. It does *not* detect corners or solve
//! for calibrations; see `checkercal-detect` and `checkercal-calib`.

mod camera;
mod homography;
mod image;
mod logger;
mod pattern;
pub mod synthetic;

pub use camera::{project_point, BrownConrady5, CameraIntrinsics, PinholeCamera, Pose};
pub use homography::{estimate_homography, Homography};
pub use image::{
    hstack, sample_bilinear, Frame, FrameError, GrayImage, GrayImageView, ImageSize, PixelLayout,
};
pub use pattern::{CornerSet, PatternError, PatternSpec};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_with_level, level_from_verbosity};
