//! Planar camera calibration and frame rectification.
//!
//! [`CalibrationSolver::solve`] turns a set of [`Observation`]s (pattern
//! grid plus detected corners, one per view) into a [`CalibrationResult`]:
//!
//! 1. one homography per view by normalized DLT,
//! 2. zero-skew intrinsics in closed form, then a pose per view,
//! 3. Levenberg-Marquardt over intrinsics, Brown-Conrady distortion and
//!    every pose, minimizing pixel reprojection error.
//!
//! [`Rectifier`] applies a result to frames of the same size.

mod error;
mod init;
mod observation;
mod rectify;
mod refine;
mod result;
mod solver;

pub use error::{CalibError, InsufficientReason};
pub use observation::{Observation, ObservationError};
pub use rectify::{
    optimal_new_camera_matrix, RectifyError, RectifyParams, Rectifier, UndistortMap, ValidRoi,
};
pub use result::{reprojection_rms, CalibrationResult};
pub use solver::{CalibrationSolver, SolverParams, MIN_VIEWS};
