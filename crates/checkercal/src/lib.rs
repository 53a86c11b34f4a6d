//! Interactive checkerboard camera calibration.
//!
//! This crate ties the workspace together:
//! - re-exports of the geometry, detection and calibration crates,
//! - the [`Accumulator`] of accepted views,
//! - the [`Session`] state machine that runs capture, solve and rectify
//!   against any [`FrameSource`] and [`DisplaySink`],
//! - a JSON [`CalibrationRecord`] for use outside Rust.
//!
//! ## Quickstart
//!
//! ```no_run
//! use checkercal::{BatchSink, ImageSequenceSource, Session, SessionConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let paths = vec!["view0.png".into(), "view1.png".into(), "view2.png".into()];
//! let mut config = SessionConfig::default();
//! config.solve_on_exhaustion = true;
//!
//! let mut session = Session::new(config);
//! let outcome = session.run(&mut ImageSequenceSource::new(paths), &mut BatchSink::new())?;
//! if let Some(result) = outcome.result {
//!     println!("rms {:.3}px, fx {:.1}", result.rms_error, result.intrinsics.fx);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `checkercal::core`: pattern, frame and camera-model types.
//! - `checkercal::detect`: the chessboard corner detector.
//! - `checkercal::calib`: solver and rectifier.

pub use checkercal_calib as calib;
pub use checkercal_core as core;
pub use checkercal_detect as detect;

mod accumulator;
mod io;
mod persist;
mod prompt;
mod session;

pub use accumulator::{AdmitError, Accumulator};
pub use io::{BatchSink, DisplaySink, FrameSource, ScriptedSink, SinkError, SourceError, VecSource};
pub use persist::{load_calibration, save_calibration, CalibrationRecord, IoError};
pub use prompt::{prompt_pattern, PromptError};
pub use session::{
    Command, DisplayFrame, IgnoredReason, RunEnd, Session, SessionConfig, SessionError,
    SessionEvent, SessionOutcome, SessionState,
};

#[cfg(feature = "image")]
pub use io::{load_frame, save_frame, ImageSequenceSource};

pub use checkercal_calib::{CalibrationResult, CalibrationSolver, RectifyParams, SolverParams};
pub use checkercal_core::{Frame, ImageSize, PatternSpec};
pub use checkercal_detect::{ChessboardDetector, DetectorParams};
