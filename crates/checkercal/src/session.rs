//! Capture-solve-rectify state machine.
//!
//! ```text
//! Idle --start--> Capturing --solve / target reached--> Solving
//!                    ^                                    |
//!                    +------- insufficient data ----------+
//!                                                         |
//!                                      RectifyReady <-----+ solved
//! any state --quit--> Aborted
//! ```
//!
//! Solving is synchronous: it is entered and left within a single
//! [`Session::handle_command`] call and never observed from outside.

use crate::accumulator::{Accumulator, AdmitError};
use crate::io::{DisplaySink, FrameSource, SinkError, SourceError};
use checkercal_calib::{
    CalibError, CalibrationResult, CalibrationSolver, RectifyError, RectifyParams, Rectifier,
    SolverParams,
};
use checkercal_core::{hstack, CornerSet, Frame, FrameError, PatternSpec};
use checkercal_detect::{draw_corners, ChessboardDetector, DetectorParams};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Capturing,
    Solving,
    RectifyReady,
    Aborted,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Capturing => "capturing",
            SessionState::Solving => "solving",
            SessionState::RectifyReady => "rectify-ready",
            SessionState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// User commands, independent of any key binding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    #[default]
    None,
    Accept,
    Solve,
    Toggle,
    Quit,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IgnoredReason {
    /// The last frame has no complete corner set (or it was already admitted).
    NoDetection,
    NotCapturing(SessionState),
    Rejected(AdmitError),
}

#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    Admitted { frame_seq: u64, count: usize },
    AcceptIgnored(IgnoredReason),
    StateChanged { from: SessionState, to: SessionState },
    Solved { rms_error: f64, converged: bool },
    SolveFailed(CalibError),
    ViewToggled { side_by_side: bool },
    Aborted,
}

/// Session settings, fixed once the session is built.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    pub pattern: PatternSpec,
    /// Solve automatically once this many views are admitted, and again on
    /// each further accept while the solve keeps failing.
    pub target_count: Option<usize>,
    /// Solve once when a finite source runs out while still capturing.
    pub solve_on_exhaustion: bool,
    pub detector: DetectorParams,
    pub solver: SolverParams,
    pub rectify: RectifyParams,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pattern: PatternSpec::default(),
            target_count: None,
            solve_on_exhaustion: false,
            detector: DetectorParams::default(),
            solver: SolverParams::default(),
            rectify: RectifyParams::default(),
        }
    }
}

impl SessionConfig {
    pub fn new(pattern: PatternSpec) -> Self {
        Self {
            pattern,
            ..Self::default()
        }
    }
}

/// What the display sink is asked to show for one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct DisplayFrame {
    /// Annotated copy, rectified view or side-by-side comparison.
    pub frame: Frame,
    pub state: SessionState,
    /// One-line summary, e.g. `frame 12 | views 4 | board found`.
    pub status: String,
    pub detected: bool,
    pub captures: usize,
    /// Pending notice such as a failed solve; shown once.
    pub message: Option<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("operation not valid in state {0}")]
    InvalidState(SessionState),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error(transparent)]
    Rectify(#[from] RectifyError),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Why [`Session::run`] returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunEnd {
    Quit,
    SourceExhausted,
}

#[derive(Clone, Debug)]
pub struct SessionOutcome {
    pub end: RunEnd,
    pub state: SessionState,
    pub frames: u64,
    pub captures: usize,
    pub result: Option<Arc<CalibrationResult>>,
}

/// Releases the source when dropped.
struct SourceGuard<'a, S: FrameSource + ?Sized>(&'a mut S);

impl<S: FrameSource + ?Sized> Deref for SourceGuard<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.0
    }
}

impl<S: FrameSource + ?Sized> DerefMut for SourceGuard<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        self.0
    }
}

impl<S: FrameSource + ?Sized> Drop for SourceGuard<'_, S> {
    fn drop(&mut self) {
        debug!("releasing frame source");
        self.0.release();
    }
}

/// Closes the sink when dropped.
struct SinkGuard<'a, D: DisplaySink + ?Sized>(&'a mut D);

impl<D: DisplaySink + ?Sized> Deref for SinkGuard<'_, D> {
    type Target = D;

    fn deref(&self) -> &D {
        self.0
    }
}

impl<D: DisplaySink + ?Sized> DerefMut for SinkGuard<'_, D> {
    fn deref_mut(&mut self) -> &mut D {
        self.0
    }
}

impl<D: DisplaySink + ?Sized> Drop for SinkGuard<'_, D> {
    fn drop(&mut self) {
        debug!("closing display sink");
        self.0.close();
    }
}

pub struct Session {
    config: SessionConfig,
    state: SessionState,
    detector: ChessboardDetector,
    solver: CalibrationSolver,
    rectifier: Rectifier,
    accumulator: Accumulator,
    result: Option<Arc<CalibrationResult>>,
    last_frame: Option<Frame>,
    /// Corners of `last_frame`, cleared once admitted.
    last_detection: Option<CornerSet>,
    side_by_side: bool,
    notice: Option<String>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            detector: ChessboardDetector::new(config.detector.clone()),
            solver: CalibrationSolver::new(config.solver.clone()),
            rectifier: Rectifier::new(config.rectify.clone()),
            accumulator: Accumulator::new(config.pattern),
            state: SessionState::Idle,
            result: None,
            last_frame: None,
            last_detection: None,
            side_by_side: false,
            notice: None,
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn accumulator(&self) -> &Accumulator {
        &self.accumulator
    }

    pub fn result(&self) -> Option<&Arc<CalibrationResult>> {
        self.result.as_ref()
    }

    pub fn last_frame(&self) -> Option<&Frame> {
        self.last_frame.as_ref()
    }

    pub fn last_detection(&self) -> Option<&CornerSet> {
        self.last_detection.as_ref()
    }

    pub fn side_by_side(&self) -> bool {
        self.side_by_side
    }

    fn transition(&mut self, to: SessionState, events: &mut Vec<SessionEvent>) {
        let from = self.state;
        if from == to {
            return;
        }
        info!("session {from} -> {to}");
        self.state = to;
        events.push(SessionEvent::StateChanged { from, to });
    }

    /// Leave `Idle` and start capturing.
    pub fn start(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        if self.state == SessionState::Idle {
            self.transition(SessionState::Capturing, &mut events);
        }
        events
    }

    /// Drop every view, the result and the last frame, and capture again.
    pub fn reset(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        self.accumulator.clear();
        self.result = None;
        self.last_frame = None;
        self.last_detection = None;
        self.side_by_side = false;
        self.notice = None;
        self.transition(SessionState::Capturing, &mut events);
        events
    }

    /// Run one frame through the stage of the current state.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, frame), fields(seq = frame.seq(), state = %self.state))
    )]
    pub fn process_frame(&mut self, frame: Frame) -> Result<DisplayFrame, SessionError> {
        match self.state {
            SessionState::Capturing => {
                let detection = self.detector.detect(&frame, &self.config.pattern);
                let shown = match &detection {
                    Some(corners) => draw_corners(&frame, &self.config.pattern, corners),
                    None => frame.clone(),
                };
                debug!(
                    "frame {}: board {}",
                    frame.seq(),
                    if detection.is_some() { "found" } else { "not found" }
                );
                self.last_detection = detection;
                self.last_frame = Some(frame);
                Ok(self.display(shown))
            }
            SessionState::RectifyReady => {
                let shown = self.rectified_or_original(&frame)?;
                self.last_detection = None;
                self.last_frame = Some(frame);
                Ok(self.display(shown))
            }
            state => Err(SessionError::InvalidState(state)),
        }
    }

    /// Re-render the last frame in the current view mode.
    pub fn redisplay(&mut self) -> Result<Option<DisplayFrame>, SessionError> {
        if self.state != SessionState::RectifyReady {
            return Ok(None);
        }
        let Some(frame) = self.last_frame.clone() else {
            return Ok(None);
        };
        let shown = self.rectified_or_original(&frame)?;
        Ok(Some(self.display(shown)))
    }

    /// A frame of another size than the calibration is shown as is, with
    /// the mismatch as the pending notice.
    fn rectified_or_original(&mut self, frame: &Frame) -> Result<Frame, SessionError> {
        match self.render_rectified(frame) {
            Err(SessionError::Rectify(err @ RectifyError::SizeMismatch { .. })) => {
                warn!("frame {}: {err}", frame.seq());
                self.notice = Some(err.to_string());
                Ok(frame.clone())
            }
            other => other,
        }
    }

    fn render_rectified(&mut self, frame: &Frame) -> Result<Frame, SessionError> {
        let Some(result) = self.result.clone() else {
            return Err(SessionError::InvalidState(self.state));
        };
        let rectified = self.rectifier.rectify(frame, &result)?;
        if self.side_by_side {
            Ok(hstack(frame, &rectified)?)
        } else {
            Ok(rectified)
        }
    }

    fn display(&mut self, frame: Frame) -> DisplayFrame {
        let detected = self.last_detection.is_some();
        let captures = self.accumulator.count();
        let status = match self.state {
            SessionState::RectifyReady => format!(
                "frame {} | {} | rms {:.3}px",
                frame.seq(),
                if self.side_by_side { "original | rectified" } else { "rectified" },
                self.result.as_ref().map_or(f64::NAN, |r| r.rms_error)
            ),
            _ => format!(
                "frame {} | views {} | board {}",
                frame.seq(),
                captures,
                if detected { "found" } else { "not found" }
            ),
        };
        DisplayFrame {
            frame,
            state: self.state,
            status,
            detected,
            captures,
            message: self.notice.take(),
        }
    }

    /// React to one user command.
    pub fn handle_command(&mut self, command: Command) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        if self.state == SessionState::Aborted {
            return events;
        }
        match command {
            Command::None => {}
            Command::Quit => {
                self.transition(SessionState::Aborted, &mut events);
                events.push(SessionEvent::Aborted);
            }
            Command::Accept => self.accept(&mut events),
            Command::Solve => {
                if self.state == SessionState::Capturing {
                    self.solve(&mut events);
                }
            }
            Command::Toggle => {
                if self.state == SessionState::RectifyReady {
                    self.side_by_side = !self.side_by_side;
                    events.push(SessionEvent::ViewToggled {
                        side_by_side: self.side_by_side,
                    });
                }
            }
        }
        events
    }

    fn accept(&mut self, events: &mut Vec<SessionEvent>) {
        if self.state != SessionState::Capturing {
            events.push(SessionEvent::AcceptIgnored(IgnoredReason::NotCapturing(
                self.state,
            )));
            return;
        }
        let Some(corners) = self.last_detection.take() else {
            events.push(SessionEvent::AcceptIgnored(IgnoredReason::NoDetection));
            return;
        };
        match self.accumulator.admit(corners) {
            Ok(obs) => {
                let frame_seq = obs.frame_seq();
                let count = self.accumulator.count();
                info!("view {count} admitted (frame {frame_seq})");
                events.push(SessionEvent::Admitted { frame_seq, count });
                // Also retried on every later accept after a failed solve.
                if self.config.target_count.is_some_and(|target| count >= target) {
                    self.solve(events);
                }
            }
            Err(err) => {
                warn!("view rejected: {err}");
                events.push(SessionEvent::AcceptIgnored(IgnoredReason::Rejected(err)));
            }
        }
    }

    fn solve(&mut self, events: &mut Vec<SessionEvent>) {
        self.transition(SessionState::Solving, events);
        let size = self.accumulator.image_size().unwrap_or_default();
        match self.solver.solve(self.accumulator.all(), size) {
            Ok(result) => {
                events.push(SessionEvent::Solved {
                    rms_error: result.rms_error,
                    converged: result.converged,
                });
                self.result = Some(Arc::new(result));
                self.transition(SessionState::RectifyReady, events);
            }
            Err(err) => {
                warn!("solve failed: {err}");
                self.notice = Some(err.to_string());
                events.push(SessionEvent::SolveFailed(err));
                self.transition(SessionState::Capturing, events);
            }
        }
    }

    /// Drive the session from `source` to `sink` until quit or the end of
    /// the source.
    ///
    /// The source is released and the sink closed on every exit path,
    /// including errors.
    pub fn run<S, D>(&mut self, source: &mut S, sink: &mut D) -> Result<SessionOutcome, SessionError>
    where
        S: FrameSource + ?Sized,
        D: DisplaySink + ?Sized,
    {
        let mut source = SourceGuard(source);
        let mut sink = SinkGuard(sink);
        self.start();
        let mut frames = 0u64;

        let end = loop {
            if self.state == SessionState::Aborted {
                break RunEnd::Quit;
            }
            let Some(frame) = source.next_frame()? else {
                info!("frame source exhausted after {frames} frames");
                if self.config.solve_on_exhaustion && self.state == SessionState::Capturing {
                    let mut events = Vec::new();
                    self.solve(&mut events);
                    log_events(&events);
                }
                break RunEnd::SourceExhausted;
            };
            frames += 1;

            let shown = self.process_frame(frame)?;
            sink.show(&shown)?;
            loop {
                let command = sink.poll_command();
                let events = self.handle_command(command);
                log_events(&events);
                if command != Command::Toggle {
                    break;
                }
                match self.redisplay()? {
                    Some(again) => sink.show(&again)?,
                    None => break,
                }
            }
        };

        Ok(SessionOutcome {
            end,
            state: self.state,
            frames,
            captures: self.accumulator.count(),
            result: self.result.clone(),
        })
    }
}

fn log_events(events: &[SessionEvent]) {
    for event in events {
        match event {
            SessionEvent::SolveFailed(err) => warn!("{err}"),
            other => debug!("{other:?}"),
        }
    }
}
