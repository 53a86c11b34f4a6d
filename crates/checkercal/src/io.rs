//! Frame sources and display sinks.
//!
//! The session only talks to [`FrameSource`] and [`DisplaySink`]. The
//! realizations here cover in-memory sequences, still images on disk and
//! scripted or unattended command input.

use crate::session::{Command, DisplayFrame};
use checkercal_core::{Frame, FrameError};
use std::collections::VecDeque;
use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    #[error("frame source unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[cfg(feature = "image")]
    #[error("cannot read {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error("display closed")]
    Closed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[cfg(feature = "image")]
    #[error("cannot write {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Yields frames on demand. `Ok(None)` marks the end of a finite source.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError>;

    /// Give back the underlying device or files. Called exactly once when a
    /// session run ends, whatever the reason.
    fn release(&mut self) {}
}

/// Shows frames and reports user commands.
pub trait DisplaySink {
    fn show(&mut self, frame: &DisplayFrame) -> Result<(), SinkError>;

    /// Command issued since the last call, [`Command::None`] if there is none.
    fn poll_command(&mut self) -> Command;

    /// Called exactly once when a session run ends.
    fn close(&mut self) {}
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        (**self).next_frame()
    }

    fn release(&mut self) {
        (**self).release()
    }
}

impl<D: DisplaySink + ?Sized> DisplaySink for Box<D> {
    fn show(&mut self, frame: &DisplayFrame) -> Result<(), SinkError> {
        (**self).show(frame)
    }

    fn poll_command(&mut self) -> Command {
        (**self).poll_command()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// In-memory finite sequence of frames.
#[derive(Debug, Default)]
pub struct VecSource {
    frames: VecDeque<Frame>,
    failure: Option<String>,
    released: bool,
}

impl VecSource {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            frames: frames.into(),
            ..Self::default()
        }
    }

    /// After the frames run out, report the source as unavailable instead of
    /// ending cleanly.
    pub fn failing_with(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl FrameSource for VecSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        if let Some(frame) = self.frames.pop_front() {
            return Ok(Some(frame));
        }
        match self.failure.take() {
            Some(msg) => Err(SourceError::Unavailable(msg)),
            None => Ok(None),
        }
    }

    fn release(&mut self) {
        self.frames.clear();
        self.released = true;
    }
}

/// Replays a fixed list of commands, one per poll, and records everything
/// shown. Once the script is spent it reports [`Command::None`].
#[derive(Debug, Default)]
pub struct ScriptedSink {
    script: VecDeque<Command>,
    shown: Vec<DisplayFrame>,
    closed: bool,
}

impl ScriptedSink {
    pub fn new(script: impl IntoIterator<Item = Command>) -> Self {
        Self {
            script: script.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn shown(&self) -> &[DisplayFrame] {
        &self.shown
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl DisplaySink for ScriptedSink {
    fn show(&mut self, frame: &DisplayFrame) -> Result<(), SinkError> {
        if self.closed {
            return Err(SinkError::Closed);
        }
        self.shown.push(frame.clone());
        Ok(())
    }

    fn poll_command(&mut self) -> Command {
        self.script.pop_front().unwrap_or(Command::None)
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Unattended sink: accepts every frame in which the board was found.
///
/// With the `image` feature it can also write each displayed frame to a
/// directory as `frame_<seq>.png`.
#[derive(Debug, Default)]
pub struct BatchSink {
    pending_accept: bool,
    shown: usize,
    accepted: usize,
    save_dir: Option<PathBuf>,
}

impl BatchSink {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(feature = "image")]
    pub fn saving_to(mut self, dir: impl Into<PathBuf>) -> Self {
        self.save_dir = Some(dir.into());
        self
    }

    pub fn shown(&self) -> usize {
        self.shown
    }

    pub fn accepted(&self) -> usize {
        self.accepted
    }
}

impl DisplaySink for BatchSink {
    fn show(&mut self, frame: &DisplayFrame) -> Result<(), SinkError> {
        self.shown += 1;
        self.pending_accept = frame.detected;
        if let Some(dir) = &self.save_dir {
            #[cfg(feature = "image")]
            {
                std::fs::create_dir_all(dir)?;
                let path = dir.join(format!("frame_{:04}.png", frame.frame.seq()));
                save_frame(&frame.frame, &path)?;
            }
            #[cfg(not(feature = "image"))]
            let _ = dir;
        }
        Ok(())
    }

    fn poll_command(&mut self) -> Command {
        if std::mem::take(&mut self.pending_accept) {
            self.accepted += 1;
            Command::Accept
        } else {
            Command::None
        }
    }
}

#[cfg(feature = "image")]
mod files {
    use super::{FrameSource, SinkError, SourceError};
    use checkercal_core::{Frame, PixelLayout};
    use log::{debug, warn};
    use std::path::{Path, PathBuf};

    /// Decode an image file into an RGB frame.
    pub fn load_frame(path: &Path, seq: u64) -> Result<Frame, SourceError> {
        let img = image::open(path)
            .map_err(|source| SourceError::Decode {
                path: path.to_path_buf(),
                source,
            })?
            .to_rgb8();
        let (w, h) = img.dimensions();
        Ok(Frame::new(seq, w, h, PixelLayout::Rgb8, img.into_raw())?)
    }

    /// Encode a frame as an image file; the format follows the extension.
    pub fn save_frame(frame: &Frame, path: &Path) -> Result<(), SinkError> {
        let color = match frame.layout() {
            PixelLayout::Gray8 => image::ExtendedColorType::L8,
            PixelLayout::Rgb8 => image::ExtendedColorType::Rgb8,
        };
        image::save_buffer(path, frame.data(), frame.width(), frame.height(), color).map_err(
            |source| SinkError::Encode {
                path: path.to_path_buf(),
                source,
            },
        )
    }

    /// Still images read in the given order.
    ///
    /// Files that cannot be decoded are skipped with a warning; frames keep
    /// their position in the list as sequence index.
    #[derive(Debug)]
    pub struct ImageSequenceSource {
        paths: Vec<PathBuf>,
        next: usize,
        skipped: Vec<PathBuf>,
    }

    impl ImageSequenceSource {
        pub fn new(paths: Vec<PathBuf>) -> Self {
            Self {
                paths,
                next: 0,
                skipped: Vec::new(),
            }
        }

        pub fn len(&self) -> usize {
            self.paths.len()
        }

        pub fn is_empty(&self) -> bool {
            self.paths.is_empty()
        }

        /// Files that failed to decode so far.
        pub fn skipped(&self) -> &[PathBuf] {
            &self.skipped
        }
    }

    impl FrameSource for ImageSequenceSource {
        fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
            while self.next < self.paths.len() {
                let seq = self.next as u64;
                let path = &self.paths[self.next];
                self.next += 1;
                match load_frame(path, seq) {
                    Ok(frame) => {
                        debug!("loaded {} ({})", path.display(), frame.size());
                        return Ok(Some(frame));
                    }
                    Err(err) => {
                        warn!("skipping {}: {err}", path.display());
                        self.skipped.push(path.clone());
                    }
                }
            }
            Ok(None)
        }

        fn release(&mut self) {
            self.next = self.paths.len();
        }
    }
}

#[cfg(feature = "image")]
pub use files::{load_frame, save_frame, ImageSequenceSource};
