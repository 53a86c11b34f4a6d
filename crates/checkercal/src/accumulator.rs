use checkercal_calib::{Observation, ObservationError};
use checkercal_core::{CornerSet, ImageSize, PatternSpec};
use log::{debug, warn};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmitError {
    #[error(transparent)]
    PatternMismatch(#[from] ObservationError),
    #[error("view is {got}, earlier views are {expected}")]
    ImageSizeChanged { expected: ImageSize, got: ImageSize },
}

/// Ordered store of accepted views for one pattern.
///
/// Views are kept in capture order. Near-duplicate views are not filtered.
#[derive(Clone, Debug)]
pub struct Accumulator {
    pattern: PatternSpec,
    observations: Vec<Observation>,
}

impl Accumulator {
    pub fn new(pattern: PatternSpec) -> Self {
        Self {
            pattern,
            observations: Vec::new(),
        }
    }

    pub fn pattern(&self) -> PatternSpec {
        self.pattern
    }

    /// Pair `corners` with the pattern grid and append it.
    pub fn admit(&mut self, corners: CornerSet) -> Result<&Observation, AdmitError> {
        if let Some(expected) = self.image_size() {
            if corners.image_size != expected {
                warn!(
                    "rejecting frame {}: size {} differs from {}",
                    corners.frame_seq, corners.image_size, expected
                );
                return Err(AdmitError::ImageSizeChanged {
                    expected,
                    got: corners.image_size,
                });
            }
        }
        let obs = Observation::new(self.pattern, corners)?;
        debug!(
            "admitted frame {} as view {}",
            obs.frame_seq(),
            self.observations.len()
        );
        self.observations.push(obs);
        Ok(&self.observations[self.observations.len() - 1])
    }

    pub fn count(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn all(&self) -> &[Observation] {
        &self.observations
    }

    /// Image size shared by every admitted view, if any.
    pub fn image_size(&self) -> Option<ImageSize> {
        self.observations.first().map(Observation::image_size)
    }

    pub fn clear(&mut self) {
        self.observations.clear();
    }
}
