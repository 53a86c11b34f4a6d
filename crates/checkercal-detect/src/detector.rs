use crate::candidates::{cluster_candidates, saddle_mask};
use crate::grid::assemble_grid;
use crate::params::DetectorParams;
use crate::subpix::refine_corners;
use crate::threshold::adaptive_threshold;
use checkercal_core::{CornerSet, Frame, GrayImageView, ImageSize, PatternSpec};
use log::debug;
use nalgebra::Point2;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Checkerboard inner-corner detector.
///
/// Detection never modifies the input frame. A miss is an ordinary outcome
/// and is reported as `None`.
#[derive(Clone, Debug, Default)]
pub struct ChessboardDetector {
    pub params: DetectorParams,
}

impl ChessboardDetector {
    pub fn new(params: DetectorParams) -> Self {
        Self { params }
    }

    /// Locate the `pattern` grid in `frame` and refine it to sub-pixel accuracy.
    #[cfg_attr(
        feature = "tracing",
        instrument(
            level = "debug",
            skip(self, frame, pattern),
            fields(seq = frame.seq(), pattern = %pattern)
        )
    )]
    pub fn detect(&self, frame: &Frame, pattern: &PatternSpec) -> Option<CornerSet> {
        let gray = frame.to_gray();
        let points = self.detect_gray(&gray.view(), pattern)?;
        Some(CornerSet::new(frame.seq(), frame.size(), points))
    }

    /// Same as [`Self::detect`] on an already converted grey image.
    pub fn detect_gray(
        &self,
        img: &GrayImageView<'_>,
        pattern: &PatternSpec,
    ) -> Option<Vec<Point2<f64>>> {
        let size = ImageSize::new(img.width as u32, img.height as u32);
        if size.is_empty() {
            return None;
        }

        let dark = adaptive_threshold(img, &self.params.threshold);
        let mask = saddle_mask(img, &dark, &self.params.saddle);
        let candidates = cluster_candidates(
            &mask,
            img.width,
            img.height,
            self.params.saddle.ring_radius as f64,
        );
        debug!("{} corner candidates in {} image", candidates.len(), size);

        let mut corners = assemble_grid(&candidates, pattern, &self.params.grid)?;
        refine_corners(img, &mut corners, &self.params.subpix);
        debug!("found {} grid ({} corners)", pattern, corners.len());
        Some(corners)
    }
}
