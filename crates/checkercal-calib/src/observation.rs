use checkercal_core::{CornerSet, ImageSize, PatternSpec};
use nalgebra::{Point2, Point3};
use serde::Serialize;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ObservationError {
    #[error("corner set has {got} points, pattern {pattern} needs {expected}")]
    PointCount {
        pattern: PatternSpec,
        expected: usize,
        got: usize,
    },
}

/// One accepted view: the canonical pattern grid paired with the corners
/// detected for it, in the same order.
///
/// Construction checks the pairing; afterwards an observation is read-only.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Observation {
    pattern: PatternSpec,
    corners: CornerSet,
}

impl Observation {
    pub fn new(pattern: PatternSpec, corners: CornerSet) -> Result<Self, ObservationError> {
        let expected = pattern.point_count();
        if corners.len() != expected {
            return Err(ObservationError::PointCount {
                pattern,
                expected,
                got: corners.len(),
            });
        }
        Ok(Self { pattern, corners })
    }

    pub fn pattern(&self) -> PatternSpec {
        self.pattern
    }

    pub fn corners(&self) -> &CornerSet {
        &self.corners
    }

    pub fn image_points(&self) -> &[Point2<f64>] {
        &self.corners.points
    }

    pub fn object_points(&self) -> Vec<Point3<f64>> {
        self.pattern.object_points()
    }

    pub fn image_size(&self) -> ImageSize {
        self.corners.image_size
    }

    pub fn frame_seq(&self) -> u64 {
        self.corners.frame_seq
    }

    pub fn len(&self) -> usize {
        self.corners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.corners.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairing_requires_full_corner_set() {
        let pattern = PatternSpec::new(3, 2).unwrap();
        let size = ImageSize::new(64, 48);
        let short = CornerSet::new(1, size, vec![Point2::new(1.0, 1.0); 5]);
        assert_eq!(
            Observation::new(pattern, short),
            Err(ObservationError::PointCount {
                pattern,
                expected: 6,
                got: 5
            })
        );

        let full = CornerSet::new(2, size, vec![Point2::new(1.0, 1.0); 6]);
        let obs = Observation::new(pattern, full).unwrap();
        assert_eq!(obs.frame_seq(), 2);
        assert_eq!(obs.object_points().len(), obs.image_points().len());
    }
}
