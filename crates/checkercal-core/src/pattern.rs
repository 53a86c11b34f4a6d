use crate::ImageSize;
use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternError {
    #[error("pattern needs at least 2x2 inner corners, got {cols}x{rows}")]
    TooSmall { cols: u32, rows: u32 },
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
struct PatternDims {
    cols: u32,
    rows: u32,
}

/// Inner-corner layout of a planar checkerboard.
///
/// `cols` counts inner corners along a board row (the board x axis),
/// `rows` along a board column. A `9x6` board therefore has 10x7 squares.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "PatternDims", into = "PatternDims")]
pub struct PatternSpec {
    cols: u32,
    rows: u32,
}

impl PatternSpec {
    pub fn new(cols: u32, rows: u32) -> Result<Self, PatternError> {
        if cols < 2 || rows < 2 {
            return Err(PatternError::TooSmall { cols, rows });
        }
        Ok(Self { cols, rows })
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn point_count(&self) -> usize {
        self.cols as usize * self.rows as usize
    }

    /// Row-major index of the inner corner at (`col`, `row`).
    #[inline]
    pub fn index(&self, col: u32, row: u32) -> usize {
        row as usize * self.cols as usize + col as usize
    }

    /// Canonical pattern points: unit spacing, `z = 0`, `x` varies fastest.
    pub fn object_points(&self) -> Vec<Point3<f64>> {
        let mut pts = Vec::with_capacity(self.point_count());
        for row in 0..self.rows {
            for col in 0..self.cols {
                pts.push(Point3::new(col as f64, row as f64, 0.0));
            }
        }
        pts
    }

    /// Same grid as [`Self::object_points`], dropping the zero `z`.
    pub fn plane_points(&self) -> Vec<Point2<f64>> {
        self.object_points()
            .iter()
            .map(|p| Point2::new(p.x, p.y))
            .collect()
    }
}

/// The common 9x6 inner-corner board.
impl Default for PatternSpec {
    fn default() -> Self {
        Self { cols: 9, rows: 6 }
    }
}

impl TryFrom<PatternDims> for PatternSpec {
    type Error = PatternError;

    fn try_from(d: PatternDims) -> Result<Self, Self::Error> {
        PatternSpec::new(d.cols, d.rows)
    }
}

impl From<PatternSpec> for PatternDims {
    fn from(p: PatternSpec) -> Self {
        PatternDims {
            cols: p.cols,
            rows: p.rows,
        }
    }
}

impl std::fmt::Display for PatternSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

/// Sub-pixel inner-corner positions found in one frame, in pattern order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CornerSet {
    pub frame_seq: u64,
    pub image_size: ImageSize,
    pub points: Vec<Point2<f64>>,
}

impl CornerSet {
    pub fn new(frame_seq: u64, image_size: ImageSize, points: Vec<Point2<f64>>) -> Self {
        Self {
            frame_seq,
            image_size,
            points,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
