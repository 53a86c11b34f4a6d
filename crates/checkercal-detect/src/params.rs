use serde::{Deserialize, Serialize};

/// Local-mean binarization.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ThresholdParams {
    /// Half-size of the averaging window; the window is `2 * r + 1` pixels wide.
    pub block_radius: usize,
    /// A pixel is dark when it is more than `offset` below its local mean.
    pub offset: f32,
}

impl Default for ThresholdParams {
    fn default() -> Self {
        Self {
            block_radius: 15,
            offset: 5.0,
        }
    }
}

/// Ring test that marks a pixel as a possible X-junction.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SaddleParams {
    /// Radius of the sampling ring in pixels.
    pub ring_radius: f32,
    /// Number of samples on the ring.
    pub ring_samples: usize,
    /// Minimal number of consecutive samples per dark or light arc.
    pub min_run: usize,
    /// Largest length difference, in samples, between opposite arcs.
    pub max_imbalance: usize,
    /// Minimal grey-level spread (max - min) along the ring.
    pub min_contrast: f32,
}

impl Default for SaddleParams {
    fn default() -> Self {
        Self {
            ring_radius: 5.0,
            ring_samples: 16,
            min_run: 2,
            max_imbalance: 2,
            min_contrast: 20.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GridParams {
    /// Accepted distance between a predicted and a found corner, relative to
    /// the local lattice step.
    pub match_tolerance: f32,
    /// Number of seeds (closest to the candidate centroid first) tried before
    /// giving up.
    pub max_seeds: usize,
    /// Smallest lattice step considered, in pixels.
    pub min_step_pix: f32,
}

impl Default for GridParams {
    fn default() -> Self {
        Self {
            match_tolerance: 0.35,
            max_seeds: 8,
            min_step_pix: 6.0,
        }
    }
}

/// Iterative gradient-orthogonality refinement.
///
/// The defaults (11x11 window, `1e-3` px, 30 iterations) are the values
/// calibration pipelines expect and should not be changed lightly.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SubPixParams {
    pub half_window: usize,
    pub epsilon: f64,
    pub max_iterations: usize,
}

impl Default for SubPixParams {
    fn default() -> Self {
        Self {
            half_window: 5,
            epsilon: 1e-3,
            max_iterations: 30,
        }
    }
}

/// Parameters of [`crate::ChessboardDetector`].
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DetectorParams {
    pub threshold: ThresholdParams,
    pub saddle: SaddleParams,
    pub grid: GridParams,
    pub subpix: SubPixParams,
}
