//! Checkerboard inner-corner detection.
//!
//! Pipeline:
//! 1. Convert the frame to luma.
//! 2. Binarize against the local mean (integral image), so uneven lighting
//!    does not break the pattern.
//! 3. Mark pixels whose surrounding ring crosses four alternating dark/light
//!    arcs, then collapse each blob of such pixels to one candidate.
//! 4. Grow a lattice from the candidate nearest the centroid, predicting each
//!    neighbour from the local steps and matching it through a k-d tree.
//! 5. Accept only a complete `cols x rows` lattice and read it out in pattern
//!    order.
//! 6. Refine every corner with the gradient-orthogonality iteration
//!    (11x11 window, `1e-3` px, 30 iterations).

mod candidates;
mod detector;
mod draw;
mod grid;
mod params;
mod subpix;
mod threshold;

pub use detector::ChessboardDetector;
pub use draw::draw_corners;
pub use params::{DetectorParams, GridParams, SaddleParams, SubPixParams, ThresholdParams};
