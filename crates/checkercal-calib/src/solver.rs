use crate::error::{CalibError, InsufficientReason};
use crate::init::initial_estimate;
use crate::observation::Observation;
use crate::refine::{refine, FixedParams, LmOptions};
use crate::result::{rms_errors, CalibrationResult};
use checkercal_core::{BrownConrady5, ImageSize, PinholeCamera};
use log::{info, warn};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Smallest number of views a solve accepts.
pub const MIN_VIEWS: usize = 3;

/// Optimizer budget, tolerances and parameter masks.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SolverParams {
    /// Evaluation budget factor; the optimizer stops after
    /// `patience * (free parameters + 1)` residual evaluations.
    pub patience: usize,
    /// Relative reduction of the cost below which the solve has converged.
    pub ftol: f64,
    /// Relative parameter step below which the solve has converged.
    pub xtol: f64,
    /// Orthogonality between residuals and Jacobian columns.
    pub gtol: f64,
    /// Hold `k3` at zero.
    pub fix_k3: bool,
    /// Hold `p1`, `p2` at zero.
    pub fix_tangential: bool,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            patience: 100,
            ftol: 1e-12,
            xtol: 1e-12,
            gtol: 1e-12,
            fix_k3: false,
            fix_tangential: false,
        }
    }
}

/// Two-stage planar calibration: closed-form estimate, then joint
/// Levenberg-Marquardt refinement of every parameter.
#[derive(Clone, Debug, Default)]
pub struct CalibrationSolver {
    pub params: SolverParams,
}

impl CalibrationSolver {
    pub fn new(params: SolverParams) -> Self {
        Self { params }
    }

    /// Solve for the camera seen in `observations`.
    ///
    /// Deterministic for identical inputs. Failing to converge is not an
    /// error: the result carries `converged = false` and its RMS error.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, observations), fields(views = observations.len(), size = %image_size))
    )]
    pub fn solve(
        &self,
        observations: &[Observation],
        image_size: ImageSize,
    ) -> Result<CalibrationResult, CalibError> {
        if observations.len() < MIN_VIEWS {
            return Err(CalibError::InsufficientData(
                InsufficientReason::TooFewViews {
                    got: observations.len(),
                    required: MIN_VIEWS,
                },
            ));
        }
        if image_size.is_empty() {
            return Err(CalibError::InsufficientData(
                InsufficientReason::EmptyImageSize,
            ));
        }
        if observations.iter().any(|o| o.image_size() != image_size) {
            return Err(CalibError::InsufficientData(
                InsufficientReason::ImageSizeMismatch,
            ));
        }
        let pattern = observations[0].pattern();
        if observations.iter().any(|o| o.pattern() != pattern) {
            return Err(CalibError::degenerate("views use different patterns"));
        }

        let (k0, poses0) = initial_estimate(observations, image_size)?;

        let fixed = FixedParams {
            k3: self.params.fix_k3,
            tangential: self.params.fix_tangential,
        };
        let opts = LmOptions {
            ftol: self.params.ftol,
            xtol: self.params.xtol,
            gtol: self.params.gtol,
            patience: self.params.patience,
        };
        let out = refine(
            observations,
            &k0,
            &BrownConrady5::default(),
            &poses0,
            fixed,
            &opts,
        );

        let camera = PinholeCamera::new(out.intrinsics, out.distortion);
        let (rms_error, per_view_rms) = rms_errors(&camera, &out.poses, observations)
            .ok_or_else(|| CalibError::degenerate("refined poses put points behind the camera"))?;

        if !out.converged {
            warn!("calibration did not converge; rms {rms_error:.4} px");
        }
        info!(
            "calibrated {} views: fx={:.2} fy={:.2} cx={:.2} cy={:.2} rms={:.4}px",
            observations.len(),
            out.intrinsics.fx,
            out.intrinsics.fy,
            out.intrinsics.cx,
            out.intrinsics.cy,
            rms_error
        );

        Ok(CalibrationResult {
            intrinsics: out.intrinsics,
            distortion: out.distortion,
            poses: out.poses,
            image_size,
            pattern,
            rms_error,
            per_view_rms,
            converged: out.converged,
            evaluations: out.evaluations,
        })
    }
}
