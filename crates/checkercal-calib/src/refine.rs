//! Joint non-linear refinement of intrinsics, distortion and per-view poses.
//!
//! The full parameter vector is `[fx, fy, cx, cy, k1, k2, p1, p2, k3]`
//! followed by `[rx, ry, rz, tx, ty, tz]` per view. Fixed entries are kept
//! out of the optimizer and held at their initial value.

use crate::observation::Observation;
use checkercal_core::{BrownConrady5, CameraIntrinsics, PinholeCamera, Pose};
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::{storage::Owned, DMatrix, DVector, Dyn, Point2, Point3, Vector3};

const N_CAMERA: usize = 9;
const N_POSE: usize = 6;
const IDX_P1: usize = 6;
const IDX_P2: usize = 7;
const IDX_K3: usize = 8;

/// Residual assigned to a point that falls behind the camera.
const BEHIND_PENALTY: f64 = 1e6;

/// Which camera parameters stay at their initial value.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct FixedParams {
    pub k3: bool,
    pub tangential: bool,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct LmOptions {
    pub ftol: f64,
    pub xtol: f64,
    pub gtol: f64,
    pub patience: usize,
}

#[derive(Clone, Debug)]
pub(crate) struct RefineOutcome {
    pub intrinsics: CameraIntrinsics,
    pub distortion: BrownConrady5,
    pub poses: Vec<Pose>,
    pub converged: bool,
    pub evaluations: usize,
}

struct View {
    object: Vec<Point3<f64>>,
    image: Vec<Point2<f64>>,
    /// First residual row of this view.
    offset: usize,
}

struct CalibProblem {
    views: Vec<View>,
    n_residuals: usize,
    /// Full parameter vector; free entries are overwritten from the optimizer.
    full: Vec<f64>,
    /// Indices into `full` of the optimized entries.
    free: Vec<usize>,
}

fn camera_from(full: &[f64]) -> PinholeCamera {
    PinholeCamera::new(
        CameraIntrinsics::new(full[0], full[1], full[2], full[3]),
        BrownConrady5::from_coeffs([full[4], full[5], full[6], full[7], full[8]]),
    )
}

fn pose_from(full: &[f64], view: usize) -> Pose {
    let b = N_CAMERA + N_POSE * view;
    Pose::from_rvec_tvec(
        Vector3::new(full[b], full[b + 1], full[b + 2]),
        Vector3::new(full[b + 3], full[b + 4], full[b + 5]),
    )
}

impl CalibProblem {
    fn new(
        observations: &[Observation],
        intrinsics: &CameraIntrinsics,
        distortion: &BrownConrady5,
        poses: &[Pose],
        fixed: FixedParams,
    ) -> Self {
        let mut full = Vec::with_capacity(N_CAMERA + N_POSE * poses.len());
        full.extend_from_slice(&[intrinsics.fx, intrinsics.fy, intrinsics.cx, intrinsics.cy]);
        full.extend_from_slice(&distortion.to_opencv_array());
        for pose in poses {
            full.extend(pose.rvec().iter().copied());
            full.extend(pose.translation.iter().copied());
        }

        let free = (0..full.len())
            .filter(|&i| {
                !((fixed.k3 && i == IDX_K3) || (fixed.tangential && (i == IDX_P1 || i == IDX_P2)))
            })
            .collect();

        let mut offset = 0;
        let views = observations
            .iter()
            .map(|obs| {
                let view = View {
                    object: obs.object_points(),
                    image: obs.image_points().to_vec(),
                    offset,
                };
                offset += 2 * view.image.len();
                view
            })
            .collect();

        Self {
            views,
            n_residuals: offset,
            full,
            free,
        }
    }

    fn free_params(&self) -> DVector<f64> {
        DVector::from_iterator(self.free.len(), self.free.iter().map(|&i| self.full[i]))
    }

    fn set_free_params(&mut self, x: &DVector<f64>) {
        for (k, &i) in self.free.iter().enumerate() {
            self.full[i] = x[k];
        }
    }

    fn view_residuals(&self, full: &[f64], v: usize, out: &mut [f64]) {
        let camera = camera_from(full);
        let pose = pose_from(full, v);
        let view = &self.views[v];
        for (k, (p, m)) in view.object.iter().zip(&view.image).enumerate() {
            let (rx, ry) = match camera.project_board_point(&pose, p) {
                Some(q) if q.x.is_finite() && q.y.is_finite() => (q.x - m.x, q.y - m.y),
                _ => (BEHIND_PENALTY, BEHIND_PENALTY),
            };
            out[2 * k] = rx;
            out[2 * k + 1] = ry;
        }
    }

    fn residuals_at(&self, full: &[f64]) -> DVector<f64> {
        let mut r = DVector::zeros(self.n_residuals);
        for (v, view) in self.views.iter().enumerate() {
            let len = 2 * view.image.len();
            self.view_residuals(full, v, &mut r.as_mut_slice()[view.offset..view.offset + len]);
        }
        r
    }

    /// Central differences. A pose parameter only touches the rows of its
    /// own view, so those columns evaluate a single view.
    fn jacobian_at(&self) -> DMatrix<f64> {
        let mut jac = DMatrix::zeros(self.n_residuals, self.free.len());
        let mut probe = self.full.clone();

        for (col, &i) in self.free.iter().enumerate() {
            let x0 = probe[i];
            let h = 1e-6 * (1.0 + x0.abs());

            if i < N_CAMERA {
                probe[i] = x0 + h;
                let plus = self.residuals_at(&probe);
                probe[i] = x0 - h;
                let minus = self.residuals_at(&probe);
                for row in 0..self.n_residuals {
                    jac[(row, col)] = (plus[row] - minus[row]) / (2.0 * h);
                }
            } else {
                let v = (i - N_CAMERA) / N_POSE;
                let view = &self.views[v];
                let len = 2 * view.image.len();
                let mut plus = vec![0.0; len];
                let mut minus = vec![0.0; len];
                probe[i] = x0 + h;
                self.view_residuals(&probe, v, &mut plus);
                probe[i] = x0 - h;
                self.view_residuals(&probe, v, &mut minus);
                for k in 0..len {
                    jac[(view.offset + k, col)] = (plus[k] - minus[k]) / (2.0 * h);
                }
            }
            probe[i] = x0;
        }
        jac
    }
}

struct LmWrapper {
    problem: CalibProblem,
    params: DVector<f64>,
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for LmWrapper {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.clone_from(x);
        self.problem.set_free_params(x);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        Some(self.problem.residuals_at(&self.problem.full))
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        Some(self.problem.jacobian_at())
    }
}

/// Minimize the pixel reprojection error over all observations.
///
/// `poses` must hold one initial pose per observation.
pub(crate) fn refine(
    observations: &[Observation],
    intrinsics: &CameraIntrinsics,
    distortion: &BrownConrady5,
    poses: &[Pose],
    fixed: FixedParams,
    opts: &LmOptions,
) -> RefineOutcome {
    let problem = CalibProblem::new(observations, intrinsics, distortion, poses, fixed);
    let params = problem.free_params();

    let lm = LevenbergMarquardt::new()
        .with_ftol(opts.ftol)
        .with_xtol(opts.xtol)
        .with_gtol(opts.gtol)
        .with_patience(opts.patience.max(1));

    let (wrapper, report) = lm.minimize(LmWrapper { problem, params });
    log::debug!(
        "refinement stopped after {} evaluations: {:?} (cost {:.3e})",
        report.number_of_evaluations,
        report.termination,
        report.objective_function
    );

    let full = &wrapper.problem.full;
    let camera = camera_from(full);
    RefineOutcome {
        intrinsics: camera.intrinsics,
        distortion: camera.distortion,
        poses: (0..observations.len()).map(|v| pose_from(full, v)).collect(),
        converged: report.termination.was_successful(),
        evaluations: report.number_of_evaluations,
    }
}
