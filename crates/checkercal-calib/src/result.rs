use crate::observation::Observation;
use checkercal_core::{
    BrownConrady5, CameraIntrinsics, ImageSize, PatternSpec, PinholeCamera, Pose,
};
use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};

/// Output of one solve. Never mutated; a new solve yields a new result.
///
/// Valid only for frames of `image_size` showing `pattern`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub intrinsics: CameraIntrinsics,
    pub distortion: BrownConrady5,
    /// One board-to-camera pose per observation, in input order.
    pub poses: Vec<Pose>,
    pub image_size: ImageSize,
    pub pattern: PatternSpec,
    /// RMS pixel reprojection error over every point of every view.
    pub rms_error: f64,
    pub per_view_rms: Vec<f64>,
    /// `false` when the optimizer ran out of budget; the estimate is still usable.
    pub converged: bool,
    /// Objective evaluations spent by the optimizer.
    pub evaluations: usize,
}

impl CalibrationResult {
    pub fn camera(&self) -> PinholeCamera {
        PinholeCamera::new(self.intrinsics, self.distortion)
    }

    pub fn k_matrix(&self) -> Matrix3<f64> {
        self.intrinsics.k_matrix()
    }
}

/// Sum of squared pixel residuals and point count of one view.
pub(crate) fn view_sq_error(
    camera: &PinholeCamera,
    pose: &Pose,
    obs: &Observation,
) -> Option<(f64, usize)> {
    let mut sum = 0.0;
    for (p, m) in obs.object_points().iter().zip(obs.image_points()) {
        let q = camera.project_board_point(pose, p)?;
        sum += (q - *m).norm_squared();
    }
    Some((sum, obs.len()))
}

/// Overall and per-view RMS of `poses` paired with `observations`.
pub(crate) fn rms_errors(
    camera: &PinholeCamera,
    poses: &[Pose],
    observations: &[Observation],
) -> Option<(f64, Vec<f64>)> {
    if poses.len() != observations.len() {
        return None;
    }
    let mut total = 0.0;
    let mut count = 0usize;
    let mut per_view = Vec::with_capacity(poses.len());
    for (pose, obs) in poses.iter().zip(observations) {
        let (sum, n) = view_sq_error(camera, pose, obs)?;
        per_view.push(if n > 0 { (sum / n as f64).sqrt() } else { 0.0 });
        total += sum;
        count += n;
    }
    if count == 0 {
        return None;
    }
    Some(((total / count as f64).sqrt(), per_view))
}

/// RMS reprojection error of `result` over `observations`.
///
/// `None` if the observation count differs from the number of solved poses
/// or a point projects behind the camera.
pub fn reprojection_rms(result: &CalibrationResult, observations: &[Observation]) -> Option<f64> {
    rms_errors(&result.camera(), &result.poses, observations).map(|(rms, _)| rms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkercal_core::synthetic::{orbit_poses, project_pattern};
    use checkercal_core::CornerSet;
    use nalgebra::Vector2;

    #[test]
    fn rms_counts_points_not_views() {
        let camera = PinholeCamera::new(
            CameraIntrinsics::new(400.0, 400.0, 320.0, 240.0),
            BrownConrady5::default(),
        );
        let pattern = PatternSpec::new(4, 3).unwrap();
        let size = ImageSize::new(640, 480);
        let poses = orbit_poses(&pattern, 2, 10.0);

        // View 0 exact, view 1 shifted by (3, 4) px: per-point error 5.
        let obs: Vec<_> = poses
            .iter()
            .enumerate()
            .map(|(i, pose)| {
                let shift = Vector2::new(3.0, 4.0) * i as f64;
                let pts = project_pattern(&pattern, &camera, pose)
                    .unwrap()
                    .into_iter()
                    .map(|p| p + shift)
                    .collect();
                Observation::new(pattern, CornerSet::new(i as u64, size, pts)).unwrap()
            })
            .collect();

        let (rms, per_view) = rms_errors(&camera, &poses, &obs).unwrap();
        approx::assert_relative_eq!(per_view[0], 0.0, epsilon = 1e-9);
        approx::assert_relative_eq!(per_view[1], 5.0, epsilon = 1e-9);
        approx::assert_relative_eq!(rms, (25.0f64 / 2.0).sqrt(), epsilon = 1e-9);

        let result = CalibrationResult {
            intrinsics: camera.intrinsics,
            distortion: camera.distortion,
            poses: poses.clone(),
            image_size: size,
            pattern,
            rms_error: rms,
            per_view_rms: per_view,
            converged: true,
            evaluations: 0,
        };
        assert!(reprojection_rms(&result, &obs[..1]).is_none());
        assert_eq!(reprojection_rms(&result, &obs), Some(rms));
    }
}
