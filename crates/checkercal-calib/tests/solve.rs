use approx::assert_relative_eq;
use checkercal_calib::{
    reprojection_rms, CalibError, CalibrationSolver, InsufficientReason, Observation,
    SolverParams,
};
use checkercal_core::synthetic::{board_pose, orbit_poses, pattern_in_view, project_pattern};
use checkercal_core::{
    BrownConrady5, CameraIntrinsics, CornerSet, ImageSize, PatternSpec, PinholeCamera,
};
use nalgebra::Vector3;

const SIZE: ImageSize = ImageSize::new(640, 480);

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn lens_camera() -> PinholeCamera {
    PinholeCamera::new(
        CameraIntrinsics::new(420.0, 415.0, 322.0, 236.5),
        BrownConrady5 {
            k1: -0.12,
            k2: 0.03,
            p1: 0.0005,
            p2: -0.0003,
            k3: 0.0,
        },
    )
}

fn synthetic_views(camera: &PinholeCamera, pattern: PatternSpec, n: usize) -> Vec<Observation> {
    orbit_poses(&pattern, n, 12.0)
        .iter()
        .enumerate()
        .map(|(i, pose)| {
            let pts = project_pattern(&pattern, camera, pose).expect("board in front");
            assert!(pattern_in_view(&pts, SIZE, 2.0), "view {i} leaves the image");
            Observation::new(pattern, CornerSet::new(i as u64, SIZE, pts)).unwrap()
        })
        .collect()
}

#[test]
fn recovers_known_camera_from_exact_views() {
    init();
    let truth = lens_camera();
    let pattern = PatternSpec::new(9, 6).unwrap();
    let views = synthetic_views(&truth, pattern, 12);

    let result = CalibrationSolver::default().solve(&views, SIZE).unwrap();

    let k = &result.intrinsics;
    assert_relative_eq!(k.fx, truth.intrinsics.fx, max_relative = 0.01);
    assert_relative_eq!(k.fy, truth.intrinsics.fy, max_relative = 0.01);
    assert_relative_eq!(k.cx, truth.intrinsics.cx, max_relative = 0.01);
    assert_relative_eq!(k.cy, truth.intrinsics.cy, max_relative = 0.01);
    let d = &result.distortion;
    assert_relative_eq!(d.k1, truth.distortion.k1, max_relative = 0.01);
    assert_relative_eq!(d.k2, truth.distortion.k2, max_relative = 0.01);
    assert_relative_eq!(d.p1, truth.distortion.p1, max_relative = 0.01);
    assert_relative_eq!(d.p2, truth.distortion.p2, max_relative = 0.01);
    // The true k3 is zero, so only an absolute bound applies.
    assert!(d.k3.abs() < 1e-3, "k3 {}", d.k3);
    assert!(result.converged);

    assert!(result.rms_error < 1e-4, "rms {}", result.rms_error);
    assert_eq!(result.poses.len(), views.len());
    assert_eq!(result.per_view_rms.len(), views.len());
    assert_eq!(result.image_size, SIZE);
    assert_eq!(result.pattern, pattern);
    assert!(result.evaluations > 0);

    let rms = reprojection_rms(&result, &views).unwrap();
    assert_relative_eq!(rms, result.rms_error, epsilon = 1e-12);
}

#[test]
fn masked_coefficients_stay_zero() {
    init();
    let truth = PinholeCamera::new(
        CameraIntrinsics::new(430.0, 430.0, 318.0, 242.0),
        BrownConrady5 {
            k1: -0.08,
            ..BrownConrady5::default()
        },
    );
    let pattern = PatternSpec::new(7, 5).unwrap();
    let views = synthetic_views(&truth, pattern, 10);
    let solver = CalibrationSolver::new(SolverParams {
        fix_k3: true,
        fix_tangential: true,
        ..SolverParams::default()
    });
    let result = solver.solve(&views, SIZE).unwrap();
    assert_eq!(result.distortion.k3, 0.0);
    assert_eq!(result.distortion.p1, 0.0);
    assert_eq!(result.distortion.p2, 0.0);
    assert_relative_eq!(result.distortion.k1, -0.08, epsilon = 1e-3);
    assert!(result.converged);
}

#[test]
fn solving_is_deterministic() {
    let pattern = PatternSpec::new(9, 6).unwrap();
    let views = synthetic_views(&lens_camera(), pattern, 5);
    let solver = CalibrationSolver::default();
    assert_eq!(solver.solve(&views, SIZE), solver.solve(&views, SIZE));
}

#[test]
fn fewer_than_three_views_is_insufficient() {
    let pattern = PatternSpec::new(9, 6).unwrap();
    let views = synthetic_views(&lens_camera(), pattern, 2);
    let solver = CalibrationSolver::default();

    assert_eq!(
        solver.solve(&views, SIZE),
        Err(CalibError::InsufficientData(InsufficientReason::TooFewViews {
            got: 2,
            required: 3
        }))
    );
    assert!(matches!(
        solver.solve(&[], SIZE),
        Err(CalibError::InsufficientData(InsufficientReason::TooFewViews { got: 0, .. }))
    ));
}

#[test]
fn image_size_must_be_present_and_match() {
    let pattern = PatternSpec::new(9, 6).unwrap();
    let views = synthetic_views(&lens_camera(), pattern, 4);
    let solver = CalibrationSolver::default();

    assert_eq!(
        solver.solve(&views, ImageSize::new(0, 480)),
        Err(CalibError::InsufficientData(InsufficientReason::EmptyImageSize))
    );
    assert_eq!(
        solver.solve(&views, ImageSize::new(1280, 960)),
        Err(CalibError::InsufficientData(InsufficientReason::ImageSizeMismatch))
    );
}

#[test]
fn fronto_parallel_views_are_degenerate() {
    let camera = PinholeCamera::new(
        CameraIntrinsics::new(420.0, 420.0, 320.0, 240.0),
        BrownConrady5::default(),
    );
    let pattern = PatternSpec::new(9, 6).unwrap();
    let views: Vec<_> = [10.0, 12.0, 14.0]
        .iter()
        .enumerate()
        .map(|(i, &z)| {
            let pose = board_pose(&pattern, [0.0; 3], Vector3::new(0.0, 0.0, z));
            let pts = project_pattern(&pattern, &camera, &pose).unwrap();
            Observation::new(pattern, CornerSet::new(i as u64, SIZE, pts)).unwrap()
        })
        .collect();
    let err = CalibrationSolver::default().solve(&views, SIZE).unwrap_err();
    assert!(matches!(
        err,
        CalibError::InsufficientData(InsufficientReason::DegenerateViews(_))
    ));
}
