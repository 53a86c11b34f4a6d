use checkercal_calib::{
    CalibrationSolver, Observation, RectifyError, RectifyParams, Rectifier, UndistortMap,
};
use checkercal_core::synthetic::{orbit_poses, project_pattern, render_checkerboard};
use checkercal_core::{
    BrownConrady5, CameraIntrinsics, CornerSet, Frame, ImageSize, PatternSpec, PinholeCamera,
    PixelLayout,
};
use std::sync::Arc;

const SIZE: ImageSize = ImageSize::new(640, 480);

fn lens_camera() -> PinholeCamera {
    PinholeCamera::new(
        CameraIntrinsics::new(420.0, 420.0, 319.5, 239.5),
        BrownConrady5 {
            k1: -0.12,
            k2: 0.03,
            p1: 0.0005,
            p2: -0.0003,
            k3: 0.0,
        },
    )
}

fn solved(pattern: PatternSpec) -> Arc<checkercal_calib::CalibrationResult> {
    let camera = lens_camera();
    let views: Vec<_> = orbit_poses(&pattern, 10, 12.0)
        .iter()
        .enumerate()
        .map(|(i, pose)| {
            let pts = project_pattern(&pattern, &camera, pose).unwrap();
            Observation::new(pattern, CornerSet::new(i as u64, SIZE, pts)).unwrap()
        })
        .collect();
    Arc::new(CalibrationSolver::default().solve(&views, SIZE).unwrap())
}

#[test]
fn rectified_frame_matches_an_ideal_lens() {
    let _ = env_logger::builder().is_test(true).try_init();
    let pattern = PatternSpec::new(9, 6).unwrap();
    let result = solved(pattern);
    let pose = orbit_poses(&pattern, 3, 12.0)[2];

    let distorted = render_checkerboard(&pattern, &lens_camera(), &pose, SIZE, 4, 5).unwrap();
    let mut rectifier = Rectifier::new(RectifyParams::default());
    let rectified = rectifier.rectify(&distorted, &result).unwrap();
    assert_eq!(rectified.seq(), 5);
    assert_eq!(rectified.size(), SIZE);

    let map = UndistortMap::new(&result, &RectifyParams::default());
    let ideal_camera = PinholeCamera::new(map.new_intrinsics(), BrownConrady5::default());
    let ideal = render_checkerboard(&pattern, &ideal_camera, &pose, SIZE, 4, 5).unwrap();

    let roi = map.roi();
    assert!(roi.width > 600 && roi.height > 440, "roi {roi:?}");
    let mut total = 0.0;
    let mut n = 0usize;
    for y in roi.y + 2..roi.y + roi.height - 2 {
        for x in roi.x + 2..roi.x + roi.width - 2 {
            let a = rectified.pixel(x, y)[0] as f64;
            let b = ideal.pixel(x, y)[0] as f64;
            total += (a - b).abs();
            n += 1;
        }
    }
    let mean = total / n as f64;
    assert!(mean < 4.0, "mean abs difference {mean:.2}");
}

#[test]
fn size_mismatch_is_rejected_without_writing() {
    let pattern = PatternSpec::new(9, 6).unwrap();
    let result = solved(pattern);
    let small = Frame::filled(0, ImageSize::new(320, 240), PixelLayout::Gray8, 200).unwrap();
    let mut rectifier = Rectifier::default();

    assert_eq!(
        rectifier.rectify(&small, &result),
        Err(RectifyError::SizeMismatch {
            expected: SIZE,
            got: ImageSize::new(320, 240)
        })
    );

    let mut out = Frame::filled(0, ImageSize::new(320, 240), PixelLayout::Gray8, 17).unwrap();
    assert!(matches!(
        rectifier.rectify_into(&small, &result, &mut out),
        Err(RectifyError::SizeMismatch { .. })
    ));
    assert!(out.data().iter().all(|&v| v == 17));

    let full = Frame::filled(0, SIZE, PixelLayout::Gray8, 200).unwrap();
    assert!(matches!(
        rectifier.rectify_into(&full, &result, &mut out),
        Err(RectifyError::SizeMismatch { .. })
    ));
    assert!(out.data().iter().all(|&v| v == 17));
}

#[test]
fn full_field_of_view_leaves_black_borders() {
    let pattern = PatternSpec::new(9, 6).unwrap();
    let result = solved(pattern);
    let bright = Frame::filled(0, SIZE, PixelLayout::Rgb8, 250).unwrap();
    let mut rectifier = Rectifier::new(RectifyParams { alpha: 1.0 });
    let out = rectifier.rectify(&bright, &result).unwrap();
    // Barrel distortion pulls the edge midpoints inwards once undistorted.
    assert_eq!(out.pixel(320, 0), &[0, 0, 0]);
    assert_eq!(out.pixel(0, 240), &[0, 0, 0]);
    assert_eq!(out.pixel(320, 240), &[250, 250, 250]);
}
