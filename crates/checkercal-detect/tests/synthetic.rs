use checkercal_core::synthetic::{board_pose, orbit_poses, project_pattern, render_checkerboard};
use checkercal_core::{
    BrownConrady5, CameraIntrinsics, Frame, ImageSize, PatternSpec, PinholeCamera, PixelLayout,
    Pose,
};
use checkercal_detect::{draw_corners, ChessboardDetector, DetectorParams};
use nalgebra::{Point2, Vector3};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn small_camera() -> PinholeCamera {
    PinholeCamera::new(
        CameraIntrinsics::new(400.0, 400.0, 159.5, 119.5),
        BrownConrady5::default(),
    )
}

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

fn max_error(got: &[Point2<f64>], truth: &[Point2<f64>]) -> f64 {
    assert_eq!(got.len(), truth.len());
    got.iter()
        .zip(truth)
        .map(|(a, b)| (a - b).norm())
        .fold(0.0, f64::max)
}

fn render(pattern: &PatternSpec, camera: &PinholeCamera, pose: &Pose, size: ImageSize) -> Frame {
    render_checkerboard(pattern, camera, pose, size, 4, 0).expect("render")
}

#[test]
fn frontal_board_matches_projection() {
    init();
    let pattern = PatternSpec::new(7, 5).unwrap();
    let camera = small_camera();
    let pose = board_pose(&pattern, [0.0; 3], Vector3::new(0.0, 0.0, 20.0));
    let frame = render(&pattern, &camera, &pose, ImageSize::new(320, 240));
    let truth = project_pattern(&pattern, &camera, &pose).unwrap();

    let corners = ChessboardDetector::default()
        .detect(&frame, &pattern)
        .expect("board should be found");
    assert_eq!(corners.frame_seq, frame.seq());
    assert_eq!(corners.image_size, frame.size());
    assert!(max_error(&corners.points, &truth) < 0.5);
}

#[test]
fn rotated_boards_keep_pattern_order() {
    init();
    let pattern = PatternSpec::new(7, 5).unwrap();
    let camera = small_camera();
    let detector = ChessboardDetector::default();
    for euler in [[0.0, 0.0, 1.2], [0.3, -0.2, -0.9]] {
        let pose = board_pose(&pattern, euler, Vector3::new(0.0, 0.0, 20.0));
        let frame = render(&pattern, &camera, &pose, ImageSize::new(320, 240));
        let truth = project_pattern(&pattern, &camera, &pose).unwrap();
        let corners = detector.detect(&frame, &pattern).expect("board found");
        let err = max_error(&corners.points, &truth);
        assert!(err < 0.5, "euler {:?}: max error {:.3}px", euler, err);
    }
}

#[test]
fn tilted_views_through_a_distorting_lens() {
    init();
    let pattern = PatternSpec::new(9, 6).unwrap();
    let camera = lens_camera();
    let size = ImageSize::new(640, 480);
    let detector = ChessboardDetector::new(DetectorParams::default());

    for (k, pose) in orbit_poses(&pattern, 4, 12.0).iter().enumerate() {
        let frame = render(&pattern, &camera, pose, size);
        let truth = project_pattern(&pattern, &camera, pose).unwrap();
        let corners = detector
            .detect(&frame, &pattern)
            .unwrap_or_else(|| panic!("view {k}: board not found"));
        let err = max_error(&corners.points, &truth);
        assert!(err < 0.5, "view {k}: max error {err:.3}px");
    }
}

#[test]
fn colour_frames_are_converted_first() {
    let pattern = PatternSpec::new(7, 5).unwrap();
    let camera = small_camera();
    let pose = board_pose(&pattern, [0.1, 0.0, 0.2], Vector3::new(0.0, 0.0, 20.0));
    let gray = render(&pattern, &camera, &pose, ImageSize::new(320, 240));
    let rgb = gray.to_rgb();
    assert_eq!(rgb.layout(), PixelLayout::Rgb8);

    let detector = ChessboardDetector::default();
    assert_eq!(
        detector.detect(&gray, &pattern),
        detector.detect(&rgb, &pattern)
    );
}

#[test]
fn blank_and_gradient_images_are_misses() {
    let pattern = PatternSpec::new(9, 6).unwrap();
    let size = ImageSize::new(320, 240);
    let detector = ChessboardDetector::default();

    let blank = Frame::filled(0, size, PixelLayout::Gray8, 128).unwrap();
    assert!(detector.detect(&blank, &pattern).is_none());

    let ramp: Vec<u8> = (0..size.area())
        .map(|i| ((i % 320) * 255 / 319) as u8)
        .collect();
    let ramp = Frame::new(1, 320, 240, PixelLayout::Gray8, ramp).unwrap();
    assert!(detector.detect(&ramp, &pattern).is_none());
}

#[test]
fn wrong_pattern_size_is_a_miss_and_transposed_spec_is_found() {
    let pattern = PatternSpec::new(7, 5).unwrap();
    let camera = small_camera();
    let pose = board_pose(&pattern, [0.0; 3], Vector3::new(0.0, 0.0, 20.0));
    let frame = render(&pattern, &camera, &pose, ImageSize::new(320, 240));
    let detector = ChessboardDetector::default();

    assert!(detector
        .detect(&frame, &PatternSpec::new(6, 5).unwrap())
        .is_none());
    let transposed = detector
        .detect(&frame, &PatternSpec::new(5, 7).unwrap())
        .expect("same board read the other way");
    assert_eq!(transposed.len(), 35);
}

#[test]
fn overlay_uses_a_copy() {
    let pattern = PatternSpec::new(7, 5).unwrap();
    let camera = small_camera();
    let pose = board_pose(&pattern, [0.0; 3], Vector3::new(0.0, 0.0, 20.0));
    let frame = render(&pattern, &camera, &pose, ImageSize::new(320, 240));
    let before = frame.clone();
    let corners = ChessboardDetector::default()
        .detect(&frame, &pattern)
        .unwrap();
    let drawn = draw_corners(&frame, &pattern, &corners);
    assert_eq!(frame, before);
    assert_eq!(drawn.layout(), PixelLayout::Rgb8);
    assert_ne!(drawn, frame.to_rgb());
}
