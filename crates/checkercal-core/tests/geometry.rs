use approx::assert_relative_eq;
use checkercal_core::synthetic::{orbit_poses, project_pattern};
use checkercal_core::{
    estimate_homography, BrownConrady5, CameraIntrinsics, ImageSize, PatternSpec, PinholeCamera,
};
use nalgebra::Point2;

fn camera(distortion: BrownConrady5) -> PinholeCamera {
    PinholeCamera::new(CameraIntrinsics::new(520.0, 515.0, 321.0, 238.0), distortion)
}

#[test]
fn pattern_grid_sizes_hold_for_many_specs() {
    for cols in 2..12u32 {
        for rows in 2..9u32 {
            let spec = PatternSpec::new(cols, rows).expect("valid spec");
            let pts = spec.object_points();
            assert_eq!(pts.len(), (cols * rows) as usize);
            assert!(pts.iter().all(|p| p.z == 0.0));
            assert_eq!(pts[1].x - pts[0].x, 1.0);
            assert_eq!(pts[cols as usize].y, 1.0);
        }
    }
}

#[test]
fn homography_maps_plane_to_undistorted_projection() {
    let spec = PatternSpec::new(9, 6).unwrap();
    let cam = camera(BrownConrady5::default());
    let plane = spec.plane_points();

    for pose in orbit_poses(&spec, 5, 14.0) {
        let img = project_pattern(&spec, &cam, &pose).expect("board in front of camera");
        let h = estimate_homography(&plane, &img).expect("homography");
        for (p, q) in plane.iter().zip(&img) {
            let r = h.apply(*p);
            assert_relative_eq!(r.x, q.x, epsilon = 1e-6);
            assert_relative_eq!(r.y, q.y, epsilon = 1e-6);
        }
    }
}

#[test]
fn unproject_inverts_distorted_projection() {
    let cam = camera(BrownConrady5 {
        k1: -0.18,
        k2: 0.04,
        p1: 0.0008,
        p2: -0.0004,
        k3: 0.0,
    });
    let size = ImageSize::new(640, 480);
    for v in (0..size.height).step_by(60) {
        for u in (0..size.width).step_by(80) {
            let px = Point2::new(u as f64, v as f64);
            let n = cam.unproject_normalized(px);
            let back = cam
                .intrinsics
                .normalized_to_pixel(cam.distortion.distort(n));
            assert_relative_eq!(back.x, px.x, epsilon = 1e-4);
            assert_relative_eq!(back.y, px.y, epsilon = 1e-4);
        }
    }
}
