use nalgebra::{Matrix3, Point2, Point3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

/// Pinhole intrinsics with zero skew.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    /// Focal length in pixels along X.
    pub fx: f64,
    /// Focal length in pixels along Y.
    pub fy: f64,
    /// Principal point X coordinate in pixels.
    pub cx: f64,
    /// Principal point Y coordinate in pixels.
    pub cy: f64,
}

impl CameraIntrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// The 3x3 matrix `K`.
    pub fn k_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, 0.0, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    /// Read `fx, fy, cx, cy` from a `K` matrix; the skew entry is ignored.
    pub fn from_k_matrix(k: &Matrix3<f64>) -> Self {
        Self {
            fx: k[(0, 0)],
            fy: k[(1, 1)],
            cx: k[(0, 2)],
            cy: k[(1, 2)],
        }
    }

    pub fn is_valid(&self) -> bool {
        self.fx.is_finite()
            && self.fy.is_finite()
            && self.cx.is_finite()
            && self.cy.is_finite()
            && self.fx > 0.0
            && self.fy > 0.0
    }

    #[inline]
    pub fn pixel_to_normalized(&self, p: Point2<f64>) -> Point2<f64> {
        Point2::new((p.x - self.cx) / self.fx, (p.y - self.cy) / self.fy)
    }

    #[inline]
    pub fn normalized_to_pixel(&self, n: Point2<f64>) -> Point2<f64> {
        Point2::new(self.fx * n.x + self.cx, self.fy * n.y + self.cy)
    }
}

/// Radial (k1, k2, k3) + tangential (p1, p2) lens distortion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BrownConrady5 {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

impl BrownConrady5 {
    /// Fixed-point steps used by [`Self::undistort`].
    pub const UNDISTORT_ITERS: usize = 20;

    /// Build from the conventional `[k1, k2, p1, p2, k3]` ordering.
    pub fn from_coeffs(c: [f64; 5]) -> Self {
        Self {
            k1: c[0],
            k2: c[1],
            p1: c[2],
            p2: c[3],
            k3: c[4],
        }
    }

    /// Coefficients in `[k1, k2, p1, p2, k3]` order, as OpenCV stores them.
    pub fn to_opencv_array(&self) -> [f64; 5] {
        [self.k1, self.k2, self.p1, self.p2, self.k3]
    }

    pub fn is_zero(&self) -> bool {
        self.to_opencv_array().iter().all(|c| *c == 0.0)
    }

    /// Map an ideal normalized point to its distorted normalized position.
    #[inline]
    pub fn distort(&self, n: Point2<f64>) -> Point2<f64> {
        let (x, y) = (n.x, n.y);
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let radial = 1.0 + self.k1 * r2 + self.k2 * r4 + self.k3 * r6;
        let xy = x * y;
        let dx = 2.0 * self.p1 * xy + self.p2 * (r2 + 2.0 * x * x);
        let dy = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * xy;
        Point2::new(x * radial + dx, y * radial + dy)
    }

    /// Invert [`Self::distort`] by fixed-point iteration.
    ///
    /// Converges for the moderate distortion typical of calibrated lenses;
    /// for extreme coefficients the result after the iteration budget is
    /// returned as is.
    pub fn undistort(&self, d: Point2<f64>) -> Point2<f64> {
        if self.is_zero() {
            return d;
        }
        let (x0, y0) = (d.x, d.y);
        let (mut x, mut y) = (x0, y0);
        for _ in 0..Self::UNDISTORT_ITERS {
            let r2 = x * x + y * y;
            let r4 = r2 * r2;
            let r6 = r4 * r2;
            let radial = 1.0 + self.k1 * r2 + self.k2 * r4 + self.k3 * r6;
            if radial.abs() < 1e-12 {
                break;
            }
            let xy = x * y;
            let dx = 2.0 * self.p1 * xy + self.p2 * (r2 + 2.0 * x * x);
            let dy = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * xy;
            x = (x0 - dx) / radial;
            y = (y0 - dy) / radial;
        }
        Point2::new(x, y)
    }
}

/// Rigid transform taking pattern (board) coordinates into the camera frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub rotation: Rotation3<f64>,
    pub translation: Vector3<f64>,
}

impl Pose {
    pub fn new(rotation: Rotation3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    pub fn identity() -> Self {
        Self::new(Rotation3::identity(), Vector3::zeros())
    }

    /// Build from a Rodrigues (axis * angle) vector and a translation.
    pub fn from_rvec_tvec(rvec: Vector3<f64>, tvec: Vector3<f64>) -> Self {
        Self::new(Rotation3::new(rvec), tvec)
    }

    /// Rodrigues vector of the rotation.
    pub fn rvec(&self) -> Vector3<f64> {
        self.rotation.scaled_axis()
    }

    #[inline]
    pub fn transform_point(&self, p: &Point3<f64>) -> Point3<f64> {
        self.rotation * p + self.translation
    }
}

/// Intrinsics plus distortion: everything needed to project a camera-frame point.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PinholeCamera {
    pub intrinsics: CameraIntrinsics,
    pub distortion: BrownConrady5,
}

impl PinholeCamera {
    pub fn new(intrinsics: CameraIntrinsics, distortion: BrownConrady5) -> Self {
        Self {
            intrinsics,
            distortion,
        }
    }

    /// Project a camera-frame point. `None` when the point is not in front of
    /// the camera.
    #[inline]
    pub fn project(&self, p_cam: &Point3<f64>) -> Option<Point2<f64>> {
        if p_cam.z <= 1e-12 {
            return None;
        }
        let n = Point2::new(p_cam.x / p_cam.z, p_cam.y / p_cam.z);
        let d = self.distortion.distort(n);
        Some(self.intrinsics.normalized_to_pixel(d))
    }

    /// Project a pattern point seen under `pose`.
    #[inline]
    pub fn project_board_point(&self, pose: &Pose, p_board: &Point3<f64>) -> Option<Point2<f64>> {
        self.project(&pose.transform_point(p_board))
    }

    /// Ideal (undistorted) normalized coordinates of a distorted pixel.
    pub fn unproject_normalized(&self, pixel: Point2<f64>) -> Point2<f64> {
        let d = self.intrinsics.pixel_to_normalized(pixel);
        self.distortion.undistort(d)
    }
}

/// Project a pattern point seen under `pose` through `intrinsics` and
/// `distortion`. `None` for points at or behind the camera plane.
pub fn project_point(
    intrinsics: &CameraIntrinsics,
    distortion: &BrownConrady5,
    pose: &Pose,
    p_board: &Point3<f64>,
) -> Option<Point2<f64>> {
    PinholeCamera::new(*intrinsics, *distortion).project_board_point(pose, p_board)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn lens() -> BrownConrady5 {
        BrownConrady5 {
            k1: -0.21,
            k2: 0.05,
            p1: 0.001,
            p2: -0.0015,
            k3: -0.003,
        }
    }

    #[test]
    fn undistort_inverts_distort() {
        let dist = lens();
        for &(x, y) in &[(0.0, 0.0), (0.3, -0.2), (-0.45, 0.35), (0.1, 0.5)] {
            let n = Point2::new(x, y);
            let back = dist.undistort(dist.distort(n));
            assert_relative_eq!(back.x, x, epsilon = 1e-7);
            assert_relative_eq!(back.y, y, epsilon = 1e-7);
        }
    }

    #[test]
    fn coeff_order_is_k1_k2_p1_p2_k3() {
        let d = lens();
        assert_eq!(d.to_opencv_array(), [-0.21, 0.05, 0.001, -0.0015, -0.003]);
        assert_eq!(BrownConrady5::from_coeffs(d.to_opencv_array()), d);
    }

    #[test]
    fn projection_rejects_points_behind_camera() {
        let cam = PinholeCamera::new(
            CameraIntrinsics::new(500.0, 500.0, 320.0, 240.0),
            BrownConrady5::default(),
        );
        assert!(cam.project(&Point3::new(0.0, 0.0, -1.0)).is_none());
        let p = cam.project(&Point3::new(1.0, -0.5, 5.0)).unwrap();
        assert_relative_eq!(p.x, 420.0);
        assert_relative_eq!(p.y, 190.0);

        let pose = Pose::from_rvec_tvec(Vector3::zeros(), Vector3::new(0.0, 0.0, 5.0));
        let q = project_point(&cam.intrinsics, &cam.distortion, &pose, &Point3::new(1.0, -0.5, 0.0));
        assert_eq!(q, Some(p));
    }

    #[test]
    fn rvec_round_trips_through_pose() {
        let rvec = Vector3::new(0.2, -0.4, 0.1);
        let pose = Pose::from_rvec_tvec(rvec, Vector3::new(1.0, 2.0, 3.0));
        assert_relative_eq!(pose.rvec(), rvec, epsilon = 1e-12);
    }
}
