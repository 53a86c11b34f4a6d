use nalgebra::{DMatrix, Matrix3, Point2, Vector3};

/// Projective map from the pattern plane to the image: `p_img ~ H * p_plane`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Homography {
    pub h: Matrix3<f64>,
}

impl Homography {
    pub fn new(h: Matrix3<f64>) -> Self {
        Self { h }
    }

    #[inline]
    pub fn apply(&self, p: Point2<f64>) -> Point2<f64> {
        let v = self.h * Vector3::new(p.x, p.y, 1.0);
        Point2::new(v.x / v.z, v.y / v.z)
    }
}

/// Similarity that moves the centroid to the origin and the mean distance
/// from it to `sqrt(2)`.
fn conditioning(pts: &[Point2<f64>]) -> Matrix3<f64> {
    let n = pts.len() as f64;
    let c = pts.iter().fold(Vector3::zeros(), |acc, p| acc + Vector3::new(p.x, p.y, 0.0)) / n;
    let spread = pts
        .iter()
        .map(|p| (p.x - c.x).hypot(p.y - c.y))
        .sum::<f64>()
        / n;
    let s = if spread > 1e-12 {
        std::f64::consts::SQRT_2 / spread
    } else {
        1.0
    };
    Matrix3::new(s, 0.0, -s * c.x, 0.0, s, -s * c.y, 0.0, 0.0, 1.0)
}

fn transform(t: &Matrix3<f64>, p: &Point2<f64>) -> Point2<f64> {
    let v = t * Vector3::new(p.x, p.y, 1.0);
    Point2::new(v.x, v.y)
}

/// Estimate `H` such that `img ~ H * plane` with the normalized DLT.
///
/// Needs at least four correspondences in general position. Returns `None`
/// on mismatched inputs or when the system has no usable null vector.
pub fn estimate_homography(plane_pts: &[Point2<f64>], img_pts: &[Point2<f64>]) -> Option<Homography> {
    let n = plane_pts.len();
    if n != img_pts.len() || n < 4 {
        return None;
    }

    let t_plane = conditioning(plane_pts);
    let t_img = conditioning(img_pts);

    // Two rows per correspondence; padded with zeros to at least 9 rows so
    // the thin SVD still exposes the null space for n = 4.
    let mut a = DMatrix::<f64>::zeros((2 * n).max(9), 9);
    for (k, (p, q)) in plane_pts.iter().zip(img_pts).enumerate() {
        let p = transform(&t_plane, p);
        let q = transform(&t_img, q);
        let row = [p.x, p.y, 1.0];
        for j in 0..3 {
            a[(2 * k, j)] = row[j];
            a[(2 * k, 6 + j)] = -q.x * row[j];
            a[(2 * k + 1, 3 + j)] = row[j];
            a[(2 * k + 1, 6 + j)] = -q.y * row[j];
        }
    }

    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let smallest = svd.singular_values.imin();
    let hn = Matrix3::from_fn(|r, c| v_t[(smallest, 3 * r + c)]);

    let h = t_img.try_inverse()? * hn * t_plane;
    let scale = h[(2, 2)];
    if !scale.is_finite() || scale.abs() < 1e-12 {
        return None;
    }
    Some(Homography::new(h / scale))
}
