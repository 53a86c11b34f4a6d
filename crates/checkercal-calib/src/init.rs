//! Closed-form initial estimate: one homography per view, Zhang's intrinsic
//! solve with zero skew, and a pose per view from the homography.

use crate::error::CalibError;
use crate::observation::Observation;
use checkercal_core::{estimate_homography, CameraIntrinsics, Homography, ImageSize, Pose};
use log::{debug, warn};
use nalgebra::{DMatrix, Matrix3, Rotation3, SVector};

/// Conditioning transform mapping pixels to roughly `[-0.5, 0.5]`.
fn pixel_normalization(size: ImageSize) -> (Matrix3<f64>, f64, f64, f64) {
    let s = size.width.max(size.height) as f64;
    let (cx, cy) = (size.width as f64 * 0.5, size.height as f64 * 0.5);
    let n = Matrix3::new(
        1.0 / s, 0.0, -cx / s, //
        0.0, 1.0 / s, -cy / s, //
        0.0, 0.0, 1.0,
    );
    (n, s, cx, cy)
}

/// Zhang's `v_ij` row with the skew term (`B12`) removed:
/// `[b11, b22, b13, b23, b33]`.
fn v_ij(h: &Matrix3<f64>, i: usize, j: usize) -> SVector<f64, 5> {
    let hi = h.column(i);
    let hj = h.column(j);
    SVector::<f64, 5>::from_row_slice(&[
        hi[0] * hj[0],
        hi[1] * hj[1],
        hi[2] * hj[0] + hi[0] * hj[2],
        hi[2] * hj[1] + hi[1] * hj[2],
        hi[2] * hj[2],
    ])
}

/// Intrinsics from plane homographies, or `None` if the views do not
/// constrain the image of the absolute conic.
pub(crate) fn zhang_intrinsics(
    homographies: &[Homography],
    size: ImageSize,
) -> Option<CameraIntrinsics> {
    if homographies.len() < 3 {
        return None;
    }
    let (n, s, cx0, cy0) = pixel_normalization(size);

    let mut v = DMatrix::<f64>::zeros(2 * homographies.len(), 5);
    for (k, h) in homographies.iter().enumerate() {
        let hn = n * h.h;
        v.row_mut(2 * k).copy_from(&v_ij(&hn, 0, 1).transpose());
        v.row_mut(2 * k + 1)
            .copy_from(&(v_ij(&hn, 0, 0) - v_ij(&hn, 1, 1)).transpose());
    }

    let svd = v.svd(false, true);
    let v_t = svd.v_t?;
    let (min_idx, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;

    // A one-dimensional null space is required; fronto-parallel views leave
    // several directions unconstrained.
    let mut sv: Vec<f64> = svd.singular_values.iter().copied().collect();
    sv.sort_by(f64::total_cmp);
    if sv[1] <= 1e-9 * sv[sv.len() - 1] {
        return None;
    }

    let mut b = v_t.row(min_idx).transpose();
    if b[0] < 0.0 {
        b = -b;
    }
    let (b11, b22, b13, b23, b33) = (b[0], b[1], b[2], b[3], b[4]);
    if b11 <= 1e-12 || b22 <= 1e-12 {
        return None;
    }

    let v0 = -b23 / b22;
    let lambda = b33 - (b13 * b13 - v0 * b11 * b23) / b11;
    let alpha2 = lambda / b11;
    let beta2 = lambda / b22;
    if !(alpha2 > 0.0 && beta2 > 0.0) {
        return None;
    }
    let u0 = -b13 * alpha2 / lambda;

    let k = CameraIntrinsics::new(
        s * alpha2.sqrt(),
        s * beta2.sqrt(),
        s * u0 + cx0,
        s * v0 + cy0,
    );
    k.is_valid().then_some(k)
}

/// Single focal length with the principal point at the image centre, from
/// the orthogonality constraints of every view.
pub(crate) fn centered_focal_intrinsics(
    homographies: &[Homography],
    size: ImageSize,
) -> Option<CameraIntrinsics> {
    let (n, s, cx0, cy0) = pixel_normalization(size);
    // Unknown x = 1 / f^2 (normalized units); each view gives two rows a * x = c.
    let (mut aa, mut ac) = (0.0, 0.0);
    for h in homographies {
        let h = n * h.h;
        let rows = [
            (
                h[(0, 0)] * h[(0, 1)] + h[(1, 0)] * h[(1, 1)],
                -h[(2, 0)] * h[(2, 1)],
            ),
            (
                h[(0, 0)].powi(2) + h[(1, 0)].powi(2) - h[(0, 1)].powi(2) - h[(1, 1)].powi(2),
                h[(2, 1)].powi(2) - h[(2, 0)].powi(2),
            ),
        ];
        for (a, c) in rows {
            aa += a * a;
            ac += a * c;
        }
    }
    if aa <= f64::EPSILON {
        return None;
    }
    let x = ac / aa;
    if !(x > 0.0) {
        return None;
    }
    let f = s / x.sqrt();
    let k = CameraIntrinsics::new(f, f, cx0, cy0);
    k.is_valid().then_some(k)
}

/// Board pose from `H ~ K [r1 r2 t]`, with the rotation projected onto SO(3).
pub(crate) fn pose_from_homography(k: &CameraIntrinsics, h: &Homography) -> Option<Pose> {
    let k_inv = k.k_matrix().try_inverse()?;
    let m = k_inv * h.h;
    let (c1, c2, c3) = (
        m.column(0).into_owned(),
        m.column(1).into_owned(),
        m.column(2).into_owned(),
    );

    let denom = (c1.norm() + c2.norm()) * 0.5;
    if denom <= 1e-12 {
        return None;
    }
    let lambda = 1.0 / denom;
    let (mut r1, mut r2, mut t) = (c1 * lambda, c2 * lambda, c3 * lambda);
    if t.z < 0.0 {
        r1 = -r1;
        r2 = -r2;
        t = -t;
    }
    let r3 = r1.cross(&r2);
    if r3.norm() <= 1e-12 {
        return None;
    }

    let r = Matrix3::from_columns(&[r1, r2, r3]);
    let svd = r.svd(true, true);
    let (u, v_t) = (svd.u?, svd.v_t?);
    let mut r_orth = u * v_t;
    if r_orth.determinant() < 0.0 {
        let mut u_flipped = u;
        u_flipped.column_mut(2).neg_mut();
        r_orth = u_flipped * v_t;
    }
    Some(Pose::new(Rotation3::from_matrix_unchecked(r_orth), t))
}

/// Linear estimate of intrinsics and per-view poses, ignoring distortion.
pub(crate) fn initial_estimate(
    observations: &[Observation],
    size: ImageSize,
) -> Result<(CameraIntrinsics, Vec<Pose>), CalibError> {
    let homographies = observations
        .iter()
        .enumerate()
        .map(|(i, obs)| {
            estimate_homography(&obs.pattern().plane_points(), obs.image_points())
                .ok_or_else(|| CalibError::degenerate(format!("no homography for view {i}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let intrinsics = match zhang_intrinsics(&homographies, size) {
        Some(k) => k,
        None => {
            warn!("closed-form intrinsics degenerate; assuming a centred principal point");
            centered_focal_intrinsics(&homographies, size).ok_or_else(|| {
                CalibError::degenerate("views do not constrain the focal length")
            })?
        }
    };
    debug!(
        "initial intrinsics fx={:.2} fy={:.2} cx={:.2} cy={:.2}",
        intrinsics.fx, intrinsics.fy, intrinsics.cx, intrinsics.cy
    );

    let poses = homographies
        .iter()
        .enumerate()
        .map(|(i, h)| {
            pose_from_homography(&intrinsics, h)
                .ok_or_else(|| CalibError::degenerate(format!("no pose for view {i}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok((intrinsics, poses))
}
