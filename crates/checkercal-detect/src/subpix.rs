//! Sub-pixel corner refinement.
//!
//! At a saddle point `q` every image gradient `g(p)` in the neighbourhood is
//! orthogonal to `p - q`. Each iteration solves the weighted least-squares
//! system `sum(w g g^T) q = sum(w g g^T p)` over the window and moves the
//! estimate to its solution.

use crate::params::SubPixParams;
use checkercal_core::{sample_bilinear, GrayImageView};
use nalgebra::{Matrix2, Point2, Vector2};

fn gradient(img: &GrayImageView<'_>, x: f64, y: f64) -> Vector2<f64> {
    let (x, y) = (x as f32, y as f32);
    let gx = sample_bilinear(img, x + 1.0, y) - sample_bilinear(img, x - 1.0, y);
    let gy = sample_bilinear(img, x, y + 1.0) - sample_bilinear(img, x, y - 1.0);
    Vector2::new(gx as f64 * 0.5, gy as f64 * 0.5)
}

/// Refine one corner. Returns `start` unchanged when the estimate leaves the
/// search window or the normal equations degenerate.
pub(crate) fn refine_corner(
    img: &GrayImageView<'_>,
    start: Point2<f64>,
    params: &SubPixParams,
) -> Point2<f64> {
    let half = params.half_window as i64;
    let win = params.half_window as f64;
    let inv_w2 = if win > 0.0 { 1.0 / (win * win) } else { 1.0 };
    let eps2 = params.epsilon * params.epsilon;
    let (w, h) = (img.width as f64, img.height as f64);

    let mut q = start;
    for _ in 0..params.max_iterations {
        let mut a = Matrix2::<f64>::zeros();
        let mut b = Vector2::<f64>::zeros();
        for dy in -half..=half {
            for dx in -half..=half {
                let (fx, fy) = (dx as f64, dy as f64);
                let weight = (-(fx * fx + fy * fy) * inv_w2).exp();
                let g = gradient(img, q.x + fx, q.y + fy);
                let ggt = g * g.transpose() * weight;
                a += ggt;
                b += ggt * Vector2::new(fx, fy);
            }
        }

        let Some(a_inv) = a.try_inverse() else {
            break;
        };
        let delta = a_inv * b;
        q += delta;
        if q.x < 0.0 || q.y < 0.0 || q.x >= w || q.y >= h {
            break;
        }
        if delta.norm_squared() <= eps2 {
            break;
        }
    }

    if !q.x.is_finite()
        || !q.y.is_finite()
        || (q.x - start.x).abs() > win
        || (q.y - start.y).abs() > win
    {
        return start;
    }
    q
}

pub(crate) fn refine_corners(
    img: &GrayImageView<'_>,
    corners: &mut [Point2<f64>],
    params: &SubPixParams,
) {
    for c in corners.iter_mut() {
        *c = refine_corner(img, *c, params);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkercal_core::GrayImage;

    /// Anti-aliased axis-aligned X-junction at (`cx`, `cy`).
    fn saddle(w: usize, h: usize, cx: f64, cy: f64) -> GrayImage {
        let ss = 8;
        let mut data = vec![0u8; w * h];
        for y in 0..h {
            for x in 0..w {
                let mut acc = 0.0;
                for sy in 0..ss {
                    for sx in 0..ss {
                        let px = x as f64 + (sx as f64 + 0.5) / ss as f64 - 0.5;
                        let py = y as f64 + (sy as f64 + 0.5) / ss as f64 - 0.5;
                        let dark = (px < cx) == (py < cy);
                        acc += if dark { 20.0 } else { 230.0 };
                    }
                }
                data[y * w + x] = (acc / (ss * ss) as f64).round() as u8;
            }
        }
        GrayImage {
            width: w,
            height: h,
            data,
        }
    }

    #[test]
    fn converges_to_true_saddle() {
        let img = saddle(31, 31, 15.37, 14.72);
        let got = refine_corner(
            &img.view(),
            Point2::new(16.0, 14.0),
            &SubPixParams::default(),
        );
        assert!((got.x - 15.37).abs() < 0.1, "x = {}", got.x);
        assert!((got.y - 14.72).abs() < 0.1, "y = {}", got.y);
    }

    #[test]
    fn flat_patch_keeps_start() {
        let img = GrayImage {
            width: 21,
            height: 21,
            data: vec![90; 441],
        };
        let start = Point2::new(10.0, 10.0);
        assert_eq!(
            refine_corner(&img.view(), start, &SubPixParams::default()),
            start
        );
    }
}
