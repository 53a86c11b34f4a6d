//! X-junction candidates from a binarized image.
//!
//! A pixel is a candidate when a ring around it crosses exactly four
//! alternating dark/light arcs. Candidate pixels come in small blobs around
//! every true corner; each blob collapses to its centroid.

use crate::params::SaddleParams;
use checkercal_core::GrayImageView;
use nalgebra::Point2;

struct Ring {
    offsets: Vec<(i64, i64)>,
    reach: usize,
}

impl Ring {
    fn new(params: &SaddleParams) -> Self {
        let n = params.ring_samples.max(4);
        let step = std::f32::consts::TAU / n as f32;
        let offsets: Vec<(i64, i64)> = (0..n)
            .map(|k| {
                let a = (k as f32 + 0.5) * step;
                (
                    (params.ring_radius * a.cos()).round() as i64,
                    (params.ring_radius * a.sin()).round() as i64,
                )
            })
            .collect();
        let reach = offsets
            .iter()
            .map(|&(dx, dy)| dx.unsigned_abs().max(dy.unsigned_abs()) as usize)
            .max()
            .unwrap_or(0);
        Self { offsets, reach }
    }
}

/// Lengths of the constant arcs around a closed ring, starting at the first
/// change. Empty for a constant ring.
fn ring_runs(bits: &[bool]) -> Vec<usize> {
    let n = bits.len();
    let Some(first_change) = (0..n).find(|&k| bits[k] != bits[(k + n - 1) % n]) else {
        return Vec::new();
    };

    let mut runs = Vec::with_capacity(4);
    let mut run = 0;
    for k in 0..n {
        let idx = (first_change + k) % n;
        if k > 0 && bits[idx] != bits[(idx + n - 1) % n] {
            runs.push(run);
            run = 0;
        }
        run += 1;
    }
    runs.push(run);
    runs
}

/// Four arcs, none shorter than `min_run`, opposite arcs of similar length.
///
/// Opposite sectors of an X-junction are vertical angles. The balance test
/// rejects rings that clip the outside corner of a single square, which also
/// cross four times but leave one dark arc much longer than the other.
fn is_x_junction(runs: &[usize], params: &SaddleParams) -> bool {
    runs.len() == 4
        && runs.iter().all(|&r| r >= params.min_run)
        && runs[0].abs_diff(runs[2]) <= params.max_imbalance
        && runs[1].abs_diff(runs[3]) <= params.max_imbalance
}

/// Mask of pixels passing the ring test.
pub(crate) fn saddle_mask(
    gray: &GrayImageView<'_>,
    dark: &[bool],
    params: &SaddleParams,
) -> Vec<bool> {
    let (w, h) = (gray.width, gray.height);
    let mut mask = vec![false; w * h];
    let ring = Ring::new(params);
    let m = ring.reach + 1;
    if w <= 2 * m || h <= 2 * m {
        return mask;
    }

    let mut bits = vec![false; ring.offsets.len()];
    for y in m..h - m {
        for x in m..w - m {
            let (mut lo, mut hi) = (u8::MAX, u8::MIN);
            for (bit, &(dx, dy)) in bits.iter_mut().zip(&ring.offsets) {
                let sx = (x as i64 + dx) as usize;
                let sy = (y as i64 + dy) as usize;
                *bit = dark[sy * w + sx];
                let v = gray.get(sx, sy);
                lo = lo.min(v);
                hi = hi.max(v);
            }
            if ((hi - lo) as f32) < params.min_contrast {
                continue;
            }
            if is_x_junction(&ring_runs(&bits), params) {
                mask[y * w + x] = true;
            }
        }
    }
    mask
}

/// Centroids of 8-connected candidate blobs, with blobs closer than
/// `merge_radius` fused.
pub(crate) fn cluster_candidates(
    mask: &[bool],
    width: usize,
    height: usize,
    merge_radius: f64,
) -> Vec<Point2<f64>> {
    let mut seen = vec![false; mask.len()];
    let mut blobs: Vec<(Point2<f64>, f64)> = Vec::new();
    let mut stack = Vec::new();

    for start in 0..mask.len() {
        if !mask[start] || seen[start] {
            continue;
        }
        seen[start] = true;
        stack.push(start);
        let (mut sx, mut sy, mut n) = (0.0, 0.0, 0.0);
        while let Some(idx) = stack.pop() {
            let (x, y) = (idx % width, idx / width);
            sx += x as f64;
            sy += y as f64;
            n += 1.0;
            for ny in y.saturating_sub(1)..=(y + 1).min(height - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(width - 1) {
                    let j = ny * width + nx;
                    if mask[j] && !seen[j] {
                        seen[j] = true;
                        stack.push(j);
                    }
                }
            }
        }
        blobs.push((Point2::new(sx / n, sy / n), n));
    }

    let mut merged: Vec<(Point2<f64>, f64)> = Vec::with_capacity(blobs.len());
    for (p, n) in blobs {
        match merged
            .iter_mut()
            .find(|(q, _)| (p - *q).norm() < merge_radius)
        {
            Some((q, m)) => {
                let total = *m + n;
                *q = Point2::from((q.coords * *m + p.coords * n) / total);
                *m = total;
            }
            None => merged.push((p, n)),
        }
    }
    merged.into_iter().map(|(p, _)| p).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bits(s: &str) -> Vec<bool> {
        s.chars().map(|c| c == '1').collect()
    }

    #[test]
    fn splits_closed_ring_into_arcs() {
        assert_eq!(ring_runs(&bits("1111000011110000")), vec![4, 4, 4, 4]);
        assert_eq!(ring_runs(&bits("0011110000111100")), vec![4, 4, 4, 4]);
        assert_eq!(ring_runs(&bits("1111111100000000")), vec![8, 8]);
        assert!(ring_runs(&bits("0000000000000000")).is_empty());
    }

    #[test]
    fn x_junction_needs_balanced_arcs() {
        let params = SaddleParams::default();
        assert!(is_x_junction(&ring_runs(&bits("0011111000111100")), &params));
        // Short arc.
        assert!(!is_x_junction(&ring_runs(&bits("0100111100001111")), &params));
        // Ring clipping the outer corner of one dark square.
        assert!(!is_x_junction(&ring_runs(&bits("1111111001100111")), &params));
    }

    #[test]
    fn blobs_collapse_to_centroids() {
        let (w, h) = (12, 6);
        let mut mask = vec![false; w * h];
        for (x, y) in [(1, 1), (2, 1), (1, 2), (2, 2), (9, 3)] {
            mask[y * w + x] = true;
        }
        let mut pts = cluster_candidates(&mask, w, h, 2.0);
        pts.sort_by(|a, b| a.x.total_cmp(&b.x));
        assert_eq!(pts.len(), 2);
        assert_eq!(pts[0], Point2::new(1.5, 1.5));
        assert_eq!(pts[1], Point2::new(9.0, 3.0));
    }
}
