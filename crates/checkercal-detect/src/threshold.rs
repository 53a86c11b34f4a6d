//! Adaptive local-mean binarization.

use crate::params::ThresholdParams;
use checkercal_core::GrayImageView;

/// Summed-area table with one row and column of zero padding.
pub(crate) struct IntegralImage {
    width: usize,
    height: usize,
    sums: Vec<u64>,
}

impl IntegralImage {
    pub(crate) fn new(img: &GrayImageView<'_>) -> Self {
        let (w, h) = (img.width, img.height);
        let stride = w + 1;
        let mut sums = vec![0u64; stride * (h + 1)];
        for y in 0..h {
            let mut row = 0u64;
            for x in 0..w {
                row += img.get(x, y) as u64;
                sums[(y + 1) * stride + x + 1] = sums[y * stride + x + 1] + row;
            }
        }
        Self {
            width: w,
            height: h,
            sums,
        }
    }

    /// Mean over the window of radius `r` around (`x`, `y`), clipped to the image.
    #[inline]
    pub(crate) fn local_mean(&self, x: usize, y: usize, r: usize) -> f32 {
        let x0 = x.saturating_sub(r);
        let y0 = y.saturating_sub(r);
        let x1 = (x + r + 1).min(self.width);
        let y1 = (y + r + 1).min(self.height);
        let stride = self.width + 1;
        let s = self.sums[y1 * stride + x1] + self.sums[y0 * stride + x0]
            - self.sums[y0 * stride + x1]
            - self.sums[y1 * stride + x0];
        s as f32 / ((x1 - x0) * (y1 - y0)) as f32
    }
}

/// Binary mask, `true` for dark pixels.
pub(crate) fn adaptive_threshold(img: &GrayImageView<'_>, params: &ThresholdParams) -> Vec<bool> {
    let integral = IntegralImage::new(img);
    let mut dark = vec![false; img.width * img.height];
    for y in 0..img.height {
        for x in 0..img.width {
            let mean = integral.local_mean(x, y, params.block_radius);
            dark[y * img.width + x] = (img.get(x, y) as f32) < mean - params.offset;
        }
    }
    dark
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkercal_core::GrayImage;

    #[test]
    fn local_mean_clips_at_borders() {
        let img = GrayImage {
            width: 3,
            height: 2,
            data: vec![0, 10, 20, 30, 40, 50],
        };
        let ii = IntegralImage::new(&img.view());
        assert_eq!(ii.local_mean(0, 0, 1), 20.0);
        assert_eq!(ii.local_mean(1, 1, 5), 25.0);
    }

    #[test]
    fn uniform_image_has_no_dark_pixels() {
        let img = GrayImage {
            width: 16,
            height: 16,
            data: vec![128; 256],
        };
        let mask = adaptive_threshold(&img.view(), &ThresholdParams::default());
        assert!(mask.iter().all(|d| !d));
    }

    #[test]
    fn dark_half_is_marked_near_the_step() {
        let w = 20;
        let data = (0..w * 4)
            .map(|i| if i % w < w / 2 { 20 } else { 220 })
            .collect();
        let img = GrayImage {
            width: w,
            height: 4,
            data,
        };
        let mask = adaptive_threshold(
            &img.view(),
            &ThresholdParams {
                block_radius: 4,
                offset: 5.0,
            },
        );
        assert!(mask[8]);
        assert!(!mask[11]);
    }
}
