//! Distortion removal for frames of a calibrated camera.
//!
//! The rectified view uses a new pinhole matrix chosen from the undistorted
//! image boundary, and an inverse map from each rectified pixel to its
//! source position in the distorted frame.

use crate::result::CalibrationResult;
use checkercal_core::{
    BrownConrady5, CameraIntrinsics, Frame, FrameError, ImageSize, PinholeCamera, PixelLayout,
};
use log::debug;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Boundary samples per image side used to bound the undistorted image.
const BOUNDARY_SAMPLES: usize = 9;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RectifyError {
    #[error("frame is {got}, calibration was solved for {expected}")]
    SizeMismatch { expected: ImageSize, got: ImageSize },
    #[error("output buffer layout {got:?} does not match input {expected:?}")]
    LayoutMismatch {
        expected: PixelLayout,
        got: PixelLayout,
    },
    #[error(transparent)]
    Frame(#[from] FrameError),
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RectifyParams {
    /// Field-of-view trade-off: `0` keeps only pixels with valid source
    /// data, `1` keeps every source pixel and leaves black corners.
    pub alpha: f64,
}

impl Default for RectifyParams {
    fn default() -> Self {
        Self { alpha: 0.0 }
    }
}

/// Pixel rectangle of the rectified image backed by source data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidRoi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Copy, Debug)]
struct Rect {
    x0: f64,
    y0: f64,
    x1: f64,
    y1: f64,
}

impl Rect {
    fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    fn height(&self) -> f64 {
        self.y1 - self.y0
    }
}

/// Undistort a grid of boundary samples and return the largest rectangle
/// inside the undistorted image and the smallest one containing it, both in
/// the coordinates of `map` applied to the ideal normalized point.
fn boundary_rects(
    intrinsics: &CameraIntrinsics,
    distortion: &BrownConrady5,
    size: ImageSize,
    map: impl Fn(Point2<f64>) -> Point2<f64>,
) -> (Rect, Rect) {
    let n = BOUNDARY_SAMPLES;
    let (w, h) = (size.width as f64, size.height as f64);
    let mut outer = Rect {
        x0: f64::MAX,
        y0: f64::MAX,
        x1: f64::MIN,
        y1: f64::MIN,
    };
    let mut inner = Rect {
        x0: f64::MIN,
        y0: f64::MIN,
        x1: f64::MAX,
        y1: f64::MAX,
    };

    for j in 0..n {
        for i in 0..n {
            let px = Point2::new(
                i as f64 * (w - 1.0) / (n - 1) as f64,
                j as f64 * (h - 1.0) / (n - 1) as f64,
            );
            let ideal = distortion.undistort(intrinsics.pixel_to_normalized(px));
            let p = map(ideal);
            outer.x0 = outer.x0.min(p.x);
            outer.y0 = outer.y0.min(p.y);
            outer.x1 = outer.x1.max(p.x);
            outer.y1 = outer.y1.max(p.y);
            if i == 0 {
                inner.x0 = inner.x0.max(p.x);
            }
            if i == n - 1 {
                inner.x1 = inner.x1.min(p.x);
            }
            if j == 0 {
                inner.y0 = inner.y0.max(p.y);
            }
            if j == n - 1 {
                inner.y1 = inner.y1.min(p.y);
            }
        }
    }
    (inner, outer)
}

/// New camera matrix for the rectified view and its valid-pixel rectangle.
///
/// `alpha = 0` scales the view so that every rectified pixel has source data;
/// `alpha = 1` keeps all source pixels. Values in between blend linearly.
pub fn optimal_new_camera_matrix(
    intrinsics: &CameraIntrinsics,
    distortion: &BrownConrady5,
    size: ImageSize,
    alpha: f64,
) -> (CameraIntrinsics, ValidRoi) {
    let alpha = alpha.clamp(0.0, 1.0);
    let (w, h) = (size.width as f64, size.height as f64);
    let (inner, outer) = boundary_rects(intrinsics, distortion, size, |p| p);

    let fit = |r: &Rect| {
        let fx = (w - 1.0) / r.width();
        let fy = (h - 1.0) / r.height();
        (fx, fy, -fx * r.x0, -fy * r.y0)
    };
    let (fx0, fy0, cx0, cy0) = fit(&inner);
    let (fx1, fy1, cx1, cy1) = fit(&outer);
    let blend = |a: f64, b: f64| a * (1.0 - alpha) + b * alpha;
    let new_k = CameraIntrinsics::new(
        blend(fx0, fx1),
        blend(fy0, fy1),
        blend(cx0, cx1),
        blend(cy0, cy1),
    );
    if !new_k.is_valid() {
        debug!("boundary degenerate; keeping the original camera matrix");
        return (
            *intrinsics,
            ValidRoi {
                x: 0,
                y: 0,
                width: size.width,
                height: size.height,
            },
        );
    }

    let (roi_rect, _) = boundary_rects(intrinsics, distortion, size, |p| {
        new_k.normalized_to_pixel(p)
    });
    (new_k, valid_roi(&roi_rect, size))
}

fn valid_roi(r: &Rect, size: ImageSize) -> ValidRoi {
    const EPS: f64 = 1e-6;
    let x0 = (r.x0 - EPS).ceil().max(0.0);
    let y0 = (r.y0 - EPS).ceil().max(0.0);
    let x1 = (r.x1 + EPS).floor().min(size.width as f64 - 1.0);
    let y1 = (r.y1 + EPS).floor().min(size.height as f64 - 1.0);
    if x1 < x0 || y1 < y0 {
        return ValidRoi::default();
    }
    ValidRoi {
        x: x0 as u32,
        y: y0 as u32,
        width: (x1 - x0) as u32 + 1,
        height: (y1 - y0) as u32 + 1,
    }
}

/// Source coordinates for every pixel of the rectified image.
#[derive(Clone, Debug)]
pub struct UndistortMap {
    size: ImageSize,
    new_intrinsics: CameraIntrinsics,
    roi: ValidRoi,
    map_x: Vec<f32>,
    map_y: Vec<f32>,
}

impl UndistortMap {
    pub fn new(result: &CalibrationResult, params: &RectifyParams) -> Self {
        Self::from_camera(&result.camera(), result.image_size, params)
    }

    /// Map for a camera known only by its intrinsics and distortion, e.g. one
    /// loaded from a saved calibration.
    pub fn from_camera(camera: &PinholeCamera, size: ImageSize, params: &RectifyParams) -> Self {
        let (new_k, roi) =
            optimal_new_camera_matrix(&camera.intrinsics, &camera.distortion, size, params.alpha);

        let mut map_x = Vec::with_capacity(size.area());
        let mut map_y = Vec::with_capacity(size.area());
        for y in 0..size.height {
            for x in 0..size.width {
                let ideal = new_k.pixel_to_normalized(Point2::new(x as f64, y as f64));
                let src = camera
                    .intrinsics
                    .normalized_to_pixel(camera.distortion.distort(ideal));
                map_x.push(src.x as f32);
                map_y.push(src.y as f32);
            }
        }
        debug!(
            "undistort map {}: fx={:.2} fy={:.2} roi {:?}",
            size, new_k.fx, new_k.fy, roi
        );
        Self {
            size,
            new_intrinsics: new_k,
            roi,
            map_x,
            map_y,
        }
    }

    pub fn size(&self) -> ImageSize {
        self.size
    }

    /// Pinhole matrix of the rectified image.
    pub fn new_intrinsics(&self) -> CameraIntrinsics {
        self.new_intrinsics
    }

    pub fn roi(&self) -> ValidRoi {
        self.roi
    }

    /// Source position sampled for rectified pixel (`x`, `y`).
    pub fn source(&self, x: u32, y: u32) -> Point2<f32> {
        let i = y as usize * self.size.width as usize + x as usize;
        Point2::new(self.map_x[i], self.map_y[i])
    }

    fn check_input(&self, frame: &Frame) -> Result<(), RectifyError> {
        if frame.size() != self.size {
            return Err(RectifyError::SizeMismatch {
                expected: self.size,
                got: frame.size(),
            });
        }
        Ok(())
    }

    /// Rectified copy of `frame`, with the same sequence index and layout.
    pub fn apply(&self, frame: &Frame) -> Result<Frame, RectifyError> {
        self.check_input(frame)?;
        let mut data = vec![0u8; frame.data().len()];
        self.remap(frame, &mut data);
        Ok(Frame::new(
            frame.seq(),
            frame.width(),
            frame.height(),
            frame.layout(),
            data,
        )?)
    }

    /// Rectify into `out`. All checks happen before the first write; on
    /// error `out` is untouched.
    pub fn apply_into(&self, frame: &Frame, out: &mut Frame) -> Result<(), RectifyError> {
        self.check_input(frame)?;
        if out.size() != frame.size() {
            return Err(RectifyError::SizeMismatch {
                expected: frame.size(),
                got: out.size(),
            });
        }
        if out.layout() != frame.layout() {
            return Err(RectifyError::LayoutMismatch {
                expected: frame.layout(),
                got: out.layout(),
            });
        }
        self.remap(frame, out.data_mut());
        Ok(())
    }

    fn remap(&self, src: &Frame, out: &mut [u8]) {
        let ch = src.channels();
        let (w, h) = (src.width() as usize, src.height() as usize);
        let (wf, hf) = ((w - 1) as f32, (h - 1) as f32);
        // Slack for round-off on the image border.
        const EDGE: f32 = 1e-3;
        let data = src.data();

        for (i, (&sx, &sy)) in self.map_x.iter().zip(&self.map_y).enumerate() {
            let dst = &mut out[i * ch..(i + 1) * ch];
            if !(sx >= -EDGE && sy >= -EDGE && sx <= wf + EDGE && sy <= hf + EDGE) {
                dst.fill(0);
                continue;
            }
            let (sx, sy) = (sx.clamp(0.0, wf), sy.clamp(0.0, hf));
            let x0 = sx.floor() as usize;
            let y0 = sy.floor() as usize;
            let x1 = (x0 + 1).min(w - 1);
            let y1 = (y0 + 1).min(h - 1);
            let fx = sx - x0 as f32;
            let fy = sy - y0 as f32;
            for (c, d) in dst.iter_mut().enumerate() {
                let p = |x: usize, y: usize| data[(y * w + x) * ch + c] as f32;
                let a = p(x0, y0) + fx * (p(x1, y0) - p(x0, y0));
                let b = p(x0, y1) + fx * (p(x1, y1) - p(x0, y1));
                *d = (a + fy * (b - a)).round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}

/// Applies a calibration to frames, caching the undistort map per result.
///
/// The cache is keyed by the identity of the shared result: handing in a
/// different `Arc` rebuilds the map even if the values are equal.
#[derive(Debug, Default)]
pub struct Rectifier {
    params: RectifyParams,
    cache: Option<(Arc<CalibrationResult>, UndistortMap)>,
}

impl Rectifier {
    pub fn new(params: RectifyParams) -> Self {
        Self {
            params,
            cache: None,
        }
    }

    pub fn params(&self) -> &RectifyParams {
        &self.params
    }

    fn check_size(frame: &Frame, result: &CalibrationResult) -> Result<(), RectifyError> {
        if frame.size() != result.image_size {
            return Err(RectifyError::SizeMismatch {
                expected: result.image_size,
                got: frame.size(),
            });
        }
        Ok(())
    }

    /// The map for `result`, built on first use.
    pub fn map_for(&mut self, result: &Arc<CalibrationResult>) -> &UndistortMap {
        let fresh = matches!(&self.cache, Some((cached, _)) if Arc::ptr_eq(cached, result));
        if !fresh {
            self.cache = None;
        }
        let params = &self.params;
        &self
            .cache
            .get_or_insert_with(|| (Arc::clone(result), UndistortMap::new(result, params)))
            .1
    }

    /// Rectified copy of `frame`, with the same sequence index and layout.
    ///
    /// The size check runs before the map is built or any buffer allocated.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, frame, result), fields(seq = frame.seq()))
    )]
    pub fn rectify(
        &mut self,
        frame: &Frame,
        result: &Arc<CalibrationResult>,
    ) -> Result<Frame, RectifyError> {
        Self::check_size(frame, result)?;
        self.map_for(result).apply(frame)
    }

    /// Rectify into an existing frame of matching size and layout.
    ///
    /// All checks happen before the first write; on error `out` is untouched.
    pub fn rectify_into(
        &mut self,
        frame: &Frame,
        result: &Arc<CalibrationResult>,
        out: &mut Frame,
    ) -> Result<(), RectifyError> {
        Self::check_size(frame, result)?;
        self.map_for(result).apply_into(frame, out)
    }
}
