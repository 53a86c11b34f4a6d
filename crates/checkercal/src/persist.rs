//! JSON record of a calibration for use outside this crate.

use checkercal_calib::CalibrationResult;
use checkercal_core::{BrownConrady5, CameraIntrinsics, ImageSize, PinholeCamera};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(thiserror::Error, Debug)]
pub enum IoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("invalid calibration record: {0}")]
    Invalid(String),
}

/// Camera matrix and distortion in the common row-major / `k1 k2 p1 p2 k3`
/// layout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    /// 3x3 camera matrix, row-major.
    pub camera_matrix: [f64; 9],
    /// `k1, k2, p1, p2, k3`.
    pub dist_coeffs: [f64; 5],
    pub image_width: u32,
    pub image_height: u32,
    pub rms_error: f64,
}

impl From<&CalibrationResult> for CalibrationRecord {
    fn from(result: &CalibrationResult) -> Self {
        let k = result.k_matrix();
        let mut camera_matrix = [0.0; 9];
        for r in 0..3 {
            for c in 0..3 {
                camera_matrix[r * 3 + c] = k[(r, c)];
            }
        }
        Self {
            camera_matrix,
            dist_coeffs: result.distortion.to_opencv_array(),
            image_width: result.image_size.width,
            image_height: result.image_size.height,
            rms_error: result.rms_error,
        }
    }
}

impl CalibrationRecord {
    pub fn intrinsics(&self) -> CameraIntrinsics {
        let m = &self.camera_matrix;
        CameraIntrinsics::new(m[0], m[4], m[2], m[5])
    }

    pub fn distortion(&self) -> BrownConrady5 {
        BrownConrady5::from_coeffs(self.dist_coeffs)
    }

    pub fn camera(&self) -> PinholeCamera {
        PinholeCamera::new(self.intrinsics(), self.distortion())
    }

    pub fn image_size(&self) -> ImageSize {
        ImageSize::new(self.image_width, self.image_height)
    }

    /// Reject records no solve could have produced.
    pub fn validate(&self) -> Result<(), IoError> {
        let m = &self.camera_matrix;
        if m.iter().chain(&self.dist_coeffs).any(|v| !v.is_finite()) {
            return Err(IoError::Invalid("non-finite coefficient".into()));
        }
        if m[1] != 0.0 || m[3] != 0.0 || m[6] != 0.0 || m[7] != 0.0 || m[8] != 1.0 {
            return Err(IoError::Invalid(
                "camera matrix must be [fx 0 cx; 0 fy cy; 0 0 1]".into(),
            ));
        }
        if !self.intrinsics().is_valid() {
            return Err(IoError::Invalid("focal lengths must be positive".into()));
        }
        if self.image_size().is_empty() {
            return Err(IoError::Invalid("image size is empty".into()));
        }
        Ok(())
    }
}

/// Write `result` to `path` as pretty JSON.
pub fn save_calibration(result: &CalibrationResult, path: impl AsRef<Path>) -> Result<(), IoError> {
    let path = path.as_ref();
    let json = serde_json::to_string_pretty(&CalibrationRecord::from(result))?;
    fs::write(path, json)?;
    info!("calibration written to {}", path.display());
    Ok(())
}

/// Read and validate a record written by [`save_calibration`].
pub fn load_calibration(path: impl AsRef<Path>) -> Result<CalibrationRecord, IoError> {
    let raw = fs::read_to_string(path)?;
    let record: CalibrationRecord = serde_json::from_str(&raw)?;
    record.validate()?;
    Ok(record)
}
