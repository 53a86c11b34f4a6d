//! Synthetic checkerboard scenes.
//!
//! The functions here place the canonical pattern in front of a known camera,
//! project its inner corners exactly, and ray-cast anti-aliased images of the
//! printed board through the full distortion model. They back the detector,
//! solver and rectifier tests as well as the `demo` command.

use crate::{Frame, FrameError, ImageSize, PatternSpec, PinholeCamera, PixelLayout, Pose};
use nalgebra::{Point2, Rotation3, Vector3};

/// Intensity of the dark squares.
pub const DARK: u8 = 30;
/// Intensity of the light squares and of the white margin around the board.
pub const LIGHT: u8 = 225;
/// Intensity of everything that is not the board.
pub const BACKGROUND: u8 = 110;

/// Width of the white margin around the outer squares, in squares.
const MARGIN_SQUARES: f64 = 1.0;

/// Pose that rotates the board about its centre by `euler` (roll, pitch, yaw)
/// and places that centre at `center_cam` in camera coordinates.
pub fn board_pose(pattern: &PatternSpec, euler: [f64; 3], center_cam: Vector3<f64>) -> Pose {
    let c = Vector3::new(
        (pattern.cols() as f64 - 1.0) * 0.5,
        (pattern.rows() as f64 - 1.0) * 0.5,
        0.0,
    );
    let r = Rotation3::from_euler_angles(euler[0], euler[1], euler[2]);
    Pose::new(r, center_cam - r * c)
}

/// `n` deterministic, well-spread views of the board at roughly `distance`
/// pattern units from the camera.
///
/// Tilts stay within about 25 degrees and the board centre wanders by about a
/// tenth of the distance, so a camera whose field of view covers the board at
/// `distance` sees every corner in every view.
pub fn orbit_poses(pattern: &PatternSpec, n: usize, distance: f64) -> Vec<Pose> {
    (0..n)
        .map(|k| {
            let t = k as f64;
            let euler = [
                0.42 * (1.3 * t + 0.4).sin(),
                0.42 * (0.9 * t + 1.1).cos(),
                0.2 * (0.7 * t).sin(),
            ];
            let center = Vector3::new(
                0.1 * distance * (1.7 * t).sin(),
                0.08 * distance * (1.1 * t + 0.5).cos(),
                distance * (1.0 + 0.12 * (0.8 * t).sin()),
            );
            board_pose(pattern, euler, center)
        })
        .collect()
}

/// Exact image positions of every inner corner, in pattern order.
///
/// `None` if any corner lands behind the camera.
pub fn project_pattern(
    pattern: &PatternSpec,
    camera: &PinholeCamera,
    pose: &Pose,
) -> Option<Vec<Point2<f64>>> {
    pattern
        .object_points()
        .iter()
        .map(|p| camera.project_board_point(pose, p))
        .collect()
}

/// Whether every projected corner lies at least `border` pixels inside `size`.
pub fn pattern_in_view(points: &[Point2<f64>], size: ImageSize, border: f64) -> bool {
    points.iter().all(|p| {
        p.x >= border
            && p.y >= border
            && p.x <= size.width as f64 - 1.0 - border
            && p.y <= size.height as f64 - 1.0 - border
    })
}

/// Ray-cast a grey image of the board seen under `pose`.
///
/// Each pixel averages `supersample²` rays, which gives the anti-aliased
/// edges a real sensor would record.
pub fn render_checkerboard(
    pattern: &PatternSpec,
    camera: &PinholeCamera,
    pose: &Pose,
    size: ImageSize,
    supersample: usize,
    seq: u64,
) -> Result<Frame, FrameError> {
    let s = supersample.max(1);
    let inv_s = 1.0 / s as f64;
    let board = BoardShader::new(pattern, pose);
    let (w, h) = (size.width as usize, size.height as usize);
    let mut data = vec![0u8; w * h];

    for v in 0..h {
        for u in 0..w {
            let mut acc = 0.0f64;
            for sy in 0..s {
                for sx in 0..s {
                    let px = u as f64 + (sx as f64 + 0.5) * inv_s - 0.5;
                    let py = v as f64 + (sy as f64 + 0.5) * inv_s - 0.5;
                    let n = camera.unproject_normalized(Point2::new(px, py));
                    acc += board.shade(n) as f64;
                }
            }
            data[v * w + u] = (acc * inv_s * inv_s).round().clamp(0.0, 255.0) as u8;
        }
    }

    Frame::new(seq, size.width, size.height, PixelLayout::Gray8, data)
}

struct BoardShader {
    rotation: Rotation3<f64>,
    translation: Vector3<f64>,
    normal: Vector3<f64>,
    plane_offset: f64,
    cols: f64,
    rows: f64,
}

impl BoardShader {
    fn new(pattern: &PatternSpec, pose: &Pose) -> Self {
        let normal = pose.rotation * Vector3::z();
        Self {
            rotation: pose.rotation,
            translation: pose.translation,
            normal,
            plane_offset: normal.dot(&pose.translation),
            cols: pattern.cols() as f64,
            rows: pattern.rows() as f64,
        }
    }

    /// Intensity seen along the ray through ideal normalized point `n`.
    fn shade(&self, n: Point2<f64>) -> u8 {
        let d = Vector3::new(n.x, n.y, 1.0);
        let denom = self.normal.dot(&d);
        if denom.abs() < 1e-12 {
            return BACKGROUND;
        }
        let s = self.plane_offset / denom;
        if s <= 0.0 {
            return BACKGROUND;
        }
        let b = self.rotation.inverse() * (d * s - self.translation);

        let on_squares = b.x >= -1.0 && b.x < self.cols && b.y >= -1.0 && b.y < self.rows;
        if on_squares {
            let parity = (b.x.floor() as i64 + b.y.floor() as i64).rem_euclid(2);
            return if parity == 0 { DARK } else { LIGHT };
        }

        let lo = -1.0 - MARGIN_SQUARES;
        let on_paper = b.x >= lo
            && b.x < self.cols + MARGIN_SQUARES
            && b.y >= lo
            && b.y < self.rows + MARGIN_SQUARES;
        if on_paper {
            LIGHT
        } else {
            BACKGROUND
        }
    }
}
