//! Corner overlay for display.

use checkercal_core::{CornerSet, Frame, PatternSpec};
use nalgebra::Point2;

/// Per-row colours, cycled.
const ROW_COLORS: [[u8; 3]; 7] = [
    [255, 0, 0],
    [255, 128, 0],
    [200, 200, 0],
    [0, 255, 0],
    [0, 200, 200],
    [0, 0, 255],
    [255, 0, 255],
];

const MARKER_RADIUS: i64 = 4;

struct Canvas<'a> {
    width: i64,
    height: i64,
    data: &'a mut [u8],
}

impl Canvas<'_> {
    fn put(&mut self, x: i64, y: i64, rgb: [u8; 3]) {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            return;
        }
        let i = ((y * self.width + x) * 3) as usize;
        self.data[i..i + 3].copy_from_slice(&rgb);
    }

    fn line(&mut self, a: (i64, i64), b: (i64, i64), rgb: [u8; 3]) {
        let (mut x, mut y) = a;
        let dx = (b.0 - a.0).abs();
        let dy = -(b.1 - a.1).abs();
        let sx = if a.0 < b.0 { 1 } else { -1 };
        let sy = if a.1 < b.1 { 1 } else { -1 };
        let mut err = dx + dy;
        loop {
            self.put(x, y, rgb);
            if (x, y) == b {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    fn circle(&mut self, c: (i64, i64), r: i64, rgb: [u8; 3]) {
        let (mut x, mut y, mut err) = (r, 0, 1 - r);
        while x >= y {
            for (px, py) in [
                (x, y),
                (y, x),
                (-y, x),
                (-x, y),
                (-x, -y),
                (-y, -x),
                (y, -x),
                (x, -y),
            ] {
                self.put(c.0 + px, c.1 + py, rgb);
            }
            y += 1;
            if err < 0 {
                err += 2 * y + 1;
            } else {
                x -= 1;
                err += 2 * (y - x) + 1;
            }
        }
    }

    fn marker(&mut self, c: (i64, i64), rgb: [u8; 3]) {
        let r = MARKER_RADIUS;
        self.circle(c, r, rgb);
        self.line((c.0 - r, c.1 - r), (c.0 + r, c.1 + r), rgb);
        self.line((c.0 - r, c.1 + r), (c.0 + r, c.1 - r), rgb);
    }
}

fn to_px(p: &Point2<f64>) -> (i64, i64) {
    (p.x.round() as i64, p.y.round() as i64)
}

/// Return an RGB copy of `frame` with the detected corners drawn on it.
///
/// A complete detection is drawn row by row in cycling colours, joined by a
/// polyline in pattern order. A set whose length does not match `pattern`
/// is drawn as plain red markers.
pub fn draw_corners(frame: &Frame, pattern: &PatternSpec, corners: &CornerSet) -> Frame {
    let mut out = frame.to_rgb();
    let (width, height) = (out.width() as i64, out.height() as i64);
    let mut canvas = Canvas {
        width,
        height,
        data: out.data_mut(),
    };

    if corners.len() != pattern.point_count() {
        for p in &corners.points {
            canvas.marker(to_px(p), ROW_COLORS[0]);
        }
        return out;
    }

    let cols = pattern.cols() as usize;
    let mut prev: Option<(i64, i64)> = None;
    for (k, p) in corners.points.iter().enumerate() {
        let rgb = ROW_COLORS[(k / cols) % ROW_COLORS.len()];
        let c = to_px(p);
        if let Some(a) = prev {
            canvas.line(a, c, rgb);
        }
        canvas.marker(c, rgb);
        prev = Some(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkercal_core::{ImageSize, PixelLayout};

    #[test]
    fn overlay_leaves_source_untouched() {
        let size = ImageSize::new(40, 30);
        let frame = Frame::filled(4, size, PixelLayout::Gray8, 128).unwrap();
        let pattern = PatternSpec::new(2, 2).unwrap();
        let corners = CornerSet::new(
            4,
            size,
            vec![
                Point2::new(10.0, 10.0),
                Point2::new(20.0, 10.0),
                Point2::new(10.0, 20.0),
                Point2::new(20.0, 20.0),
            ],
        );
        let drawn = draw_corners(&frame, &pattern, &corners);
        assert_eq!(drawn.layout(), PixelLayout::Rgb8);
        assert_eq!(drawn.seq(), 4);
        assert!(frame.data().iter().all(|&v| v == 128));
        // Marker centre and the row-0 connector.
        assert_eq!(drawn.pixel(10, 10), &ROW_COLORS[0]);
        assert_eq!(drawn.pixel(15, 10), &ROW_COLORS[0]);
        assert_eq!(drawn.pixel(20, 20), &ROW_COLORS[1]);
        assert_eq!(drawn.pixel(0, 0), &[128, 128, 128]);
    }

    #[test]
    fn markers_near_borders_are_clipped() {
        let size = ImageSize::new(8, 8);
        let frame = Frame::filled(0, size, PixelLayout::Rgb8, 0).unwrap();
        let pattern = PatternSpec::new(3, 3).unwrap();
        let corners = CornerSet::new(0, size, vec![Point2::new(0.0, 7.0)]);
        let drawn = draw_corners(&frame, &pattern, &corners);
        assert_eq!(drawn.pixel(0, 7), &ROW_COLORS[0]);
    }
}
