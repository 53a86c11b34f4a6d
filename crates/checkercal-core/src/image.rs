use serde::{Deserialize, Serialize};

/// Width/height of a frame in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl std::fmt::Display for ImageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelLayout {
    Gray8,
    /// Interleaved `r, g, b` bytes.
    Rgb8,
}

impl PixelLayout {
    pub const fn channels(self) -> usize {
        match self {
            PixelLayout::Gray8 => 1,
            PixelLayout::Rgb8 => 3,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("invalid frame dimensions (width={width}, height={height})")]
    InvalidDimensions { width: u32, height: u32 },
    #[error("invalid frame buffer length (expected {expected} bytes, got {got})")]
    InvalidBuffer { expected: usize, got: usize },
    #[error("cannot stack frames of different heights ({left} vs {right})")]
    HeightMismatch { left: u32, right: u32 },
}

/// An immutable image tagged with its position in the capture sequence.
///
/// Pipeline stages never write into a `Frame` they were handed; annotation
/// and rectification always produce a new one.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    seq: u64,
    size: ImageSize,
    layout: PixelLayout,
    data: Vec<u8>,
}

impl Frame {
    pub fn new(
        seq: u64,
        width: u32,
        height: u32,
        layout: PixelLayout,
        data: Vec<u8>,
    ) -> Result<Self, FrameError> {
        let size = ImageSize::new(width, height);
        if size.is_empty() {
            return Err(FrameError::InvalidDimensions { width, height });
        }
        let expected = size
            .area()
            .checked_mul(layout.channels())
            .ok_or(FrameError::InvalidDimensions { width, height })?;
        if data.len() != expected {
            return Err(FrameError::InvalidBuffer {
                expected,
                got: data.len(),
            });
        }
        Ok(Self {
            seq,
            size,
            layout,
            data,
        })
    }

    /// A frame with every byte set to `value`.
    pub fn filled(
        seq: u64,
        size: ImageSize,
        layout: PixelLayout,
        value: u8,
    ) -> Result<Self, FrameError> {
        let len = size.area() * layout.channels();
        Self::new(seq, size.width, size.height, layout, vec![value; len])
    }

    pub fn from_gray(seq: u64, img: GrayImage) -> Result<Self, FrameError> {
        Self::new(
            seq,
            img.width as u32,
            img.height as u32,
            PixelLayout::Gray8,
            img.data,
        )
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn size(&self) -> ImageSize {
        self.size
    }

    pub fn width(&self) -> u32 {
        self.size.width
    }

    pub fn height(&self) -> u32 {
        self.size.height
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    pub fn channels(&self) -> usize {
        self.layout.channels()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable access for stages that own a freshly produced output frame.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = seq;
        self
    }

    /// Channel bytes of the pixel at (`x`, `y`).
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let c = self.channels();
        let start = (y as usize * self.size.width as usize + x as usize) * c;
        &self.data[start..start + c]
    }

    /// Single-channel intensity using BT.601 luma weights.
    pub fn to_gray(&self) -> GrayImage {
        let data = match self.layout {
            PixelLayout::Gray8 => self.data.clone(),
            PixelLayout::Rgb8 => self
                .data
                .chunks_exact(3)
                .map(|px| luma(px[0], px[1], px[2]))
                .collect(),
        };
        GrayImage {
            width: self.size.width as usize,
            height: self.size.height as usize,
            data,
        }
    }

    /// Three-channel copy, for drawing coloured overlays.
    pub fn to_rgb(&self) -> Frame {
        match self.layout {
            PixelLayout::Rgb8 => self.clone(),
            PixelLayout::Gray8 => Frame {
                seq: self.seq,
                size: self.size,
                layout: PixelLayout::Rgb8,
                data: self.data.iter().flat_map(|&v| [v, v, v]).collect(),
            },
        }
    }
}

#[inline]
fn luma(r: u8, g: u8, b: u8) -> u8 {
    (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32)
        .round()
        .clamp(0.0, 255.0) as u8
}

/// Place `left` and `right` next to each other.
///
/// Mixed layouts are promoted to RGB. The result keeps the sequence index of
/// `left`.
pub fn hstack(left: &Frame, right: &Frame) -> Result<Frame, FrameError> {
    if left.height() != right.height() {
        return Err(FrameError::HeightMismatch {
            left: left.height(),
            right: right.height(),
        });
    }
    let (l, r);
    let (left, right) = if left.layout() == right.layout() {
        (left, right)
    } else {
        l = left.to_rgb();
        r = right.to_rgb();
        (&l, &r)
    };

    let c = left.channels();
    let lw = left.width() as usize * c;
    let rw = right.width() as usize * c;
    let mut data = Vec::with_capacity((lw + rw) * left.height() as usize);
    for (lrow, rrow) in left.data().chunks_exact(lw).zip(right.data().chunks_exact(rw)) {
        data.extend_from_slice(lrow);
        data.extend_from_slice(rrow);
    }
    Frame::new(
        left.seq(),
        left.width() + right.width(),
        left.height(),
        left.layout(),
        data,
    )
}

#[derive(Clone, Copy, Debug)]
pub struct GrayImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [u8], // row-major, len = w*h
}

#[derive(Clone, Debug)]
pub struct GrayImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl GrayImage {
    pub fn view(&self) -> GrayImageView<'_> {
        GrayImageView {
            width: self.width,
            height: self.height,
            data: &self.data,
        }
    }
}

impl GrayImageView<'_> {
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }

    /// Pixel value with coordinates clamped into the image.
    #[inline]
    pub fn get_clamped(&self, x: i64, y: i64) -> u8 {
        let x = x.clamp(0, self.width as i64 - 1) as usize;
        let y = y.clamp(0, self.height as i64 - 1) as usize;
        self.data[y * self.width + x]
    }
}

/// Bilinear sample at pixel-centre coordinates (`(0, 0)` is the centre of
/// the first pixel). Out-of-range neighbours are clamped to the border.
#[inline]
pub fn sample_bilinear(src: &GrayImageView<'_>, x: f32, y: f32) -> f32 {
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = src.get_clamped(x0, y0) as f32;
    let p10 = src.get_clamped(x0 + 1, y0) as f32;
    let p01 = src.get_clamped(x0, y0 + 1) as f32;
    let p11 = src.get_clamped(x0 + 1, y0 + 1) as f32;

    let a = p00 + fx * (p10 - p00);
    let b = p01 + fx * (p11 - p01);
    a + fy * (b - a)
}
