//! Raw sensor frames and the aligned image derived from them.
//!
//! Frames arrive from the capture collaborator as opaque byte buffers with a
//! row stride (`bytes_per_row`) that may exceed `width * bytes_per_pixel`
//! because of hardware row padding. Every offset into a frame is computed from
//! the stride, never from the width.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Size in bytes of one depth element (`f32`, meters).
pub const DEPTH_ELEMENT_SIZE: usize = std::mem::size_of::<f32>();

/// Per-frame processing failures. These are absorbed by the pipeline: the
/// frame is skipped and nothing is published.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame has no pixel buffer")]
    MissingPixelBuffer,

    #[error("invalid frame dimensions {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("row stride {bytes_per_row} is smaller than one row ({min} bytes)")]
    StrideTooSmall { bytes_per_row: usize, min: usize },

    #[error("pixel buffer holds {len} bytes, frame needs {required}")]
    BufferTooShort { len: usize, required: usize },

    #[error("unsupported pixel format: {0}")]
    UnsupportedFormat(String),
}

/// Pixel layout of a color buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 32-bit BGRA, the native layout of most camera pipelines
    Bgra8,
    Rgba8,
    Rgb8,
    Gray8,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra8 | PixelFormat::Rgba8 => 4,
            PixelFormat::Rgb8 => 3,
            PixelFormat::Gray8 => 1,
        }
    }

    /// Convert one pixel of this format to RGB.
    ///
    /// `pixel` must hold at least `bytes_per_pixel()` bytes.
    pub fn to_rgb(self, pixel: &[u8]) -> [u8; 3] {
        match self {
            PixelFormat::Bgra8 => [pixel[2], pixel[1], pixel[0]],
            PixelFormat::Rgba8 | PixelFormat::Rgb8 => [pixel[0], pixel[1], pixel[2]],
            PixelFormat::Gray8 => [pixel[0], pixel[0], pixel[0]],
        }
    }
}

/// Validate a strided buffer and return the number of bytes it must hold.
fn check_layout(
    width: usize,
    height: usize,
    bytes_per_row: usize,
    element_size: usize,
    len: usize,
) -> Result<usize, FrameError> {
    if width == 0 || height == 0 {
        return Err(FrameError::InvalidDimensions { width, height });
    }
    if len == 0 {
        return Err(FrameError::MissingPixelBuffer);
    }

    let row_bytes = width
        .checked_mul(element_size)
        .ok_or(FrameError::InvalidDimensions { width, height })?;
    if bytes_per_row < row_bytes {
        return Err(FrameError::StrideTooSmall { bytes_per_row, min: row_bytes });
    }

    // The last row does not need to carry its padding.
    let required = bytes_per_row
        .checked_mul(height - 1)
        .and_then(|b| b.checked_add(row_bytes))
        .ok_or(FrameError::InvalidDimensions { width, height })?;
    if len < required {
        return Err(FrameError::BufferTooShort { len, required });
    }

    Ok(required)
}

/// One depth capture: row-major native-endian `f32` distances in meters.
#[derive(Debug, Clone)]
pub struct RawDepthFrame {
    pub width: usize,
    pub height: usize,
    pub bytes_per_row: usize,
    pub data: Bytes,
    pub timestamp: DateTime<Utc>,
}

impl RawDepthFrame {
    pub fn new(width: usize, height: usize, bytes_per_row: usize, data: Bytes) -> Self {
        Self {
            width,
            height,
            bytes_per_row,
            data,
            timestamp: Utc::now(),
        }
    }

    /// Build a tightly packed frame from depth values.
    pub fn from_depths(width: usize, height: usize, depths: &[f32]) -> Self {
        Self::from_depths_padded(width, height, depths, 0)
    }

    /// Build a frame whose rows carry `row_padding` extra bytes, the way
    /// hardware buffers often do. Padding bytes are filled with `0xFF` so a
    /// reader that ignores the stride picks up garbage rather than zeros.
    pub fn from_depths_padded(width: usize, height: usize, depths: &[f32], row_padding: usize) -> Self {
        let bytes_per_row = width * DEPTH_ELEMENT_SIZE + row_padding;
        let mut data = Vec::with_capacity(bytes_per_row * height);
        for row in depths.chunks(width.max(1)).take(height) {
            for value in row {
                data.extend_from_slice(&value.to_ne_bytes());
            }
            data.resize(data.len() + row_padding, 0xFF);
        }
        Self::new(width, height, bytes_per_row, Bytes::from(data))
    }

    pub fn validate(&self) -> Result<(), FrameError> {
        check_layout(
            self.width,
            self.height,
            self.bytes_per_row,
            DEPTH_ELEMENT_SIZE,
            self.data.len(),
        )
        .map(|_| ())
    }

    /// Depth at `(x, y)`, addressed through the row stride.
    pub fn depth_at(&self, x: usize, y: usize) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = y
            .checked_mul(self.bytes_per_row)?
            .checked_add(x.checked_mul(DEPTH_ELEMENT_SIZE)?)?;
        let raw = self.data.get(offset..offset + DEPTH_ELEMENT_SIZE)?;
        let bytes: [u8; DEPTH_ELEMENT_SIZE] = raw.try_into().ok()?;
        Some(f32::from_ne_bytes(bytes))
    }
}

/// One color capture in a platform pixel format.
#[derive(Debug, Clone)]
pub struct RawColorFrame {
    pub width: usize,
    pub height: usize,
    pub bytes_per_row: usize,
    pub format: PixelFormat,
    pub data: Bytes,
    pub timestamp: DateTime<Utc>,
}

impl RawColorFrame {
    pub fn new(width: usize, height: usize, bytes_per_row: usize, format: PixelFormat, data: Bytes) -> Self {
        Self {
            width,
            height,
            bytes_per_row,
            format,
            data,
            timestamp: Utc::now(),
        }
    }

    /// Tightly packed frame (`bytes_per_row == width * bpp`).
    pub fn packed(width: usize, height: usize, format: PixelFormat, data: Bytes) -> Self {
        Self::new(width, height, width * format.bytes_per_pixel(), format, data)
    }

    /// BGRA test pattern where every pixel encodes its own coordinates:
    /// blue/green carry the low bytes of x/y and red carries their high
    /// nibbles. Rows are padded by `row_padding` bytes.
    pub fn test_pattern(width: usize, height: usize, row_padding: usize) -> Self {
        let bytes_per_row = width * 4 + row_padding;
        let mut data = vec![0u8; bytes_per_row * height];
        for y in 0..height {
            for x in 0..width {
                let offset = y * bytes_per_row + x * 4;
                data[offset..offset + 4].copy_from_slice(&Self::pattern_pixel(x, y));
            }
        }
        Self::new(width, height, bytes_per_row, PixelFormat::Bgra8, Bytes::from(data))
    }

    /// The BGRA value `test_pattern` writes at `(x, y)`.
    pub fn pattern_pixel(x: usize, y: usize) -> [u8; 4] {
        let high = (((x >> 8) & 0x0F) | (((y >> 8) & 0x0F) << 4)) as u8;
        [(x & 0xFF) as u8, (y & 0xFF) as u8, high, 0xFF]
    }

    pub fn validate(&self) -> Result<(), FrameError> {
        check_layout(
            self.width,
            self.height,
            self.bytes_per_row,
            self.format.bytes_per_pixel(),
            self.data.len(),
        )
        .map(|_| ())
    }

    /// The bytes of the pixel at `(x, y)`.
    pub fn pixel(&self, x: usize, y: usize) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let bpp = self.format.bytes_per_pixel();
        let offset = y * self.bytes_per_row + x * bpp;
        self.data.get(offset..offset + bpp)
    }
}

/// Crop window in source pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl CropRect {
    pub fn right(&self) -> usize {
        self.x + self.width
    }

    pub fn bottom(&self) -> usize {
        self.y + self.height
    }
}

/// Cropped, orientation-preserving image ready for display and inference.
/// Rows are tightly packed and the origin is the crop's top-left corner.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedImage {
    pub width: usize,
    pub height: usize,
    pub format: PixelFormat,
    pub data: Bytes,
    /// Window of the source frame this image was cut from
    pub crop: CropRect,
    /// Extent of the source frame
    pub source_size: (usize, usize),
    pub timestamp: DateTime<Utc>,
}

impl AlignedImage {
    pub fn is_square(&self) -> bool {
        self.width == self.height
    }

    pub fn bytes_per_row(&self) -> usize {
        self.width * self.format.bytes_per_pixel()
    }

    pub fn pixel(&self, x: usize, y: usize) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let bpp = self.format.bytes_per_pixel();
        let offset = y * self.bytes_per_row() + x * bpp;
        self.data.get(offset..offset + bpp)
    }
}
