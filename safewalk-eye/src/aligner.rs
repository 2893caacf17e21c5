//! Center crop of color frames

use crate::error::FrameError;
use bytes::Bytes;
use safewalk_core::config::AlignmentConfig;
use safewalk_core::frame::{AlignedImage, CropRect, RawColorFrame};
use tracing::trace;

/// Cuts the largest centered window of the configured aspect ratio out of a
/// color frame. Orientation is kept as delivered and the image is never
/// mirrored; the output origin is the crop's top-left corner.
#[derive(Debug, Clone)]
pub struct FrameAligner {
    target_aspect_ratio: f32,
}

impl Default for FrameAligner {
    fn default() -> Self {
        Self::square()
    }
}

impl FrameAligner {
    pub fn new(target_aspect_ratio: f32) -> Self {
        let ratio = if target_aspect_ratio.is_finite() && target_aspect_ratio > 0.0 {
            target_aspect_ratio
        } else {
            1.0
        };
        Self {
            target_aspect_ratio: ratio,
        }
    }

    pub fn square() -> Self {
        Self::new(1.0)
    }

    pub fn from_config(config: &AlignmentConfig) -> Self {
        Self::new(config.target_aspect_ratio)
    }

    pub fn target_aspect_ratio(&self) -> f32 {
        self.target_aspect_ratio
    }

    /// Crop window for a frame of `width` x `height`.
    ///
    /// Frames wider than the target lose columns (`crop_w = height * ratio`),
    /// the others lose rows (`crop_h = width / ratio`). The window is
    /// centered, rounding its origin down.
    pub fn crop_rect(&self, width: usize, height: usize) -> CropRect {
        let (crop_w, crop_h) = if self.target_aspect_ratio == 1.0 {
            let side = width.min(height);
            (side, side)
        } else {
            let ratio = self.target_aspect_ratio as f64;
            if (width as f64) / (height as f64) > ratio {
                let w = ((height as f64) * ratio).round() as usize;
                (w.clamp(1, width), height)
            } else {
                let h = ((width as f64) / ratio).round() as usize;
                (width, h.clamp(1, height))
            }
        };

        CropRect {
            x: (width - crop_w) / 2,
            y: (height - crop_h) / 2,
            width: crop_w,
            height: crop_h,
        }
    }

    /// Produce the aligned image for one frame.
    pub fn align(&self, frame: &RawColorFrame) -> Result<AlignedImage, FrameError> {
        frame.validate()?;

        let crop = self.crop_rect(frame.width, frame.height);
        let bpp = frame.format.bytes_per_pixel();
        let row_bytes = crop.width * bpp;
        let src = frame.data.as_ref();

        let mut data = Vec::with_capacity(row_bytes * crop.height);
        for y in crop.y..crop.bottom() {
            let start = y * frame.bytes_per_row + crop.x * bpp;
            data.extend_from_slice(&src[start..start + row_bytes]);
        }

        trace!(
            source_width = frame.width,
            source_height = frame.height,
            crop_x = crop.x,
            crop_y = crop.y,
            side = crop.width,
            "color frame aligned"
        );

        Ok(AlignedImage {
            width: crop.width,
            height: crop.height,
            format: frame.format,
            data: Bytes::from(data),
            crop,
            source_size: (frame.width, frame.height),
            timestamp: frame.timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use safewalk_core::PixelFormat;

    #[test]
    fn test_crop_rect_landscape() {
        let crop = FrameAligner::square().crop_rect(1920, 1080);
        assert_eq!(crop, CropRect { x: 420, y: 0, width: 1080, height: 1080 });
    }

    #[test]
    fn test_crop_rect_portrait() {
        let crop = FrameAligner::square().crop_rect(1080, 1920);
        assert_eq!(crop, CropRect { x: 0, y: 420, width: 1080, height: 1080 });
    }

    #[test]
    fn test_crop_rect_already_square() {
        let crop = FrameAligner::square().crop_rect(640, 640);
        assert_eq!(crop, CropRect { x: 0, y: 0, width: 640, height: 640 });
    }

    #[test]
    fn test_crop_rect_odd_difference_rounds_down() {
        let crop = FrameAligner::square().crop_rect(5, 2);
        assert_eq!(crop, CropRect { x: 1, y: 0, width: 2, height: 2 });
    }

    #[test]
    fn test_crop_rect_custom_ratio() {
        let aligner = FrameAligner::new(0.75);
        // 1920x1080 is wider than 3:4, keep full height
        assert_eq!(
            aligner.crop_rect(1920, 1080),
            CropRect { x: 555, y: 0, width: 810, height: 1080 }
        );
        // 600x1000 is narrower than 3:4, keep full width
        assert_eq!(
            aligner.crop_rect(600, 1000),
            CropRect { x: 0, y: 100, width: 600, height: 800 }
        );
    }

    #[test]
    fn test_invalid_ratio_falls_back_to_square() {
        assert_eq!(FrameAligner::new(0.0).target_aspect_ratio(), 1.0);
        assert_eq!(FrameAligner::new(f32::NAN).target_aspect_ratio(), 1.0);
    }

    #[test]
    fn test_align_copies_centered_window() {
        let frame = RawColorFrame::test_pattern(12, 8, 4);
        let image = FrameAligner::square().align(&frame).unwrap();

        assert!(image.is_square());
        assert_eq!(image.width, 8);
        assert_eq!(image.source_size, (12, 8));
        assert_eq!(image.data.len(), 8 * 8 * 4);
        assert_eq!(image.pixel(0, 0), Some(&RawColorFrame::pattern_pixel(2, 0)[..]));
        assert_eq!(image.pixel(7, 7), Some(&RawColorFrame::pattern_pixel(9, 7)[..]));
    }

    #[test]
    fn test_align_gray_frame() {
        let data: Vec<u8> = (0..12u8).collect();
        let frame = RawColorFrame::packed(4, 3, PixelFormat::Gray8, Bytes::from(data));
        let image = FrameAligner::square().align(&frame).unwrap();
        assert_eq!(image.width, 3);
        assert_eq!(image.data.as_ref(), &[0, 1, 2, 4, 5, 6, 8, 9, 10]);
    }

    #[test]
    fn test_align_rejects_missing_buffer() {
        let frame = RawColorFrame::packed(4, 4, PixelFormat::Bgra8, Bytes::new());
        assert_eq!(
            FrameAligner::square().align(&frame),
            Err(FrameError::MissingPixelBuffer)
        );
    }
}
