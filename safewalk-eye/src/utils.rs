//! Image conversion helpers for recognition backends

use crate::error::InferenceError;
use image::{imageops, imageops::FilterType, RgbImage};
use safewalk_core::frame::AlignedImage;

/// Convert an aligned image to an RGB buffer regardless of its pixel format.
pub fn to_rgb_image(image: &AlignedImage) -> Result<RgbImage, InferenceError> {
    if image.width == 0 || image.height == 0 {
        return Err(InferenceError::InvalidInput("image has no pixels".to_string()));
    }

    let bpp = image.format.bytes_per_pixel();
    let expected = image
        .width
        .checked_mul(image.height)
        .and_then(|p| p.checked_mul(bpp))
        .ok_or_else(|| InferenceError::InvalidInput("image dimensions overflow".to_string()))?;
    if image.data.len() < expected {
        return Err(InferenceError::InvalidInput(format!(
            "image buffer holds {} bytes, expected {}",
            image.data.len(),
            expected
        )));
    }

    let width = u32::try_from(image.width)
        .map_err(|_| InferenceError::InvalidInput("image too wide".to_string()))?;
    let height = u32::try_from(image.height)
        .map_err(|_| InferenceError::InvalidInput("image too tall".to_string()))?;

    let mut rgb = Vec::with_capacity(image.width * image.height * 3);
    for pixel in image.data[..expected].chunks_exact(bpp) {
        rgb.extend_from_slice(&image.format.to_rgb(pixel));
    }

    RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| InferenceError::InvalidInput("RGB buffer size mismatch".to_string()))
}

/// Resize to the model's input size and emit a `[3, H, W]` float tensor in
/// RGB order with values normalized to `[0, 1]`.
pub fn prepare_input(image: &AlignedImage, input_size: (u32, u32)) -> Result<Vec<f32>, InferenceError> {
    let (target_width, target_height) = input_size;
    if target_width == 0 || target_height == 0 {
        return Err(InferenceError::InvalidInput("target dimensions cannot be zero".to_string()));
    }

    let total = (target_width as usize)
        .checked_mul(target_height as usize)
        .and_then(|p| p.checked_mul(3))
        .ok_or_else(|| InferenceError::InvalidInput("target dimensions too large".to_string()))?;
    if total > 100_000_000 {
        return Err(InferenceError::InvalidInput(
            "target dimensions too large (max 100M elements)".to_string(),
        ));
    }

    let rgb = to_rgb_image(image)?;
    let resized = if rgb.dimensions() == (target_width, target_height) {
        rgb
    } else {
        imageops::resize(&rgb, target_width, target_height, FilterType::Triangle)
    };

    let plane = (target_width as usize) * (target_height as usize);
    let mut tensor = vec![0.0f32; total];
    for (index, pixel) in resized.pixels().enumerate() {
        for channel in 0..3 {
            tensor[channel * plane + index] = pixel[channel] as f32 / 255.0;
        }
    }

    Ok(tensor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use safewalk_core::frame::CropRect;
    use safewalk_core::PixelFormat;

    fn image(width: usize, height: usize, format: PixelFormat, data: Vec<u8>) -> AlignedImage {
        AlignedImage {
            width,
            height,
            format,
            data: Bytes::from(data),
            crop: CropRect { x: 0, y: 0, width, height },
            source_size: (width, height),
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_to_rgb_from_bgra() {
        let img = image(1, 1, PixelFormat::Bgra8, vec![10, 20, 30, 255]);
        let rgb = to_rgb_image(&img).unwrap();
        assert_eq!(rgb.get_pixel(0, 0).0, [30, 20, 10]);
    }

    #[test]
    fn test_to_rgb_rejects_short_buffer() {
        let img = image(2, 2, PixelFormat::Rgb8, vec![0; 5]);
        assert!(matches!(to_rgb_image(&img), Err(InferenceError::InvalidInput(_))));
    }

    #[test]
    fn test_prepare_input_is_chw() {
        // 2x1 RGB: red then blue
        let img = image(2, 1, PixelFormat::Rgb8, vec![255, 0, 0, 0, 0, 255]);
        let tensor = prepare_input(&img, (2, 1)).unwrap();
        assert_eq!(tensor, vec![1.0, 0.0, 0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_prepare_input_resizes() {
        let img = image(4, 4, PixelFormat::Gray8, vec![128; 16]);
        let tensor = prepare_input(&img, (2, 2)).unwrap();
        assert_eq!(tensor.len(), 12);
        assert!(tensor.iter().all(|v| (*v - 128.0 / 255.0).abs() < 1e-3));
    }

    #[test]
    fn test_prepare_input_zero_target() {
        let img = image(1, 1, PixelFormat::Gray8, vec![0]);
        assert!(prepare_input(&img, (0, 10)).is_err());
    }
}
