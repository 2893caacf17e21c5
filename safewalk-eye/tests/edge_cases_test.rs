//! Edge case tests for safewalk-eye

use bytes::Bytes;
use safewalk_core::detection::{BoundingBox, Detection};
use safewalk_core::frame::{FrameError, RawColorFrame, RawDepthFrame};
use safewalk_core::PixelFormat;
use safewalk_eye::{DepthSampler, FrameAligner, SetupError};

#[test]
fn test_zero_sized_frames() {
    let depth = RawDepthFrame::new(0, 10, 0, Bytes::from_static(&[0; 4]));
    assert_eq!(
        DepthSampler::default().sample(&depth),
        Err(FrameError::InvalidDimensions { width: 0, height: 10 })
    );

    let color = RawColorFrame::packed(10, 0, PixelFormat::Bgra8, Bytes::from_static(&[0; 4]));
    assert!(matches!(
        FrameAligner::square().align(&color),
        Err(FrameError::InvalidDimensions { .. })
    ));
}

#[test]
fn test_missing_pixel_buffer() {
    let depth = RawDepthFrame::new(2, 2, 8, Bytes::new());
    assert_eq!(DepthSampler::new(1).sample(&depth), Err(FrameError::MissingPixelBuffer));
}

#[test]
fn test_stride_smaller_than_row() {
    let depth = RawDepthFrame::new(4, 1, 8, Bytes::from(vec![0u8; 16]));
    assert_eq!(
        DepthSampler::new(1).sample(&depth),
        Err(FrameError::StrideTooSmall { bytes_per_row: 8, min: 16 })
    );
}

#[test]
fn test_last_row_without_padding_is_accepted() {
    let mut data = Vec::new();
    for value in [3.0f32, 2.0] {
        data.extend_from_slice(&value.to_ne_bytes());
        data.extend_from_slice(&[0xFF; 12]);
    }
    data.truncate(16 + 4);
    let frame = RawDepthFrame::new(1, 2, 16, Bytes::from(data));
    assert_eq!(DepthSampler::new(1).sample(&frame), Ok(Some(2.0)));
}

#[test]
fn test_zero_stride_treated_as_one() {
    let sampler = DepthSampler::new(0);
    assert_eq!(sampler.stride(), 1);
    let frame = RawDepthFrame::from_depths(2, 1, &[0.9, 0.4]);
    assert_eq!(sampler.sample(&frame), Ok(Some(0.4)));
}

#[test]
fn test_single_pixel_color_frame() {
    let image = FrameAligner::square()
        .align(&RawColorFrame::test_pattern(1, 1, 0))
        .unwrap();
    assert_eq!((image.width, image.height), (1, 1));
    assert_eq!(image.data.len(), 4);
}

#[test]
fn test_one_pixel_tall_strip() {
    let crop = FrameAligner::square().crop_rect(1000, 1);
    assert_eq!((crop.x, crop.y, crop.width, crop.height), (499, 0, 1, 1));
}

#[test]
fn test_caption_truncates_percent() {
    let bbox = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
    assert_eq!(Detection::new(bbox, "pole", 0.874).caption(), "pole (87%)");
    assert_eq!(Detection::new(bbox, "pole", 0.875).caption(), "pole (87%)");
    assert_eq!(Detection::new(bbox, "pole", 0.879).caption(), "pole (87%)");
    assert_eq!(Detection::new(bbox, "bench", 0.999).caption(), "bench (99%)");
    assert_eq!(Detection::new(bbox, "curb", 1.0).caption(), "curb (100%)");
    assert_eq!(Detection::new(bbox, "curb", 0.0).caption(), "curb (0%)");
}

#[test]
fn test_full_frame_box_is_valid() {
    let detection = Detection::new(BoundingBox::new(0.0, 0.0, 1.0, 1.0), "wall", 0.5);
    assert!(detection.is_valid());
    let outside = Detection::new(BoundingBox::new(0.8, 0.0, 0.5, 0.5), "wall", 0.5);
    assert!(!outside.is_valid());
}

#[test]
fn test_setup_error_messages() {
    let cases = [
        (SetupError::CameraUnavailable, "LiDAR camera unavailable"),
        (SetupError::InputSetupFailed, "Failed to set up camera input"),
        (SetupError::OutputSetupFailed, "Failed to set up camera output"),
        (SetupError::ConfigurationFailed, "Failed to configure camera"),
    ];
    for (error, message) in cases {
        assert_eq!(error.user_message(), message);
    }
}
