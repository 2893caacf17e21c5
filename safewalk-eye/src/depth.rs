//! Closest-obstacle estimate from a depth map

use crate::error::FrameError;
use safewalk_core::config::DepthConfig;
use safewalk_core::frame::{RawDepthFrame, DEPTH_ELEMENT_SIZE};
use tracing::trace;

/// Scans a depth map on a fixed grid and reports the smallest valid depth.
///
/// Only every `stride`-th row and column is read. Readings that are not
/// strictly positive and finite are sensor dropouts and are ignored.
#[derive(Debug, Clone)]
pub struct DepthSampler {
    stride: usize,
}

impl Default for DepthSampler {
    fn default() -> Self {
        Self::from_config(&DepthConfig::default())
    }
}

impl DepthSampler {
    /// A stride of zero is treated as one.
    pub fn new(stride: usize) -> Self {
        Self {
            stride: stride.max(1),
        }
    }

    pub fn from_config(config: &DepthConfig) -> Self {
        Self::new(config.sample_stride)
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Minimum sampled depth in meters, or `Ok(None)` when no sampled cell
    /// holds a usable reading.
    pub fn sample(&self, frame: &RawDepthFrame) -> Result<Option<f32>, FrameError> {
        frame.validate()?;

        let data = frame.data.as_ref();
        let mut closest = f32::INFINITY;
        let mut valid = 0usize;

        for y in (0..frame.height).step_by(self.stride) {
            let row_start = y * frame.bytes_per_row;
            for x in (0..frame.width).step_by(self.stride) {
                let offset = row_start + x * DEPTH_ELEMENT_SIZE;
                let mut raw = [0u8; DEPTH_ELEMENT_SIZE];
                raw.copy_from_slice(&data[offset..offset + DEPTH_ELEMENT_SIZE]);
                let depth = f32::from_ne_bytes(raw);

                if depth > 0.0 && depth.is_finite() {
                    valid += 1;
                    if depth < closest {
                        closest = depth;
                    }
                }
            }
        }

        trace!(
            width = frame.width,
            height = frame.height,
            stride = self.stride,
            valid,
            "depth frame sampled"
        );

        if valid == 0 {
            Ok(None)
        } else {
            Ok(Some(closest))
        }
    }
}
