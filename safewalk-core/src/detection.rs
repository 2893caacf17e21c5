//! Recognized objects and their normalized bounding boxes.

use serde::{Deserialize, Serialize};

/// Axis-aligned box in normalized image coordinates (`[0, 1]` on both axes,
/// origin at the top-left corner, y growing downwards).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Pixel rectangle produced by [`BoundingBox::to_pixels`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Convert a box whose origin is the bottom-left corner (y growing
    /// upwards) into the top-left convention used everywhere else.
    pub fn from_bottom_left(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self::new(x, 1.0 - y - height, width, height)
    }

    pub fn max_x(&self) -> f32 {
        self.x + self.width
    }

    pub fn max_y(&self) -> f32 {
        self.y + self.height
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// All components finite, non-negative extents, and the box lies inside
    /// the unit square (with a small tolerance for model rounding).
    pub fn is_normalized(&self) -> bool {
        const EPS: f32 = 1e-4;
        let finite = self.x.is_finite()
            && self.y.is_finite()
            && self.width.is_finite()
            && self.height.is_finite();
        finite
            && self.width >= 0.0
            && self.height >= 0.0
            && self.x >= -EPS
            && self.y >= -EPS
            && self.max_x() <= 1.0 + EPS
            && self.max_y() <= 1.0 + EPS
    }

    /// Scale to a pixel rectangle for an image of `width` x `height`.
    pub fn to_pixels(&self, width: f32, height: f32) -> PixelRect {
        PixelRect {
            x: self.x * width,
            y: self.y * height,
            width: self.width * width,
            height: self.height * height,
        }
    }

    /// Intersection over union, 0.0 for disjoint or degenerate boxes.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let inter_w = self.max_x().min(other.max_x()) - self.x.max(other.x);
        let inter_h = self.max_y().min(other.max_y()) - self.y.max(other.y);
        if inter_w <= 0.0 || inter_h <= 0.0 {
            return 0.0;
        }

        let inter = inter_w * inter_h;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 || !union.is_finite() {
            return 0.0;
        }

        let iou = inter / union;
        if iou.is_finite() {
            iou.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// One recognized object instance in one frame. There is no identity across
/// frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub label: String,
    pub confidence: f32,
}

impl Detection {
    pub fn new(bbox: BoundingBox, label: impl Into<String>, confidence: f32) -> Self {
        Self {
            bbox,
            label: label.into(),
            confidence,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.bbox.is_normalized()
            && self.confidence.is_finite()
            && (0.0..=1.0).contains(&self.confidence)
    }

    /// Overlay caption, e.g. `pole (87%)`. The percentage is truncated, so
    /// 0.879 still reads 87%.
    pub fn caption(&self) -> String {
        let percent = (self.confidence * 100.0) as i32;
        format!("{} ({}%)", self.label, percent)
    }
}
