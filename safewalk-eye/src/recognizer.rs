//! Object recognition glue around an external inference backend

use crate::error::InferenceError;
use async_trait::async_trait;
use futures_util::FutureExt;
use safewalk_core::config::RecognitionConfig;
use safewalk_core::detection::{BoundingBox, Detection};
use safewalk_core::frame::AlignedImage;
use std::cmp::Ordering;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

/// Corner the backend measures its normalized boxes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoxOrigin {
    #[default]
    TopLeft,
    /// y grows upwards from the bottom edge
    BottomLeft,
}

/// An object detection model. The model, its weights and its runtime live
/// outside this crate; implementations adapt them to this interface.
///
/// A panic inside `infer` is caught and treated like a failed request, as
/// long as the build unwinds on panic.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Run the model on one aligned image. Boxes are normalized to the image.
    async fn infer(&self, image: &AlignedImage) -> Result<Vec<Detection>, InferenceError>;

    fn box_origin(&self) -> BoxOrigin {
        BoxOrigin::TopLeft
    }

    fn name(&self) -> &str {
        "inference-backend"
    }
}

/// Wraps an optional backend and never fails: a missing model or a failed
/// request both come back as "no detections".
#[derive(Clone)]
pub struct ObjectRecognizer {
    backend: Option<Arc<dyn InferenceBackend>>,
    min_confidence: f32,
    overlap_threshold: Option<f32>,
    max_detections: usize,
}

impl std::fmt::Debug for ObjectRecognizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectRecognizer")
            .field("backend", &self.backend.as_ref().map(|b| b.name().to_string()))
            .field("min_confidence", &self.min_confidence)
            .field("overlap_threshold", &self.overlap_threshold)
            .field("max_detections", &self.max_detections)
            .finish()
    }
}

impl ObjectRecognizer {
    pub fn new(backend: Arc<dyn InferenceBackend>) -> Self {
        Self::with_backend(Some(backend))
    }

    /// Recognizer whose model failed to load.
    pub fn unavailable() -> Self {
        Self::with_backend(None)
    }

    /// Run a model loader, falling back to an unavailable recognizer when it
    /// fails.
    pub fn load<F>(loader: F) -> Self
    where
        F: FnOnce() -> Result<Arc<dyn InferenceBackend>, InferenceError>,
    {
        match loader() {
            Ok(backend) => {
                debug!("Recognition backend '{}' loaded", backend.name());
                Self::new(backend)
            }
            Err(e) => {
                warn!("Recognition model failed to load, detections disabled: {}", e);
                Self::unavailable()
            }
        }
    }

    fn with_backend(backend: Option<Arc<dyn InferenceBackend>>) -> Self {
        let defaults = RecognitionConfig::default();
        Self {
            backend,
            min_confidence: defaults.min_confidence,
            overlap_threshold: defaults.overlap_threshold,
            max_detections: defaults.max_detections,
        }
    }

    /// Apply post-processing settings from configuration.
    pub fn configure(mut self, config: &RecognitionConfig) -> Self {
        self.min_confidence = config.min_confidence;
        self.overlap_threshold = config.overlap_threshold;
        self.max_detections = config.max_detections.max(1);
        self
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    /// Detections for one image, in the order the backend produced them.
    /// Empty when the model is unavailable or the request fails.
    pub async fn recognize(&self, image: &AlignedImage) -> Vec<Detection> {
        let backend = match &self.backend {
            Some(backend) => backend,
            None => return Vec::new(),
        };

        let result = match AssertUnwindSafe(backend.infer(image)).catch_unwind().await {
            Ok(result) => result,
            Err(_) => {
                warn!("Recognition backend '{}' panicked", backend.name());
                return Vec::new();
            }
        };

        match result {
            Ok(raw) => {
                let count = raw.len();
                let detections = self.postprocess(raw, backend.box_origin());
                debug!(
                    backend = backend.name(),
                    raw = count,
                    kept = detections.len(),
                    "recognition finished"
                );
                detections
            }
            Err(e) => {
                warn!("Recognition failed on '{}': {}", backend.name(), e);
                Vec::new()
            }
        }
    }

    fn postprocess(&self, raw: Vec<Detection>, origin: BoxOrigin) -> Vec<Detection> {
        let detections: Vec<Detection> = raw
            .into_iter()
            .map(|mut detection| {
                if origin == BoxOrigin::BottomLeft {
                    let b = detection.bbox;
                    detection.bbox = BoundingBox::from_bottom_left(b.x, b.y, b.width, b.height);
                }
                detection
            })
            .filter(|d| d.is_valid() && d.confidence >= self.min_confidence)
            .collect();

        let detections = match self.overlap_threshold {
            Some(threshold) => suppress_overlaps(detections, threshold),
            None => detections,
        };

        keep_most_confident(detections, self.max_detections)
    }
}

fn by_confidence_desc(detections: &[Detection]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..detections.len()).collect();
    order.sort_by(|&a, &b| {
        detections[b]
            .confidence
            .partial_cmp(&detections[a].confidence)
            .unwrap_or(Ordering::Equal)
    });
    order
}

/// Drop detections that overlap a more confident detection of the same
/// label by more than `threshold` IoU. Survivors keep their original order.
fn suppress_overlaps(detections: Vec<Detection>, threshold: f32) -> Vec<Detection> {
    let order = by_confidence_desc(&detections);
    let mut suppressed = vec![false; detections.len()];

    for (rank, &i) in order.iter().enumerate() {
        if suppressed[i] {
            continue;
        }
        for &j in &order[rank + 1..] {
            if !suppressed[j]
                && detections[i].label == detections[j].label
                && detections[i].bbox.iou(&detections[j].bbox) > threshold
            {
                suppressed[j] = true;
            }
        }
    }

    detections
        .into_iter()
        .zip(suppressed)
        .filter_map(|(d, gone)| (!gone).then_some(d))
        .collect()
}

/// Cap the list at `max` entries, keeping the most confident ones in their
/// original order.
fn keep_most_confident(detections: Vec<Detection>, max: usize) -> Vec<Detection> {
    if detections.len() <= max {
        return detections;
    }

    let mut keep = vec![false; detections.len()];
    for &i in by_confidence_desc(&detections).iter().take(max) {
        keep[i] = true;
    }

    detections
        .into_iter()
        .zip(keep)
        .filter_map(|(d, k)| k.then_some(d))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(label: &str, confidence: f32, x: f32, y: f32, size: f32) -> Detection {
        Detection::new(BoundingBox::new(x, y, size, size), label, confidence)
    }

    #[test]
    fn test_suppress_overlaps_keeps_order() {
        let detections = vec![
            det("pole", 0.6, 0.10, 0.10, 0.3),
            det("car", 0.9, 0.50, 0.50, 0.3),
            det("pole", 0.8, 0.12, 0.12, 0.3),
        ];
        let kept = suppress_overlaps(detections, 0.5);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].label, "car");
        assert_eq!(kept[1].label, "pole");
        assert_eq!(kept[1].confidence, 0.8);
    }

    #[test]
    fn test_suppress_overlaps_ignores_other_labels() {
        let detections = vec![
            det("pole", 0.6, 0.1, 0.1, 0.3),
            det("person", 0.8, 0.1, 0.1, 0.3),
        ];
        assert_eq!(suppress_overlaps(detections, 0.5).len(), 2);
    }

    #[test]
    fn test_keep_most_confident() {
        let detections = vec![
            det("a", 0.2, 0.0, 0.0, 0.1),
            det("b", 0.9, 0.0, 0.0, 0.1),
            det("c", 0.5, 0.0, 0.0, 0.1),
        ];
        let kept = keep_most_confident(detections, 2);
        let labels: Vec<&str> = kept.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["b", "c"]);
    }

    #[test]
    fn test_postprocess_flips_bottom_left_boxes() {
        let recognizer = ObjectRecognizer::unavailable();
        let out = recognizer.postprocess(vec![det("pole", 0.87, 0.1, 0.1, 0.2)], BoxOrigin::BottomLeft);
        assert_eq!(out.len(), 1);
        assert!((out[0].bbox.y - 0.7).abs() < 1e-5);
    }

    #[test]
    fn test_postprocess_filters_invalid_and_low_confidence() {
        let config = RecognitionConfig {
            min_confidence: 0.5,
            ..RecognitionConfig::default()
        };
        let recognizer = ObjectRecognizer::unavailable().configure(&config);
        let out = recognizer.postprocess(
            vec![
                det("low", 0.3, 0.1, 0.1, 0.2),
                det("nan", f32::NAN, 0.1, 0.1, 0.2),
                det("outside", 0.9, 0.9, 0.9, 0.5),
                det("ok", 0.7, 0.1, 0.1, 0.2),
            ],
            BoxOrigin::TopLeft,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].label, "ok");
    }

    #[test]
    fn test_load_failure_is_unavailable() {
        let recognizer = ObjectRecognizer::load(|| Err(InferenceError::ModelUnavailable));
        assert!(!recognizer.is_available());
    }
}
