//! Interface to the capture hardware collaborator
//!
//! The pipeline does not talk to camera APIs. A [`CaptureSource`] owns the
//! device session and pushes frames into the [`FrameHandlers`] it receives
//! when the pipeline starts. Color and depth are delivered from independent
//! contexts at their own rates.

use crate::error::SetupError;
use chrono::{DateTime, Utc};
use safewalk_core::config::CaptureConfig;
use safewalk_core::frame::{RawColorFrame, RawDepthFrame};
use std::sync::Arc;

pub type ColorFrameHandler = Arc<dyn Fn(RawColorFrame) + Send + Sync>;
pub type DepthFrameHandler = Arc<dyn Fn(RawDepthFrame) + Send + Sync>;

/// Callbacks a capture source invokes for every delivered frame. Handlers
/// return quickly and never wait on recognition.
#[derive(Clone)]
pub struct FrameHandlers {
    on_color: ColorFrameHandler,
    on_depth: DepthFrameHandler,
}

impl FrameHandlers {
    pub fn new(on_color: ColorFrameHandler, on_depth: DepthFrameHandler) -> Self {
        Self { on_color, on_depth }
    }

    pub fn deliver_color(&self, frame: RawColorFrame) {
        (self.on_color)(frame)
    }

    pub fn deliver_depth(&self, frame: RawDepthFrame) {
        (self.on_depth)(frame)
    }
}

impl std::fmt::Debug for FrameHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameHandlers").finish_non_exhaustive()
    }
}

/// A device session producing color and depth frames.
pub trait CaptureSource: Send + Sync {
    /// Configure the device and begin delivering frames to `handlers`.
    fn start(&self, handlers: FrameHandlers, config: &CaptureConfig) -> Result<(), SetupError>;

    /// Stop delivering frames. Must be safe to call when not started.
    fn stop(&self);

    fn name(&self) -> &str {
        "capture-source"
    }
}

/// A setup failure as reported to the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub error: SetupError,
    /// User-facing text
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Diagnostic {
    pub fn from_setup_error(error: SetupError) -> Self {
        Self {
            message: error.user_message(),
            error,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_handlers_route_by_kind() {
        let colors = Arc::new(AtomicUsize::new(0));
        let depths = Arc::new(AtomicUsize::new(0));
        let (c, d) = (colors.clone(), depths.clone());
        let handlers = FrameHandlers::new(
            Arc::new(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
            Arc::new(move |_| {
                d.fetch_add(1, Ordering::SeqCst);
            }),
        );

        handlers.deliver_depth(RawDepthFrame::from_depths(1, 1, &[1.0]));
        handlers.deliver_depth(RawDepthFrame::from_depths(1, 1, &[1.0]));
        handlers.deliver_color(RawColorFrame::test_pattern(2, 2, 0));

        assert_eq!(colors.load(Ordering::SeqCst), 1);
        assert_eq!(depths.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_diagnostic_carries_user_message() {
        let diagnostic = Diagnostic::from_setup_error(SetupError::OutputSetupFailed);
        assert_eq!(diagnostic.message, "Failed to set up camera output");
        assert_eq!(diagnostic.error, SetupError::OutputSetupFailed);
    }
}
