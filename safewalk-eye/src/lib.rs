//! safewalk-eye: obstacle awareness pipeline for SafeWalk
//!
//! Fuses a depth stream, a color stream and an object recognizer into one
//! shared state: the distance to the closest obstacle, the latest square
//! color image and the detections found in it.
//!
//! Frames arrive from a [`CaptureSource`] at their own rates and are handled
//! independently. Recognition runs asynchronously and never blocks frame
//! delivery.

pub mod aligner;
pub mod capture;
pub mod coordinator;
pub mod depth;
pub mod error;
pub mod fusion;
pub mod recognizer;
pub mod utils;

pub use aligner::FrameAligner;
pub use capture::{CaptureSource, Diagnostic, FrameHandlers};
pub use coordinator::{FrameOutcome, PipelineCoordinator, PipelineStats};
pub use depth::DepthSampler;
pub use error::{EyeError, InferenceError, SetupError};
pub use fusion::{FusionSnapshot, FusionState, FusionSubscription, Proximity};
pub use recognizer::{BoxOrigin, InferenceBackend, ObjectRecognizer};
