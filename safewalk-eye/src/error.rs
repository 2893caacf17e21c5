//! Error types for safewalk-eye
//!
//! Failures fall into three tiers. Setup failures stop the pipeline from
//! starting and are the only ones shown to the user. Frame failures skip a
//! single frame. Inference failures turn into an empty detection list.

use safewalk_core::Error as CoreError;
use thiserror::Error;

pub use safewalk_core::FrameError;

/// Capture hardware could not be brought up. Fatal to `start()`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SetupError {
    #[error("depth camera unavailable")]
    CameraUnavailable,

    #[error("camera input setup failed")]
    InputSetupFailed,

    #[error("camera output setup failed")]
    OutputSetupFailed,

    #[error("camera configuration failed")]
    ConfigurationFailed,

    #[error("capture setup failed: {0}")]
    Other(String),
}

impl SetupError {
    /// Text shown to the user when the pipeline cannot start.
    pub fn user_message(&self) -> String {
        match self {
            SetupError::CameraUnavailable => "LiDAR camera unavailable".to_string(),
            SetupError::InputSetupFailed => "Failed to set up camera input".to_string(),
            SetupError::OutputSetupFailed => "Failed to set up camera output".to_string(),
            SetupError::ConfigurationFailed => "Failed to configure camera".to_string(),
            SetupError::Other(detail) => format!("An unexpected error occurred: {}", detail),
        }
    }
}

/// The recognition model failed for one frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InferenceError {
    #[error("recognition model unavailable")]
    ModelUnavailable,

    #[error("recognition request failed: {0}")]
    Request(String),

    #[error("invalid model input: {0}")]
    InvalidInput(String),
}

#[derive(Error, Debug)]
pub enum EyeError {
    #[error("Setup error: {0}")]
    Setup(#[from] SetupError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

impl From<safewalk_core::ConfigError> for EyeError {
    fn from(err: safewalk_core::ConfigError) -> Self {
        EyeError::Config(err.to_string())
    }
}

impl From<EyeError> for CoreError {
    fn from(err: EyeError) -> Self {
        match err {
            EyeError::Core(inner) => inner,
            EyeError::Frame(frame) => CoreError::InvalidFrame(frame.to_string()),
            EyeError::Config(msg) => CoreError::Configuration(msg),
            other => CoreError::Pipeline(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_error_user_messages() {
        assert_eq!(SetupError::CameraUnavailable.user_message(), "LiDAR camera unavailable");
        assert_eq!(SetupError::InputSetupFailed.user_message(), "Failed to set up camera input");
        assert_eq!(SetupError::OutputSetupFailed.user_message(), "Failed to set up camera output");
        assert_eq!(SetupError::ConfigurationFailed.user_message(), "Failed to configure camera");
        assert_eq!(
            SetupError::Other("busy".to_string()).user_message(),
            "An unexpected error occurred: busy"
        );
    }

    #[test]
    fn test_eye_error_display() {
        let err = EyeError::Runtime("no reactor".to_string());
        assert!(err.to_string().contains("Runtime error"));
        assert!(err.to_string().contains("no reactor"));
    }

    #[test]
    fn test_eye_error_from_setup() {
        let err: EyeError = SetupError::CameraUnavailable.into();
        assert!(matches!(err, EyeError::Setup(SetupError::CameraUnavailable)));
    }

    #[test]
    fn test_eye_error_to_core_error() {
        let core: CoreError = EyeError::Frame(FrameError::MissingPixelBuffer).into();
        match core {
            CoreError::InvalidFrame(msg) => assert!(msg.contains("no pixel buffer")),
            _ => panic!("Expected InvalidFrame error"),
        }

        let core: CoreError = EyeError::Inference(InferenceError::ModelUnavailable).into();
        assert!(matches!(core, CoreError::Pipeline(_)));
    }
}
