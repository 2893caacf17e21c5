// Layered configuration for the SafeWalk fusion pipeline

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Default proximity warning distance: one foot, in meters.
pub const DEFAULT_WARNING_THRESHOLD_M: f32 = 0.3048;

/// Depth sampling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DepthConfig {
    /// Sample every k-th row and every k-th column
    pub sample_stride: usize,
}

impl Default for DepthConfig {
    fn default() -> Self {
        Self { sample_stride: 5 }
    }
}

/// Color frame alignment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    /// Width / height of the output crop. 1.0 yields a square image.
    pub target_aspect_ratio: f32,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self { target_aspect_ratio: 1.0 }
    }
}

/// Object recognition configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Run the recognizer on aligned frames
    pub enabled: bool,
    /// Detections below this confidence are dropped
    pub min_confidence: f32,
    /// IoU above which a later, overlapping detection of the same label is
    /// dropped. `None` keeps everything the model returns.
    pub overlap_threshold: Option<f32>,
    /// Upper bound on concurrently running recognitions per session. A new
    /// frame past the bound aborts the oldest running one.
    pub max_in_flight: usize,
    /// Upper bound on detections published for one frame
    pub max_detections: usize,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_confidence: 0.0,
            overlap_threshold: None,
            max_in_flight: 4,
            max_detections: 100,
        }
    }
}

/// Near-object warning configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarningConfig {
    /// Distances below this (meters) count as near
    pub threshold_m: f32,
}

impl Default for WarningConfig {
    fn default() -> Self {
        Self {
            threshold_m: DEFAULT_WARNING_THRESHOLD_M,
        }
    }
}

/// Settings handed to the capture collaborator when a session starts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Target color frame rate (frames per second)
    pub color_fps: u32,
    /// Target depth frame rate (frames per second)
    pub depth_fps: u32,
    /// Ask the depth sensor for temporally filtered depth
    pub depth_filtering: bool,
    /// Color resolution (width, height)
    pub resolution: (u32, u32),
    /// Depth map resolution (width, height)
    pub depth_resolution: (u32, u32),
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            color_fps: 30,
            depth_fps: 15,
            depth_filtering: true,
            resolution: (1920, 1080),
            depth_resolution: (256, 192),
        }
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SafewalkConfig {
    pub depth: DepthConfig,
    pub alignment: AlignmentConfig,
    pub recognition: RecognitionConfig,
    pub warning: WarningConfig,
    pub capture: CaptureConfig,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for crate::Error {
    fn from(err: ConfigError) -> Self {
        crate::Error::Configuration(err.to_string())
    }
}

impl SafewalkConfig {
    /// Load configuration from a JSON, TOML or YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;
        Self::from_str(&content)
    }

    /// Load configuration from a string, trying JSON, then TOML, then YAML
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        if let Ok(config) = serde_json::from_str::<SafewalkConfig>(content) {
            return Ok(config);
        }

        let toml_err = match toml::from_str::<SafewalkConfig>(content) {
            Ok(config) => return Ok(config),
            Err(e) => e,
        };

        // YAML accepts almost anything, so only trust it for mappings
        match serde_yaml::from_str::<serde_yaml::Value>(content) {
            Ok(serde_yaml::Value::Mapping(_)) => serde_yaml::from_str::<SafewalkConfig>(content)
                .map_err(|e| ConfigError::ParseError(e.to_string())),
            _ => Err(ConfigError::ParseError(format!(
                "not valid JSON, TOML or YAML ({})",
                toml_err.to_string().trim()
            ))),
        }
    }

    /// Defaults overridden by `SAFEWALK_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Override fields from `SAFEWALK_*` environment variables. Unparseable
    /// values are ignored.
    pub fn apply_env(&mut self) {
        if let Some(stride) = env_parse::<usize>("SAFEWALK_SAMPLE_STRIDE") {
            self.depth.sample_stride = stride;
        }
        if let Some(threshold) = env_parse::<f32>("SAFEWALK_WARNING_THRESHOLD") {
            self.warning.threshold_m = threshold;
        }
        if let Some(max) = env_parse::<usize>("SAFEWALK_MAX_IN_FLIGHT") {
            self.recognition.max_in_flight = max;
        }
        if let Some(enabled) = env_parse::<bool>("SAFEWALK_RECOGNITION") {
            self.recognition.enabled = enabled;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.depth.sample_stride == 0 || self.depth.sample_stride > 64 {
            return Err(ConfigError::ValidationError(
                "depth.sample_stride must be between 1 and 64".to_string(),
            ));
        }

        let ratio = self.alignment.target_aspect_ratio;
        if !ratio.is_finite() || ratio <= 0.0 {
            return Err(ConfigError::ValidationError(
                "alignment.target_aspect_ratio must be a positive number".to_string(),
            ));
        }

        let min_confidence = self.recognition.min_confidence;
        if !(0.0..=1.0).contains(&min_confidence) {
            return Err(ConfigError::ValidationError(
                "recognition.min_confidence must be within [0, 1]".to_string(),
            ));
        }

        if let Some(threshold) = self.recognition.overlap_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(ConfigError::ValidationError(
                    "recognition.overlap_threshold must be within [0, 1]".to_string(),
                ));
            }
        }

        if self.recognition.max_in_flight == 0 {
            return Err(ConfigError::ValidationError(
                "recognition.max_in_flight must be > 0".to_string(),
            ));
        }

        if self.recognition.max_detections == 0 {
            return Err(ConfigError::ValidationError(
                "recognition.max_detections must be > 0".to_string(),
            ));
        }

        if !self.warning.threshold_m.is_finite() || self.warning.threshold_m <= 0.0 {
            return Err(ConfigError::ValidationError(
                "warning.threshold_m must be a positive distance".to_string(),
            ));
        }

        let capture = &self.capture;
        if capture.color_fps == 0 || capture.color_fps > 120 {
            return Err(ConfigError::ValidationError(
                "capture.color_fps must be between 1 and 120".to_string(),
            ));
        }
        if capture.depth_fps == 0 || capture.depth_fps > 120 {
            return Err(ConfigError::ValidationError(
                "capture.depth_fps must be between 1 and 120".to_string(),
            ));
        }
        for (name, (w, h)) in [
            ("capture.resolution", capture.resolution),
            ("capture.depth_resolution", capture.depth_resolution),
        ] {
            if w == 0 || h == 0 {
                return Err(ConfigError::ValidationError(format!("{} must be non-zero", name)));
            }
            if w > 7680 || h > 4320 {
                return Err(ConfigError::ValidationError(format!("{} too large (max 8K)", name)));
            }
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_default() {
        let config = SafewalkConfig::default();
        assert_eq!(config.depth.sample_stride, 5);
        assert_eq!(config.alignment.target_aspect_ratio, 1.0);
        assert!(config.recognition.enabled);
        assert_eq!(config.recognition.max_in_flight, 4);
        assert_eq!(config.warning.threshold_m, DEFAULT_WARNING_THRESHOLD_M);
        assert_eq!(config.capture.color_fps, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_stride() {
        let mut config = SafewalkConfig::default();
        config.depth.sample_stride = 0;
        assert!(config.validate().is_err());

        config.depth.sample_stride = 65;
        assert!(config.validate().is_err());

        config.depth.sample_stride = 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_aspect_ratio() {
        let mut config = SafewalkConfig::default();
        config.alignment.target_aspect_ratio = 0.0;
        assert!(config.validate().is_err());

        config.alignment.target_aspect_ratio = f32::NAN;
        assert!(config.validate().is_err());

        config.alignment.target_aspect_ratio = 0.75;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_recognition() {
        let mut config = SafewalkConfig::default();
        config.recognition.min_confidence = 1.5;
        assert!(config.validate().is_err());

        config.recognition.min_confidence = 0.5;
        config.recognition.overlap_threshold = Some(-0.1);
        assert!(config.validate().is_err());

        config.recognition.overlap_threshold = Some(0.5);
        config.recognition.max_in_flight = 0;
        assert!(config.validate().is_err());

        config.recognition.max_in_flight = 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_capture() {
        let mut config = SafewalkConfig::default();
        config.capture.color_fps = 0;
        assert!(config.validate().is_err());

        config.capture.color_fps = 30;
        config.capture.resolution = (7681, 1080);
        assert!(config.validate().is_err());

        config.capture.resolution = (1920, 1080);
        config.capture.depth_resolution = (0, 192);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_str_json() {
        let config = SafewalkConfig::from_str(r#"{"depth": {"sample_stride": 3}}"#).unwrap();
        assert_eq!(config.depth.sample_stride, 3);
        assert_eq!(config.capture.color_fps, 30);
    }

    #[test]
    fn test_from_str_toml() {
        let config = SafewalkConfig::from_str(
            "[warning]\nthreshold_m = 0.5\n\n[recognition]\nmin_confidence = 0.4\n",
        )
        .unwrap();
        assert_eq!(config.warning.threshold_m, 0.5);
        assert_eq!(config.recognition.min_confidence, 0.4);
        assert_eq!(config.depth.sample_stride, 5);
    }

    #[test]
    fn test_from_str_yaml() {
        let config = SafewalkConfig::from_str("alignment:\n  target_aspect_ratio: 0.75\n").unwrap();
        assert_eq!(config.alignment.target_aspect_ratio, 0.75);
    }

    #[test]
    fn test_from_str_garbage() {
        let err = SafewalkConfig::from_str("this is = = not config").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[depth]\nsample_stride = 2").unwrap();
        let config = SafewalkConfig::from_file(file.path()).unwrap();
        assert_eq!(config.depth.sample_stride, 2);
    }

    #[test]
    fn test_from_file_missing() {
        let err = SafewalkConfig::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }

    #[test]
    fn test_config_error_into_core_error() {
        let err: crate::Error = ConfigError::ValidationError("bad".to_string()).into();
        assert!(err.to_string().contains("Configuration error"));
    }
}
