//! safewalk-core: data model for the SafeWalk sensor-fusion pipeline
//!
//! Raw depth and color frames as delivered by the capture hardware, the
//! aligned image derived from a color frame, recognized objects, and the
//! layered pipeline configuration.

pub mod config;
pub mod detection;
pub mod error;
pub mod frame;

pub use config::{ConfigError, SafewalkConfig};
pub use detection::{BoundingBox, Detection, PixelRect};
pub use error::{Error, Result};
pub use frame::{AlignedImage, CropRect, FrameError, PixelFormat, RawColorFrame, RawDepthFrame};
