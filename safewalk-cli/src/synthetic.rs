//! Synthetic capture hardware and recognizer for running the pipeline
//! without a device.

use async_trait::async_trait;
use parking_lot::Mutex;
use safewalk_core::config::CaptureConfig;
use safewalk_core::detection::{BoundingBox, Detection};
use safewalk_core::frame::{AlignedImage, RawColorFrame, RawDepthFrame};
use safewalk_eye::{BoxOrigin, CaptureSource, FrameHandlers, InferenceBackend, InferenceError, SetupError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Seconds for one approach-and-retreat cycle of the simulated obstacle
const APPROACH_PERIOD_SECS: f32 = 8.0;
const FAR_M: f32 = 3.0;
const NEAR_M: f32 = 0.15;

/// Distance of the simulated obstacle `t` seconds into the run: it walks in
/// from `FAR_M` to `NEAR_M` and back out again.
pub fn obstacle_distance(t: f32) -> f32 {
    let phase = (t / APPROACH_PERIOD_SECS).fract();
    let closeness = 1.0 - (2.0 * phase - 1.0).abs();
    FAR_M - (FAR_M - NEAR_M) * closeness
}

/// A depth frame with a wall at `background` and a square obstacle in the
/// middle at `obstacle`. The outer border reads as sensor dropouts.
pub fn depth_frame(width: usize, height: usize, background: f32, obstacle: f32) -> RawDepthFrame {
    let mut depths = vec![background; width * height];
    let (cx, cy) = (width / 2, height / 2);
    let half = (width.min(height) / 8).max(1);
    for y in 0..height {
        for x in 0..width {
            let value = if x == 0 || y == 0 || x + 1 == width || y + 1 == height {
                0.0
            } else if x.abs_diff(cx) <= half && y.abs_diff(cy) <= half {
                obstacle
            } else {
                continue;
            };
            depths[y * width + x] = value;
        }
    }
    RawDepthFrame::from_depths_padded(width, height, &depths, 32)
}

/// Simulated setup failure requested on the command line.
pub fn parse_failure(name: &str) -> Option<SetupError> {
    match name {
        "camera" => Some(SetupError::CameraUnavailable),
        "input" => Some(SetupError::InputSetupFailed),
        "output" => Some(SetupError::OutputSetupFailed),
        "configure" => Some(SetupError::ConfigurationFailed),
        "none" => None,
        other => Some(SetupError::Other(other.to_string())),
    }
}

/// Capture source that renders frames on two threads, one per stream.
pub struct SyntheticCapture {
    running: Arc<AtomicBool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    failure: Option<SetupError>,
}

impl SyntheticCapture {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            threads: Mutex::new(Vec::new()),
            failure: None,
        }
    }

    /// A source whose `start` always fails with `error`.
    pub fn failing(error: SetupError) -> Self {
        Self {
            failure: Some(error),
            ..Self::new()
        }
    }

    fn spawn_stream<F>(&self, name: &str, fps: u32, mut produce: F) -> Result<JoinHandle<()>, SetupError>
    where
        F: FnMut(f32) + Send + 'static,
    {
        let running = self.running.clone();
        let interval = Duration::from_secs_f64(1.0 / fps.max(1) as f64);
        thread::Builder::new()
            .name(format!("synthetic-{}", name))
            .spawn(move || {
                let started = Instant::now();
                let mut next = started;
                while running.load(Ordering::Acquire) {
                    produce(started.elapsed().as_secs_f32());
                    next += interval;
                    if let Some(wait) = next.checked_duration_since(Instant::now()) {
                        thread::sleep(wait);
                    }
                }
            })
            .map_err(|e| SetupError::Other(format!("failed to spawn {} thread: {}", name, e)))
    }
}

impl Default for SyntheticCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureSource for SyntheticCapture {
    fn start(&self, handlers: FrameHandlers, config: &CaptureConfig) -> Result<(), SetupError> {
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        if self.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let (color_w, color_h) = (config.resolution.0 as usize, config.resolution.1 as usize);
        let (depth_w, depth_h) = (
            config.depth_resolution.0 as usize,
            config.depth_resolution.1 as usize,
        );

        let color_handlers = handlers.clone();
        let color = self.spawn_stream("color", config.color_fps, move |_| {
            color_handlers.deliver_color(RawColorFrame::test_pattern(color_w, color_h, 64));
        });
        let depth = self.spawn_stream("depth", config.depth_fps, move |t| {
            handlers.deliver_depth(depth_frame(depth_w, depth_h, FAR_M + 1.0, obstacle_distance(t)));
        });

        let mut threads = self.threads.lock();
        for stream in [color, depth] {
            match stream {
                Ok(handle) => threads.push(handle),
                Err(e) => {
                    self.running.store(false, Ordering::Release);
                    return Err(e);
                }
            }
        }

        info!(
            color_fps = config.color_fps,
            depth_fps = config.depth_fps,
            "Synthetic capture started at {}x{}",
            color_w,
            color_h
        );
        Ok(())
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Release);
        let current = thread::current().id();
        for handle in self.threads.lock().drain(..) {
            // A stream thread may end up here when it drops the last pipeline handle
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!("Synthetic capture thread panicked");
            }
        }
        debug!("Synthetic capture stopped");
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

/// Stand-in recognizer that "sees" a pole whose confidence tracks how close
/// the simulated obstacle is.
pub struct ScriptedBackend {
    latency: Duration,
    started: Instant,
    calls: AtomicU64,
}

impl ScriptedBackend {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            started: Instant::now(),
            calls: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    async fn infer(&self, image: &AlignedImage) -> Result<Vec<Detection>, InferenceError> {
        if image.width == 0 || image.height == 0 {
            return Err(InferenceError::InvalidInput("empty image".to_string()));
        }
        let call = self.calls.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(self.latency).await;

        let distance = obstacle_distance(self.started.elapsed().as_secs_f32());
        let closeness = ((FAR_M - distance) / (FAR_M - NEAR_M)).clamp(0.0, 1.0);
        let size = 0.15 + 0.5 * closeness;
        let pole = Detection::new(
            BoundingBox::new((1.0 - size) / 2.0, (1.0 - size) / 2.0, size, size),
            "pole",
            0.4 + 0.55 * closeness,
        );

        let mut detections = vec![pole];
        if call % 4 == 0 {
            detections.push(Detection::new(BoundingBox::new(0.05, 0.6, 0.15, 0.35), "person", 0.62));
        }
        Ok(detections)
    }

    fn box_origin(&self) -> BoxOrigin {
        BoxOrigin::TopLeft
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
