//! Pipeline coordinator: routes frames to their processors and publishes
//! results into the fusion state.
//!
//! Depth and color frames are handled on the context that delivers them and
//! never wait on each other. Recognition runs on the tokio runtime; its
//! results land in the fusion state whenever they finish, tagged with the
//! session they were started in so a stopped pipeline ignores them.

use crate::aligner::FrameAligner;
use crate::capture::{CaptureSource, Diagnostic, FrameHandlers};
use crate::depth::DepthSampler;
use crate::error::{EyeError, FrameError, SetupError};
use crate::fusion::{FusionState, FusionSubscription};
use crate::recognizer::ObjectRecognizer;
use parking_lot::{Mutex, RwLock};
use safewalk_core::config::SafewalkConfig;
use safewalk_core::frame::{AlignedImage, RawColorFrame, RawDepthFrame};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, trace};

const DIAGNOSTIC_CHANNEL_SIZE: usize = 16;

/// What happened to one delivered frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Result written to the fusion state
    Published,
    /// Depth frame had no usable reading; the previous distance stays
    NoReading,
    /// A frame of the same kind was still being processed
    Dropped,
    /// The frame was malformed
    Skipped(FrameError),
    /// The pipeline is not running
    Ignored,
    /// The pipeline stopped while the frame was being processed
    Stale,
}

/// Counters since the coordinator was created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub depth_published: u64,
    pub depth_no_reading: u64,
    pub depth_dropped: u64,
    pub depth_skipped: u64,
    pub color_published: u64,
    pub color_dropped: u64,
    pub color_skipped: u64,
    pub frames_ignored: u64,
    pub recognitions_started: u64,
    pub recognitions_applied: u64,
    pub recognitions_discarded: u64,
    /// Aborted to make room for a newer frame
    pub recognitions_superseded: u64,
    /// Requests running right now
    pub recognitions_in_flight: u64,
}

#[derive(Default)]
struct Counters {
    depth_published: AtomicU64,
    depth_no_reading: AtomicU64,
    depth_dropped: AtomicU64,
    depth_skipped: AtomicU64,
    color_published: AtomicU64,
    color_dropped: AtomicU64,
    color_skipped: AtomicU64,
    frames_ignored: AtomicU64,
    recognitions_started: AtomicU64,
    recognitions_applied: AtomicU64,
    recognitions_discarded: AtomicU64,
    recognitions_superseded: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Counters {
    fn snapshot(&self) -> PipelineStats {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        PipelineStats {
            depth_published: get(&self.depth_published),
            depth_no_reading: get(&self.depth_no_reading),
            depth_dropped: get(&self.depth_dropped),
            depth_skipped: get(&self.depth_skipped),
            color_published: get(&self.color_published),
            color_dropped: get(&self.color_dropped),
            color_skipped: get(&self.color_skipped),
            frames_ignored: get(&self.frames_ignored),
            recognitions_started: get(&self.recognitions_started),
            recognitions_applied: get(&self.recognitions_applied),
            recognitions_discarded: get(&self.recognitions_discarded),
            recognitions_superseded: get(&self.recognitions_superseded),
            recognitions_in_flight: 0,
        }
    }
}

/// Held while a frame of one kind is being processed.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| BusyGuard(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One start..stop span.
struct Session {
    epoch: u64,
    max_in_flight: usize,
    tasks: Mutex<VecDeque<AbortHandle>>,
}

impl Session {
    fn new(epoch: u64, max_in_flight: usize) -> Self {
        Self {
            epoch,
            max_in_flight: max_in_flight.max(1),
            tasks: Mutex::new(VecDeque::new()),
        }
    }

    /// Track the task returned by `spawn`, first aborting the oldest
    /// unfinished tasks so no more than `max_in_flight` remain. Returns how
    /// many were aborted.
    fn admit(&self, spawn: impl FnOnce() -> AbortHandle) -> usize {
        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());

        let mut superseded = 0;
        while tasks.len() >= self.max_in_flight {
            match tasks.pop_front() {
                Some(oldest) => {
                    oldest.abort();
                    superseded += 1;
                }
                None => break,
            }
        }

        tasks.push_back(spawn());
        superseded
    }

    fn in_flight(&self) -> usize {
        self.tasks.lock().iter().filter(|t| !t.is_finished()).count()
    }

    fn abort_all(&self) -> usize {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        let mut aborted = 0;
        for task in tasks {
            if !task.is_finished() {
                task.abort();
                aborted += 1;
            }
        }
        aborted
    }
}

struct Inner {
    config: SafewalkConfig,
    sampler: DepthSampler,
    aligner: FrameAligner,
    recognizer: ObjectRecognizer,
    state: Arc<FusionState>,
    runtime: Handle,
    lifecycle: Mutex<()>,
    session: RwLock<Option<Arc<Session>>>,
    source: RwLock<Option<Arc<dyn CaptureSource>>>,
    depth_busy: AtomicBool,
    color_busy: AtomicBool,
    diagnostics: broadcast::Sender<Diagnostic>,
    error_message: Mutex<Option<String>>,
    counters: Counters,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if self.session.get_mut().take().is_some() {
            if let Some(source) = self.source.get_mut().take() {
                source.stop();
            }
        }
    }
}

/// Routes depth and color frames to their processors and owns the pipeline
/// lifecycle. Cloning yields another handle to the same pipeline.
#[derive(Clone)]
pub struct PipelineCoordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PipelineCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineCoordinator")
            .field("running", &self.is_running())
            .field("recognizer", &self.inner.recognizer)
            .field("stats", &self.stats())
            .finish()
    }
}

impl PipelineCoordinator {
    /// Create a stopped pipeline. Recognition tasks are spawned on `runtime`.
    pub fn new(
        config: SafewalkConfig,
        recognizer: ObjectRecognizer,
        runtime: Handle,
    ) -> Result<Self, EyeError> {
        config.validate()?;

        let (diagnostics, _) = broadcast::channel(DIAGNOSTIC_CHANNEL_SIZE);
        let recognizer = recognizer.configure(&config.recognition);

        Ok(Self {
            inner: Arc::new(Inner {
                sampler: DepthSampler::from_config(&config.depth),
                aligner: FrameAligner::from_config(&config.alignment),
                recognizer,
                state: Arc::new(FusionState::new()),
                runtime,
                lifecycle: Mutex::new(()),
                session: RwLock::new(None),
                source: RwLock::new(None),
                depth_busy: AtomicBool::new(false),
                color_busy: AtomicBool::new(false),
                diagnostics,
                error_message: Mutex::new(None),
                counters: Counters::default(),
                config,
            }),
        })
    }

    /// Create a stopped pipeline on the runtime of the calling context.
    pub fn with_current_runtime(
        config: SafewalkConfig,
        recognizer: ObjectRecognizer,
    ) -> Result<Self, EyeError> {
        let runtime = Handle::try_current()
            .map_err(|e| EyeError::Runtime(format!("no tokio runtime available: {}", e)))?;
        Self::new(config, recognizer, runtime)
    }

    /// Attach the hardware collaborator started and stopped with the
    /// pipeline. Replaces any previous source.
    pub fn attach_source(&self, source: Arc<dyn CaptureSource>) {
        let _lifecycle = self.inner.lifecycle.lock();
        info!("Capture source '{}' attached", source.name());
        *self.inner.source.write() = Some(source);
    }

    pub fn config(&self) -> &SafewalkConfig {
        &self.inner.config
    }

    /// Shared state for the presentation layer.
    pub fn state(&self) -> Arc<FusionState> {
        self.inner.state.clone()
    }

    pub fn subscribe(&self) -> FusionSubscription {
        self.inner.state.subscribe()
    }

    pub fn subscribe_diagnostics(&self) -> broadcast::Receiver<Diagnostic> {
        self.inner.diagnostics.subscribe()
    }

    /// Last setup failure text, cleared by reading it.
    pub fn take_error_message(&self) -> Option<String> {
        self.inner.error_message.lock().take()
    }

    pub fn is_running(&self) -> bool {
        self.inner.session.read().is_some()
    }

    pub fn stats(&self) -> PipelineStats {
        let mut stats = self.inner.counters.snapshot();
        if let Some(session) = self.current_session() {
            stats.recognitions_in_flight = session.in_flight() as u64;
        }
        stats
    }

    /// Callbacks for a capture source. They hold the pipeline weakly, so a
    /// source outliving the pipeline just delivers into the void.
    pub fn handlers(&self) -> FrameHandlers {
        let color: Weak<Inner> = Arc::downgrade(&self.inner);
        let depth = color.clone();
        FrameHandlers::new(
            Arc::new(move |frame| {
                if let Some(inner) = color.upgrade() {
                    PipelineCoordinator { inner }.on_color_frame(frame);
                }
            }),
            Arc::new(move |frame| {
                if let Some(inner) = depth.upgrade() {
                    PipelineCoordinator { inner }.on_depth_frame(frame);
                }
            }),
        )
    }

    /// Begin routing frames. Returns `Ok(false)` if already running. When a
    /// capture source is attached it is started here; if it fails, the
    /// failure is reported on the diagnostic channel and the pipeline stays
    /// stopped.
    pub fn start(&self) -> Result<bool, SetupError> {
        let _lifecycle = self.inner.lifecycle.lock();
        if self.inner.session.read().is_some() {
            return Ok(false);
        }

        let epoch = self.inner.state.epoch();
        let session = Arc::new(Session::new(epoch, self.inner.config.recognition.max_in_flight));
        *self.inner.session.write() = Some(session);

        let source = self.inner.source.read().clone();
        if let Some(source) = source {
            if let Err(e) = source.start(self.handlers(), &self.inner.config.capture) {
                if let Some(session) = self.inner.session.write().take() {
                    session.abort_all();
                }
                self.inner.state.reset();
                self.report_setup_failure(e.clone());
                return Err(e);
            }
            info!(epoch, source = source.name(), "Pipeline started");
        } else {
            info!(epoch, "Pipeline started without capture source");
        }

        Ok(true)
    }

    /// Stop routing, cancel in-flight recognition and restore the default
    /// fusion state. Returns `false` if already stopped.
    pub fn stop(&self) -> bool {
        let _lifecycle = self.inner.lifecycle.lock();
        let session = match self.inner.session.write().take() {
            Some(session) => session,
            None => return false,
        };

        let source = self.inner.source.read().clone();
        if let Some(source) = source {
            source.stop();
        }

        let aborted = session.abort_all();
        let epoch = self.inner.state.reset();
        info!(epoch, aborted, "Pipeline stopped");
        true
    }

    fn report_setup_failure(&self, error: SetupError) {
        let diagnostic = Diagnostic::from_setup_error(error);
        error!("Capture setup failed: {} ({})", diagnostic.error, diagnostic.message);
        *self.inner.error_message.lock() = Some(diagnostic.message.clone());
        // No subscribers is fine; the message slot still holds it
        let _ = self.inner.diagnostics.send(diagnostic);
    }

    fn current_session(&self) -> Option<Arc<Session>> {
        self.inner.session.read().clone()
    }

    /// Sample a depth frame and publish the closest distance. A frame with no
    /// usable reading leaves the previous distance in place.
    pub fn on_depth_frame(&self, frame: RawDepthFrame) -> FrameOutcome {
        let counters = &self.inner.counters;
        let session = match self.current_session() {
            Some(session) => session,
            None => {
                bump(&counters.frames_ignored);
                return FrameOutcome::Ignored;
            }
        };
        let _busy = match BusyGuard::try_acquire(&self.inner.depth_busy) {
            Some(guard) => guard,
            None => {
                bump(&counters.depth_dropped);
                debug!("Depth frame dropped, previous one still in progress");
                return FrameOutcome::Dropped;
            }
        };

        match self.inner.sampler.sample(&frame) {
            Ok(Some(distance)) => {
                if self.inner.state.publish_distance(session.epoch, distance) {
                    bump(&counters.depth_published);
                    trace!(distance, "closest distance published");
                    FrameOutcome::Published
                } else {
                    FrameOutcome::Stale
                }
            }
            Ok(None) => {
                bump(&counters.depth_no_reading);
                trace!("depth frame had no valid samples");
                FrameOutcome::NoReading
            }
            Err(e) => {
                bump(&counters.depth_skipped);
                debug!("Skipping depth frame: {}", e);
                FrameOutcome::Skipped(e)
            }
        }
    }

    /// Align a color frame, publish the image and hand it to the recognizer.
    pub fn on_color_frame(&self, frame: RawColorFrame) -> FrameOutcome {
        let counters = &self.inner.counters;
        let session = match self.current_session() {
            Some(session) => session,
            None => {
                bump(&counters.frames_ignored);
                return FrameOutcome::Ignored;
            }
        };
        let _busy = match BusyGuard::try_acquire(&self.inner.color_busy) {
            Some(guard) => guard,
            None => {
                bump(&counters.color_dropped);
                debug!("Color frame dropped, previous one still in progress");
                return FrameOutcome::Dropped;
            }
        };

        let image = match self.inner.aligner.align(&frame) {
            Ok(image) => Arc::new(image),
            Err(e) => {
                bump(&counters.color_skipped);
                debug!("Skipping color frame: {}", e);
                return FrameOutcome::Skipped(e);
            }
        };

        if !self.inner.state.publish_image(session.epoch, image.clone()) {
            return FrameOutcome::Stale;
        }
        bump(&counters.color_published);

        if self.inner.config.recognition.enabled {
            self.dispatch_recognition(&session, image);
        }
        FrameOutcome::Published
    }

    /// Every aligned frame goes to the recognizer. When `max_in_flight`
    /// requests are already running the oldest one is aborted first.
    fn dispatch_recognition(&self, session: &Session, image: Arc<AlignedImage>) {
        let inner = self.inner.clone();
        let epoch = session.epoch;
        let superseded = session.admit(|| {
            self.inner
                .runtime
                .spawn(async move {
                    let detections = inner.recognizer.recognize(&image).await;
                    let count = detections.len();
                    if inner.state.publish_detections(epoch, detections) {
                        bump(&inner.counters.recognitions_applied);
                        trace!(count, "detections published");
                    } else {
                        bump(&inner.counters.recognitions_discarded);
                        debug!(epoch, "Discarding detections from a stopped session");
                    }
                })
                .abort_handle()
        });

        let counters = &self.inner.counters;
        bump(&counters.recognitions_started);
        if superseded > 0 {
            counters
                .recognitions_superseded
                .fetch_add(superseded as u64, Ordering::Relaxed);
            debug!(superseded, "Oldest recognition aborted for a newer frame");
        }
    }
}
