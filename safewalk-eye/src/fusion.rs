//! Shared world state read by the presentation layer
//!
//! Distance, image and detections are published independently. A reader
//! always sees whole values, but the three fields may come from different
//! source frames.

use parking_lot::RwLock;
use safewalk_core::detection::Detection;
use safewalk_core::frame::AlignedImage;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::trace;

const METERS_TO_FEET: f32 = 3.28084;

/// Near-object classification of the current distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Proximity {
    /// No depth reading since the session started
    Unknown,
    Clear,
    Near,
}

/// Point-in-time copy of the fusion state. Cloning is cheap: the image and
/// detection list are shared.
#[derive(Debug, Clone)]
pub struct FusionSnapshot {
    /// Meters to the closest obstacle; infinite until the first reading
    pub closest_distance: f32,
    pub latest_image: Option<Arc<AlignedImage>>,
    pub detections: Arc<Vec<Detection>>,
    /// Session counter, bumped every time the pipeline stops
    pub epoch: u64,
}

impl Default for FusionSnapshot {
    fn default() -> Self {
        Self::empty(0)
    }
}

impl FusionSnapshot {
    fn empty(epoch: u64) -> Self {
        Self {
            closest_distance: f32::INFINITY,
            latest_image: None,
            detections: Arc::new(Vec::new()),
            epoch,
        }
    }

    /// Distance in meters, `None` while unknown.
    pub fn distance(&self) -> Option<f32> {
        self.closest_distance
            .is_finite()
            .then_some(self.closest_distance)
    }

    pub fn distance_feet(&self) -> Option<f32> {
        self.distance().map(|m| m * METERS_TO_FEET)
    }

    pub fn proximity(&self, threshold_m: f32) -> Proximity {
        match self.distance() {
            None => Proximity::Unknown,
            Some(d) if d < threshold_m => Proximity::Near,
            Some(_) => Proximity::Clear,
        }
    }

    /// Distance unknown, no image, no detections.
    pub fn is_default(&self) -> bool {
        self.closest_distance == f32::INFINITY
            && self.latest_image.is_none()
            && self.detections.is_empty()
    }
}

/// Thread-safe container for the latest distance, image and detections.
///
/// Each write replaces one field whole. Writes carry the epoch they were
/// started in and are dropped if the pipeline has been stopped since.
pub struct FusionState {
    inner: RwLock<FusionSnapshot>,
    version: watch::Sender<u64>,
}

impl Default for FusionState {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FusionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FusionState")
            .field("state", &*self.inner.read())
            .field("version", &*self.version.borrow())
            .finish()
    }
}

impl FusionState {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            inner: RwLock::new(FusionSnapshot::default()),
            version,
        }
    }

    pub fn snapshot(&self) -> FusionSnapshot {
        self.inner.read().clone()
    }

    pub fn closest_distance(&self) -> f32 {
        self.inner.read().closest_distance
    }

    pub fn latest_image(&self) -> Option<Arc<AlignedImage>> {
        self.inner.read().latest_image.clone()
    }

    pub fn detections(&self) -> Arc<Vec<Detection>> {
        self.inner.read().detections.clone()
    }

    pub fn epoch(&self) -> u64 {
        self.inner.read().epoch
    }

    /// Number of applied writes so far.
    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    /// Watch for changes instead of polling.
    pub fn subscribe(self: &Arc<Self>) -> FusionSubscription {
        FusionSubscription {
            state: self.clone(),
            rx: self.version.subscribe(),
        }
    }

    pub(crate) fn publish_distance(&self, epoch: u64, meters: f32) -> bool {
        self.apply(epoch, |s| s.closest_distance = meters)
    }

    pub(crate) fn publish_image(&self, epoch: u64, image: Arc<AlignedImage>) -> bool {
        self.apply(epoch, |s| s.latest_image = Some(image))
    }

    pub(crate) fn publish_detections(&self, epoch: u64, detections: Vec<Detection>) -> bool {
        let detections = Arc::new(detections);
        self.apply(epoch, |s| s.detections = detections)
    }

    /// Restore defaults and start a new epoch. Returns the new epoch.
    pub(crate) fn reset(&self) -> u64 {
        let epoch = {
            let mut state = self.inner.write();
            let epoch = state.epoch.wrapping_add(1);
            *state = FusionSnapshot::empty(epoch);
            epoch
        };
        self.bump_version();
        epoch
    }

    fn apply(&self, epoch: u64, write: impl FnOnce(&mut FusionSnapshot)) -> bool {
        {
            let mut state = self.inner.write();
            if state.epoch != epoch {
                trace!(stale = epoch, current = state.epoch, "dropping write from stopped session");
                return false;
            }
            write(&mut state);
        }
        self.bump_version();
        true
    }

    fn bump_version(&self) {
        self.version.send_modify(|v| *v = v.wrapping_add(1));
    }
}

/// Change feed over a [`FusionState`].
pub struct FusionSubscription {
    state: Arc<FusionState>,
    rx: watch::Receiver<u64>,
}

impl FusionSubscription {
    /// Wait for the next write and return the state after it. Several writes
    /// landing together are reported once.
    pub async fn changed(&mut self) -> FusionSnapshot {
        // The sender lives inside `state`, which this subscription keeps alive
        let _ = self.rx.changed().await;
        self.state.snapshot()
    }

    pub fn has_changed(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }

    pub fn snapshot(&self) -> FusionSnapshot {
        self.state.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use safewalk_core::detection::BoundingBox;

    #[test]
    fn test_new_state_is_default() {
        let state = FusionState::new();
        let snapshot = state.snapshot();
        assert!(snapshot.is_default());
        assert_eq!(snapshot.distance(), None);
        assert_eq!(snapshot.proximity(0.3048), Proximity::Unknown);
        assert_eq!(state.epoch(), 0);
    }

    #[test]
    fn test_publish_fields_independently() {
        let state = FusionState::new();
        assert!(state.publish_distance(0, 1.25));
        assert!(state.publish_detections(
            0,
            vec![Detection::new(BoundingBox::new(0.1, 0.1, 0.2, 0.2), "pole", 0.87)]
        ));

        let snapshot = state.snapshot();
        assert_eq!(snapshot.distance(), Some(1.25));
        assert!(snapshot.latest_image.is_none());
        assert_eq!(snapshot.detections.len(), 1);
        assert_eq!(state.version(), 2);
    }

    #[test]
    fn test_stale_epoch_is_rejected() {
        let state = FusionState::new();
        state.publish_distance(0, 2.0);
        let epoch = state.reset();
        assert_eq!(epoch, 1);
        assert!(state.snapshot().is_default());

        assert!(!state.publish_distance(0, 0.5));
        assert!(!state.publish_detections(0, vec![]));
        assert!(state.snapshot().is_default());

        assert!(state.publish_distance(1, 0.5));
        assert_eq!(state.closest_distance(), 0.5);
    }

    #[test]
    fn test_proximity_and_feet() {
        let snapshot = FusionSnapshot {
            closest_distance: 0.2,
            ..FusionSnapshot::default()
        };
        assert_eq!(snapshot.proximity(0.3048), Proximity::Near);
        assert!((snapshot.distance_feet().unwrap() - 0.656168).abs() < 1e-4);

        let far = FusionSnapshot {
            closest_distance: 3.0,
            ..FusionSnapshot::default()
        };
        assert_eq!(far.proximity(0.3048), Proximity::Clear);
    }

    #[tokio::test]
    async fn test_subscription_sees_writes() {
        let state = Arc::new(FusionState::new());
        let mut sub = state.subscribe();
        assert!(!sub.has_changed());

        state.publish_distance(0, 0.9);
        assert!(sub.has_changed());
        let snapshot = sub.changed().await;
        assert_eq!(snapshot.distance(), Some(0.9));
        assert!(!sub.has_changed());
    }
}
