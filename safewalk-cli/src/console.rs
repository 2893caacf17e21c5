// SafeWalk status console
// Renders fusion snapshots the way the on-screen overlay presents them

use safewalk_eye::{FusionSnapshot, Proximity};
use serde::Serialize;

/// One rendered frame of the status display.
#[derive(Debug, Clone, Serialize)]
pub struct StatusLine {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub distance_m: Option<f32>,
    pub distance_ft: Option<f32>,
    pub warning: bool,
    pub image: Option<(usize, usize)>,
    pub detections: Vec<String>,
}

impl StatusLine {
    pub fn from_snapshot(snapshot: &FusionSnapshot, threshold_m: f32) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            distance_m: snapshot.distance(),
            distance_ft: snapshot.distance_feet(),
            warning: snapshot.proximity(threshold_m) == Proximity::Near,
            image: snapshot.latest_image.as_ref().map(|i| (i.width, i.height)),
            detections: snapshot.detections.iter().map(|d| d.caption()).collect(),
        }
    }

    /// Human-readable rendering.
    pub fn render(&self) -> String {
        let distance = match self.distance_ft {
            Some(ft) => format!("Distance: {:.2} ft", ft),
            None => "Distance: --".to_string(),
        };

        let mut line = distance;
        if self.warning {
            line.push_str("  WARNING: obstacle within reach");
        }
        if let Some((w, h)) = self.image {
            line.push_str(&format!("  [{}x{}]", w, h));
        }
        if !self.detections.is_empty() {
            line.push_str("  ");
            line.push_str(&self.detections.join(", "));
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use safewalk_core::detection::{BoundingBox, Detection};
    use std::sync::Arc;

    #[test]
    fn test_render_default_snapshot() {
        let line = StatusLine::from_snapshot(&FusionSnapshot::default(), 0.3048);
        assert_eq!(line.render(), "Distance: --");
        assert!(!line.warning);
    }

    #[test]
    fn test_render_warning_with_detections() {
        let snapshot = FusionSnapshot {
            closest_distance: 0.2,
            detections: Arc::new(vec![Detection::new(
                BoundingBox::new(0.1, 0.1, 0.2, 0.2),
                "pole",
                0.87,
            )]),
            ..FusionSnapshot::default()
        };
        let line = StatusLine::from_snapshot(&snapshot, 0.3048);
        assert!(line.warning);
        assert_eq!(
            line.render(),
            "Distance: 0.66 ft  WARNING: obstacle within reach  pole (87%)"
        );
    }

    #[test]
    fn test_json_shape() {
        let snapshot = FusionSnapshot {
            closest_distance: 2.0,
            ..FusionSnapshot::default()
        };
        let value = serde_json::to_value(StatusLine::from_snapshot(&snapshot, 0.3048)).unwrap();
        assert_eq!(value["distance_m"], 2.0);
        assert_eq!(value["warning"], false);
        assert!(value["image"].is_null());
    }
}
