//! Tracker mode machine.
//!
//! Every mode change goes through [`next_mode`]; the controller only decides
//! which event happened and runs the entry actions of the resulting mode.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Operating mode of the tracking controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackerMode {
    /// Stationary: disabled, or armed without patrol.
    #[default]
    Idle,
    /// No target; the actuator sweeps or cycles presets.
    Patrol,
    /// Following the highest-confidence detection.
    Tracking,
}

impl fmt::Display for TrackerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Patrol => "patrol",
            Self::Tracking => "tracking",
        };
        f.write_str(name)
    }
}

/// Camera whose detections drove a tracking decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionSource {
    /// The fixed wide-angle camera; positions go through the mapping.
    Wide,
    /// The PTZ camera's own picture; offsets steer it directly.
    Ptz,
}

impl fmt::Display for DetectionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Wide => "wide",
            Self::Ptz => "ptz",
        })
    }
}

/// What happened since the last transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerEvent {
    Start,
    Stop,
    /// A non-empty, post-filter detection set while tracking is enabled.
    Detections,
    NoDetections { grace_expired: bool },
    PatrolToggled(bool),
    TrackToggled(bool),
}

/// Mode after `event`, given the current enable flags (already updated for
/// toggle events).
pub fn next_mode(
    mode: TrackerMode,
    event: TrackerEvent,
    patrol_enabled: bool,
    track_enabled: bool,
) -> TrackerMode {
    use TrackerMode::*;

    let resting = if patrol_enabled { Patrol } else { Idle };
    match (mode, event) {
        (_, TrackerEvent::Stop) => Idle,
        (Tracking, TrackerEvent::Start) => Tracking,
        (_, TrackerEvent::Start) => resting,

        (_, TrackerEvent::Detections) if track_enabled => Tracking,
        (_, TrackerEvent::Detections) => mode,

        (Tracking, TrackerEvent::NoDetections { grace_expired: false }) if track_enabled => {
            Tracking
        }
        (_, TrackerEvent::NoDetections { .. }) => resting,

        (Tracking, TrackerEvent::PatrolToggled(_)) => Tracking,
        (_, TrackerEvent::PatrolToggled(_)) => resting,

        (Tracking, TrackerEvent::TrackToggled(false)) => resting,
        (_, TrackerEvent::TrackToggled(_)) => mode,
    }
}

/// Exponentially smoothed actuator target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SmoothedTarget {
    pub pan: f64,
    pub tilt: f64,
    pub zoom: f64,
}

impl SmoothedTarget {
    /// `self = self * s + target * (1 - s)`.
    pub fn blend(&mut self, pan: f64, tilt: f64, zoom: f64, smoothing: f64) {
        let s = smoothing.clamp(0.0, 1.0);
        self.pan = self.pan * s + pan * (1.0 - s);
        self.tilt = self.tilt * s + tilt * (1.0 - s);
        self.zoom = self.zoom * s + zoom * (1.0 - s);
    }
}

/// Patrol bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct PatrolState {
    /// +1 sweeps right, -1 left.
    pub direction: f64,
    /// Start of the current sweep leg; set on the first patrol tick.
    pub sweep_started: Option<Instant>,
    /// Preset tokens resolved from the configured names/tokens.
    pub preset_tokens: Vec<String>,
    pub presets_resolved: bool,
    pub preset_index: usize,
    /// When the current preset's dwell started; set on the first tick there.
    pub preset_arrival: Option<Instant>,
}

impl Default for PatrolState {
    fn default() -> Self {
        Self {
            direction: 1.0,
            sweep_started: None,
            preset_tokens: Vec::new(),
            presets_resolved: false,
            preset_index: 0,
            preset_arrival: None,
        }
    }
}

/// Controller state, owned and mutated only by the controller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackerState {
    pub mode: TrackerMode,
    pub smoothed: SmoothedTarget,
    pub last_update: Option<Instant>,
    pub last_detection: Option<Instant>,
    /// Set when detections first go missing while tracking.
    pub lost_since: Option<Instant>,
    pub last_species: Option<String>,
    pub last_source: Option<DetectionSource>,
    pub patrol: PatrolState,
}

#[cfg(test)]
mod tests {
    use super::*;
    use TrackerMode::*;

    #[test]
    fn test_start_depends_on_patrol() {
        assert_eq!(next_mode(Idle, TrackerEvent::Start, true, true), Patrol);
        assert_eq!(next_mode(Idle, TrackerEvent::Start, false, true), Idle);
        assert_eq!(next_mode(Tracking, TrackerEvent::Start, true, true), Tracking);
    }

    #[test]
    fn test_stop_always_idles() {
        for mode in [Idle, Patrol, Tracking] {
            assert_eq!(next_mode(mode, TrackerEvent::Stop, true, true), Idle);
        }
    }

    #[test]
    fn test_detections_start_tracking_only_when_enabled() {
        assert_eq!(next_mode(Patrol, TrackerEvent::Detections, true, true), Tracking);
        assert_eq!(next_mode(Idle, TrackerEvent::Detections, false, true), Tracking);
        assert_eq!(next_mode(Patrol, TrackerEvent::Detections, true, false), Patrol);
    }

    #[test]
    fn test_grace_period_holds_tracking() {
        let held = TrackerEvent::NoDetections {
            grace_expired: false,
        };
        let expired = TrackerEvent::NoDetections {
            grace_expired: true,
        };
        assert_eq!(next_mode(Tracking, held, true, true), Tracking);
        assert_eq!(next_mode(Tracking, expired, true, true), Patrol);
        assert_eq!(next_mode(Tracking, expired, false, true), Idle);
    }

    #[test]
    fn test_disabling_track_leaves_tracking() {
        assert_eq!(
            next_mode(Tracking, TrackerEvent::TrackToggled(false), true, false),
            Patrol
        );
        assert_eq!(
            next_mode(Tracking, TrackerEvent::TrackToggled(false), false, false),
            Idle
        );
    }

    #[test]
    fn test_patrol_toggle() {
        assert_eq!(next_mode(Idle, TrackerEvent::PatrolToggled(true), true, false), Patrol);
        assert_eq!(next_mode(Patrol, TrackerEvent::PatrolToggled(false), false, true), Idle);
        assert_eq!(
            next_mode(Tracking, TrackerEvent::PatrolToggled(false), false, true),
            Tracking
        );
    }

    #[test]
    fn test_smoothing_blend() {
        let mut t = SmoothedTarget::default();
        t.blend(1.0, -1.0, 0.5, 0.3);
        assert!((t.pan - 0.7).abs() < 1e-12);
        assert!((t.tilt + 0.7).abs() < 1e-12);
        assert!((t.zoom - 0.35).abs() < 1e-12);
    }
}
