//! Bounded record of controller decisions for diagnostics.

use std::collections::VecDeque;
use std::time::Instant;

use super::{DetectionSource, TrackerMode};

/// Entries kept before the oldest are dropped.
pub const DECISION_LOG_CAPACITY: usize = 1000;

#[derive(Debug, Clone, PartialEq)]
pub enum DecisionKind {
    ModeChange {
        from: TrackerMode,
        to: TrackerMode,
        reason: String,
    },
    Move {
        pan_velocity: f64,
        tilt_velocity: f64,
        zoom_velocity: f64,
        offset_x: f64,
        offset_y: f64,
        species: String,
        camera: DetectionSource,
    },
    /// Target already centered; stop issued.
    Deadzone {
        offset: f64,
        camera: DetectionSource,
    },
    TrackingLost,
    /// Detections arrived while tracking was disabled.
    TrackDisabled { detections: usize },
    PatrolAdvance { from: usize, to: usize, token: String },
    PatrolReverse { direction: f64 },
    Error { command: String, message: String },
}

impl DecisionKind {
    pub fn event(&self) -> &'static str {
        match self {
            Self::ModeChange { .. } => "mode_change",
            Self::Move { .. } => "move",
            Self::Deadzone { .. } => "deadzone",
            Self::TrackingLost => "tracking_lost",
            Self::TrackDisabled { .. } => "track_disabled",
            Self::PatrolAdvance { .. } => "patrol_advance",
            Self::PatrolReverse { .. } => "patrol_reverse",
            Self::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub at: Instant,
    /// Mode when the decision was taken (after any transition).
    pub mode: TrackerMode,
    pub kind: DecisionKind,
}

#[derive(Debug, Clone)]
pub struct DecisionLog {
    entries: VecDeque<Decision>,
    capacity: usize,
}

impl Default for DecisionLog {
    fn default() -> Self {
        Self::with_capacity(DECISION_LOG_CAPACITY)
    }
}

impl DecisionLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(DECISION_LOG_CAPACITY)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, at: Instant, mode: TrackerMode, kind: DecisionKind) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(Decision { at, mode, kind });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Decision> {
        self.entries.iter()
    }

    /// Decisions with `start <= at <= end`.
    pub fn between(&self, start: Instant, end: Instant) -> Vec<Decision> {
        self.entries
            .iter()
            .filter(|d| d.at >= start && d.at <= end)
            .cloned()
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
