//! Live PTZ control: the tracking state machine, patrol, and dead-reckoning
//! pixel navigation.

mod controller;
pub mod decision_log;
mod navigator;
mod patrol;
mod state;
mod velocity;

use std::time::Duration;

pub use controller::{TrackingConfig, TrackingController};
pub use decision_log::{Decision, DecisionKind, DecisionLog};
pub use navigator::{DeadReckoningNavigator, NavigatorConfig};
pub use patrol::{PatrolConfig, PatrolOutcome};
pub use state::{
    DetectionSource, PatrolState, SmoothedTarget, TrackerEvent, TrackerMode, TrackerState,
    next_mode,
};
pub use velocity::{center_offset, velocity_curve, zoom_velocity};

/// Non-negative seconds as a [`Duration`], saturating instead of panicking on
/// huge or infinite values.
pub(crate) fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::MAX)
}
