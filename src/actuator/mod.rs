//! PTZ actuator boundary.
//!
//! The controller and calibrators talk to the camera only through
//! [`PtzActuator`]. Implementations wrap a concrete protocol (ONVIF or
//! otherwise); every call is blocking and fallible.
//!
//! - [`BoundedActuator`] runs commands on a worker thread with a deadline
//! - [`RecordingActuator`] is an in-memory simulation used for dry runs and tests

pub mod recording;
pub mod worker;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use recording::RecordingActuator;
pub use worker::BoundedActuator;

/// Errors surfaced by the actuator driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActuatorError {
    #[error("{command} timed out after {timeout_ms} ms")]
    Timeout {
        command: &'static str,
        timeout_ms: u64,
    },
    #[error("{command} failed: {message}")]
    Command {
        command: &'static str,
        message: String,
    },
    #[error("{0} is not supported by this actuator")]
    Unsupported(&'static str),
    #[error("actuator worker is unavailable")]
    Disconnected,
}

impl ActuatorError {
    pub fn command(command: &'static str, message: impl Into<String>) -> Self {
        Self::Command {
            command,
            message: message.into(),
        }
    }
}

pub type ActuatorResult<T> = std::result::Result<T, ActuatorError>;

/// What the actuator can tell us about where it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActuatorCapability {
    /// Reports trustworthy absolute pan/tilt/zoom.
    PositionFeedback,
    /// Position must be estimated from commanded moves.
    DeadReckoning,
}

/// Reported actuator position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PtzPosition {
    pub pan: f64,
    pub tilt: f64,
    pub zoom: f64,
    /// False when the device answered but did not include a position.
    pub available: bool,
}

impl PtzPosition {
    pub fn new(pan: f64, tilt: f64, zoom: f64) -> Self {
        Self {
            pan,
            tilt,
            zoom,
            available: true,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            pan: 0.0,
            tilt: 0.0,
            zoom: 0.0,
            available: false,
        }
    }
}

/// A preset stored on the camera.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preset {
    pub token: String,
    pub name: Option<String>,
}

/// Blocking PTZ driver interface.
pub trait PtzActuator: Send + Sync {
    /// Continuous move with per-axis velocities in [-1, 1].
    fn continuous_move(&self, pan: f64, tilt: f64, zoom: f64) -> ActuatorResult<()>;

    fn stop(&self) -> ActuatorResult<()>;

    fn move_absolute(&self, pan: f64, tilt: f64, zoom: f64) -> ActuatorResult<()>;

    fn get_position(&self) -> ActuatorResult<PtzPosition>;

    fn goto_preset(&self, token: &str, speed: f64) -> ActuatorResult<()>;

    fn list_presets(&self) -> ActuatorResult<Vec<Preset>>;

    fn go_home(&self) -> ActuatorResult<()>;

    fn capability(&self) -> ActuatorCapability {
        ActuatorCapability::PositionFeedback
    }
}

impl<T: PtzActuator + ?Sized> PtzActuator for std::sync::Arc<T> {
    fn continuous_move(&self, pan: f64, tilt: f64, zoom: f64) -> ActuatorResult<()> {
        (**self).continuous_move(pan, tilt, zoom)
    }

    fn stop(&self) -> ActuatorResult<()> {
        (**self).stop()
    }

    fn move_absolute(&self, pan: f64, tilt: f64, zoom: f64) -> ActuatorResult<()> {
        (**self).move_absolute(pan, tilt, zoom)
    }

    fn get_position(&self) -> ActuatorResult<PtzPosition> {
        (**self).get_position()
    }

    fn goto_preset(&self, token: &str, speed: f64) -> ActuatorResult<()> {
        (**self).goto_preset(token, speed)
    }

    fn list_presets(&self) -> ActuatorResult<Vec<Preset>> {
        (**self).list_presets()
    }

    fn go_home(&self) -> ActuatorResult<()> {
        (**self).go_home()
    }

    fn capability(&self) -> ActuatorCapability {
        (**self).capability()
    }
}
