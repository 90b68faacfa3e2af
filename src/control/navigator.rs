//! Pixel targeting for actuators without position feedback.
//!
//! Uses the dead-reckoning fit to turn a wide-frame point into a command-space
//! offset from home, then closes the gap with one timed pulse per call.

use std::sync::Arc;
use std::thread;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::secs;
use crate::actuator::{ActuatorResult, PtzActuator};
use crate::calibration::DeadReckoningFit;

/// Velocities below this on both axes are not worth a pulse.
const MIN_PULSE_VELOCITY: f64 = 0.05;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigatorConfig {
    pub move_speed: f64,
    pub pulse_secs: f64,
}

impl Default for NavigatorConfig {
    fn default() -> Self {
        Self {
            move_speed: 0.3,
            pulse_secs: 0.3,
        }
    }
}

pub struct DeadReckoningNavigator {
    actuator: Arc<dyn PtzActuator>,
    fit: DeadReckoningFit,
    config: NavigatorConfig,
    pan_offset: f64,
    tilt_offset: f64,
}

impl DeadReckoningNavigator {
    pub fn new(actuator: Arc<dyn PtzActuator>, fit: DeadReckoningFit, config: NavigatorConfig) -> Self {
        Self {
            actuator,
            fit,
            config,
            pan_offset: 0.0,
            tilt_offset: 0.0,
        }
    }

    pub fn estimated_offset(&self) -> (f64, f64) {
        (self.pan_offset, self.tilt_offset)
    }

    pub fn fit(&self) -> &DeadReckoningFit {
        &self.fit
    }

    /// Return home and reset the estimate. Falls back to an absolute move
    /// when the home command is not available.
    pub fn go_home(&mut self) -> ActuatorResult<()> {
        if let Err(e) = self.actuator.go_home() {
            debug!("Home command failed ({}), using absolute move", e);
            self.actuator.move_absolute(0.0, 0.0, 0.5)?;
        }
        self.pan_offset = 0.0;
        self.tilt_offset = 0.0;
        Ok(())
    }

    /// Pulse toward the wide-frame point `(x, y)` given as frame fractions.
    /// Returns whether a move was made.
    pub fn move_to_pixel(&mut self, x: f64, y: f64) -> ActuatorResult<bool> {
        let (target_pan, target_tilt) = self.fit.pixel_to_offset(x, y);
        let speed = self.config.move_speed;
        let pan_velocity = ((target_pan - self.pan_offset) * 2.0).clamp(-1.0, 1.0) * speed;
        let tilt_velocity = ((target_tilt - self.tilt_offset) * 2.0).clamp(-1.0, 1.0) * speed;
        if pan_velocity.abs() < MIN_PULSE_VELOCITY && tilt_velocity.abs() < MIN_PULSE_VELOCITY {
            return Ok(false);
        }

        let pulse = secs(self.config.pulse_secs);
        let duration = pulse.as_secs_f64();
        self.actuator
            .continuous_move(pan_velocity, tilt_velocity, 0.0)?;
        thread::sleep(pulse);
        let stopped = self.actuator.stop();

        if speed > 0.0 {
            self.pan_offset += pan_velocity * duration / speed;
            self.tilt_offset += tilt_velocity * duration / speed;
        }
        debug!(
            "Pulse ({:.2}, {:.2}) for {:.2}s, offset now ({:.2}, {:.2})",
            pan_velocity, tilt_velocity, duration, self.pan_offset, self.tilt_offset
        );
        if let Err(e) = &stopped {
            warn!("Stop after pulse failed: {}", e);
        }
        stopped.map(|()| true)
    }
}
