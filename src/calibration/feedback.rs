//! Calibration for actuators that report their absolute position.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::fit::fit_feedback;
use super::{CalibrationContext, CalibrationResult, CalibrationSample, finish};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    /// Wait after each absolute move before reading back and capturing.
    pub settle_secs: f64,
    /// Check that the actuator moves at all before walking the grid.
    pub probe_actuator: bool,
    /// Pan velocity of the probe nudge.
    pub probe_velocity: f64,
    pub probe_move_secs: f64,
    pub probe_settle_secs: f64,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            settle_secs: 1.0,
            probe_actuator: true,
            probe_velocity: 0.5,
            probe_move_secs: 0.5,
            probe_settle_secs: 1.0,
        }
    }
}

/// Absolute positions visited for a requested point count.
///
/// 9 gives a 3x3 grid, 5 a cross, anything else a 3-point pan row.
pub fn pattern(points: usize) -> Vec<(f64, f64)> {
    const PANS: [f64; 3] = [-0.5, 0.0, 0.5];
    const TILTS: [f64; 3] = [-0.3, 0.0, 0.3];
    match points {
        9 => PANS
            .iter()
            .flat_map(|&pan| TILTS.iter().map(move |&tilt| (pan, tilt)))
            .collect(),
        5 => vec![(0.0, 0.0), (-0.5, 0.0), (0.5, 0.0), (0.0, -0.3), (0.0, 0.3)],
        _ => PANS.iter().map(|&pan| (pan, 0.0)).collect(),
    }
}

pub struct FeedbackCalibrator {
    config: FeedbackConfig,
}

impl FeedbackCalibrator {
    pub fn new(config: FeedbackConfig) -> Self {
        Self { config }
    }

    pub fn run(&self, ctx: &mut CalibrationContext<'_>, points: usize) -> CalibrationResult {
        let targets = pattern(points);
        info!(
            "Starting PTZ auto-calibration with {} points",
            targets.len()
        );
        ctx.report("Starting PTZ auto-calibration", 0.0);

        if ctx.capture().is_none() {
            return CalibrationResult::failure("Could not capture frames from cameras", Vec::new());
        }

        if self.config.probe_actuator {
            ctx.report("Testing PTZ response", 0.05);
            if let Err(error) = self.probe(ctx) {
                if ctx.cancel.is_cancelled() {
                    return CalibrationResult::cancelled(Vec::new());
                }
                warn!("{}", error);
                return CalibrationResult::failure(error, Vec::new());
            }
        }

        let mut samples = Vec::with_capacity(targets.len());
        let mut cancelled = false;
        for (i, &(pan, tilt)) in targets.iter().enumerate() {
            if ctx.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            ctx.report(
                &format!("Moving to pan={pan:.2}, tilt={tilt:.2}"),
                0.1 + 0.8 * i as f64 / targets.len() as f64,
            );
            if let Err(e) = ctx.actuator.move_absolute(pan, tilt, 0.0) {
                warn!("Move to pan={:.2}, tilt={:.2} failed: {}", pan, tilt, e);
                continue;
            }
            if ctx.settle(self.config.settle_secs) {
                cancelled = true;
                break;
            }

            let (actual_pan, actual_tilt, actual_zoom) = match ctx.actuator.get_position() {
                Ok(pos) if pos.available => (pos.pan, pos.tilt, Some(pos.zoom)),
                Ok(_) => {
                    warn!("Position unavailable, using commanded pan={:.2}, tilt={:.2}", pan, tilt);
                    (pan, tilt, None)
                }
                Err(e) => {
                    warn!("Position read failed ({}), using commanded position", e);
                    (pan, tilt, None)
                }
            };

            match ctx.capture_and_locate() {
                Some(found) => {
                    info!(
                        "Calibration point: PTZ({:.3}, {:.3}) -> wide({:.3}, {:.3}) conf={:.2}",
                        actual_pan, actual_tilt, found.center_x, found.center_y, found.confidence
                    );
                    samples.push(CalibrationSample::new(
                        actual_pan,
                        actual_tilt,
                        actual_zoom,
                        found.center_x,
                        found.center_y,
                        found.confidence,
                    ));
                }
                None => warn!("No match found at pan={:.2}, tilt={:.2}", pan, tilt),
            }
        }

        if !cancelled {
            if let Err(e) = ctx.actuator.move_absolute(0.0, 0.0, 0.0) {
                warn!("Return to center failed: {}", e);
            }
        }

        ctx.report("Computing calibration parameters", 0.95);
        let result = finish(samples, cancelled, fit_feedback, CalibrationResult::success);
        if result.is_success() {
            let p = &result.params;
            info!(
                "Calibration computed: pan_scale={:.3}, tilt_scale={:.3}, center=({:.3}, {:.3})",
                p.pan_scale, p.tilt_scale, p.pan_center_x, p.tilt_center_y
            );
            ctx.report(
                &format!("Calibration complete: {} points", result.samples.len()),
                1.0,
            );
        }
        result
    }

    /// Nudge the pan axis and confirm the reported position changes.
    fn probe(&self, ctx: &mut CalibrationContext<'_>) -> Result<(), String> {
        let actuator = ctx.actuator;
        let initial = actuator
            .get_position()
            .map_err(|e| format!("PTZ test failed: {e}"))?;
        if !initial.available {
            warn!("Actuator does not report a position; skipping the response test");
            return Ok(());
        }

        actuator
            .continuous_move(self.config.probe_velocity, 0.0, 0.0)
            .map_err(|e| format!("PTZ test failed: {e}"))?;
        let interrupted = ctx.settle(self.config.probe_move_secs);
        actuator
            .stop()
            .map_err(|e| format!("PTZ test failed: {e}"))?;
        if interrupted || ctx.settle(self.config.probe_settle_secs) {
            return Err("Calibration cancelled".to_string());
        }

        let after = actuator
            .get_position()
            .map_err(|e| format!("PTZ test failed: {e}"))?;
        if after.pan == initial.pan && after.tilt == initial.tilt {
            return Err(
                "PTZ not responding: position unchanged after a test move; \
                 check that the profile supports PTZ"
                    .to_string(),
            );
        }

        actuator
            .move_absolute(0.0, 0.0, 0.0)
            .map_err(|e| format!("PTZ test failed: {e}"))?;
        if ctx.settle(self.config.settle_secs) {
            return Err("Calibration cancelled".to_string());
        }
        Ok(())
    }
}
