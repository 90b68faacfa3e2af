//! Calibration for actuators without trustworthy position feedback.
//!
//! Position is estimated by accumulating `direction * duration` for every
//! timed move, in command-space units. Every grid target is reached from home
//! so the estimate never drifts across targets.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::fit::fit_dead_reckoning;
use super::{CalibrationContext, CalibrationResult, CalibrationSample, finish};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadReckoningConfig {
    /// Grid is `grid_size x grid_size` around home.
    pub grid_size: usize,
    /// Velocity magnitude of each timed move.
    pub move_speed: f64,
    pub move_duration_secs: f64,
    /// Wait after reaching a grid target before capturing.
    pub settle_secs: f64,
    /// Wait after a home command.
    pub home_wait_secs: f64,
    /// Pause between returning home and starting the moves to a target.
    pub pre_move_pause_secs: f64,
    /// Pause between consecutive timed moves.
    pub inter_move_pause_secs: f64,
}

impl Default for DeadReckoningConfig {
    fn default() -> Self {
        Self {
            grid_size: 3,
            move_speed: 0.3,
            move_duration_secs: 0.4,
            settle_secs: 0.8,
            home_wait_secs: 2.0,
            pre_move_pause_secs: 0.5,
            inter_move_pause_secs: 0.1,
        }
    }
}

pub struct DeadReckoningCalibrator {
    config: DeadReckoningConfig,
    pan_offset: f64,
    tilt_offset: f64,
}

impl DeadReckoningCalibrator {
    pub fn new(config: DeadReckoningConfig) -> Self {
        Self {
            config,
            pan_offset: 0.0,
            tilt_offset: 0.0,
        }
    }

    /// Go home (falling back to an absolute move) and reset the estimate.
    /// Returns `true` if cancelled while waiting.
    fn go_home(&mut self, ctx: &CalibrationContext<'_>) -> bool {
        if let Err(e) = ctx.actuator.go_home() {
            debug!("Home command failed ({}), using absolute move", e);
            if let Err(e) = ctx.actuator.move_absolute(0.0, 0.0, 0.5) {
                warn!("Could not return home: {}", e);
            }
        }
        self.pan_offset = 0.0;
        self.tilt_offset = 0.0;
        ctx.settle(self.config.home_wait_secs)
    }

    /// One timed move. Returns `true` if cancelled during the move.
    fn timed_move(&mut self, ctx: &CalibrationContext<'_>, pan_dir: f64, tilt_dir: f64) -> bool {
        let speed = self.config.move_speed;
        let duration = self.config.move_duration_secs;
        if let Err(e) = ctx
            .actuator
            .continuous_move(pan_dir * speed, tilt_dir * speed, 0.0)
        {
            warn!("Timed move failed: {}", e);
            return ctx.cancel.is_cancelled();
        }
        let cancelled = ctx.settle(duration);
        if let Err(e) = ctx.actuator.stop() {
            warn!("Stop after timed move failed: {}", e);
        }
        self.pan_offset += pan_dir * duration;
        self.tilt_offset += tilt_dir * duration;
        cancelled
    }

    /// `|steps|` timed moves along one axis. Returns `true` if cancelled.
    fn step_axis(&mut self, ctx: &CalibrationContext<'_>, steps: i64, pan_axis: bool) -> bool {
        let dir = steps.signum() as f64;
        for _ in 0..steps.unsigned_abs() {
            let (p, t) = if pan_axis { (dir, 0.0) } else { (0.0, dir) };
            if self.timed_move(ctx, p, t) || ctx.settle(self.config.inter_move_pause_secs) {
                return true;
            }
        }
        false
    }

    fn sample_here(&self, ctx: &mut CalibrationContext<'_>) -> Option<CalibrationSample> {
        let found = ctx.capture_and_locate()?;
        info!(
            "Offset ({:.2}, {:.2}) -> wide ({:.3}, {:.3}), conf={:.2}",
            self.pan_offset, self.tilt_offset, found.center_x, found.center_y, found.confidence
        );
        Some(CalibrationSample::new(
            self.pan_offset,
            self.tilt_offset,
            None,
            found.center_x,
            found.center_y,
            found.confidence,
        ))
    }

    pub fn run(&mut self, ctx: &mut CalibrationContext<'_>) -> CalibrationResult {
        let grid = self.config.grid_size.max(1);
        let span = grid as i64 - 1;
        let mut samples = Vec::with_capacity(grid * grid);

        ctx.report("Starting visual PTZ calibration", 0.0);
        ctx.report("Moving to home position", 0.05);
        if self.go_home(ctx) {
            return CalibrationResult::cancelled(samples);
        }

        ctx.report("Capturing center position", 0.1);
        if ctx.settle(self.config.settle_secs) {
            return CalibrationResult::cancelled(samples);
        }
        if ctx.capture().is_none() {
            return CalibrationResult::failure("Could not capture frames from cameras", samples);
        }
        match self.sample_here(ctx) {
            Some(sample) => samples.push(sample),
            None => warn!("Could not match center position"),
        }

        let total = grid * grid;
        let mut cancelled = false;
        'grid: for row in 0..grid {
            for col in 0..grid {
                // Steps of `move_duration` from home; image rows grow downward.
                let pan_steps = 2 * col as i64 - span;
                let tilt_steps = span - 2 * row as i64;
                if pan_steps == 0 && tilt_steps == 0 {
                    continue;
                }
                if ctx.cancel.is_cancelled() {
                    cancelled = true;
                    break 'grid;
                }

                let step = row * grid + col + 1;
                ctx.report(
                    &format!("Moving to grid position ({}, {})", col + 1, row + 1),
                    0.1 + 0.8 * step as f64 / total as f64,
                );

                if self.go_home(ctx)
                    || ctx.settle(self.config.pre_move_pause_secs)
                    || self.step_axis(ctx, pan_steps, true)
                    || self.step_axis(ctx, tilt_steps, false)
                    || ctx.settle(self.config.settle_secs)
                {
                    cancelled = true;
                    break 'grid;
                }

                match self.sample_here(ctx) {
                    Some(sample) => samples.push(sample),
                    None => warn!("No match at grid position ({}, {})", col, row),
                }
            }
        }

        if !cancelled {
            ctx.report("Returning to home", 0.95);
            self.go_home(ctx);
        }

        ctx.report("Computing calibration parameters", 0.98);
        let result = finish(samples, cancelled, fit_dead_reckoning, |fit, samples| {
            let mut result = CalibrationResult::success(fit.mapping_params(), samples);
            result.dead_reckoning = Some(fit);
            result
        });
        if let Some(fit) = &result.dead_reckoning {
            info!(
                "Calibration result: pan_to_pixel_x={:.3}, tilt_to_pixel_y={:.3}, center=({:.3}, {:.3})",
                fit.pan_to_pixel_x, fit.tilt_to_pixel_y, fit.center_x, fit.center_y
            );
            ctx.report(
                &format!("Calibration complete: {} points", result.samples.len()),
                1.0,
            );
        }
        result
    }
}
