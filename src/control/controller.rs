//! Detection-driven PTZ controller.
//!
//! [`TrackingController::update`] is called once per processed wide frame. It
//! rate-limits itself, chooses a mode through [`next_mode`], and issues at most
//! a handful of actuator commands per tick. Actuator failures are logged and
//! recorded in the decision log, never propagated out of a tick.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::decision_log::{Decision, DecisionKind, DecisionLog};
use super::patrol::{PatrolConfig, PatrolOutcome};
use super::state::{
    DetectionSource, SmoothedTarget, TrackerEvent, TrackerMode, TrackerState, next_mode,
};
use super::velocity::{center_offset, velocity_curve, zoom_velocity};
use super::secs;
use crate::actuator::{ActuatorError, ActuatorResult, PtzActuator};
use crate::detection::{BBox, CameraView, Detection, best_detection};
use crate::mapping::{MappingModel, MappingParams};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Weight of the previous target in the exponential smoothing.
    pub smoothing: f64,
    /// Minimum time between processed updates.
    pub update_interval_secs: f64,
    /// How long a lost target is held before giving up.
    pub grace_period_secs: f64,
    /// Center-offset magnitude below which the camera stays put.
    pub min_move_threshold: f64,
    /// Fraction of the frame the target should fill.
    pub target_fill: f64,
    /// Detections smaller than this fraction of the frame area are ignored.
    /// Zero or less disables the filter.
    pub min_detection_area: f64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            smoothing: 0.3,
            update_interval_secs: 0.2,
            grace_period_secs: 3.0,
            min_move_threshold: 0.05,
            target_fill: 0.6,
            min_detection_area: 0.0,
        }
    }
}

pub struct TrackingController {
    actuator: Arc<dyn PtzActuator>,
    mapping: MappingModel,
    config: TrackingConfig,
    patrol_config: PatrolConfig,
    state: TrackerState,
    patrol_enabled: bool,
    track_enabled: bool,
    decisions: DecisionLog,
}

impl TrackingController {
    pub fn new(
        actuator: Arc<dyn PtzActuator>,
        mapping: MappingModel,
        config: TrackingConfig,
        patrol_config: PatrolConfig,
    ) -> Self {
        Self {
            actuator,
            mapping,
            config,
            patrol_config,
            state: TrackerState::default(),
            patrol_enabled: false,
            track_enabled: false,
            decisions: DecisionLog::default(),
        }
    }

    pub fn mode(&self) -> TrackerMode {
        self.state.mode
    }

    pub fn state(&self) -> &TrackerState {
        &self.state
    }

    pub fn mapping(&self) -> &MappingModel {
        &self.mapping
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    pub fn smoothed_target(&self) -> SmoothedTarget {
        self.state.smoothed
    }

    pub fn is_patrol_enabled(&self) -> bool {
        self.patrol_enabled
    }

    pub fn is_track_enabled(&self) -> bool {
        self.track_enabled
    }

    /// Arm tracking, and patrol if configured.
    pub fn start_tracking(&mut self) {
        let now = Instant::now();
        self.track_enabled = true;
        self.patrol_enabled = self.patrol_config.enabled;
        if self.patrol_enabled {
            self.state
                .patrol
                .resolve_presets(&self.patrol_config, self.actuator.as_ref());
        }
        info!(
            "Tracking started (patrol {})",
            if self.patrol_enabled { "on" } else { "off" }
        );
        self.apply(TrackerEvent::Start, now, "tracking started");
    }

    /// Disarm everything and stop the camera.
    pub fn stop_tracking(&mut self) {
        let now = Instant::now();
        self.track_enabled = false;
        self.patrol_enabled = false;
        let was = self.state.mode;
        self.apply(TrackerEvent::Stop, now, "tracking stopped");
        // Entering idle already stopped the camera.
        if was == TrackerMode::Idle {
            self.stop_camera(now);
        }
        info!("Tracking stopped");
    }

    pub fn set_patrol_enabled(&mut self, enabled: bool) {
        let now = Instant::now();
        self.patrol_enabled = enabled;
        if enabled {
            self.state
                .patrol
                .resolve_presets(&self.patrol_config, self.actuator.as_ref());
        }
        info!("Patrol {}", if enabled { "enabled" } else { "disabled" });
        let reason = if enabled { "patrol enabled" } else { "patrol disabled" };
        self.apply(TrackerEvent::PatrolToggled(enabled), now, reason);
    }

    pub fn set_track_enabled(&mut self, enabled: bool) {
        let now = Instant::now();
        self.track_enabled = enabled;
        info!("Tracking {}", if enabled { "enabled" } else { "disabled" });
        let reason = if enabled { "track enabled" } else { "track disabled" };
        self.apply(TrackerEvent::TrackToggled(enabled), now, reason);
    }

    /// Replace the mapping parameters, e.g. after a calibration run.
    pub fn update_calibration(&mut self, params: MappingParams) {
        self.mapping.apply(params);
        let p = &self.mapping.params;
        info!(
            "Calibration updated: pan_scale={:.3}, tilt_scale={:.3}, center=({:.3}, {:.3})",
            p.pan_scale, p.tilt_scale, p.pan_center_x, p.tilt_center_y
        );
    }

    /// Process one frame's detections. Returns whether a movement command
    /// was issued.
    pub fn update(&mut self, detections: &[Detection], frame_width: u32, frame_height: u32) -> bool {
        self.update_at(Instant::now(), detections, frame_width, frame_height)
    }

    /// [`Self::update`] at an explicit time.
    pub fn update_at(
        &mut self,
        now: Instant,
        detections: &[Detection],
        frame_width: u32,
        frame_height: u32,
    ) -> bool {
        let wide = CameraView::new(detections, frame_width, frame_height);
        self.update_views(now, wide, None)
    }

    /// Process detections from the wide camera and from the PTZ camera's own
    /// picture. Once the PTZ camera sees a target it steers from its own frame;
    /// the wide camera only repositions it when the PTZ picture is empty.
    pub fn update_multi_camera(&mut self, wide: CameraView<'_>, ptz: CameraView<'_>) -> bool {
        self.update_multi_camera_at(Instant::now(), wide, ptz)
    }

    /// [`Self::update_multi_camera`] at an explicit time.
    pub fn update_multi_camera_at(
        &mut self,
        now: Instant,
        wide: CameraView<'_>,
        ptz: CameraView<'_>,
    ) -> bool {
        self.update_views(now, wide, Some(ptz))
    }

    fn update_views(
        &mut self,
        now: Instant,
        wide: CameraView<'_>,
        ptz: Option<CameraView<'_>>,
    ) -> bool {
        if !self.patrol_enabled && !self.track_enabled {
            return false;
        }
        let ptz = ptz.filter(|view| view.has_frame());
        if !wide.has_frame() && ptz.is_none() {
            warn!(
                "Ignoring update with empty frame {}x{}",
                wide.frame_width, wide.frame_height
            );
            return false;
        }
        if let Some(last) = self.state.last_update {
            if now.duration_since(last) < secs(self.config.update_interval_secs) {
                return false;
            }
        }
        self.state.last_update = Some(now);
        if wide.has_frame() {
            self.mapping
                .set_frame_size(wide.frame_width, wide.frame_height);
        }

        let min_fraction = self.config.min_detection_area;
        let from_ptz = ptz.and_then(|view| {
            best_detection(view.large_enough(min_fraction))
                .map(|target| (target, view, DetectionSource::Ptz))
        });
        let from_wide = if wide.has_frame() {
            best_detection(wide.large_enough(min_fraction))
                .map(|target| (target, wide, DetectionSource::Wide))
        } else {
            None
        };
        let count = wide.detections.len() + ptz.map_or(0, |view| view.detections.len());

        match from_ptz.or(from_wide) {
            Some((target, view, source)) if self.track_enabled => {
                if source == DetectionSource::Ptz
                    && self.state.last_source != Some(DetectionSource::Ptz)
                {
                    info!("PTZ camera sees {}, steering from its own frame", target.species);
                }
                self.state.last_detection = Some(now);
                self.state.lost_since = None;
                self.state.last_species = Some(target.species.clone());
                self.state.last_source = Some(source);
                let reason = format!("{} detections", source);
                self.apply(TrackerEvent::Detections, now, &reason);
                self.track(target, view, source, now)
            }
            Some(_) => {
                debug!("{} detections ignored, tracking disabled", count);
                self.log(now, DecisionKind::TrackDisabled { detections: count });
                self.handle_no_detections(now)
            }
            None => self.handle_no_detections(now),
        }
    }

    /// Point the camera straight at a box with an absolute move.
    pub fn center_on_bbox(
        &mut self,
        bbox: &BBox,
        frame_width: u32,
        frame_height: u32,
        auto_zoom: bool,
    ) -> ActuatorResult<()> {
        self.mapping.set_frame_size(frame_width, frame_height);
        let (cx, cy) = bbox.center();
        let (pan, tilt) = self.mapping.pixel_to_actuator(cx, cy);
        let zoom = if auto_zoom {
            self.mapping.bbox_to_zoom(bbox, self.config.target_fill)
        } else {
            0.0
        };
        self.actuator.move_absolute(pan, tilt, zoom)?;
        self.state.smoothed = SmoothedTarget { pan, tilt, zoom };
        info!(
            "Centered on box: pan={:.3}, tilt={:.3}, zoom={:.3}",
            pan, tilt, zoom
        );
        Ok(())
    }

    pub fn decisions(&self) -> Vec<Decision> {
        self.decisions.iter().cloned().collect()
    }

    pub fn decisions_between(&self, start: Instant, end: Instant) -> Vec<Decision> {
        self.decisions.between(start, end)
    }

    pub fn clear_decisions(&mut self) {
        self.decisions.clear();
    }

    fn handle_no_detections(&mut self, now: Instant) -> bool {
        let mut grace_expired = true;
        if self.state.mode == TrackerMode::Tracking {
            if self.state.lost_since.is_none() {
                self.state.lost_since = Some(now);
                info!("Target lost");
                self.log(now, DecisionKind::TrackingLost);
            }
            grace_expired = self
                .state
                .last_detection
                .is_none_or(|t| now.duration_since(t) > secs(self.config.grace_period_secs));
        }

        self.apply(
            TrackerEvent::NoDetections { grace_expired },
            now,
            "no detections",
        );

        match self.state.mode {
            TrackerMode::Tracking => {
                // Hold position while waiting for the target to reappear.
                self.stop_camera(now);
                false
            }
            TrackerMode::Patrol => self.patrol_tick(now),
            TrackerMode::Idle => false,
        }
    }

    fn track(
        &mut self,
        target: &Detection,
        view: CameraView<'_>,
        camera: DetectionSource,
        now: Instant,
    ) -> bool {
        let (w, h) = (view.frame_width as f64, view.frame_height as f64);
        let (cx, cy) = target.bbox.center();
        // PTZ-frame positions say nothing about absolute pan/tilt.
        if camera == DetectionSource::Wide {
            let (pan, tilt) = self.mapping.pixel_to_actuator(cx, cy);
            let zoom = self.mapping.bbox_to_zoom(&target.bbox, self.config.target_fill);
            self.state
                .smoothed
                .blend(pan, tilt, zoom, self.config.smoothing);
        }

        let (offset_x, offset_y) = center_offset(cx, cy, w, h);
        let offset = offset_x.hypot(offset_y);
        if offset < self.config.min_move_threshold {
            debug!("Target centered in {} frame (offset {:.3}), holding", camera, offset);
            self.log(now, DecisionKind::Deadzone { offset, camera });
            self.stop_camera(now);
            return false;
        }

        let pan_velocity = velocity_curve(offset_x);
        let tilt_velocity = velocity_curve(offset_y);
        let zoom_velocity = zoom_velocity(self.config.target_fill, target.bbox.fill_ratio(w, h));
        debug!(
            "Tracking {} from {}: offset=({:.3}, {:.3}) velocity=({:.2}, {:.2}, {:.2})",
            target.species, camera, offset_x, offset_y, pan_velocity, tilt_velocity, zoom_velocity
        );
        self.log(
            now,
            DecisionKind::Move {
                pan_velocity,
                tilt_velocity,
                zoom_velocity,
                offset_x,
                offset_y,
                species: target.species.clone(),
                camera,
            },
        );

        match self
            .actuator
            .continuous_move(pan_velocity, tilt_velocity, zoom_velocity)
        {
            Ok(()) => true,
            Err(e) => {
                self.log_error(now, e);
                false
            }
        }
    }

    fn patrol_tick(&mut self, now: Instant) -> bool {
        match self
            .state
            .patrol
            .tick(&self.patrol_config, self.actuator.as_ref(), now)
        {
            PatrolOutcome::Swept { reversed, .. } => {
                if reversed {
                    let direction = self.state.patrol.direction;
                    self.log(now, DecisionKind::PatrolReverse { direction });
                }
                true
            }
            PatrolOutcome::Dwelling => true,
            PatrolOutcome::Advanced { from, to, token } => {
                self.log(now, DecisionKind::PatrolAdvance { from, to, token });
                true
            }
            PatrolOutcome::Failed(e) => {
                self.log_error(now, e);
                false
            }
        }
    }

    /// Route an event through the transition function and run entry actions.
    fn apply(&mut self, event: TrackerEvent, now: Instant, reason: &str) {
        let from = self.state.mode;
        let to = next_mode(from, event, self.patrol_enabled, self.track_enabled);
        if from == to {
            return;
        }
        info!("Mode: {} -> {} ({})", from, to, reason);
        self.state.mode = to;
        self.log(
            now,
            DecisionKind::ModeChange {
                from,
                to,
                reason: reason.to_string(),
            },
        );

        match to {
            TrackerMode::Idle => self.stop_camera(now),
            TrackerMode::Patrol => {
                // Coming back from a target resumes the current preset.
                let restart = from != TrackerMode::Tracking;
                if let Some(e) =
                    self.state
                        .patrol
                        .enter(&self.patrol_config, self.actuator.as_ref(), restart)
                {
                    self.log_error(now, e);
                }
            }
            TrackerMode::Tracking => {}
        }
    }

    fn stop_camera(&mut self, now: Instant) {
        if let Err(e) = self.actuator.stop() {
            self.log_error(now, e);
        }
    }

    fn log(&mut self, now: Instant, kind: DecisionKind) {
        self.decisions.push(now, self.state.mode, kind);
    }

    fn log_error(&mut self, now: Instant, error: ActuatorError) {
        warn!("PTZ command failed: {}", error);
        let command = match &error {
            ActuatorError::Timeout { command, .. } | ActuatorError::Command { command, .. } => {
                command.to_string()
            }
            ActuatorError::Unsupported(command) => command.to_string(),
            ActuatorError::Disconnected => "worker".to_string(),
        };
        self.log(
            now,
            DecisionKind::Error {
                command,
                message: error.to_string(),
            },
        );
    }
}
