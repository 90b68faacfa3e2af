use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, bail};
use parking_lot::Mutex;
use tracing::{info, warn};

use super::shared_state::SharedState;
use crate::actuator::{ActuatorResult, BoundedActuator, PtzActuator};
use crate::calibration::{
    CalibrationHandle, CalibrationResult, CalibrationRunner, DeadReckoningFit, Progress,
};
use crate::config::PtzConfig;
use crate::control::{
    DeadReckoningNavigator, NavigatorConfig, TrackerMode, TrackingController,
};
use crate::detection::{BBox, CameraView, Detection};
use crate::io::FrameSource;
use crate::mapping::{MappingModel, load_params, save_params};
use crate::matching::{LocateView, MatchConfig, OrbViewLocator};

/// Controller, calibration runner and mapping persistence for one camera pair.
pub struct PtzSystem {
    shared: Arc<SharedState>,
    actuator: Arc<dyn PtzActuator>,
    controller: Mutex<TrackingController>,
    runner: CalibrationRunner,
    match_config: MatchConfig,
    navigator_config: NavigatorConfig,
    mapping_path: Option<PathBuf>,
    calibration: Mutex<Option<CalibrationHandle<CalibrationResult>>>,
    dead_reckoning: Mutex<Option<DeadReckoningFit>>,
}

impl PtzSystem {
    /// Wire everything up and load the persisted mapping, if any.
    ///
    /// With a positive command timeout the actuator is wrapped in a
    /// [`BoundedActuator`].
    pub fn new(
        config: &PtzConfig,
        actuator: Arc<dyn PtzActuator>,
        wide: Arc<dyn FrameSource>,
        ptz: Arc<dyn FrameSource>,
    ) -> Self {
        let actuator: Arc<dyn PtzActuator> = match config.actuator.command_timeout() {
            Some(timeout) => Arc::new(BoundedActuator::new(actuator, timeout)),
            None => actuator,
        };

        let mut mapping = MappingModel::default();
        if let Some(path) = &config.mapping_path {
            match load_params(path) {
                Ok(Some(params)) => {
                    info!("Loaded mapping from {:?}", path);
                    mapping.apply(params);
                }
                Ok(None) => info!("No saved mapping at {:?}, using defaults", path),
                Err(e) => warn!("Ignoring unreadable mapping: {:#}", e),
            }
        }

        let controller = TrackingController::new(
            actuator.clone(),
            mapping,
            config.tracking.clone(),
            config.patrol.clone(),
        );
        let runner = CalibrationRunner::new(
            actuator.clone(),
            wide,
            ptz,
            config.calibration.clone(),
        );

        Self {
            shared: SharedState::new(),
            match_config: config.match_config(actuator.capability()),
            actuator,
            controller: Mutex::new(controller),
            runner,
            navigator_config: config.navigator.clone(),
            mapping_path: config.mapping_path.clone(),
            calibration: Mutex::new(None),
            dead_reckoning: Mutex::new(None),
        }
    }

    pub fn shared_state(&self) -> &Arc<SharedState> {
        &self.shared
    }

    pub fn actuator(&self) -> &Arc<dyn PtzActuator> {
        &self.actuator
    }

    pub fn mode(&self) -> TrackerMode {
        self.controller.lock().mode()
    }

    /// Run `f` with exclusive access to the controller.
    pub fn with_controller<R>(&self, f: impl FnOnce(&mut TrackingController) -> R) -> R {
        f(&mut self.controller.lock())
    }

    pub fn start_tracking(&self) {
        self.controller.lock().start_tracking();
    }

    pub fn stop_tracking(&self) {
        self.controller.lock().stop_tracking();
    }

    pub fn set_patrol_enabled(&self, enabled: bool) {
        self.controller.lock().set_patrol_enabled(enabled);
    }

    pub fn set_track_enabled(&self, enabled: bool) {
        self.controller.lock().set_track_enabled(enabled);
    }

    /// Feed one frame's detections. Skipped while calibrating.
    pub fn update(&self, detections: &[Detection], frame_width: u32, frame_height: u32) -> bool {
        self.poll_calibration();
        if self.shared.is_calibrating() || self.shared.is_shutdown_requested() {
            return false;
        }
        self.controller
            .lock()
            .update(detections, frame_width, frame_height)
    }

    /// Feed detections from both cameras. Skipped while calibrating.
    pub fn update_multi_camera(&self, wide: CameraView<'_>, ptz: CameraView<'_>) -> bool {
        self.poll_calibration();
        if self.shared.is_calibrating() || self.shared.is_shutdown_requested() {
            return false;
        }
        self.controller.lock().update_multi_camera(wide, ptz)
    }

    pub fn center_on_bbox(
        &self,
        bbox: &BBox,
        frame_width: u32,
        frame_height: u32,
        auto_zoom: bool,
    ) -> ActuatorResult<()> {
        self.controller
            .lock()
            .center_on_bbox(bbox, frame_width, frame_height, auto_zoom)
    }

    pub fn is_calibrating(&self) -> bool {
        self.shared.is_calibrating()
    }

    /// Start a calibration run with the ORB locator.
    pub fn start_calibration(&self, points: usize) -> Result<()> {
        let config = self.match_config.clone();
        self.start_calibration_with(points, move || OrbViewLocator::new(config))
    }

    /// Start a calibration run with a caller-provided locator.
    pub fn start_calibration_with<L, F>(&self, points: usize, make_locator: F) -> Result<()>
    where
        L: LocateView + 'static,
        F: FnOnce() -> Result<L> + Send + 'static,
    {
        if self.shared.is_shutdown_requested() {
            bail!("System is shutting down");
        }
        let mut slot = self.calibration.lock();
        if !self.shared.begin_calibration() {
            bail!("Calibration already running");
        }
        if let Err(e) = self.actuator.stop() {
            warn!("Could not stop camera before calibration: {}", e);
        }
        info!("Calibration started ({} points)", points);
        *slot = Some(self.runner.spawn(points, make_locator));
        Ok(())
    }

    pub fn cancel_calibration(&self) {
        if let Some(handle) = self.calibration.lock().as_ref() {
            info!("Cancelling calibration");
            handle.cancel();
        }
    }

    /// Progress messages received since the last call.
    pub fn calibration_progress(&self) -> Vec<Progress> {
        self.calibration
            .lock()
            .as_ref()
            .map(|handle| handle.progress().try_iter().collect())
            .unwrap_or_default()
    }

    /// Collect a finished run without blocking. A successful result has
    /// already been applied and persisted when this returns it; a cancelled
    /// one never is.
    pub fn poll_calibration(&self) -> Option<CalibrationResult> {
        let handle = {
            let mut slot = self.calibration.lock();
            if !slot.as_ref().is_some_and(|h| h.is_finished()) {
                return None;
            }
            slot.take()?
        };
        Some(self.finish_calibration(handle))
    }

    /// Block until the current run ends.
    pub fn wait_for_calibration(&self) -> Option<CalibrationResult> {
        let handle = self.calibration.lock().take()?;
        Some(self.finish_calibration(handle))
    }

    /// Dead-reckoning fit from the last successful run on such an actuator.
    pub fn dead_reckoning_fit(&self) -> Option<DeadReckoningFit> {
        *self.dead_reckoning.lock()
    }

    pub fn navigator(&self) -> Option<DeadReckoningNavigator> {
        let fit = self.dead_reckoning_fit()?;
        Some(DeadReckoningNavigator::new(
            self.actuator.clone(),
            fit,
            self.navigator_config.clone(),
        ))
    }

    /// Cancel calibration, stop tracking and the camera.
    pub fn shutdown(&self) {
        if self.shared.is_shutdown_requested() {
            return;
        }
        self.shared.request_shutdown();
        self.cancel_calibration();
        self.wait_for_calibration();
        self.stop_tracking();
        info!("PTZ system shut down");
    }

    fn finish_calibration(&self, handle: CalibrationHandle<CalibrationResult>) -> CalibrationResult {
        let result = handle
            .join()
            .unwrap_or_else(|e| CalibrationResult::failure(format!("{e:#}"), Vec::new()));
        if result.is_success() {
            self.apply_calibration(&result);
        } else if result.cancelled {
            info!(
                "Calibration cancelled after {} samples, keeping the current mapping",
                result.samples.len()
            );
        } else if let Some(error) = &result.error {
            warn!("Calibration failed: {}", error);
        }
        self.shared.end_calibration();
        result
    }

    fn apply_calibration(&self, result: &CalibrationResult) {
        self.controller.lock().update_calibration(result.params);
        if let Some(fit) = result.dead_reckoning {
            *self.dead_reckoning.lock() = Some(fit);
        }
        if let Some(path) = &self.mapping_path {
            match save_params(path, &result.params) {
                Ok(()) => info!("Saved mapping to {:?}", path),
                Err(e) => warn!("Could not save mapping: {:#}", e),
            }
        }
    }
}

impl Drop for PtzSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}
