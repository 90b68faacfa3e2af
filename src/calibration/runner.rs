//! Background calibration thread.
//!
//! Calibration takes tens of seconds of settle waits, so it runs on its own
//! thread. The caller keeps a [`CalibrationHandle`] to watch progress, cancel,
//! and collect the result.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Result, anyhow};
use crossbeam_channel::{Receiver, bounded};

use super::{
    CalibrationConfig, CalibrationContext, CalibrationResult, CancelToken, ZoomFovCalibrator,
    ZoomFovTable, calibrate,
};
use crate::actuator::PtzActuator;
use crate::io::FrameSource;
use crate::matching::LocateView;

/// Progress messages buffered before new ones are dropped.
const PROGRESS_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub message: String,
    pub fraction: f64,
}

/// Handle to a running calibration.
pub struct CalibrationHandle<T> {
    cancel: CancelToken,
    progress: Receiver<Progress>,
    worker: JoinHandle<T>,
}

impl<T> CalibrationHandle<T> {
    /// Ask the run to stop at its next suspension point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn progress(&self) -> &Receiver<Progress> {
        &self.progress
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Block until the run ends.
    pub fn join(self) -> Result<T> {
        self.worker
            .join()
            .map_err(|_| anyhow!("calibration thread panicked"))
    }
}

/// Spawns calibration runs against one actuator and its two cameras.
#[derive(Clone)]
pub struct CalibrationRunner {
    actuator: Arc<dyn PtzActuator>,
    wide: Arc<dyn FrameSource>,
    ptz: Arc<dyn FrameSource>,
    config: CalibrationConfig,
}

impl CalibrationRunner {
    pub fn new(
        actuator: Arc<dyn PtzActuator>,
        wide: Arc<dyn FrameSource>,
        ptz: Arc<dyn FrameSource>,
        config: CalibrationConfig,
    ) -> Self {
        Self {
            actuator,
            wide,
            ptz,
            config,
        }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Run the mapping calibration for the actuator's capability.
    ///
    /// The locator is built on the calibration thread.
    pub fn spawn<L, F>(&self, points: usize, make_locator: F) -> CalibrationHandle<CalibrationResult>
    where
        L: LocateView + 'static,
        F: FnOnce() -> Result<L> + Send + 'static,
    {
        let config = self.config.clone();
        self.spawn_job(
            make_locator,
            move |ctx| calibrate(ctx, &config, points),
            |error| CalibrationResult::failure(error, Vec::new()),
        )
    }

    /// Measure the zoom → field-of-view table at the current pan/tilt.
    pub fn spawn_zoom_fov<L, F>(&self, make_locator: F) -> CalibrationHandle<ZoomFovTable>
    where
        L: LocateView + 'static,
        F: FnOnce() -> Result<L> + Send + 'static,
    {
        let calibrator = ZoomFovCalibrator::new(self.config.zoom_fov.clone());
        self.spawn_job(
            make_locator,
            move |ctx| calibrator.run(ctx),
            |error| ZoomFovTable {
                error: Some(error),
                ..Default::default()
            },
        )
    }

    fn spawn_job<T, L, F, J, E>(&self, make_locator: F, job: J, on_error: E) -> CalibrationHandle<T>
    where
        T: Send + 'static,
        L: LocateView + 'static,
        F: FnOnce() -> Result<L> + Send + 'static,
        J: FnOnce(&mut CalibrationContext<'_>) -> T + Send + 'static,
        E: FnOnce(String) -> T + Send + 'static,
    {
        let cancel = CancelToken::new();
        let (progress_tx, progress_rx) = bounded::<Progress>(PROGRESS_CAPACITY);
        let actuator = self.actuator.clone();
        let wide = self.wide.clone();
        let ptz = self.ptz.clone();
        let token = cancel.clone();

        let worker = thread::spawn(move || {
            let mut locator = match make_locator() {
                Ok(locator) => locator,
                Err(e) => return on_error(format!("Could not build feature matcher: {e:#}")),
            };
            let mut progress = |message: &str, fraction: f64| {
                // A slow reader loses messages, never blocks calibration.
                let _ = progress_tx.try_send(Progress {
                    message: message.to_string(),
                    fraction,
                });
            };
            let mut ctx = CalibrationContext {
                actuator: actuator.as_ref(),
                wide: wide.as_ref(),
                ptz: ptz.as_ref(),
                locator: &mut locator,
                cancel: &token,
                progress: &mut progress,
            };
            job(&mut ctx)
        });

        CalibrationHandle {
            cancel,
            progress: progress_rx,
            worker,
        }
    }
}
