//! Automatic derivation of the pixel ↔ actuator mapping.
//!
//! Two strategies, chosen by [`ActuatorCapability`]:
//! - [`FeedbackCalibrator`]: absolute moves over a small grid, reported
//!   positions read back, weighted linear regression.
//! - [`DeadReckoningCalibrator`]: timed relative moves from home with the
//!   position estimated from the commands, local-slope fit.
//!
//! Both locate the PTZ view in the wide frame through [`LocateView`] and share
//! the fitting code in [`fit`]. Calibration always yields a
//! [`CalibrationResult`]; failures are reported in its `error` field.

mod cancel;
mod dead_reckoning;
mod feedback;
pub mod fit;
mod runner;
mod zoom_fov;

use opencv::core::Mat;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::actuator::{ActuatorCapability, PtzActuator};
use crate::control::secs;
use crate::io::FrameSource;
use crate::mapping::MappingParams;
use crate::matching::{LocateView, ViewMatch};

pub use cancel::CancelToken;
pub use dead_reckoning::{DeadReckoningCalibrator, DeadReckoningConfig};
pub use feedback::{FeedbackCalibrator, FeedbackConfig};
pub use fit::{DeadReckoningFit, FitError};
pub use runner::{CalibrationHandle, CalibrationRunner, Progress};
pub use zoom_fov::{ZoomFovCalibrator, ZoomFovConfig, ZoomFovPoint, ZoomFovTable};

/// Fewest usable samples a fit accepts.
pub const MIN_SAMPLES: usize = 3;

/// One actuator position paired with where its view appears in the wide frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSample {
    /// Reported pan, or the estimated command offset for dead reckoning.
    pub pan: f64,
    pub tilt: f64,
    pub zoom: Option<f64>,
    /// Wide-frame position of the PTZ view center, as frame fractions.
    pub wide_x: f64,
    pub wide_y: f64,
    pub confidence: f64,
}

impl CalibrationSample {
    pub fn new(
        pan: f64,
        tilt: f64,
        zoom: Option<f64>,
        wide_x: f64,
        wide_y: f64,
        confidence: f64,
    ) -> Self {
        Self {
            pan,
            tilt,
            zoom,
            wide_x,
            wide_y,
            confidence,
        }
    }
}

/// Outcome of a calibration run.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationResult {
    /// Fitted parameters (possibly partial if cancelled), or the defaults
    /// when the run failed.
    pub params: MappingParams,
    /// Present for dead-reckoning runs that produced a fit.
    pub dead_reckoning: Option<DeadReckoningFit>,
    pub samples: Vec<CalibrationSample>,
    pub error: Option<String>,
    pub cancelled: bool,
}

impl CalibrationResult {
    pub fn success(params: MappingParams, samples: Vec<CalibrationSample>) -> Self {
        Self {
            params,
            dead_reckoning: None,
            samples,
            error: None,
            cancelled: false,
        }
    }

    /// Default parameters with an explanation.
    pub fn failure(error: impl Into<String>, samples: Vec<CalibrationSample>) -> Self {
        Self {
            params: MappingParams::default(),
            dead_reckoning: None,
            samples,
            error: Some(error.into()),
            cancelled: false,
        }
    }

    /// Cancelled before any sample could be fitted.
    pub fn cancelled(samples: Vec<CalibrationSample>) -> Self {
        let mut result = Self::failure("Calibration cancelled", samples);
        result.cancelled = true;
        result
    }

    /// A complete run whose parameters may replace the live mapping.
    ///
    /// A cancelled run can still carry a partial fit in `params`, but it is
    /// never a success.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && !self.cancelled
    }

    /// Whether `params` came from a fit rather than the defaults.
    pub fn has_fit(&self) -> bool {
        self.error.is_none()
    }
}

/// Settings for all calibration strategies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub feedback: FeedbackConfig,
    pub dead_reckoning: DeadReckoningConfig,
    pub zoom_fov: ZoomFovConfig,
}

/// Everything a calibrator touches while it runs.
pub struct CalibrationContext<'a> {
    pub actuator: &'a dyn PtzActuator,
    pub wide: &'a dyn FrameSource,
    pub ptz: &'a dyn FrameSource,
    pub locator: &'a mut dyn LocateView,
    pub cancel: &'a CancelToken,
    pub progress: &'a mut dyn FnMut(&str, f64),
}

impl CalibrationContext<'_> {
    /// Log and forward a progress message (`fraction` in [0, 1]).
    pub fn report(&mut self, message: &str, fraction: f64) {
        info!("{} ({:.0}%)", message, fraction * 100.0);
        (self.progress)(message, fraction);
    }

    /// Capture both frames.
    pub fn capture(&self) -> Option<(Mat, Mat)> {
        let wide = self.wide.latest_frame();
        let ptz = self.ptz.latest_frame();
        match (wide, ptz) {
            (Some(wide), Some(ptz)) => Some((wide, ptz)),
            (None, _) => {
                warn!("Wide frame unavailable");
                None
            }
            (_, None) => {
                warn!("PTZ frame unavailable");
                None
            }
        }
    }

    /// Capture both frames and locate the PTZ view. Any failure is logged and
    /// reported as no match.
    pub fn capture_and_locate(&mut self) -> Option<ViewMatch> {
        let (wide, ptz) = self.capture()?;
        match self.locator.locate(&wide, &ptz) {
            Ok(found) => found,
            Err(e) => {
                warn!("View matching failed: {:#}", e);
                None
            }
        }
    }

    /// Cancellable settle wait; `true` if the run was cancelled.
    pub fn settle(&self, seconds: f64) -> bool {
        self.cancel.sleep(secs(seconds))
    }
}

/// Run the calibrator matching the actuator's capability.
///
/// `points` is the feedback pattern size (9, 5 or 3); dead reckoning uses the
/// configured grid size instead.
pub fn calibrate(
    ctx: &mut CalibrationContext<'_>,
    config: &CalibrationConfig,
    points: usize,
) -> CalibrationResult {
    match ctx.actuator.capability() {
        ActuatorCapability::PositionFeedback => {
            FeedbackCalibrator::new(config.feedback.clone()).run(ctx, points)
        }
        ActuatorCapability::DeadReckoning => {
            DeadReckoningCalibrator::new(config.dead_reckoning.clone()).run(ctx)
        }
    }
}

/// Gate samples through the fit, turning cancellation and fit errors into a
/// failed result.
fn finish<T>(
    samples: Vec<CalibrationSample>,
    cancelled: bool,
    fit: impl FnOnce(&[CalibrationSample]) -> Result<T, FitError>,
    build: impl FnOnce(T, Vec<CalibrationSample>) -> CalibrationResult,
) -> CalibrationResult {
    let mut result = match fit(&samples) {
        Ok(value) => build(value, samples),
        Err(e) if cancelled => {
            warn!("Calibration cancelled: {}", e);
            CalibrationResult::failure(format!("Calibration cancelled: {e}"), samples)
        }
        Err(e) => {
            warn!("{}", e);
            CalibrationResult::failure(e.to_string(), samples)
        }
    };
    result.cancelled = cancelled;
    result
}
