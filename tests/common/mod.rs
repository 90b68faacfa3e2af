#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use opencv::core::{CV_8UC3, Mat, Scalar};
use opencv::prelude::*;
use ptz_autotrack::actuator::RecordingActuator;
use ptz_autotrack::calibration::{
    CalibrationConfig, DeadReckoningConfig, FeedbackConfig, ZoomFovConfig,
};
use ptz_autotrack::detection::{BBox, Detection};
use ptz_autotrack::io::FrameSource;
use ptz_autotrack::matching::{LocateView, ViewMatch};

/// Wide-frame x per unit of pan in the simulated rig.
pub const PAN_GAIN: f64 = 0.4;
/// Wide-frame y per unit of tilt (tilt up moves the view up).
pub const TILT_GAIN: f64 = 0.3;

/// Locates the PTZ view from the simulated actuator position instead of
/// matching pixels.
pub struct SimulatedView {
    camera: Arc<RecordingActuator>,
    /// Only this many calls find a match; `None` means all do.
    pub matches_left: Option<usize>,
}

impl SimulatedView {
    pub fn new(camera: Arc<RecordingActuator>) -> Self {
        Self {
            camera,
            matches_left: None,
        }
    }

    pub fn limited(camera: Arc<RecordingActuator>, matches: usize) -> Self {
        Self {
            camera,
            matches_left: Some(matches),
        }
    }
}

impl LocateView for SimulatedView {
    fn locate(&mut self, wide: &Mat, ptz: &Mat) -> Result<Option<ViewMatch>> {
        if wide.empty() || ptz.empty() {
            return Ok(None);
        }
        if let Some(left) = self.matches_left.as_mut() {
            if *left == 0 {
                return Ok(None);
            }
            *left -= 1;
        }
        let pos = self.camera.position();
        let center_x = 0.5 + PAN_GAIN * pos.pan;
        let center_y = 0.5 - TILT_GAIN * pos.tilt;
        Ok(Some(ViewMatch {
            center_x,
            center_y,
            bounds: [center_x - 0.1, center_y - 0.1, center_x + 0.1, center_y + 0.1],
            confidence: 0.9,
            inliers: 40,
            scale: 0.4,
        }))
    }
}

pub fn gray_frames() -> Arc<dyn FrameSource> {
    Arc::new(|| Mat::new_rows_cols_with_default(48, 64, CV_8UC3, Scalar::all(100.0)).ok())
}

/// Gray frames for the first `count` reads, then nothing.
pub fn frames_for(count: usize) -> Arc<dyn FrameSource> {
    let reads = AtomicUsize::new(0);
    Arc::new(move || {
        if reads.fetch_add(1, Ordering::SeqCst) < count {
            Mat::new_rows_cols_with_default(48, 64, CV_8UC3, Scalar::all(100.0)).ok()
        } else {
            None
        }
    })
}

pub fn no_frames() -> Arc<dyn FrameSource> {
    Arc::new(|| None::<Mat>)
}

/// A 100x100 box centered at `(x, y)`.
pub fn animal_at(x: f64, y: f64) -> Detection {
    Detection::new(BBox::new(x - 50.0, y - 50.0, x + 50.0, y + 50.0), 0.8, "deer")
}

/// Calibration settings with settle waits cut to a few milliseconds.
pub fn fast_config() -> CalibrationConfig {
    CalibrationConfig {
        feedback: FeedbackConfig {
            settle_secs: 0.01,
            probe_actuator: true,
            probe_velocity: 0.5,
            probe_move_secs: 0.05,
            probe_settle_secs: 0.01,
        },
        dead_reckoning: DeadReckoningConfig {
            grid_size: 3,
            move_speed: 0.3,
            move_duration_secs: 0.05,
            settle_secs: 0.01,
            home_wait_secs: 0.01,
            pre_move_pause_secs: 0.0,
            inter_move_pause_secs: 0.0,
        },
        zoom_fov: ZoomFovConfig {
            zoom_levels: vec![0.0, 0.5, 1.0],
            settle_secs: 0.01,
        },
    }
}
