mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use approx::assert_relative_eq;
use common::{SimulatedView, fast_config, frames_for, gray_frames, no_frames};
use ptz_autotrack::actuator::recording::Command;
use ptz_autotrack::actuator::{ActuatorCapability, PtzActuator, RecordingActuator};
use ptz_autotrack::calibration::{CalibrationConfig, CalibrationRunner};
use ptz_autotrack::io::FrameSource;
use ptz_autotrack::mapping::MappingParams;

fn runner(
    camera: &Arc<RecordingActuator>,
    wide: Arc<dyn FrameSource>,
    config: CalibrationConfig,
) -> CalibrationRunner {
    CalibrationRunner::new(camera.clone(), wide, gray_frames(), config)
}

#[test]
fn test_feedback_grid_recovers_mapping() {
    let camera = Arc::new(RecordingActuator::new());
    let view_camera = camera.clone();
    let handle = runner(&camera, gray_frames(), fast_config())
        .spawn(9, move || Ok(SimulatedView::new(view_camera)));
    let result = handle.join().unwrap();

    assert!(result.is_success(), "{:?}", result.error);
    assert!(!result.cancelled);
    assert_eq!(result.samples.len(), 9);
    let p = result.params;
    // Pan range 1.0 over a wide range of 0.4; tilt 0.6 over 0.18 clamps to 3.
    assert_relative_eq!(p.pan_scale, 2.5, epsilon = 1e-6);
    assert_relative_eq!(p.tilt_scale, 3.0, epsilon = 1e-6);
    assert_relative_eq!(p.pan_center_x, 0.5, epsilon = 1e-6);
    assert_relative_eq!(p.tilt_center_y, 0.5, epsilon = 1e-6);

    assert_eq!(
        camera.commands().last(),
        Some(&Command::Absolute {
            pan: 0.0,
            tilt: 0.0,
            zoom: 0.0
        })
    );
}

#[test]
fn test_progress_is_reported() {
    let camera = Arc::new(RecordingActuator::new());
    let view_camera = camera.clone();
    let handle = runner(&camera, gray_frames(), fast_config())
        .spawn(3, move || Ok(SimulatedView::new(view_camera)));
    let progress = handle.progress().clone();
    let result = handle.join().unwrap();
    assert!(result.is_success());

    let messages: Vec<_> = progress.try_iter().collect();
    assert!(!messages.is_empty());
    assert!(messages.windows(2).all(|w| w[0].fraction <= w[1].fraction));
    assert_eq!(messages.last().map(|m| m.fraction), Some(1.0));
}

#[test]
fn test_missing_frames_fail_immediately() {
    let camera = Arc::new(RecordingActuator::new());
    let view_camera = camera.clone();
    let result = runner(&camera, no_frames(), fast_config())
        .spawn(9, move || Ok(SimulatedView::new(view_camera)))
        .join()
        .unwrap();
    assert_eq!(
        result.error.as_deref(),
        Some("Could not capture frames from cameras")
    );
    assert!(camera.commands().is_empty());
}

#[test]
fn test_unresponsive_actuator_is_detected() {
    let camera = Arc::new(RecordingActuator::new());
    camera.set_frozen(true);
    let view_camera = camera.clone();
    let result = runner(&camera, gray_frames(), fast_config())
        .spawn(9, move || Ok(SimulatedView::new(view_camera)))
        .join()
        .unwrap();
    let error = result.error.unwrap_or_default();
    assert!(error.starts_with("PTZ not responding"), "{error}");
    assert!(result.samples.is_empty());
}

#[test]
fn test_too_few_matches_is_an_error_result() {
    let camera = Arc::new(RecordingActuator::new());
    let view_camera = camera.clone();
    let result = runner(&camera, gray_frames(), fast_config())
        .spawn(9, move || Ok(SimulatedView::limited(view_camera, 2)))
        .join()
        .unwrap();
    assert_eq!(result.samples.len(), 2);
    assert_eq!(
        result.error.as_deref(),
        Some("Not enough calibration points (2/3 minimum)")
    );
    assert_eq!(result.params, MappingParams::default());
}

#[test]
fn test_locator_construction_failure() {
    let camera = Arc::new(RecordingActuator::new());
    let result = runner(&camera, gray_frames(), fast_config())
        .spawn(9, || -> anyhow::Result<SimulatedView> { anyhow::bail!("no ORB") })
        .join()
        .unwrap();
    let error = result.error.unwrap_or_default();
    assert!(error.contains("no ORB"), "{error}");
}

#[test]
fn test_cancel_stops_a_long_run() {
    let camera = Arc::new(RecordingActuator::new());
    let mut config = fast_config();
    config.feedback.settle_secs = 5.0;
    config.feedback.probe_actuator = false;
    let view_camera = camera.clone();
    let handle = runner(&camera, gray_frames(), config)
        .spawn(9, move || Ok(SimulatedView::new(view_camera)));

    thread::sleep(Duration::from_millis(100));
    let started = Instant::now();
    handle.cancel();
    let result = handle.join().unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(result.cancelled);
    assert!(!result.is_success());
    assert!(result.samples.is_empty());
}

#[test]
fn test_dead_reckoning_grid() {
    let camera = Arc::new(RecordingActuator::new().with_capability(ActuatorCapability::DeadReckoning));
    camera.set_report_position(false);
    let view_camera = camera.clone();
    let result = runner(&camera, gray_frames(), fast_config())
        .spawn(9, move || Ok(SimulatedView::new(view_camera)))
        .join()
        .unwrap();

    assert!(result.is_success(), "{:?}", result.error);
    // Home plus the eight off-center cells.
    assert_eq!(result.samples.len(), 9);
    let fit = result.dead_reckoning.expect("dead-reckoning fit");
    assert_relative_eq!(fit.center_x, 0.5, epsilon = 1e-6);
    assert_relative_eq!(fit.center_y, 0.5, epsilon = 1e-6);
    // Pan right moves the view right, tilt up moves it up the frame.
    assert!(fit.pan_to_pixel_x > 0.0);
    assert!(fit.tilt_to_pixel_y < 0.0);
    assert_relative_eq!(result.params.pan_center_x, 0.5, epsilon = 1e-6);

    assert!(
        camera
            .commands()
            .iter()
            .all(|c| !matches!(c, Command::Absolute { .. }))
    );
    assert_eq!(camera.commands().last(), Some(&Command::Home));
}

fn dead_reckoning_camera() -> Arc<RecordingActuator> {
    let camera = Arc::new(RecordingActuator::new().with_capability(ActuatorCapability::DeadReckoning));
    camera.set_report_position(false);
    camera
}

#[test]
fn test_dead_reckoning_tolerates_lost_matches() {
    let camera = dead_reckoning_camera();
    let view_camera = camera.clone();
    // Home and the first four cells match, the rest of the grid does not.
    let result = runner(&camera, gray_frames(), fast_config())
        .spawn(9, move || Ok(SimulatedView::limited(view_camera, 5)))
        .join()
        .unwrap();

    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(result.samples.len(), 5);
    let fit = result.dead_reckoning.expect("dead-reckoning fit");
    assert_relative_eq!(fit.center_x, 0.5, epsilon = 1e-6);
    // The whole grid was still visited before going home.
    assert_eq!(camera.commands().last(), Some(&Command::Home));
}

#[test]
fn test_dead_reckoning_with_too_few_matches_fails() {
    let camera = dead_reckoning_camera();
    let view_camera = camera.clone();
    let result = runner(&camera, gray_frames(), fast_config())
        .spawn(9, move || Ok(SimulatedView::limited(view_camera, 2)))
        .join()
        .unwrap();

    assert_eq!(result.samples.len(), 2);
    assert_eq!(
        result.error.as_deref(),
        Some("Not enough calibration points (2/3 minimum)")
    );
    assert!(result.dead_reckoning.is_none());
    assert_eq!(result.params, MappingParams::default());
    assert_eq!(camera.commands().last(), Some(&Command::Home));
}

#[test]
fn test_dead_reckoning_survives_frames_stopping() {
    let camera = dead_reckoning_camera();
    let view_camera = camera.clone();
    // One read for the start check, one for home, then three grid cells.
    let result = runner(&camera, frames_for(5), fast_config())
        .spawn(9, move || Ok(SimulatedView::new(view_camera)))
        .join()
        .unwrap();

    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(result.samples.len(), 4);
    assert_eq!(camera.commands().last(), Some(&Command::Home));
}

#[test]
fn test_dead_reckoning_frames_stopping_early_fails() {
    let camera = dead_reckoning_camera();
    let view_camera = camera.clone();
    let result = runner(&camera, frames_for(3), fast_config())
        .spawn(9, move || Ok(SimulatedView::new(view_camera)))
        .join()
        .unwrap();

    assert_eq!(result.samples.len(), 2);
    assert_eq!(
        result.error.as_deref(),
        Some("Not enough calibration points (2/3 minimum)")
    );
}

#[test]
fn test_cancel_after_samples_keeps_partial_fit_out_of_success() {
    let camera = Arc::new(RecordingActuator::new());
    let mut config = fast_config();
    config.feedback.settle_secs = 0.5;
    config.feedback.probe_actuator = false;
    let view_camera = camera.clone();
    let handle = runner(&camera, gray_frames(), config)
        .spawn(9, move || Ok(SimulatedView::new(view_camera)));

    // The fifth move is announced once four points have been sampled.
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut moves = 0;
    while moves < 5 {
        assert!(Instant::now() < deadline, "calibration stalled");
        moves += handle
            .progress()
            .try_iter()
            .filter(|p| p.message.starts_with("Moving to"))
            .count();
        thread::sleep(Duration::from_millis(5));
    }
    handle.cancel();
    let result = handle.join().unwrap();

    assert!(result.cancelled);
    assert!(result.has_fit(), "{:?}", result.error);
    assert!(!result.is_success());
    assert!(result.samples.len() >= 3);
}

#[test]
fn test_zoom_fov_table() {
    let camera = Arc::new(RecordingActuator::new());
    camera.move_absolute(0.2, -0.1, 0.0).unwrap();
    camera.clear_commands();
    let view_camera = camera.clone();
    let table = runner(&camera, gray_frames(), fast_config())
        .spawn_zoom_fov(move || Ok(SimulatedView::new(view_camera)))
        .join()
        .unwrap();
    assert!(table.is_calibrated());
    assert_eq!(table.points.len(), 3);
    assert_eq!((table.frame_width, table.frame_height), (64, 48));
    assert!(table.error.is_none());

    let zooms: Vec<f64> = camera
        .commands()
        .iter()
        .filter_map(|c| match c {
            Command::Absolute { pan, tilt, zoom } => {
                assert_relative_eq!(*pan, 0.2, epsilon = 1e-9);
                assert_relative_eq!(*tilt, -0.1, epsilon = 1e-9);
                Some(*zoom)
            }
            _ => None,
        })
        .collect();
    assert_eq!(zooms, vec![0.0, 0.5, 1.0, 0.0]);
}

#[test]
fn test_zoom_fov_without_wide_frames() {
    let camera = Arc::new(RecordingActuator::new());
    let view_camera = camera.clone();
    let table = runner(&camera, no_frames(), fast_config())
        .spawn_zoom_fov(move || Ok(SimulatedView::new(view_camera)))
        .join()
        .unwrap();
    assert!(!table.is_calibrated());
    assert_eq!(table.error.as_deref(), Some("Wide camera has no frames"));
}
