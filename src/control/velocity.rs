//! Offset → velocity shaping.

/// Upper edge of the fine-tracking band.
const FINE_BAND: f64 = 0.1;
/// Upper edge of the normal band; catch-up beyond.
const NORMAL_BAND: f64 = 0.25;

const ZOOM_GAIN: f64 = 1.5;
const MAX_ZOOM_VELOCITY: f64 = 0.3;

/// Three-band velocity curve: gentle near center, fast catch-up far out.
///
/// `|offset| < 0.1` maps to `[0, 0.3)`, `< 0.25` to `[0.3, 0.75)`, beyond
/// that to `0.75 + (|offset| - 0.25)`. Odd-symmetric, clamped to [-1, 1].
pub fn velocity_curve(offset: f64) -> f64 {
    let magnitude = offset.abs();
    let speed = if magnitude < FINE_BAND {
        magnitude * 3.0
    } else if magnitude < NORMAL_BAND {
        0.3 + (magnitude - FINE_BAND) * 3.0
    } else {
        0.75 + (magnitude - NORMAL_BAND)
    };
    speed.copysign(offset).clamp(-1.0, 1.0)
}

/// Zoom velocity toward `target_fill`. Zero when the box has no size.
pub fn zoom_velocity(target_fill: f64, current_fill: f64) -> f64 {
    if current_fill <= 0.0 {
        return 0.0;
    }
    ((target_fill - current_fill) * ZOOM_GAIN).clamp(-MAX_ZOOM_VELOCITY, MAX_ZOOM_VELOCITY)
}

/// Offset of a pixel from frame center as frame fractions; y grows upward.
pub fn center_offset(x: f64, y: f64, width: f64, height: f64) -> (f64, f64) {
    (x / width - 0.5, 0.5 - y / height)
}
