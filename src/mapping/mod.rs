//! Coordinate mapping between wide-frame pixels and PTZ actuator space.
//!
//! The wide camera has a fixed view; the PTZ camera pans and tilts inside it.
//! A [`MappingModel`] holds the calibrated center offset and scale factors and
//! converts pixel positions to pan/tilt and bounding boxes to zoom levels.

mod persist;

use serde::{Deserialize, Serialize};

use crate::detection::BBox;

pub use persist::{load_params, save_params};

/// Normalisation constant for the logarithmic zoom response.
pub const ZOOM_LOG_DIVISOR: f64 = 4.0;

/// Allowed band for fitted scale factors.
pub const SCALE_BAND: (f64, f64) = (0.2, 3.0);

/// Allowed band for fitted center offsets (frame fractions).
pub const CENTER_BAND: (f64, f64) = (0.1, 0.9);

/// Closed numeric interval of one actuator axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisRange {
    pub min: f64,
    pub max: f64,
}

impl AxisRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

/// The five calibrated floats that are persisted between runs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MappingParams {
    pub pan_scale: f64,
    pub tilt_scale: f64,
    pub pan_center_x: f64,
    pub tilt_center_y: f64,
}

impl MappingParams {
    /// Clamp to the sane bands, rejecting degenerate fits. Non-finite values
    /// fall back to the defaults.
    pub fn clamped(self) -> Self {
        let d = Self::default();
        let band = |v: f64, fallback: f64, (lo, hi): (f64, f64)| {
            if v.is_finite() { v.clamp(lo, hi) } else { fallback }
        };
        Self {
            pan_scale: band(self.pan_scale, d.pan_scale, SCALE_BAND),
            tilt_scale: band(self.tilt_scale, d.tilt_scale, SCALE_BAND),
            pan_center_x: band(self.pan_center_x, d.pan_center_x, CENTER_BAND),
            tilt_center_y: band(self.tilt_center_y, d.tilt_center_y, CENTER_BAND),
        }
    }
}

impl Default for MappingParams {
    fn default() -> Self {
        Self {
            pan_scale: 0.8,
            tilt_scale: 0.6,
            pan_center_x: 0.5,
            tilt_center_y: 0.5,
        }
    }
}

/// Calibrated pixel → actuator mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingModel {
    pub frame_width: u32,
    pub frame_height: u32,
    pub pan: AxisRange,
    pub tilt: AxisRange,
    pub zoom: AxisRange,
    pub params: MappingParams,
}

impl Default for MappingModel {
    fn default() -> Self {
        Self {
            frame_width: 2560,
            frame_height: 1440,
            pan: AxisRange::new(-1.0, 1.0),
            tilt: AxisRange::new(-1.0, 1.0),
            zoom: AxisRange::new(0.0, 1.0),
            params: MappingParams::default(),
        }
    }
}

impl MappingModel {
    pub fn with_params(params: MappingParams) -> Self {
        Self {
            params: params.clamped(),
            ..Default::default()
        }
    }

    pub fn set_frame_size(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.frame_width = width;
            self.frame_height = height;
        }
    }

    /// Replace the calibrated parameters wholesale.
    pub fn apply(&mut self, params: MappingParams) {
        self.params = params.clamped();
    }

    /// Convert a wide-frame pixel to absolute pan/tilt, clamped to range.
    pub fn pixel_to_actuator(&self, x: f64, y: f64) -> (f64, f64) {
        let (pan, tilt) = self.pixel_to_actuator_unclamped(x, y);
        (self.pan.clamp(pan), self.tilt.clamp(tilt))
    }

    /// The linear transform without range clamping.
    pub fn pixel_to_actuator_unclamped(&self, x: f64, y: f64) -> (f64, f64) {
        let p = &self.params;
        let norm_x = x / self.frame_width as f64;
        let norm_y = y / self.frame_height as f64;

        // Image y grows downward, tilt grows upward.
        let offset_x = (norm_x - p.pan_center_x) / p.pan_scale;
        let offset_y = (p.tilt_center_y - norm_y) / p.tilt_scale;

        (offset_x * self.pan.span(), offset_y * self.tilt.span())
    }

    /// Inverse of [`Self::pixel_to_actuator_unclamped`].
    pub fn actuator_to_pixel(&self, pan: f64, tilt: f64) -> (f64, f64) {
        let p = &self.params;
        let norm_x = pan / self.pan.span() * p.pan_scale + p.pan_center_x;
        let norm_y = p.tilt_center_y - tilt / self.tilt.span() * p.tilt_scale;
        (
            norm_x * self.frame_width as f64,
            norm_y * self.frame_height as f64,
        )
    }

    /// Zoom level that makes `bbox` fill roughly `target_fill` of the frame.
    ///
    /// Grows logarithmically as the object gets relatively smaller.
    pub fn bbox_to_zoom(&self, bbox: &BBox, target_fill: f64) -> f64 {
        let current_fill = bbox.fill_ratio(self.frame_width as f64, self.frame_height as f64);
        if current_fill <= 0.0 {
            return self.zoom.min;
        }
        let zoom_factor = target_fill / current_fill;
        let zoom = zoom_factor.max(1.0).log2() / ZOOM_LOG_DIVISOR;
        self.zoom.clamp(zoom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn hd_model() -> MappingModel {
        let mut model = MappingModel::default();
        model.set_frame_size(1920, 1080);
        model
    }

    #[test]
    fn test_frame_center_maps_to_origin() {
        let model = hd_model();
        let (pan, tilt) = model.pixel_to_actuator(960.0, 540.0);
        assert_relative_eq!(pan, 0.0, epsilon = 1e-12);
        assert_relative_eq!(tilt, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_tilt_axis_is_inverted() {
        let model = hd_model();
        let (_, tilt_top) = model.pixel_to_actuator(960.0, 100.0);
        let (_, tilt_bottom) = model.pixel_to_actuator(960.0, 1000.0);
        assert!(tilt_top > 0.0);
        assert!(tilt_bottom < 0.0);
    }

    #[test]
    fn test_pixel_to_actuator_clamps_to_range() {
        let mut model = hd_model();
        model.apply(MappingParams {
            pan_scale: 0.2,
            ..Default::default()
        });
        let (pan, _) = model.pixel_to_actuator(1919.0, 540.0);
        assert_eq!(pan, 1.0);
        let (pan, _) = model.pixel_to_actuator(0.0, 540.0);
        assert_eq!(pan, -1.0);
    }

    #[test]
    fn test_round_trip_through_inverse() {
        let mut model = hd_model();
        model.apply(MappingParams {
            pan_scale: 1.7,
            tilt_scale: 1.3,
            pan_center_x: 0.45,
            tilt_center_y: 0.55,
        });
        for xi in 0..=16 {
            for yi in 0..=9 {
                let x = xi as f64 * 120.0;
                let y = yi as f64 * 120.0;
                let (pan, tilt) = model.pixel_to_actuator_unclamped(x, y);
                let (rx, ry) = model.actuator_to_pixel(pan, tilt);
                assert_relative_eq!(rx, x, epsilon = 1e-9);
                assert_relative_eq!(ry, y, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_bbox_to_zoom_reference_example() {
        let model = hd_model();
        let bbox = BBox::new(860.0, 440.0, 1060.0, 640.0);
        let zoom = model.bbox_to_zoom(&bbox, 0.6);
        let expected = (0.6_f64 / (200.0 / 1080.0)).log2() / 4.0;
        assert_relative_eq!(zoom, expected, epsilon = 1e-12);
        assert!((zoom - 0.423).abs() < 0.002);
    }

    #[test]
    fn test_bbox_to_zoom_monotone_as_box_shrinks() {
        let model = hd_model();
        let mut prev = -1.0;
        for half in (1..=540).rev().step_by(7) {
            let h = half as f64;
            let bbox = BBox::new(960.0 - h, 540.0 - h, 960.0 + h, 540.0 + h);
            let zoom = model.bbox_to_zoom(&bbox, 0.6);
            assert!(zoom >= prev, "zoom decreased as box shrank: {zoom} < {prev}");
            prev = zoom;
        }
    }

    #[test]
    fn test_bbox_to_zoom_degenerate_box_returns_min() {
        let model = hd_model();
        let bbox = BBox::new(100.0, 100.0, 100.0, 100.0);
        assert_eq!(model.bbox_to_zoom(&bbox, 0.6), model.zoom.min);
    }

    #[test]
    fn test_large_box_needs_no_zoom() {
        let model = hd_model();
        let bbox = BBox::new(0.0, 0.0, 1920.0, 1080.0);
        assert_eq!(model.bbox_to_zoom(&bbox, 0.6), 0.0);
    }

    #[test]
    fn test_params_clamped_to_bands() {
        let p = MappingParams {
            pan_scale: 10.0,
            tilt_scale: 0.01,
            pan_center_x: -3.0,
            tilt_center_y: f64::NAN,
        }
        .clamped();
        assert_eq!(p.pan_scale, 3.0);
        assert_eq!(p.tilt_scale, 0.2);
        assert_eq!(p.pan_center_x, 0.1);
        assert_eq!(p.tilt_center_y, 0.5);
    }
}
