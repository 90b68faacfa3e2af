//! Regression shared by both calibrators.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{CalibrationSample, MIN_SAMPLES};
use crate::mapping::MappingParams;

/// Offsets closer than this are treated as equal.
const OFFSET_EPS: f64 = 0.01;

/// Local slope used when an axis was never exercised.
const DEFAULT_SLOPE: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    #[error("Not enough calibration points ({found}/{required} minimum)")]
    NotEnoughSamples { found: usize, required: usize },
    #[error("Calibration computation failed: {0}")]
    Degenerate(&'static str),
}

/// Straight line `y = slope * x + intercept`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineFit {
    pub slope: f64,
    pub intercept: f64,
}

/// Weighted least-squares line with weights on the unsquared residuals,
/// i.e. minimises `sum((w_i * (y_i - slope * x_i - intercept))^2)`.
///
/// When all `x` coincide the slope is 0 and the intercept is the weighted mean.
pub fn weighted_line_fit(xs: &[f64], ys: &[f64], weights: &[f64]) -> Option<LineFit> {
    let n = xs.len();
    if n == 0 || ys.len() != n || weights.len() != n {
        return None;
    }

    if spread(xs) <= f64::EPSILON {
        let w2: Vec<f64> = weights.iter().map(|w| w * w).collect();
        return weighted_mean(ys, &w2).map(|intercept| LineFit {
            slope: 0.0,
            intercept,
        });
    }

    let a = DMatrix::from_fn(n, 2, |i, j| {
        if j == 0 {
            xs[i] * weights[i]
        } else {
            weights[i]
        }
    });
    let b = DVector::from_fn(n, |i, _| ys[i] * weights[i]);
    let solution = a.svd(true, true).solve(&b, 1e-12).ok()?;
    let fit = LineFit {
        slope: solution[0],
        intercept: solution[1],
    };
    (fit.slope.is_finite() && fit.intercept.is_finite()).then_some(fit)
}

pub fn weighted_mean(values: &[f64], weights: &[f64]) -> Option<f64> {
    let total: f64 = weights.iter().sum();
    if total <= 0.0 || !total.is_finite() {
        return None;
    }
    Some(values.iter().zip(weights).map(|(v, w)| v * w).sum::<f64>() / total)
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
}

fn spread(values: &[f64]) -> f64 {
    let (lo, hi) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if lo.is_finite() && hi.is_finite() {
        hi - lo
    } else {
        0.0
    }
}

fn check_count(samples: &[CalibrationSample]) -> Result<(), FitError> {
    if samples.len() < MIN_SAMPLES {
        return Err(FitError::NotEnoughSamples {
            found: samples.len(),
            required: MIN_SAMPLES,
        });
    }
    Ok(())
}

/// Fit mapping parameters from absolute-position samples.
///
/// Scales come from the ratio of the exercised actuator range to the observed
/// wide-frame range; centers are the regression intercepts (wide position at
/// pan/tilt 0). The result is clamped to the sane bands.
pub fn fit_feedback(samples: &[CalibrationSample]) -> Result<MappingParams, FitError> {
    check_count(samples)?;

    let pans: Vec<f64> = samples.iter().map(|s| s.pan).collect();
    let tilts: Vec<f64> = samples.iter().map(|s| s.tilt).collect();
    let xs: Vec<f64> = samples.iter().map(|s| s.wide_x).collect();
    let ys: Vec<f64> = samples.iter().map(|s| s.wide_y).collect();
    let ws: Vec<f64> = samples.iter().map(|s| s.confidence).collect();

    let pan_line = weighted_line_fit(&pans, &xs, &ws).ok_or(FitError::Degenerate("pan"))?;
    let tilt_line = weighted_line_fit(&tilts, &ys, &ws).ok_or(FitError::Degenerate("tilt"))?;

    let defaults = MappingParams::default();
    let scale = |actuator: &[f64], wide: &[f64], fallback: f64| {
        let (a, w) = (spread(actuator), spread(wide));
        if a > 0.0 && w > 0.0 {
            (a / 2.0) / (w / 2.0)
        } else {
            fallback
        }
    };

    Ok(MappingParams {
        pan_scale: scale(&pans, &xs, defaults.pan_scale),
        tilt_scale: scale(&tilts, &ys, defaults.tilt_scale),
        pan_center_x: pan_line.intercept,
        tilt_center_y: tilt_line.intercept,
    }
    .clamped())
}

/// Linear model relating dead-reckoned command offsets to wide-frame position:
/// `wide_x = center_x + pan_offset * pan_to_pixel_x`, likewise for y.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeadReckoningFit {
    pub pan_to_pixel_x: f64,
    pub tilt_to_pixel_y: f64,
    /// Wide-frame x (fraction) seen at home.
    pub center_x: f64,
    pub center_y: f64,
}

impl DeadReckoningFit {
    /// Command-space offset from home that brings the view to `(x, y)`.
    pub fn pixel_to_offset(&self, wide_x: f64, wide_y: f64) -> (f64, f64) {
        if self.pan_to_pixel_x == 0.0 || self.tilt_to_pixel_y == 0.0 {
            return (0.0, 0.0);
        }
        (
            (wide_x - self.center_x) / self.pan_to_pixel_x,
            (wide_y - self.center_y) / self.tilt_to_pixel_y,
        )
    }

    /// Absolute-mapping parameters derivable from this fit: the home view
    /// becomes the calibrated center, scales stay at their defaults.
    pub fn mapping_params(&self) -> MappingParams {
        MappingParams {
            pan_center_x: self.center_x,
            tilt_center_y: self.center_y,
            ..Default::default()
        }
        .clamped()
    }
}

/// Confidence-weighted average of local slopes `(v - v̄) / (o - ō)` over the
/// samples whose offset differs from the weighted mean offset.
fn local_slope(offsets: &[f64], values: &[f64], weights: &[f64]) -> f64 {
    if std_dev(offsets) <= OFFSET_EPS {
        return DEFAULT_SLOPE;
    }
    let (Some(o_mean), Some(v_mean)) = (
        weighted_mean(offsets, weights),
        weighted_mean(values, weights),
    ) else {
        return DEFAULT_SLOPE;
    };

    let mut slopes = Vec::new();
    let mut slope_weights = Vec::new();
    for ((&o, &v), &w) in offsets.iter().zip(values).zip(weights) {
        let d = o - o_mean;
        if d.abs() > OFFSET_EPS {
            slopes.push((v - v_mean) / d);
            slope_weights.push(w);
        }
    }
    weighted_mean(&slopes, &slope_weights)
        .filter(|s| s.is_finite())
        .unwrap_or(DEFAULT_SLOPE)
}

/// Fit a dead-reckoning model. Sample `pan`/`tilt` hold estimated command
/// offsets from home rather than reported positions.
pub fn fit_dead_reckoning(samples: &[CalibrationSample]) -> Result<DeadReckoningFit, FitError> {
    check_count(samples)?;

    let pans: Vec<f64> = samples.iter().map(|s| s.pan).collect();
    let tilts: Vec<f64> = samples.iter().map(|s| s.tilt).collect();
    let xs: Vec<f64> = samples.iter().map(|s| s.wide_x).collect();
    let ys: Vec<f64> = samples.iter().map(|s| s.wide_y).collect();
    let ws: Vec<f64> = samples.iter().map(|s| s.confidence).collect();

    let (center_x, center_y) = match samples
        .iter()
        .find(|s| s.pan.abs() < OFFSET_EPS && s.tilt.abs() < OFFSET_EPS)
    {
        Some(home) => (home.wide_x, home.wide_y),
        None => (
            weighted_mean(&xs, &ws).ok_or(FitError::Degenerate("zero total confidence"))?,
            weighted_mean(&ys, &ws).ok_or(FitError::Degenerate("zero total confidence"))?,
        ),
    };

    Ok(DeadReckoningFit {
        pan_to_pixel_x: local_slope(&pans, &xs, &ws),
        tilt_to_pixel_y: local_slope(&tilts, &ys, &ws),
        center_x,
        center_y,
    })
}
