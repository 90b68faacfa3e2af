//! Zoom level → visible wide-frame region.
//!
//! At a fixed pan/tilt the PTZ view shrinks as zoom grows. Measuring the view
//! bounds at a few zoom levels lets the tracker tell whether a wide-frame
//! detection is actually inside the PTZ picture.

use std::fs::{self, File};
use std::path::Path;

use anyhow::{Context, Result};
use opencv::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::CalibrationContext;
use crate::detection::BBox;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoomFovConfig {
    pub zoom_levels: Vec<f64>,
    pub settle_secs: f64,
}

impl Default for ZoomFovConfig {
    fn default() -> Self {
        Self {
            zoom_levels: vec![0.0, 0.5, 1.0],
            settle_secs: 2.0,
        }
    }
}

/// PTZ view bounds (wide-frame fractions) measured at one zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoomFovPoint {
    pub zoom: f64,
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub confidence: f64,
}

impl ZoomFovPoint {
    fn bounds(&self) -> [f64; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoomFovTable {
    pub points: Vec<ZoomFovPoint>,
    pub frame_width: u32,
    pub frame_height: u32,
    pub error: Option<String>,
}

impl ZoomFovTable {
    pub fn is_calibrated(&self) -> bool {
        !self.points.is_empty()
    }

    /// View bounds `[x1, y1, x2, y2]` at `zoom`, linearly interpolated between
    /// the bracketing measurements and held constant past either end.
    pub fn fov_at(&self, zoom: f64) -> Option<[f64; 4]> {
        let mut sorted = self.points.clone();
        sorted.sort_by(|a, b| a.zoom.total_cmp(&b.zoom));

        let lower = sorted.iter().rev().find(|p| p.zoom <= zoom);
        let upper = sorted.iter().find(|p| p.zoom >= zoom);
        match (lower, upper) {
            (None, None) => None,
            (None, Some(p)) | (Some(p), None) => Some(p.bounds()),
            (Some(lo), Some(hi)) if lo.zoom == hi.zoom => Some(lo.bounds()),
            (Some(lo), Some(hi)) => {
                let t = (zoom - lo.zoom) / (hi.zoom - lo.zoom);
                let (a, b) = (lo.bounds(), hi.bounds());
                Some(std::array::from_fn(|i| a[i] + t * (b[i] - a[i])))
            }
        }
    }

    /// Whether at least `min_overlap` of the detection's area lies inside the
    /// PTZ view at `zoom`. Without calibration every detection counts as visible.
    pub fn is_detection_visible(&self, bbox: &BBox, zoom: f64, min_overlap: f64) -> bool {
        let Some([fx1, fy1, fx2, fy2]) = self.fov_at(zoom) else {
            return true;
        };
        if self.frame_width == 0 || self.frame_height == 0 {
            return true;
        }
        let (w, h) = (self.frame_width as f64, self.frame_height as f64);
        let (dx1, dy1, dx2, dy2) = (bbox.x1 / w, bbox.y1 / h, bbox.x2 / w, bbox.y2 / h);

        let ix1 = fx1.max(dx1);
        let iy1 = fy1.max(dy1);
        let ix2 = fx2.min(dx2);
        let iy2 = fy2.min(dy2);
        if ix2 <= ix1 || iy2 <= iy1 {
            return false;
        }
        let det_area = (dx2 - dx1) * (dy2 - dy1);
        if det_area <= 0.0 {
            return false;
        }
        (ix2 - ix1) * (iy2 - iy1) / det_area >= min_overlap
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let file =
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        serde_json::from_reader(file).with_context(|| format!("Failed to parse {}", path.display()))
    }
}

pub struct ZoomFovCalibrator {
    config: ZoomFovConfig,
}

impl ZoomFovCalibrator {
    pub fn new(config: ZoomFovConfig) -> Self {
        Self { config }
    }

    /// Measure the view bounds at each configured zoom level, holding the
    /// current pan/tilt.
    pub fn run(&self, ctx: &mut CalibrationContext<'_>) -> ZoomFovTable {
        let Some(wide) = ctx.wide.latest_frame() else {
            return ZoomFovTable {
                error: Some("Wide camera has no frames".to_string()),
                ..Default::default()
            };
        };
        let frame_width = wide.cols().max(0) as u32;
        let frame_height = wide.rows().max(0) as u32;

        let (pan, tilt) = match ctx.actuator.get_position() {
            Ok(pos) if pos.available => (pos.pan, pos.tilt),
            Ok(_) => (0.0, 0.0),
            Err(e) => {
                warn!("Could not read PTZ position, holding (0, 0): {}", e);
                (0.0, 0.0)
            }
        };
        info!(
            "Zoom FOV calibration starting at pan={:.2}, tilt={:.2}",
            pan, tilt
        );

        let levels = &self.config.zoom_levels;
        let mut points = Vec::with_capacity(levels.len());
        let mut cancelled = false;
        for (i, &zoom) in levels.iter().enumerate() {
            if ctx.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            ctx.report(
                &format!("Calibrating zoom level {:.0}%", zoom * 100.0),
                i as f64 / levels.len() as f64,
            );
            if let Err(e) = ctx.actuator.move_absolute(pan, tilt, zoom) {
                warn!("Zoom move to {:.2} failed: {}", zoom, e);
                continue;
            }
            if ctx.settle(self.config.settle_secs) {
                cancelled = true;
                break;
            }
            match ctx.capture_and_locate() {
                Some(found) => {
                    let [x1, y1, x2, y2] = found.bounds;
                    info!(
                        "Zoom {:.0}%: FOV ({:.2}, {:.2}) to ({:.2}, {:.2}), confidence={:.2}",
                        zoom * 100.0,
                        x1,
                        y1,
                        x2,
                        y2,
                        found.confidence
                    );
                    points.push(ZoomFovPoint {
                        zoom,
                        x1,
                        y1,
                        x2,
                        y2,
                        confidence: found.confidence,
                    });
                }
                None => warn!("Could not match zoom view at {:.0}%", zoom * 100.0),
            }
        }

        if !cancelled {
            if let Err(e) = ctx.actuator.move_absolute(pan, tilt, 0.0) {
                warn!("Could not zoom back out: {}", e);
            }
        }

        let error = if points.is_empty() {
            Some(if cancelled {
                "Calibration cancelled".to_string()
            } else {
                "No zoom levels could be calibrated".to_string()
            })
        } else {
            None
        };
        ctx.report("Zoom calibration finished", 1.0);
        ZoomFovTable {
            points,
            frame_width,
            frame_height,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn table() -> ZoomFovTable {
        ZoomFovTable {
            points: vec![
                ZoomFovPoint {
                    zoom: 1.0,
                    x1: 0.45,
                    y1: 0.45,
                    x2: 0.55,
                    y2: 0.55,
                    confidence: 0.6,
                },
                ZoomFovPoint {
                    zoom: 0.0,
                    x1: 0.25,
                    y1: 0.25,
                    x2: 0.75,
                    y2: 0.75,
                    confidence: 0.9,
                },
            ],
            frame_width: 1000,
            frame_height: 1000,
            error: None,
        }
    }

    #[test]
    fn test_fov_interpolates_between_levels() {
        let fov = table().fov_at(0.5).unwrap();
        assert_relative_eq!(fov[0], 0.35, epsilon = 1e-12);
        assert_relative_eq!(fov[2], 0.65, epsilon = 1e-12);
    }

    #[test]
    fn test_fov_clamps_outside_measured_range() {
        let t = table();
        assert_eq!(t.fov_at(-1.0), Some([0.25, 0.25, 0.75, 0.75]));
        assert_eq!(t.fov_at(2.0), Some([0.45, 0.45, 0.55, 0.55]));
        assert_eq!(t.fov_at(1.0), Some([0.45, 0.45, 0.55, 0.55]));
    }

    #[test]
    fn test_uncalibrated_table_sees_everything() {
        let t = ZoomFovTable::default();
        assert!(t.fov_at(0.3).is_none());
        assert!(t.is_detection_visible(&BBox::new(0.0, 0.0, 1.0, 1.0), 0.3, 0.5));
    }

    #[test]
    fn test_detection_visibility_by_overlap() {
        let t = table();
        // Fully inside the zoomed-in view.
        assert!(t.is_detection_visible(&BBox::new(480.0, 480.0, 520.0, 520.0), 1.0, 0.5));
        // Visible when zoomed out, gone when zoomed in.
        let edge = BBox::new(300.0, 300.0, 400.0, 400.0);
        assert!(t.is_detection_visible(&edge, 0.0, 0.5));
        assert!(!t.is_detection_visible(&edge, 1.0, 0.5));
        // Partial overlap below the threshold.
        let half = BBox::new(500.0, 500.0, 600.0, 600.0);
        assert!(!t.is_detection_visible(&half, 1.0, 0.5));
        assert!(t.is_detection_visible(&half, 1.0, 0.2));
    }

    #[test]
    fn test_table_persists_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zoom_fov.json");
        let t = table();
        t.save(&path).unwrap();
        assert_eq!(ZoomFovTable::load(&path).unwrap(), t);
    }
}
