//! Locating the PTZ view inside the wide frame.
//!
//! Both calibrators need the same primitive: given the current wide frame and
//! the current PTZ frame, where in the wide frame is the PTZ looking? The
//! answer is found with ORB features, brute-force Hamming matching and a
//! RANSAC homography, tried over several PTZ down-scale factors.

mod locator;

use anyhow::Result;
use opencv::core::Mat;
use serde::{Deserialize, Serialize};

pub use locator::OrbViewLocator;

/// Feature matching parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// ORB feature budget per image.
    pub n_features: i32,
    /// Down-scale factors applied to the PTZ frame, tried in order.
    pub scales: Vec<f64>,
    /// Either image needs at least this many keypoints.
    pub min_keypoints: usize,
    /// Best matches kept (by descriptor distance) before RANSAC.
    pub max_matches: usize,
    pub min_matches: usize,
    /// RANSAC reprojection threshold in pixels.
    pub ransac_threshold: f64,
    /// Inlier ratio required to accept a match.
    pub min_confidence: f64,
    /// Apply CLAHE before feature extraction.
    pub equalize: bool,
}

impl MatchConfig {
    /// Tuning used by the position-feedback calibrator.
    pub fn position_feedback() -> Self {
        Self {
            n_features: 500,
            scales: vec![0.3, 0.4, 0.5, 0.2],
            min_keypoints: 10,
            max_matches: 50,
            min_matches: 4,
            ransac_threshold: 5.0,
            min_confidence: 0.3,
            equalize: false,
        }
    }

    /// Tuning used by the dead-reckoning calibrator: more features, more
    /// aggressive down-scaling, contrast equalisation and a lower bar.
    pub fn dead_reckoning() -> Self {
        Self {
            n_features: 1000,
            scales: vec![0.15, 0.2, 0.25, 0.3, 0.35, 0.4],
            min_confidence: 0.25,
            equalize: true,
            ..Self::position_feedback()
        }
    }
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self::position_feedback()
    }
}

/// Where the PTZ view sits in the wide frame. All coordinates are fractions
/// of the wide frame size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewMatch {
    pub center_x: f64,
    pub center_y: f64,
    /// Projected view bounds `[x1, y1, x2, y2]`, clipped to [0, 1].
    pub bounds: [f64; 4],
    /// RANSAC inliers over kept matches.
    pub confidence: f64,
    pub inliers: usize,
    /// PTZ down-scale factor that produced this match.
    pub scale: f64,
}

/// Finds the PTZ view in the wide frame.
pub trait LocateView {
    /// `Ok(None)` when no acceptable match exists; `Err` only for failures of
    /// the image pipeline itself.
    fn locate(&mut self, wide: &Mat, ptz: &Mat) -> Result<Option<ViewMatch>>;
}

impl<T: LocateView + ?Sized> LocateView for Box<T> {
    fn locate(&mut self, wide: &Mat, ptz: &Mat) -> Result<Option<ViewMatch>> {
        (**self).locate(wide, ptz)
    }
}
