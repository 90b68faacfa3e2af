use anyhow::Result;
use opencv::calib3d;
use opencv::core::{self, DMatch, KeyPoint, Mat, Point2f, Ptr, Size, Vector};
use opencv::features2d::{self, BFMatcher};
use opencv::imgproc;
use opencv::prelude::*;
use tracing::debug;

use super::{LocateView, MatchConfig, ViewMatch};

const CLAHE_CLIP_LIMIT: f64 = 2.0;
const CLAHE_TILE: i32 = 8;

/// Smallest PTZ image side worth running ORB on after down-scaling.
const MIN_SCALED_SIDE: i32 = 16;

struct FeatureSet {
    keypoints: Vector<KeyPoint>,
    descriptors: Mat,
}

/// ORB + brute-force Hamming + RANSAC homography view locator.
pub struct OrbViewLocator {
    config: MatchConfig,
    orb: Ptr<features2d::ORB>,
    matcher: BFMatcher,
    clahe: Option<Ptr<imgproc::CLAHE>>,
}

impl OrbViewLocator {
    pub fn new(config: MatchConfig) -> Result<Self> {
        let orb = features2d::ORB::create(
            config.n_features,
            1.2,
            8,
            31,
            0,
            2,
            features2d::ORB_ScoreType::HARRIS_SCORE,
            31,
            20,
        )?;
        let matcher = BFMatcher::new(core::NORM_HAMMING, true)?;
        let clahe = if config.equalize {
            Some(imgproc::create_clahe(
                CLAHE_CLIP_LIMIT,
                Size::new(CLAHE_TILE, CLAHE_TILE),
            )?)
        } else {
            None
        };
        Ok(Self {
            config,
            orb,
            matcher,
            clahe,
        })
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    fn prepare(&mut self, image: &Mat) -> Result<Mat> {
        let gray = if image.channels() == 1 {
            image.try_clone()?
        } else {
            let mut gray = Mat::default();
            imgproc::cvt_color_def(image, &mut gray, imgproc::COLOR_BGR2GRAY)?;
            gray
        };
        match self.clahe.as_mut() {
            Some(clahe) => {
                let mut equalized = Mat::default();
                clahe.apply(&gray, &mut equalized)?;
                Ok(equalized)
            }
            None => Ok(gray),
        }
    }

    fn detect(&mut self, image: &Mat) -> Result<FeatureSet> {
        let mut keypoints = Vector::<KeyPoint>::new();
        let mut descriptors = Mat::default();
        self.orb.detect_and_compute(
            image,
            &Mat::default(),
            &mut keypoints,
            &mut descriptors,
            false,
        )?;
        Ok(FeatureSet {
            keypoints,
            descriptors,
        })
    }

    /// Match one PTZ scale against the wide features.
    fn match_at_scale(
        &mut self,
        wide: &FeatureSet,
        wide_size: (f64, f64),
        ptz_gray: &Mat,
        scale: f64,
    ) -> Result<Option<ViewMatch>> {
        let mut scaled = Mat::default();
        imgproc::resize(
            ptz_gray,
            &mut scaled,
            Size::new(0, 0),
            scale,
            scale,
            imgproc::INTER_AREA,
        )?;
        if scaled.cols() < MIN_SCALED_SIDE || scaled.rows() < MIN_SCALED_SIDE {
            return Ok(None);
        }

        let ptz = self.detect(&scaled)?;
        if ptz.keypoints.len() < self.config.min_keypoints {
            return Ok(None);
        }

        let mut matches = Vector::<DMatch>::new();
        self.matcher.train_match(
            &ptz.descriptors,
            &wide.descriptors,
            &mut matches,
            &Mat::default(),
        )?;
        let mut good = matches.to_vec();
        good.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        good.truncate(self.config.max_matches);
        if good.len() < self.config.min_matches {
            return Ok(None);
        }

        let mut src = Vector::<Point2f>::with_capacity(good.len());
        let mut dst = Vector::<Point2f>::with_capacity(good.len());
        for m in &good {
            src.push(ptz.keypoints.get(m.query_idx as usize)?.pt());
            dst.push(wide.keypoints.get(m.train_idx as usize)?.pt());
        }

        let mut mask = Mat::default();
        let homography = calib3d::find_homography(
            &src,
            &dst,
            &mut mask,
            calib3d::RANSAC,
            self.config.ransac_threshold,
        )?;
        if homography.empty() {
            return Ok(None);
        }
        let inliers = core::count_non_zero(&mask)? as usize;
        let confidence = inliers as f64 / good.len() as f64;

        let (w, h) = (scaled.cols() as f32, scaled.rows() as f32);
        let corners = Vector::<Point2f>::from_iter([
            Point2f::new(0.0, 0.0),
            Point2f::new(w, 0.0),
            Point2f::new(w, h),
            Point2f::new(0.0, h),
        ]);
        let mut projected = Vector::<Point2f>::new();
        core::perspective_transform(&corners, &mut projected, &homography)?;

        let (wide_w, wide_h) = wide_size;
        let xs: Vec<f64> = projected.iter().map(|p| p.x as f64 / wide_w).collect();
        let ys: Vec<f64> = projected.iter().map(|p| p.y as f64 / wide_h).collect();
        let center_x = xs.iter().sum::<f64>() / xs.len() as f64;
        let center_y = ys.iter().sum::<f64>() / ys.len() as f64;
        if !center_x.is_finite()
            || !center_y.is_finite()
            || !(0.0..=1.0).contains(&center_x)
            || !(0.0..=1.0).contains(&center_y)
        {
            debug!(
                "scale {:.2}: projected center ({:.3}, {:.3}) outside the wide frame",
                scale, center_x, center_y
            );
            return Ok(None);
        }

        let lo = |v: &[f64]| v.iter().copied().fold(f64::INFINITY, f64::min).clamp(0.0, 1.0);
        let hi = |v: &[f64]| {
            v.iter()
                .copied()
                .fold(f64::NEG_INFINITY, f64::max)
                .clamp(0.0, 1.0)
        };

        Ok(Some(ViewMatch {
            center_x,
            center_y,
            bounds: [lo(&xs), lo(&ys), hi(&xs), hi(&ys)],
            confidence,
            inliers,
            scale,
        }))
    }
}

impl LocateView for OrbViewLocator {
    fn locate(&mut self, wide: &Mat, ptz: &Mat) -> Result<Option<ViewMatch>> {
        if wide.empty() || ptz.empty() {
            return Ok(None);
        }
        let wide_gray = self.prepare(wide)?;
        let ptz_gray = self.prepare(ptz)?;

        let wide_features = self.detect(&wide_gray)?;
        if wide_features.keypoints.len() < self.config.min_keypoints {
            debug!(
                "wide frame has only {} keypoints",
                wide_features.keypoints.len()
            );
            return Ok(None);
        }
        let wide_size = (wide_gray.cols() as f64, wide_gray.rows() as f64);

        let mut best: Option<ViewMatch> = None;
        for scale in self.config.scales.clone() {
            // One failing scale does not end the search.
            let candidate = match self.match_at_scale(&wide_features, wide_size, &ptz_gray, scale) {
                Ok(Some(candidate)) => candidate,
                Ok(None) => continue,
                Err(e) => {
                    debug!("scale {:.2}: matching failed: {:#}", scale, e);
                    continue;
                }
            };
            debug!(
                "scale {:.2}: {} inliers, confidence {:.2}",
                scale, candidate.inliers, candidate.confidence
            );
            if best.is_none_or(|b| candidate.inliers > b.inliers) {
                best = Some(candidate);
            }
        }

        Ok(best.filter(|m| m.confidence >= self.config.min_confidence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{CV_8UC3, Point, Rect, Scalar};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// 640x480 scene of random filled rectangles and circles.
    fn textured_scene(seed: u64) -> Mat {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut img =
            Mat::new_rows_cols_with_default(480, 640, CV_8UC3, Scalar::all(90.0)).unwrap();
        for _ in 0..120 {
            let x = rng.gen_range(0..600);
            let y = rng.gen_range(0..440);
            let w = rng.gen_range(8..70);
            let h = rng.gen_range(8..70);
            let color = Scalar::new(
                rng.gen_range(0.0..255.0),
                rng.gen_range(0.0..255.0),
                rng.gen_range(0.0..255.0),
                0.0,
            );
            imgproc::rectangle(&mut img, Rect::new(x, y, w, h), color, -1, imgproc::LINE_8, 0)
                .unwrap();
        }
        for _ in 0..40 {
            let center = Point::new(rng.gen_range(0..640), rng.gen_range(0..480));
            let color = Scalar::all(rng.gen_range(0.0..255.0));
            imgproc::circle(&mut img, center, rng.gen_range(4..25), color, -1, imgproc::LINE_8, 0)
                .unwrap();
        }
        img
    }

    /// Crop a region of the scene and upscale it 2x, as a zoomed PTZ would see it.
    fn zoomed_view(scene: &Mat, roi: Rect) -> Mat {
        let crop = scene.roi(roi).unwrap().try_clone().unwrap();
        let mut zoomed = Mat::default();
        imgproc::resize(
            &crop,
            &mut zoomed,
            Size::new(0, 0),
            2.0,
            2.0,
            imgproc::INTER_LINEAR,
        )
        .unwrap();
        zoomed
    }

    #[test]
    fn test_locates_zoomed_crop() {
        let scene = textured_scene(7);
        let ptz = zoomed_view(&scene, Rect::new(300, 200, 200, 150));
        let mut locator = OrbViewLocator::new(MatchConfig {
            n_features: 1000,
            scales: vec![0.5],
            ..MatchConfig::position_feedback()
        })
        .unwrap();

        let found = locator.locate(&scene, &ptz).unwrap().expect("view not found");
        assert!((found.center_x - 400.0 / 640.0).abs() < 0.03, "{found:?}");
        assert!((found.center_y - 275.0 / 480.0).abs() < 0.03, "{found:?}");
        assert!(found.bounds[0] < found.center_x && found.center_x < found.bounds[2]);
        assert!(found.bounds[1] < found.center_y && found.center_y < found.bounds[3]);
        assert!(found.confidence >= 0.3);
        assert_eq!(found.scale, 0.5);
    }

    #[test]
    fn test_failing_scale_falls_through_to_next() {
        let scene = textured_scene(7);
        let ptz = zoomed_view(&scene, Rect::new(300, 200, 200, 150));
        // A negative factor makes the resize itself fail.
        let mut locator = OrbViewLocator::new(MatchConfig {
            n_features: 1000,
            scales: vec![-1.0, 0.5],
            ..MatchConfig::position_feedback()
        })
        .unwrap();

        let found = locator.locate(&scene, &ptz).unwrap().expect("view not found");
        assert_eq!(found.scale, 0.5);
        assert!((found.center_x - 400.0 / 640.0).abs() < 0.03, "{found:?}");
    }

    #[test]
    fn test_blank_frames_do_not_match() {
        let blank = Mat::new_rows_cols_with_default(480, 640, CV_8UC3, Scalar::all(128.0)).unwrap();
        let mut locator = OrbViewLocator::new(MatchConfig::dead_reckoning()).unwrap();
        assert!(locator.locate(&blank, &blank).unwrap().is_none());
    }

    #[test]
    fn test_empty_frame_is_no_match() {
        let scene = textured_scene(3);
        let mut locator = OrbViewLocator::new(MatchConfig::default()).unwrap();
        assert!(locator.locate(&scene, &Mat::default()).unwrap().is_none());
    }
}
