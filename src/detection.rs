//! Detector output consumed by the tracking controller.

use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box in frame pixels, `[x1, y1, x2, y2]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f64 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Largest fractional dimension of the box relative to the frame.
    pub fn fill_ratio(&self, frame_width: f64, frame_height: f64) -> f64 {
        if frame_width <= 0.0 || frame_height <= 0.0 {
            return 0.0;
        }
        (self.width() / frame_width).max(self.height() / frame_height)
    }
}

/// A single detection on a camera frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BBox,
    pub confidence: f64,
    pub species: String,
}

impl Detection {
    pub fn new(bbox: BBox, confidence: f64, species: impl Into<String>) -> Self {
        Self {
            bbox,
            confidence,
            species: species.into(),
        }
    }
}

/// One camera's detections together with the frame they were found in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraView<'a> {
    pub detections: &'a [Detection],
    pub frame_width: u32,
    pub frame_height: u32,
}

impl<'a> CameraView<'a> {
    pub fn new(detections: &'a [Detection], frame_width: u32, frame_height: u32) -> Self {
        Self {
            detections,
            frame_width,
            frame_height,
        }
    }

    pub fn has_frame(&self) -> bool {
        self.frame_width > 0 && self.frame_height > 0
    }

    /// Detections covering at least `min_fraction` of the frame area.
    /// Zero or less keeps everything.
    pub fn large_enough(self, min_fraction: f64) -> impl Iterator<Item = &'a Detection> {
        let min_area = min_fraction * self.frame_width as f64 * self.frame_height as f64;
        self.detections
            .iter()
            .filter(move |d| min_fraction <= 0.0 || d.bbox.area() >= min_area)
    }
}

/// Highest-confidence detection, if any.
pub fn best_detection<'a>(
    detections: impl IntoIterator<Item = &'a Detection>,
) -> Option<&'a Detection> {
    detections
        .into_iter()
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_ratio_uses_larger_dimension() {
        let bbox = BBox::new(860.0, 440.0, 1060.0, 640.0);
        let fill = bbox.fill_ratio(1920.0, 1080.0);
        assert!((fill - 200.0 / 1080.0).abs() < 1e-12);
    }

    #[test]
    fn test_best_detection_picks_highest_confidence() {
        let dets = vec![
            Detection::new(BBox::new(0.0, 0.0, 10.0, 10.0), 0.4, "deer"),
            Detection::new(BBox::new(5.0, 5.0, 20.0, 20.0), 0.9, "fox"),
            Detection::new(BBox::new(1.0, 1.0, 2.0, 2.0), 0.7, "owl"),
        ];
        assert_eq!(best_detection(&dets).map(|d| d.species.as_str()), Some("fox"));
        assert!(best_detection(&[] as &[Detection]).is_none());
    }

    #[test]
    fn test_large_enough_filters_by_frame_fraction() {
        let dets = vec![
            Detection::new(BBox::new(0.0, 0.0, 10.0, 10.0), 0.99, "mouse"),
            Detection::new(BBox::new(0.0, 0.0, 100.0, 100.0), 0.5, "deer"),
        ];
        let view = CameraView::new(&dets, 1000, 1000);
        let kept: Vec<_> = view.large_enough(0.001).map(|d| d.species.as_str()).collect();
        assert_eq!(kept, vec!["deer"]);
        assert_eq!(view.large_enough(0.0).count(), 2);
        assert_eq!(
            best_detection(view.large_enough(0.001)).map(|d| d.species.as_str()),
            Some("deer")
        );
        assert!(!CameraView::new(&dets, 0, 1000).has_frame());
    }
}
