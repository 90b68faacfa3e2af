//! Latest-frame access for the wide and PTZ cameras.
//!
//! The grabbing pipeline lives elsewhere; calibrators only need "the most
//! recent decoded frame, if any".

use std::path::Path;

use anyhow::{Context, Result, bail};
use opencv::core::Mat;
use opencv::imgcodecs;
use opencv::prelude::*;
use parking_lot::Mutex;
use tracing::warn;

/// Anything that can hand out the latest decoded BGR frame.
pub trait FrameSource: Send + Sync {
    fn latest_frame(&self) -> Option<Mat>;
}

impl<F> FrameSource for F
where
    F: Fn() -> Option<Mat> + Send + Sync,
{
    fn latest_frame(&self) -> Option<Mat> {
        self()
    }
}

/// Single-slot mailbox written by a grabber thread and read by calibration.
#[derive(Default)]
pub struct FrameSlot {
    frame: Mutex<Option<Mat>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored frame.
    pub fn publish(&self, frame: Mat) {
        *self.frame.lock() = Some(frame);
    }

    pub fn clear(&self) {
        *self.frame.lock() = None;
    }
}

impl FrameSource for FrameSlot {
    fn latest_frame(&self) -> Option<Mat> {
        let guard = self.frame.lock();
        let frame = guard.as_ref()?;
        match frame.try_clone() {
            Ok(copy) => Some(copy),
            Err(e) => {
                warn!("Failed to copy frame: {}", e);
                None
            }
        }
    }
}

/// A still image on disk served as a frame source (offline runs, CLI).
pub struct ImageFileSource {
    slot: FrameSlot,
}

impl ImageFileSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let image = read_color(path)?;
        let slot = FrameSlot::new();
        slot.publish(image);
        Ok(Self { slot })
    }
}

impl FrameSource for ImageFileSource {
    fn latest_frame(&self) -> Option<Mat> {
        self.slot.latest_frame()
    }
}

/// Read a color image, failing on missing or undecodable files.
pub fn read_color<P: AsRef<Path>>(path: P) -> Result<Mat> {
    let path = path.as_ref();
    let name = path
        .to_str()
        .with_context(|| format!("Non UTF-8 image path {:?}", path))?;
    let image = imgcodecs::imread(name, imgcodecs::IMREAD_COLOR)
        .with_context(|| format!("Failed to read image {:?}", path))?;
    if image.empty() {
        bail!("Image {:?} is empty or could not be decoded", path);
    }
    Ok(image)
}
