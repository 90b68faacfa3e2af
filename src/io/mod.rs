//! Frame sources and calibration sample files.

pub mod frames;
pub mod samples;

pub use frames::{FrameSlot, FrameSource, ImageFileSource};
pub use samples::{load_samples_csv, save_samples_csv};
