//! Flags shared between the tracking loop and the calibration thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct SharedState {
    /// A calibration run owns the actuator; tracking ticks are skipped.
    pub calibrating: AtomicBool,

    /// The system is shutting down; no new work should start.
    pub shutdown_requested: AtomicBool,
}

impl SharedState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_calibrating(&self) -> bool {
        self.calibrating.load(Ordering::SeqCst)
    }

    /// Mark a calibration as started. Returns `false` if one already was.
    pub fn begin_calibration(&self) -> bool {
        self.calibrating
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn end_calibration(&self) {
        self.calibrating.store(false, Ordering::SeqCst);
    }

    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calibration_flag_is_exclusive() {
        let shared = SharedState::new();
        assert!(shared.begin_calibration());
        assert!(!shared.begin_calibration());
        assert!(shared.is_calibrating());
        shared.end_calibration();
        assert!(shared.begin_calibration());
    }
}
