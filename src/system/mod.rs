//! Top-level wiring of controller, actuator, calibration and persistence.
//!
//! [`PtzSystem`] is shared between the detection loop, which calls
//! [`PtzSystem::update`] per frame, and whatever drives the user-facing
//! controls. Calibration runs on its own thread and suspends tracking while
//! it owns the camera.

mod ptz_system;
pub mod shared_state;

pub use ptz_system::PtzSystem;
pub use shared_state::SharedState;
