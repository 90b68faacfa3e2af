pub mod actuator;
pub mod calibration;
pub mod config;
pub mod control;
pub mod detection;
pub mod io;
pub mod mapping;
pub mod matching;
pub mod system;
