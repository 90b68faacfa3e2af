//! Top-level configuration, read from YAML.
//!
//! Every section is optional; missing fields take their documented defaults.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::actuator::ActuatorCapability;
use crate::calibration::CalibrationConfig;
use crate::control::{NavigatorConfig, PatrolConfig, TrackingConfig};
use crate::matching::MatchConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorConfig {
    /// Deadline for one driver command. Zero or less disables the worker.
    pub command_timeout_secs: f64,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: 3.0,
        }
    }
}

impl ActuatorConfig {
    pub fn command_timeout(&self) -> Option<Duration> {
        if self.command_timeout_secs > 0.0 {
            Duration::try_from_secs_f64(self.command_timeout_secs).ok()
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PtzConfig {
    pub tracking: TrackingConfig,
    pub patrol: PatrolConfig,
    pub calibration: CalibrationConfig,
    /// Matcher settings; unset picks the preset for the actuator capability.
    pub matching: Option<MatchConfig>,
    pub navigator: NavigatorConfig,
    pub actuator: ActuatorConfig,
    /// Where calibrated mapping parameters are persisted.
    pub mapping_path: Option<PathBuf>,
}

impl PtzConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        serde_yaml::from_reader(file).with_context(|| format!("Failed to parse {:?}", path))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("Failed to parse configuration")
    }

    /// Matcher settings for an actuator of the given capability.
    pub fn match_config(&self, capability: ActuatorCapability) -> MatchConfig {
        match (&self.matching, capability) {
            (Some(config), _) => config.clone(),
            (None, ActuatorCapability::PositionFeedback) => MatchConfig::position_feedback(),
            (None, ActuatorCapability::DeadReckoning) => MatchConfig::dead_reckoning(),
        }
    }
}
