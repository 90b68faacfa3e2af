//! Patrol behaviour while no target is tracked: preset cycling when presets
//! resolve, a slow back-and-forth pan sweep otherwise.

use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::secs;
use super::state::PatrolState;
use crate::actuator::{ActuatorError, PtzActuator};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatrolConfig {
    /// Whether `start_tracking` arms patrol.
    pub enabled: bool,
    /// Pan velocity of the sweep.
    pub speed: f64,
    /// Time before the sweep reverses.
    pub sweep_duration_secs: f64,
    /// Preset names or tokens to cycle; empty selects the sweep.
    pub presets: Vec<String>,
    pub dwell_secs: f64,
    pub preset_speed: f64,
}

impl Default for PatrolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            speed: 0.15,
            sweep_duration_secs: 90.0,
            presets: Vec::new(),
            dwell_secs: 10.0,
            preset_speed: 0.3,
        }
    }
}

/// What one patrol tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum PatrolOutcome {
    Swept { velocity: f64, reversed: bool },
    Dwelling,
    Advanced { from: usize, to: usize, token: String },
    Failed(ActuatorError),
}

impl PatrolState {
    /// Map configured names/tokens to actuator preset tokens. Runs once per
    /// successful preset listing; unresolved entries are dropped with a warning.
    pub fn resolve_presets(&mut self, config: &PatrolConfig, actuator: &dyn PtzActuator) {
        if self.presets_resolved || config.presets.is_empty() {
            return;
        }
        let available = match actuator.list_presets() {
            Ok(presets) => presets,
            Err(e) => {
                warn!("Could not list presets, patrolling by sweep: {}", e);
                self.preset_tokens.clear();
                return;
            }
        };

        let mut lookup = HashMap::new();
        for preset in &available {
            lookup.insert(preset.token.as_str(), preset.token.as_str());
            if let Some(name) = &preset.name {
                lookup.insert(name.as_str(), preset.token.as_str());
            }
        }

        self.preset_tokens = config
            .presets
            .iter()
            .filter_map(|wanted| match lookup.get(wanted.as_str()) {
                Some(token) => Some(token.to_string()),
                None => {
                    warn!("Preset '{}' not found on camera", wanted);
                    None
                }
            })
            .collect();
        self.presets_resolved = true;

        if self.preset_tokens.is_empty() {
            warn!("No configured presets resolved, patrolling by sweep");
        } else {
            info!("Patrol presets: {:?}", self.preset_tokens);
        }
    }

    pub fn uses_presets(&self) -> bool {
        !self.preset_tokens.is_empty()
    }

    /// Entry action for patrol. `restart` begins again at the first preset.
    pub fn enter(
        &mut self,
        config: &PatrolConfig,
        actuator: &dyn PtzActuator,
        restart: bool,
    ) -> Option<ActuatorError> {
        self.sweep_started = None;
        self.preset_arrival = None;
        if !self.uses_presets() {
            return None;
        }
        if restart || self.preset_index >= self.preset_tokens.len() {
            self.preset_index = 0;
        }
        let token = &self.preset_tokens[self.preset_index];
        debug!("Patrol: going to preset {}", token);
        actuator.goto_preset(token, config.preset_speed).err()
    }

    pub fn tick(
        &mut self,
        config: &PatrolConfig,
        actuator: &dyn PtzActuator,
        now: Instant,
    ) -> PatrolOutcome {
        if self.uses_presets() {
            self.cycle_presets(config, actuator, now)
        } else {
            self.sweep(config, actuator, now)
        }
    }

    fn cycle_presets(
        &mut self,
        config: &PatrolConfig,
        actuator: &dyn PtzActuator,
        now: Instant,
    ) -> PatrolOutcome {
        let arrived = *self.preset_arrival.get_or_insert(now);
        if now.duration_since(arrived) <= secs(config.dwell_secs) {
            return PatrolOutcome::Dwelling;
        }

        let from = self.preset_index;
        let to = (from + 1) % self.preset_tokens.len();
        self.preset_index = to;
        self.preset_arrival = Some(now);
        let token = self.preset_tokens[to].clone();
        info!("Patrol: moving to preset {} ({}/{})", token, to + 1, self.preset_tokens.len());
        match actuator.goto_preset(&token, config.preset_speed) {
            Ok(()) => PatrolOutcome::Advanced { from, to, token },
            Err(e) => PatrolOutcome::Failed(e),
        }
    }

    fn sweep(
        &mut self,
        config: &PatrolConfig,
        actuator: &dyn PtzActuator,
        now: Instant,
    ) -> PatrolOutcome {
        let started = *self.sweep_started.get_or_insert(now);
        let reversed = now.duration_since(started) > secs(config.sweep_duration_secs);
        if reversed {
            self.direction = -self.direction;
            self.sweep_started = Some(now);
            debug!("Patrol: reversing sweep, direction={}", self.direction);
        }
        let velocity = config.speed * self.direction;
        match actuator.continuous_move(velocity, 0.0, 0.0) {
            Ok(()) => PatrolOutcome::Swept { velocity, reversed },
            Err(e) => PatrolOutcome::Failed(e),
        }
    }
}
