//! In-memory PTZ simulation that records every command it receives.
//!
//! Continuous moves integrate velocity over wall-clock time, absolute moves
//! and presets jump immediately. Failure injection and artificial latency make
//! it suitable for exercising the controller's error paths.

use std::collections::HashMap;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::{ActuatorCapability, ActuatorError, ActuatorResult, Preset, PtzActuator, PtzPosition};

/// A command as seen by the simulated device.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Move { pan: f64, tilt: f64, zoom: f64 },
    Stop,
    Absolute { pan: f64, tilt: f64, zoom: f64 },
    GotoPreset { token: String, speed: f64 },
    Home,
}

struct SimState {
    pan: f64,
    tilt: f64,
    zoom: f64,
    velocity: (f64, f64, f64),
    moving_since: Option<Instant>,
    commands: Vec<Command>,
    failing: bool,
    frozen: bool,
    report_position: bool,
    latency: Duration,
}

impl SimState {
    /// Fold any in-flight continuous move into the position.
    fn integrate(&mut self, now: Instant) {
        if let Some(since) = self.moving_since {
            let dt = now.duration_since(since).as_secs_f64();
            if !self.frozen {
                self.pan = (self.pan + self.velocity.0 * dt).clamp(-1.0, 1.0);
                self.tilt = (self.tilt + self.velocity.1 * dt).clamp(-1.0, 1.0);
                self.zoom = (self.zoom + self.velocity.2 * dt).clamp(0.0, 1.0);
            }
            self.moving_since = Some(now);
        }
    }
}

pub struct RecordingActuator {
    state: Mutex<SimState>,
    presets: Vec<Preset>,
    preset_positions: HashMap<String, (f64, f64, f64)>,
    capability: ActuatorCapability,
}

impl RecordingActuator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                pan: 0.0,
                tilt: 0.0,
                zoom: 0.0,
                velocity: (0.0, 0.0, 0.0),
                moving_since: None,
                commands: Vec::new(),
                failing: false,
                frozen: false,
                report_position: true,
                latency: Duration::ZERO,
            }),
            presets: Vec::new(),
            preset_positions: HashMap::new(),
            capability: ActuatorCapability::PositionFeedback,
        }
    }

    pub fn with_capability(mut self, capability: ActuatorCapability) -> Self {
        self.capability = capability;
        self
    }

    /// Register a preset reachable by token (or name) at the given position.
    pub fn with_preset(mut self, token: &str, name: Option<&str>, position: (f64, f64, f64)) -> Self {
        self.presets.push(Preset {
            token: token.to_string(),
            name: name.map(str::to_string),
        });
        self.preset_positions.insert(token.to_string(), position);
        self
    }

    /// Make every subsequent command fail.
    pub fn set_failing(&self, failing: bool) {
        self.state.lock().failing = failing;
    }

    /// Ignore all motion (a camera with a wrong profile token behaves this way).
    pub fn set_frozen(&self, frozen: bool) {
        self.state.lock().frozen = frozen;
    }

    /// Answer position queries without a position.
    pub fn set_report_position(&self, report: bool) {
        self.state.lock().report_position = report;
    }

    /// Sleep this long inside every command.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    pub fn commands(&self) -> Vec<Command> {
        self.state.lock().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.state.lock().commands.clear();
    }

    /// Current simulated position, regardless of `report_position`.
    pub fn position(&self) -> PtzPosition {
        let mut state = self.state.lock();
        state.integrate(Instant::now());
        PtzPosition::new(state.pan, state.tilt, state.zoom)
    }

    fn begin(&self, command: &'static str) -> ActuatorResult<()> {
        let (latency, failing) = {
            let state = self.state.lock();
            (state.latency, state.failing)
        };
        if !latency.is_zero() {
            thread::sleep(latency);
        }
        if failing {
            return Err(ActuatorError::command(command, "simulated failure"));
        }
        Ok(())
    }

    fn record(&self, command: Command) {
        self.state.lock().commands.push(command);
    }
}

impl Default for RecordingActuator {
    fn default() -> Self {
        Self::new()
    }
}

impl PtzActuator for RecordingActuator {
    fn continuous_move(&self, pan: f64, tilt: f64, zoom: f64) -> ActuatorResult<()> {
        self.begin("ContinuousMove")?;
        let now = Instant::now();
        let mut state = self.state.lock();
        state.integrate(now);
        state.velocity = (pan, tilt, zoom);
        state.moving_since = Some(now);
        state.commands.push(Command::Move { pan, tilt, zoom });
        Ok(())
    }

    fn stop(&self) -> ActuatorResult<()> {
        self.begin("Stop")?;
        let mut state = self.state.lock();
        state.integrate(Instant::now());
        state.velocity = (0.0, 0.0, 0.0);
        state.moving_since = None;
        state.commands.push(Command::Stop);
        Ok(())
    }

    fn move_absolute(&self, pan: f64, tilt: f64, zoom: f64) -> ActuatorResult<()> {
        self.begin("AbsoluteMove")?;
        let mut state = self.state.lock();
        state.velocity = (0.0, 0.0, 0.0);
        state.moving_since = None;
        if !state.frozen {
            state.pan = pan.clamp(-1.0, 1.0);
            state.tilt = tilt.clamp(-1.0, 1.0);
            state.zoom = zoom.clamp(0.0, 1.0);
        }
        state.commands.push(Command::Absolute { pan, tilt, zoom });
        Ok(())
    }

    fn get_position(&self) -> ActuatorResult<PtzPosition> {
        self.begin("GetStatus")?;
        let mut state = self.state.lock();
        state.integrate(Instant::now());
        if !state.report_position {
            return Ok(PtzPosition::unavailable());
        }
        Ok(PtzPosition::new(state.pan, state.tilt, state.zoom))
    }

    fn goto_preset(&self, token: &str, speed: f64) -> ActuatorResult<()> {
        self.begin("GotoPreset")?;
        let Some(&(pan, tilt, zoom)) = self.preset_positions.get(token) else {
            return Err(ActuatorError::command(
                "GotoPreset",
                format!("unknown preset '{token}'"),
            ));
        };
        {
            let mut state = self.state.lock();
            if !state.frozen {
                state.pan = pan;
                state.tilt = tilt;
                state.zoom = zoom;
            }
        }
        self.record(Command::GotoPreset {
            token: token.to_string(),
            speed,
        });
        Ok(())
    }

    fn list_presets(&self) -> ActuatorResult<Vec<Preset>> {
        self.begin("GetPresets")?;
        Ok(self.presets.clone())
    }

    fn go_home(&self) -> ActuatorResult<()> {
        self.begin("GotoHomePosition")?;
        {
            let mut state = self.state.lock();
            state.velocity = (0.0, 0.0, 0.0);
            state.moving_since = None;
            if !state.frozen {
                state.pan = 0.0;
                state.tilt = 0.0;
            }
        }
        self.record(Command::Home);
        Ok(())
    }

    fn capability(&self) -> ActuatorCapability {
        self.capability
    }
}
