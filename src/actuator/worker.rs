//! Deadline-bounded actuator dispatch.
//!
//! Hardware drivers block, sometimes for a long time. `BoundedActuator` runs
//! every command on a dedicated worker thread and waits for the reply with
//! `recv_timeout`, so a hung camera costs the caller at most `timeout`.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender, TrySendError, bounded};
use tracing::warn;

use super::{ActuatorCapability, ActuatorError, ActuatorResult, Preset, PtzActuator, PtzPosition};

/// Pending commands allowed while the worker is busy.
const JOB_QUEUE_CAPACITY: usize = 4;

type Job = Box<dyn FnOnce(&dyn PtzActuator) + Send>;

pub struct BoundedActuator {
    jobs: Option<Sender<Job>>,
    timeout: Duration,
    capability: ActuatorCapability,
    worker: Option<JoinHandle<()>>,
}

impl BoundedActuator {
    pub fn new(inner: Arc<dyn PtzActuator>, timeout: Duration) -> Self {
        let capability = inner.capability();
        let (jobs, job_rx) = bounded::<Job>(JOB_QUEUE_CAPACITY);
        let worker = thread::spawn(move || {
            for job in job_rx {
                job(inner.as_ref());
            }
        });
        Self {
            jobs: Some(jobs),
            timeout,
            capability,
            worker: Some(worker),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn call<T, F>(&self, command: &'static str, f: F) -> ActuatorResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn PtzActuator) -> ActuatorResult<T> + Send + 'static,
    {
        let jobs = self.jobs.as_ref().ok_or(ActuatorError::Disconnected)?;
        let (reply_tx, reply_rx) = bounded(1);
        let job: Job = Box::new(move |actuator| {
            // The caller may have given up already.
            let _ = reply_tx.send(f(actuator));
        });

        match jobs.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("{} dropped: actuator worker queue is full", command);
                return Err(ActuatorError::command(command, "actuator busy"));
            }
            Err(TrySendError::Disconnected(_)) => return Err(ActuatorError::Disconnected),
        }

        match reply_rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(ActuatorError::Timeout {
                command,
                timeout_ms: self.timeout.as_millis() as u64,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(ActuatorError::Disconnected),
        }
    }
}

impl PtzActuator for BoundedActuator {
    fn continuous_move(&self, pan: f64, tilt: f64, zoom: f64) -> ActuatorResult<()> {
        self.call("ContinuousMove", move |a| a.continuous_move(pan, tilt, zoom))
    }

    fn stop(&self) -> ActuatorResult<()> {
        self.call("Stop", |a| a.stop())
    }

    fn move_absolute(&self, pan: f64, tilt: f64, zoom: f64) -> ActuatorResult<()> {
        self.call("AbsoluteMove", move |a| a.move_absolute(pan, tilt, zoom))
    }

    fn get_position(&self) -> ActuatorResult<PtzPosition> {
        self.call("GetStatus", |a| a.get_position())
    }

    fn goto_preset(&self, token: &str, speed: f64) -> ActuatorResult<()> {
        let token = token.to_string();
        self.call("GotoPreset", move |a| a.goto_preset(&token, speed))
    }

    fn list_presets(&self) -> ActuatorResult<Vec<Preset>> {
        self.call("GetPresets", |a| a.list_presets())
    }

    fn go_home(&self) -> ActuatorResult<()> {
        self.call("GotoHomePosition", |a| a.go_home())
    }

    fn capability(&self) -> ActuatorCapability {
        self.capability
    }
}

impl Drop for BoundedActuator {
    fn drop(&mut self) {
        // Closing the queue ends the worker loop once the current job returns.
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            // Never block on a worker stuck inside a hung command.
            if worker.is_finished() {
                let _ = worker.join();
            }
        }
    }
}
