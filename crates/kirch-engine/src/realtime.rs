//! Running a simulation on its own thread.
//!
//! [`Simulation::spawn`] moves the simulation onto a thread named
//! `kirch-run`. The returned [`RunHandle`] can request a stop, which the
//! run notices at the next step boundary, and hands the simulation back
//! on [`join`](RunHandle::join). Dropping the handle stops and joins.

use std::thread::{self, JoinHandle};

use crate::error::SimError;
use crate::metrics::RunMetrics;
use crate::simulation::{Simulation, StopHandle};

/// A finished background run.
#[derive(Debug)]
pub struct RunOutcome {
    /// The simulation, in its final state.
    pub simulation: Simulation,
    /// What [`Simulation::run`] returned.
    pub result: Result<RunMetrics, SimError>,
}

/// Handle to a simulation running on a background thread.
#[derive(Debug)]
pub struct RunHandle {
    stop: StopHandle,
    thread: Option<JoinHandle<RunOutcome>>,
}

impl RunHandle {
    /// Ask the run to stop at the next step boundary.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Whether the run thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Wait for the run to end and take the simulation back.
    pub fn join(mut self) -> Result<RunOutcome, SimError> {
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| SimError::RunThreadPanicked),
            None => Err(SimError::RunThreadPanicked),
        }
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.stop.stop();
            let _ = thread.join();
        }
    }
}

impl Simulation {
    /// Run on a dedicated thread.
    pub fn spawn(mut self) -> Result<RunHandle, SimError> {
        let stop = self.stop_handle();
        let thread = thread::Builder::new()
            .name("kirch-run".to_string())
            .spawn(move || {
                let result = self.run();
                RunOutcome {
                    simulation: self,
                    result,
                }
            })
            .map_err(SimError::Spawn)?;
        Ok(RunHandle {
            stop,
            thread: Some(thread),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use crate::simulation::{RunState, StopReason};
    use kirch_test_utils::fixtures::source_resistor;

    #[test]
    fn background_run_completes() {
        let config = SimulationConfig {
            time_step: 1e-3,
            final_time: 0.05,
            ..SimulationConfig::default()
        };
        let sim = Simulation::new(config, source_resistor(5.0, 1.0).unwrap()).unwrap();
        let outcome = sim.spawn().unwrap().join().unwrap();
        assert_eq!(outcome.result.unwrap().steps, 50);
        assert_eq!(*outcome.simulation.state(), RunState::Stopped(StopReason::Completed));
    }

    #[test]
    fn stop_request_cancels_a_realtime_run() {
        let config = SimulationConfig {
            time_step: 1e-3,
            final_time: 60.0,
            realtime: true,
            ..SimulationConfig::default()
        };
        let sim = Simulation::new(config, source_resistor(5.0, 1.0).unwrap()).unwrap();
        let handle = sim.spawn().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(30));
        assert!(!handle.is_finished());
        handle.stop();
        let outcome = handle.join().unwrap();
        let steps = outcome.result.unwrap().steps;
        assert!(steps > 0 && steps < 60_000);
        assert_eq!(*outcome.simulation.state(), RunState::Stopped(StopReason::Cancelled));
    }
}
