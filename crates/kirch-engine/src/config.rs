//! Run configuration and its validation.
//!
//! [`SimulationConfig`] is consumed once, when a [`Simulation`] is
//! built. Every field has a default so partial documents deserialize.
//!
//! [`Simulation`]: crate::Simulation

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on the worker pool size.
pub const MAX_WORKERS: usize = 64;

// ── InitialConditions ──────────────────────────────────────────────

/// How state is initialised before the first step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialConditions {
    /// Every history and port quantity starts at zero.
    #[default]
    Zero,
    /// One DC operating-point solve per subnetwork.
    SteadyState,
}

// ── SimulationConfig ───────────────────────────────────────────────

/// Driver-supplied settings for one run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Label used in log events.
    pub name: String,
    /// Fixed time step, in seconds.
    pub time_step: f64,
    /// Simulated time at which the run stops, in seconds.
    pub final_time: f64,
    /// Worker threads. `None` picks from available parallelism.
    pub worker_threads: Option<usize>,
    /// Pace steps against the wall clock.
    pub realtime: bool,
    /// Initialisation mode.
    pub initial_conditions: InitialConditions,
    /// Nominal system frequency reported to components, in hertz.
    pub frequency: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            name: "kirch".to_string(),
            time_step: 1e-4,
            final_time: 1.0,
            worker_threads: Some(1),
            realtime: false,
            initial_conditions: InitialConditions::Zero,
            frequency: 50.0,
        }
    }
}

impl SimulationConfig {
    /// Check every field without touching any other state.
    ///
    /// 1. `time_step` is finite and positive.
    /// 2. `final_time` is finite and at least one step long.
    /// 3. An explicit worker count is non-zero.
    /// 4. `frequency` is finite and non-negative.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.time_step.is_finite() || self.time_step <= 0.0 {
            return Err(ConfigError::InvalidTimeStep {
                value: self.time_step,
            });
        }
        if !self.final_time.is_finite() || self.final_time < self.time_step {
            return Err(ConfigError::InvalidFinalTime {
                final_time: self.final_time,
                time_step: self.time_step,
            });
        }
        if self.worker_threads == Some(0) {
            return Err(ConfigError::ZeroWorkers);
        }
        if !self.frequency.is_finite() || self.frequency < 0.0 {
            return Err(ConfigError::InvalidFrequency {
                value: self.frequency,
            });
        }
        Ok(())
    }

    /// Resolve the worker count.
    ///
    /// An explicit count is clamped to `[1, MAX_WORKERS]`. `None` uses
    /// available parallelism, falling back to 1.
    pub fn resolved_workers(&self) -> usize {
        match self.worker_threads {
            Some(n) => n.clamp(1, MAX_WORKERS),
            None => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                .clamp(1, MAX_WORKERS),
        }
    }

    /// Number of steps needed to reach `final_time`.
    pub fn total_steps(&self) -> u64 {
        // Guard against 0.3 / 0.1 landing just above 3.
        (self.final_time / self.time_step - 1e-9).ceil().max(0.0) as u64
    }
}

// ── ConfigError ────────────────────────────────────────────────────

/// Rejected configuration.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ConfigError {
    /// `time_step` is not a finite positive number.
    #[error("time_step must be finite and positive, got {value}")]
    InvalidTimeStep {
        /// The rejected value.
        value: f64,
    },
    /// `final_time` is not finite or shorter than one step.
    #[error("final_time {final_time} must be finite and at least time_step {time_step}")]
    InvalidFinalTime {
        /// The rejected final time.
        final_time: f64,
        /// The configured step.
        time_step: f64,
    },
    /// An explicit worker count of zero.
    #[error("worker_threads must be at least 1")]
    ZeroWorkers,
    /// `frequency` is negative or not finite.
    #[error("frequency must be finite and non-negative, got {value}")]
    InvalidFrequency {
        /// The rejected value.
        value: f64,
    },
}
