//! Run-level errors.
//!
//! [`SimError`] groups every failure into the categories a driver acts
//! on. Timing violations are not errors; see [`TimingViolation`].
//!
//! [`TimingViolation`]: crate::pacer::TimingViolation

use std::time::Duration;

use kirch_core::{AttributeError, NumericError, StepId, TaskError, ValueKind};
use kirch_mna::{AssemblyError, ComponentError, TopologyError};
use kirch_task::{ExecutorError, ScheduleError, TaskFailure};
use thiserror::Error;

use crate::config::ConfigError;
use crate::simulation::RunState;

/// Problems with the shape of the model, found before the first step.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum StructuralError {
    /// Malformed topology.
    #[error(transparent)]
    Topology(#[from] TopologyError),

    /// A component could not be wired.
    #[error(transparent)]
    Component(#[from] ComponentError),

    /// The task list is cyclic or conflicting.
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    /// A cell reference is dangling or mistyped.
    #[error(transparent)]
    Attribute(#[from] AttributeError),

    /// The time step exceeds a component's stability limit.
    #[error("time step {dt} exceeds limit {max} of '{component}'")]
    TimeStepTooLarge {
        /// Component imposing the limit.
        component: String,
        /// Configured time step.
        dt: f64,
        /// Largest supported time step.
        max: f64,
    },
}

/// External interface failures.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum InterfaceError {
    /// No frame for the current step arrived in time.
    #[error("interface '{endpoint}' timed out after {waited:?} waiting for step {step}")]
    Timeout {
        /// Endpoint name.
        endpoint: String,
        /// Step being waited for.
        step: StepId,
        /// Time spent waiting.
        waited: Duration,
    },

    /// The counterpart dropped its end of the channel.
    #[error("interface '{endpoint}' disconnected")]
    Disconnected {
        /// Endpoint name.
        endpoint: String,
    },

    /// Only scalar cells can cross an interface.
    #[error("attribute '{name}' of kind {kind} cannot be exchanged")]
    UnsupportedKind {
        /// Qualified attribute name.
        name: String,
        /// Its kind.
        kind: ValueKind,
    },

    /// A received frame does not match the declared imports.
    #[error("interface '{endpoint}' frame for step {step} has {got} values, expected {expected}")]
    FrameShape {
        /// Endpoint name.
        endpoint: String,
        /// Frame step.
        step: StepId,
        /// Declared imports.
        expected: usize,
        /// Values in the frame.
        got: usize,
    },

    /// Reading or writing an exchanged cell failed.
    #[error(transparent)]
    Attribute(#[from] AttributeError),
}

/// Any error that stops a run.
#[derive(Debug, Error)]
pub enum SimError {
    /// The model is malformed.
    #[error("structural: {0}")]
    Structural(#[from] StructuralError),

    /// A system matrix is singular or ill-conditioned.
    #[error("numeric: {0}")]
    Numeric(#[from] NumericError),

    /// An external interface failed.
    #[error("interface: {0}")]
    Interface(#[from] InterfaceError),

    /// The configuration was rejected.
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    /// A task body failed for a non-numeric reason.
    #[error(transparent)]
    Task(TaskFailure),

    /// The worker pool could not be created.
    #[error("executor: {0}")]
    Executor(#[from] ExecutorError),

    /// A scheduled event time is NaN or infinite.
    #[error("event time must be finite, got {time}")]
    InvalidEventTime {
        /// The rejected time.
        time: f64,
    },

    /// The background run thread could not be started.
    #[error("spawning run thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// The background run thread panicked.
    #[error("run thread panicked")]
    RunThreadPanicked,

    /// The operation is not allowed in the current run state.
    #[error("cannot {operation} while {state:?}")]
    InvalidState {
        /// What was attempted.
        operation: &'static str,
        /// State at the time.
        state: RunState,
    },
}

impl From<AssemblyError> for SimError {
    fn from(e: AssemblyError) -> Self {
        match e {
            AssemblyError::Numeric(n) => Self::Numeric(n),
            AssemblyError::Topology(t) => Self::Structural(t.into()),
            AssemblyError::Component(c) => Self::Structural(c.into()),
            AssemblyError::Schedule(s) => Self::Structural(s.into()),
            AssemblyError::Attribute(a) => Self::Structural(a.into()),
            AssemblyError::TimeStepTooLarge { component, dt, max } => {
                Self::Structural(StructuralError::TimeStepTooLarge { component, dt, max })
            }
        }
    }
}

impl From<TaskFailure> for SimError {
    fn from(f: TaskFailure) -> Self {
        match f.source {
            TaskError::Numeric(n) => Self::Numeric(n),
            _ => Self::Task(f),
        }
    }
}

impl From<AttributeError> for SimError {
    fn from(e: AttributeError) -> Self {
        Self::Structural(e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_task_failure_is_numeric() {
        let failure = TaskFailure {
            task: "net0/solve".into(),
            source: TaskError::Numeric(NumericError::Singular {
                system: "net0".into(),
            }),
        };
        assert!(matches!(SimError::from(failure), SimError::Numeric(_)));
    }

    #[test]
    fn other_task_failure_is_kept() {
        let failure = TaskFailure {
            task: "r/post".into(),
            source: TaskError::ExecutionFailed {
                reason: "boom".into(),
            },
        };
        assert!(matches!(SimError::from(failure), SimError::Task(_)));
    }

    #[test]
    fn assembly_errors_map_to_categories() {
        let e = SimError::from(AssemblyError::Schedule(ScheduleError::EmptySchedule));
        assert!(matches!(e, SimError::Structural(StructuralError::Schedule(_))));
        let e = SimError::from(AssemblyError::Numeric(NumericError::Singular {
            system: "net0".into(),
        }));
        assert!(matches!(e, SimError::Numeric(_)));
    }
}
