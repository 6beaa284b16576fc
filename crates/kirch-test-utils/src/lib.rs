//! Test utilities for kirch development.
//!
//! [`init_tracing`] installs a test-friendly subscriber once per
//! process. [`Stepper`] drives an [`Assembly`] without the run
//! controller, for equation-engine tests. Reusable circuits and recorder
//! tasks live in [`fixtures`].

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;

use kirch_core::{StepId, TaskError};
use kirch_mna::{assemble, Assembly, AssemblyError, SystemEnv, Topology};
use kirch_task::{
    build_schedule, Executor, PreviousFrame, ScheduleError, SharedTask, StepClock, TaskFailure,
};

/// Install a `fmt` subscriber honouring `RUST_LOG`, writing through the
/// test harness. Later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Minimal offline stepping loop over an assembled topology.
///
/// Mirrors the run controller's step order (reset additive cells,
/// execute the schedule, commit previous-step values, advance the clock)
/// on a sequential executor, without pacing or interfaces.
pub struct Stepper {
    pub topology: Topology,
    pub assembly: Assembly,
    previous: PreviousFrame,
    executor: Executor,
    clock: StepClock,
}

impl Stepper {
    /// Assemble `topology` with zero initial conditions.
    pub fn new(topology: Topology, dt: f64) -> Result<Self, AssemblyError> {
        Self::build(topology, dt, false)
    }

    /// Assemble `topology` and initialise it from the DC operating point.
    pub fn steady_state(topology: Topology, dt: f64) -> Result<Self, AssemblyError> {
        Self::build(topology, dt, true)
    }

    fn build(mut topology: Topology, dt: f64, steady: bool) -> Result<Self, AssemblyError> {
        let env = SystemEnv { dt, frequency: 50.0 };
        let assembly = assemble(&mut topology, &env)?;
        if steady {
            assembly.steady_state(&topology)?;
        }
        let previous = PreviousFrame::capture(topology.store(), assembly.schedule.previous_cells())?;
        Ok(Self {
            topology,
            assembly,
            previous,
            executor: Executor::sequential(),
            clock: StepClock::start(dt),
        })
    }

    /// Add `task` (usually a [`fixtures::Recorder`]) to the schedule.
    pub fn observe(&mut self, task: SharedTask) -> Result<(), ScheduleError> {
        let schedule = &self.assembly.schedule;
        let mut tasks: Vec<SharedTask> = (0..schedule.len())
            .filter_map(|i| schedule.task(i).cloned())
            .collect();
        tasks.push(task);
        self.assembly.schedule = build_schedule(tasks, self.topology.store())?;
        Ok(())
    }

    /// Run one step.
    pub fn step(&mut self) -> Result<(), TaskFailure> {
        let store = self.topology.store();
        store.reset_additive();
        self.executor
            .run(&self.assembly.schedule, store, &self.previous, self.clock)?;
        self.previous.commit(store).map_err(|e| TaskFailure {
            task: "commit".to_string(),
            source: TaskError::from(e),
        })?;
        let next = self.clock.step.next();
        self.clock = StepClock {
            step: next,
            time: next.0 as f64 * self.clock.dt,
            dt: self.clock.dt,
        };
        Ok(())
    }

    /// Run `n` steps.
    pub fn run(&mut self, n: usize) -> Result<(), TaskFailure> {
        for _ in 0..n {
            self.step()?;
        }
        Ok(())
    }

    /// Steps completed so far.
    pub fn steps(&self) -> StepId {
        self.clock.step
    }

    /// Value of a real cell by qualified name.
    pub fn real(&self, name: &str) -> f64 {
        let store = self.topology.store();
        store
            .find_typed::<f64>(name)
            .and_then(|a| store.get(a))
            .unwrap_or_else(|e| panic!("reading {name}: {e}"))
    }
}
