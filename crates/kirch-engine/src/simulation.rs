//! The run controller.
//!
//! A [`Simulation`] owns the topology, its assembly and everything the
//! step loop touches. Its lifecycle is
//!
//! ```text
//! Idle --initialize()--> Initializing --> Running --step()/run()--> Stopped
//! ```
//!
//! One step is:
//!
//! 1. Rebuild the assembly if the topology was edited.
//! 2. Apply due scheduled events.
//! 3. Receive interface imports for this step; sample before-step exports.
//! 4. Reset additive cells, then execute the schedule layer by layer.
//! 5. Commit previous-step values.
//! 6. Send interface exports, record sinks, update metrics.
//! 7. Advance the clock; in real-time mode wait for the next deadline.
//!
//! Cancellation is checked only between steps.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use kirch_core::{Attr, AttrId, AttrType, AttributeStore, StepId};
use kirch_mna::{assemble, Assembly, SystemEnv, Topology};
use kirch_task::{Executor, PreviousFrame, StepClock};
use tracing::{debug, error, info};

use crate::config::{InitialConditions, SimulationConfig};
use crate::error::SimError;
use crate::events::{EventQueue, ScheduledEvent};
use crate::interface::{Interface, Received};
use crate::metrics::{RunMetrics, StepMetrics};
use crate::pacer::Pacer;
use crate::sink::{DataSink, Sample};

// ── Run state ──────────────────────────────────────────────────────

/// Why a run stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The final time was reached.
    Completed,
    /// The stop flag was raised.
    Cancelled,
    /// A fatal error; the message of the error returned to the caller.
    Failed(String),
}

/// Lifecycle state of a [`Simulation`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunState {
    /// Built, not yet initialised.
    Idle,
    /// Computing initial conditions.
    Initializing,
    /// Accepting steps.
    Running,
    /// Finished; no further steps.
    Stopped(StopReason),
}

/// Cooperative cancellation flag shared with other threads.
#[derive(Clone, Debug, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// Ask the run to stop at the next step boundary.
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether a stop was requested.
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

struct SinkBinding {
    sink: Box<dyn DataSink>,
    columns: Vec<(String, AttrId)>,
}

// ── Simulation ─────────────────────────────────────────────────────

/// A topology prepared for stepping.
pub struct Simulation {
    config: SimulationConfig,
    topology: Topology,
    assembly: Assembly,
    executor: Executor,
    previous: PreviousFrame,
    clock: StepClock,
    total_steps: u64,
    state: RunState,
    stale_assembly: bool,
    pacer: Option<Pacer>,
    interfaces: Vec<Interface>,
    sinks: Vec<SinkBinding>,
    events: EventQueue,
    stop: StopHandle,
    last: StepMetrics,
    metrics: RunMetrics,
}

impl Simulation {
    /// Validate `config`, assemble `topology` and build the worker pool.
    ///
    /// All structural checks happen here; the run is left `Idle`.
    pub fn new(config: SimulationConfig, mut topology: Topology) -> Result<Self, SimError> {
        config.validate()?;
        let assembly = assemble(&mut topology, &env(&config))?;
        let executor = Executor::new(config.resolved_workers())?;
        let previous = PreviousFrame::capture(topology.store(), assembly.schedule.previous_cells())?;
        let total_steps = config.total_steps();
        info!(
            name = %config.name,
            subnetworks = assembly.partition.subnetworks.len(),
            tasks = assembly.schedule.len(),
            layers = assembly.schedule.layers().len(),
            workers = executor.workers(),
            steps = total_steps,
            "simulation built"
        );
        Ok(Self {
            clock: StepClock::start(config.time_step),
            config,
            topology,
            assembly,
            executor,
            previous,
            total_steps,
            state: RunState::Idle,
            stale_assembly: false,
            pacer: None,
            interfaces: Vec::new(),
            sinks: Vec::new(),
            events: EventQueue::new(),
            stop: StopHandle::default(),
            last: StepMetrics::default(),
            metrics: RunMetrics::default(),
        })
    }

    // ── Accessors ──────────────────────────────────────────────────

    /// Run configuration.
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// The simulated network.
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Attribute cells of the network.
    pub fn store(&self) -> &AttributeStore {
        self.topology.store()
    }

    /// Current assembly.
    pub fn assembly(&self) -> &Assembly {
        &self.assembly
    }

    /// Lifecycle state.
    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Simulation time at the start of the next step.
    pub fn time(&self) -> f64 {
        self.clock.time
    }

    /// Steps executed.
    pub fn step_count(&self) -> u64 {
        self.clock.step.0
    }

    /// Steps a complete run executes.
    pub fn total_steps(&self) -> u64 {
        self.total_steps
    }

    /// Counters for the run so far.
    pub fn metrics(&self) -> &RunMetrics {
        &self.metrics
    }

    /// Timings of the last step.
    pub fn last_step(&self) -> &StepMetrics {
        &self.last
    }

    /// Flag that stops [`run`](Self::run) at the next step boundary.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    // ── Registration ───────────────────────────────────────────────

    /// Record `columns` into `sink` after every step.
    pub fn add_sink<S, I, L, A>(&mut self, sink: S, columns: I) -> Result<(), SimError>
    where
        S: DataSink + 'static,
        I: IntoIterator<Item = (L, A)>,
        L: Into<String>,
        A: Into<AttrId>,
    {
        self.require("add a sink", |s| !matches!(s, RunState::Stopped(_)))?;
        let store = self.topology.store();
        let columns = columns
            .into_iter()
            .map(|(label, attr)| {
                let id = attr.into();
                store.kind(id).map(|_| (label.into(), id))
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.sinks.push(SinkBinding {
            sink: Box::new(sink),
            columns,
        });
        Ok(())
    }

    /// Attach an external interface. Only allowed before initialisation.
    pub fn add_interface(&mut self, interface: Interface) -> Result<(), SimError> {
        self.require("add an interface", |s| matches!(s, RunState::Idle))?;
        interface.check(self.topology.store())?;
        info!(endpoint = interface.name(), imports = interface.imports().len(), "interface attached");
        self.interfaces.push(interface);
        Ok(())
    }

    /// Overwrite `attr` with `value` at the first step starting at or
    /// after `time`.
    pub fn schedule_event<T: AttrType>(&mut self, time: f64, attr: Attr<T>, value: T) -> Result<(), SimError> {
        if !time.is_finite() {
            return Err(SimError::InvalidEventTime { time });
        }
        self.topology.store().kind(attr.id())?;
        self.events.push(ScheduledEvent {
            time,
            target: attr.id(),
            value: value.into_value(),
        });
        Ok(())
    }

    /// Edit the topology between steps. The assembly is rebuilt before
    /// the next step runs.
    pub fn edit_topology<R>(&mut self, edit: impl FnOnce(&mut Topology) -> R) -> Result<R, SimError> {
        self.require("edit the topology", |s| matches!(s, RunState::Idle | RunState::Running))?;
        let out = edit(&mut self.topology);
        self.stale_assembly = true;
        Ok(out)
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Compute initial conditions and start the clock.
    pub fn initialize(&mut self) -> Result<(), SimError> {
        self.require("initialize", |s| matches!(s, RunState::Idle))?;
        self.transition(RunState::Initializing);
        if let Err(e) = self.prepare() {
            return Err(self.fail(e));
        }
        self.transition(RunState::Running);
        Ok(())
    }

    fn prepare(&mut self) -> Result<(), SimError> {
        if self.stale_assembly {
            self.reassemble()?;
        }
        if self.config.initial_conditions == InitialConditions::SteadyState {
            self.assembly.steady_state(&self.topology)?;
        }
        let store = self.topology.store();
        self.previous = PreviousFrame::capture(store, self.assembly.schedule.previous_cells())?;
        for interface in &mut self.interfaces {
            interface.open(store)?;
        }
        if self.config.realtime {
            self.pacer = Some(Pacer::new(Duration::from_secs_f64(self.config.time_step)));
        }
        Ok(())
    }

    /// Execute one step and return its index.
    pub fn step(&mut self) -> Result<StepId, SimError> {
        self.require("step", |s| matches!(s, RunState::Running))?;
        match self.advance() {
            Ok(step) => Ok(step),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Initialise if needed, then step until the final time or a stop
    /// request.
    pub fn run(&mut self) -> Result<RunMetrics, SimError> {
        if self.state == RunState::Idle {
            self.initialize()?;
        }
        self.require("run", |s| matches!(s, RunState::Running))?;
        while self.state == RunState::Running {
            if self.stop.is_stopped() {
                self.finish(StopReason::Cancelled);
                break;
            }
            self.step()?;
        }
        Ok(self.metrics.clone())
    }

    fn advance(&mut self) -> Result<StepId, SimError> {
        if self.stale_assembly {
            self.reassemble()?;
        }
        let began = Instant::now();
        let clock = self.clock;
        let step = clock.step;
        let store = self.topology.store();

        for event in self.events.due(clock.time, clock.dt) {
            debug!(step = step.0, target = store.name(event.target).unwrap_or("?"), "event fired");
            store.set_value(event.target, event.value)?;
            self.metrics.events_fired += 1;
        }

        let sync_began = Instant::now();
        for interface in &mut self.interfaces {
            if interface.receive(store, step)? == Received::Held {
                self.metrics.stale_imports += 1;
            }
            interface.capture_before(store)?;
        }
        let mut sync = sync_began.elapsed();

        store.reset_additive();
        let report = self
            .executor
            .run(&self.assembly.schedule, store, &self.previous, clock)?;
        self.previous.commit(store)?;

        let sync_began = Instant::now();
        for interface in &mut self.interfaces {
            interface.send(store, step)?;
        }
        sync += sync_began.elapsed();

        for binding in &mut self.sinks {
            let values = binding
                .columns
                .iter()
                .map(|(label, id)| store.get_value(*id).map(|v| (label.clone(), v)))
                .collect::<Result<Vec<_>, _>>()?;
            binding.sink.record(&Sample {
                step,
                time: clock.time,
                values,
            });
        }

        let schedule = &self.assembly.schedule;
        self.last = StepMetrics {
            step: step.0,
            total_us: micros(began.elapsed()),
            execute_us: micros(report.total),
            sync_us: micros(sync),
            task_us: report
                .task_times
                .iter()
                .enumerate()
                .map(|(i, d)| (schedule.label(i).to_string(), micros(*d)))
                .collect(),
        };
        self.metrics.record_step(&self.last);
        self.metrics.refactorizations = self.assembly.refactorizations();

        let next = step.next();
        self.clock = StepClock {
            step: next,
            time: next.0 as f64 * clock.dt,
            dt: clock.dt,
        };
        if let Some(pacer) = &mut self.pacer {
            if pacer.finish_step(step).is_some() {
                self.metrics.timing_violations += 1;
            }
        }
        if next.0 >= self.total_steps {
            self.finish(StopReason::Completed);
        }
        Ok(step)
    }

    fn reassemble(&mut self) -> Result<(), SimError> {
        self.assembly = assemble(&mut self.topology, &env(&self.config))?;
        self.previous = PreviousFrame::capture(self.topology.store(), self.assembly.schedule.previous_cells())?;
        self.stale_assembly = false;
        info!(
            step = self.clock.step.0,
            tasks = self.assembly.schedule.len(),
            layers = self.assembly.schedule.layers().len(),
            "schedule rebuilt"
        );
        Ok(())
    }

    fn require(&self, operation: &'static str, allowed: impl Fn(&RunState) -> bool) -> Result<(), SimError> {
        if allowed(&self.state) {
            Ok(())
        } else {
            Err(SimError::InvalidState {
                operation,
                state: self.state.clone(),
            })
        }
    }

    fn transition(&mut self, next: RunState) {
        info!(name = %self.config.name, from = ?self.state, to = ?next, "run state");
        self.state = next;
    }

    fn finish(&mut self, reason: StopReason) {
        for binding in &mut self.sinks {
            binding.sink.finish();
        }
        self.transition(RunState::Stopped(reason));
    }

    fn fail(&mut self, e: SimError) -> SimError {
        error!(name = %self.config.name, step = self.clock.step.0, error = %e, "run stopped");
        self.finish(StopReason::Failed(e.to_string()));
        e
    }
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("name", &self.config.name)
            .field("state", &self.state)
            .field("step", &self.clock.step)
            .field("tasks", &self.assembly.schedule.len())
            .finish()
    }
}

fn env(config: &SimulationConfig) -> SystemEnv {
    SystemEnv {
        dt: config.time_step,
        frequency: config.frequency,
    }
}

fn micros(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}
