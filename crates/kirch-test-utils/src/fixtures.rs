//! Reusable circuits and recording tasks.
//!
//! - [`source_resistor`]: DC voltage source across a resistor.
//! - [`rl_current_source`]: current source into a series R-L branch,
//!   optionally with a bleeder resistor across the source.
//! - [`decoupled_pair`]: two subnetworks joined by a decoupling line.
//! - [`Recorder`]: records a real cell once per step.

use std::sync::{Arc, Mutex};

use kirch_core::{Attr, AttrSet, TaskError};
use kirch_mna::components::{CurrentSource, DecouplingLine, Inductor, Resistor, VoltageSource};
use kirch_mna::{ComponentError, Topology, TopologyError, GROUND};
use kirch_task::{Phase, SharedTask, Task, TaskContext};
use thiserror::Error;

/// Fixture construction failure.
#[derive(Debug, Error)]
pub enum FixtureError {
    /// A component rejected its parameters.
    #[error(transparent)]
    Component(#[from] ComponentError),
    /// The circuit could not be wired.
    #[error(transparent)]
    Topology(#[from] TopologyError),
}

/// `vs` (DC, `volts`) from `n1` to ground, `r` (`ohms`) from `n1` to
/// ground.
pub fn source_resistor(volts: f64, ohms: f64) -> Result<Topology, FixtureError> {
    let mut t = Topology::new();
    let n1 = t.add_node("n1")?;
    let vs = VoltageSource::dc(t.store_mut(), "vs", volts)?;
    let r = Resistor::new(t.store_mut(), "r", ohms)?;
    t.add_component(vs, &[n1, GROUND])?;
    t.add_component(r, &[n1, GROUND])?;
    Ok(t)
}

/// `cs` (DC, `amps`) from ground into `n1`, `r` from `n1` to `n2`, `l`
/// from `n2` to ground, and with `bleeder = Some(rb)` a resistor `rb`
/// from `n1` to ground.
pub fn rl_current_source(
    amps: f64,
    r: f64,
    l: f64,
    bleeder: Option<f64>,
) -> Result<Topology, FixtureError> {
    let mut t = Topology::new();
    let n1 = t.add_node("n1")?;
    let n2 = t.add_node("n2")?;
    let cs = CurrentSource::dc(t.store_mut(), "cs", amps)?;
    let res = Resistor::new(t.store_mut(), "r", r)?;
    let ind = Inductor::new(t.store_mut(), "l", l)?;
    t.add_component(cs, &[GROUND, n1])?;
    t.add_component(res, &[n1, n2])?;
    t.add_component(ind, &[n2, GROUND])?;
    if let Some(rb) = bleeder {
        let b = Resistor::new(t.store_mut(), "rb", rb)?;
        t.add_component(b, &[n1, GROUND])?;
    }
    Ok(t)
}

/// Source side `vs -> rs -> k`, line `dl` between `k` and `m`, load `rl`
/// from `m` to ground. Two subnetworks: `{a, k}` and `{m}`.
pub fn decoupled_pair(volts: f64, line: (f64, f64, f64), load: f64) -> Result<Topology, FixtureError> {
    let mut t = Topology::new();
    let a = t.add_node("a")?;
    let k = t.add_node("k")?;
    let m = t.add_node("m")?;
    let vs = VoltageSource::dc(t.store_mut(), "vs", volts)?;
    let rs = Resistor::new(t.store_mut(), "rs", 1.0)?;
    let (r, l, c) = line;
    let (half_k, half_m) = DecouplingLine::new(t.store_mut(), "dl", r, l, c)?;
    let rl = Resistor::new(t.store_mut(), "rl", load)?;
    t.add_component(vs, &[a, GROUND])?;
    t.add_component(rs, &[a, k])?;
    t.add_component(half_k, &[k])?;
    t.add_component(half_m, &[m])?;
    t.add_component(rl, &[m, GROUND])?;
    Ok(t)
}

/// Task recording the current-step value of one real cell.
pub struct Recorder {
    owner: String,
    cell: Attr<f64>,
    seen: Arc<Mutex<Vec<f64>>>,
}

impl Recorder {
    /// Record `cell`; `owner` must be unique in the schedule.
    pub fn new(owner: &str, cell: Attr<f64>) -> Self {
        Self {
            owner: owner.to_string(),
            cell,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared handle to the recorded values.
    pub fn values(&self) -> Arc<Mutex<Vec<f64>>> {
        Arc::clone(&self.seen)
    }

    /// Wrap as a schedulable task.
    pub fn shared(self) -> SharedTask {
        Arc::new(self)
    }
}

impl Task for Recorder {
    fn owner(&self) -> &str {
        &self.owner
    }

    fn phase(&self) -> Phase {
        Phase::PostStep
    }

    fn reads(&self) -> AttrSet {
        AttrSet::empty().with(self.cell)
    }

    fn writes(&self) -> AttrSet {
        AttrSet::empty()
    }

    fn execute(&self, ctx: &TaskContext<'_>) -> Result<(), TaskError> {
        let v = ctx.read(self.cell)?;
        self.seen
            .lock()
            .map_err(|_| TaskError::ExecutionFailed {
                reason: "recorder lock poisoned".to_string(),
            })?
            .push(v);
        Ok(())
    }
}
