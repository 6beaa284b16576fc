//! Transmission line split into two independently scheduled halves.
//!
//! Each half sits at one end of the line, between its node and ground:
//! a resistance `Z' = Z + R/4` (`Z = sqrt(L/C)`) in parallel with a
//! current source whose value is computed from the *previous-step*
//! terminal quantities of both ends. The halves exchange nothing at the
//! current step, so they land in separate subnetworks with no ordering
//! edge between them, at the price of one step of propagation delay.
//!
//! For the DC operating point the halves drop out and the line becomes
//! its series resistance between the two end nodes, so a steady-state
//! start carries the line current from step 0.

use kirch_core::{Attr, AttrSet, AttributeStore, DVector, StepId};
use kirch_task::{FnTask, Phase, SharedTask};

use crate::component::{
    require_binding, Component, ComponentKind, Layout, Port, SteadyStateLink, SystemEnv,
};
use crate::error::ComponentError;
use crate::matrix::{branch_voltage, inject_current, SystemMatrix};
use crate::solver::SystemBinding;

use super::{non_negative, positive};

/// Constructor for a pair of [`DecouplingLineHalf`]s.
#[derive(Debug)]
pub struct DecouplingLine;

impl DecouplingLine {
    /// Build both halves of a line with series resistance `r`, inductance
    /// `l` and capacitance `c`.
    ///
    /// The halves are named `<name>_k` and `<name>_m`; connect each to
    /// its own end node.
    pub fn new(
        store: &mut AttributeStore,
        name: &str,
        r: f64,
        l: f64,
        c: f64,
    ) -> Result<(DecouplingLineHalf, DecouplingLineHalf), ComponentError> {
        non_negative(name, "resistance", r)?;
        positive(name, "inductance", l)?;
        positive(name, "capacitance", c)?;

        let (k_name, m_name) = (format!("{name}_k"), format!("{name}_m"));
        let k_port = Port::create(store, &k_name)?;
        let m_port = Port::create(store, &m_name)?;
        let names = (k_name.clone(), m_name.clone());
        let k = DecouplingLineHalf::wire(store, names, r, l, c, (k_port, m_port))?;
        let m = DecouplingLineHalf::wire(store, (m_name, k_name), r, l, c, (m_port, k_port))?;
        Ok((k, m))
    }
}

/// One end of a [`DecouplingLine`].
#[derive(Debug)]
pub struct DecouplingLineHalf {
    name: String,
    counterpart: String,
    resistance: f64,
    surge: f64,
    quarter_r: f64,
    delay: f64,
    port: Port,
    remote: Port,
    i_src: Attr<f64>,
    layout: Layout,
}

impl DecouplingLineHalf {
    fn wire(
        store: &mut AttributeStore,
        (name, counterpart): (String, String),
        r: f64,
        l: f64,
        c: f64,
        (port, far): (Port, Port),
    ) -> Result<Self, ComponentError> {
        let remote = Port {
            v_intf: store.create_reference(&name, "v_remote", far.v_intf)?,
            i_intf: store.create_reference(&name, "i_remote", far.i_intf)?,
        };
        let i_src = store.create(&name, "i_src", 0.0)?;
        Ok(Self {
            name,
            counterpart,
            resistance: r,
            surge: (l / c).sqrt(),
            quarter_r: r / 4.0,
            delay: (l * c).sqrt(),
            port,
            remote,
            i_src,
            layout: Layout::default(),
        })
    }

    /// Equivalent resistance `Z + R/4`.
    pub fn equivalent_resistance(&self) -> f64 {
        self.surge + self.quarter_r
    }

    /// Surge impedance `sqrt(L/C)`.
    pub fn surge_impedance(&self) -> f64 {
        self.surge
    }

    /// Referencing cells onto the counterpart's terminal quantities.
    pub fn remote(&self) -> Port {
        self.remote
    }

    /// Source current cell.
    pub fn source_current(&self) -> Attr<f64> {
        self.i_src
    }
}

/// History source for step `k > 0`, from previous-step values of the own
/// end (`v_k`, `i_k`) and the remote end (`v_m`, `i_m`).
fn history_current(surge: f64, quarter_r: f64, own: (f64, f64), remote: (f64, f64)) -> f64 {
    let z_eq = surge + quarter_r;
    let denom = z_eq * z_eq;
    let (v_k, i_k) = own;
    let (v_m, i_m) = remote;
    -surge / denom * (v_m + (surge - quarter_r) * i_m)
        - quarter_r / denom * (v_k + (surge - quarter_r) * i_k)
}

impl Component for DecouplingLineHalf {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::DecouplingLine
    }

    fn terminal_count(&self) -> usize {
        1
    }

    fn max_dt(&self) -> Option<f64> {
        Some(self.delay)
    }

    fn attach(&mut self, layout: Layout, _env: &SystemEnv) -> Result<(), ComponentError> {
        self.layout = layout;
        Ok(())
    }

    fn stamp_matrix(&self, matrix: &mut SystemMatrix) {
        matrix.add_conductance(self.layout.terminal(0), None, 1.0 / self.equivalent_resistance());
    }

    fn stamp_steady_state(
        &self,
        _matrix: &mut SystemMatrix,
        _rhs: &mut DVector<f64>,
        _store: &AttributeStore,
    ) -> Result<(), ComponentError> {
        Ok(())
    }

    fn steady_state_link(&self) -> Option<SteadyStateLink> {
        Some(SteadyStateLink {
            counterpart: self.counterpart.clone(),
            resistance: self.resistance,
            current: self.port.i_intf,
        })
    }

    /// `i_intf` already holds the line current; the source is set so the
    /// half draws exactly that current at the DC voltage.
    fn apply_steady_state(&self, x: &DVector<f64>, store: &AttributeStore) -> Result<(), ComponentError> {
        let v = branch_voltage(x, self.layout.terminal(0), None);
        let i = store.get(self.port.i_intf)?;
        store.set(self.port.v_intf, v)?;
        store.set(self.i_src, i - v / self.equivalent_resistance())?;
        Ok(())
    }

    fn tasks(&self, binding: Option<&SystemBinding>) -> Result<Vec<SharedTask>, ComponentError> {
        let binding = require_binding(&self.name, binding)?;
        let (rhs, solution) = (binding.rhs, binding.solution);
        let a = self.layout.terminal(0);
        let (surge, quarter_r, z_eq) = (self.surge, self.quarter_r, self.equivalent_resistance());
        let (port, remote, i_src) = (self.port, self.remote, self.i_src);

        let pre = FnTask::new(self.name.clone(), Phase::PreStep)
            .reads_previous(
                AttrSet::empty()
                    .with(port.v_intf)
                    .with(port.i_intf)
                    .with(remote.v_intf)
                    .with(remote.i_intf),
            )
            .writes(AttrSet::empty().with(i_src).with(rhs))
            .body(move |ctx| {
                let own = (ctx.read_previous(port.v_intf)?, ctx.read_previous(port.i_intf)?);
                let i = if ctx.step() == StepId(0) {
                    own.1 - own.0 / z_eq
                } else {
                    let far = (ctx.read_previous(remote.v_intf)?, ctx.read_previous(remote.i_intf)?);
                    history_current(surge, quarter_r, own, far)
                };
                ctx.write(i_src, i)?;
                ctx.update(rhs, |r| inject_current(r, a, None, i))
            });

        let post = FnTask::new(self.name.clone(), Phase::PostStep)
            .reads(AttrSet::empty().with(solution).with(i_src))
            .writes(AttrSet::empty().with(port.v_intf).with(port.i_intf))
            .body(move |ctx| {
                let v = ctx.read_with(solution, |x| branch_voltage(x, a, None))?;
                let i = v / z_eq + ctx.read(i_src)?;
                ctx.write(port.v_intf, v)?;
                ctx.write(port.i_intf, i)
            });

        Ok(vec![pre.shared(), post.shared()])
    }

    fn port(&self) -> Option<Port> {
        Some(self.port)
    }
}
