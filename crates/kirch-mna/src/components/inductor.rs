use kirch_core::{Attr, AttrSet, AttributeStore, DVector};
use kirch_task::{FnTask, Phase, SharedTask};

use crate::component::{require_binding, Component, ComponentKind, Layout, Port, SystemEnv};
use crate::error::ComponentError;
use crate::matrix::{branch_voltage, inject_current, SystemMatrix};
use crate::solver::SystemBinding;

use super::{positive, DC_SHORT};

/// Linear inductor between terminals `[a, b]`.
///
/// Trapezoidal companion model: a conductance `G = dt / 2L` in parallel
/// with a history current `I_h = i(n-1) + G v(n-1)`, so that
/// `i(n) = G v(n) + I_h`.
#[derive(Debug)]
pub struct Inductor {
    name: String,
    inductance: f64,
    port: Port,
    history: Attr<f64>,
    layout: Layout,
    conductance: f64,
}

impl Inductor {
    /// Inductor of `inductance` henries.
    pub fn new(store: &mut AttributeStore, name: &str, inductance: f64) -> Result<Self, ComponentError> {
        positive(name, "inductance", inductance)?;
        Ok(Self {
            name: name.to_string(),
            inductance,
            port: Port::create(store, name)?,
            history: store.create(name, "i_hist", 0.0)?,
            layout: Layout::default(),
            conductance: 0.0,
        })
    }

    /// Inductance in henries.
    pub fn inductance(&self) -> f64 {
        self.inductance
    }

    /// History current cell.
    pub fn history(&self) -> Attr<f64> {
        self.history
    }
}

impl Component for Inductor {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Inductor
    }

    fn terminal_count(&self) -> usize {
        2
    }

    fn attach(&mut self, layout: Layout, env: &SystemEnv) -> Result<(), ComponentError> {
        self.layout = layout;
        self.conductance = env.dt / (2.0 * self.inductance);
        Ok(())
    }

    fn stamp_matrix(&self, matrix: &mut SystemMatrix) {
        matrix.add_conductance(self.layout.terminal(0), self.layout.terminal(1), self.conductance);
    }

    fn stamp_steady_state(
        &self,
        matrix: &mut SystemMatrix,
        _rhs: &mut DVector<f64>,
        _store: &AttributeStore,
    ) -> Result<(), ComponentError> {
        matrix.add_conductance(self.layout.terminal(0), self.layout.terminal(1), DC_SHORT);
        Ok(())
    }

    fn apply_steady_state(&self, x: &DVector<f64>, store: &AttributeStore) -> Result<(), ComponentError> {
        let v = branch_voltage(x, self.layout.terminal(0), self.layout.terminal(1));
        store.set(self.port.v_intf, v)?;
        store.set(self.port.i_intf, DC_SHORT * v)?;
        Ok(())
    }

    fn tasks(&self, binding: Option<&SystemBinding>) -> Result<Vec<SharedTask>, ComponentError> {
        let binding = require_binding(&self.name, binding)?;
        let (rhs, solution) = (binding.rhs, binding.solution);
        let (a, b) = (self.layout.terminal(0), self.layout.terminal(1));
        let (g, port, history) = (self.conductance, self.port, self.history);

        let pre = FnTask::new(self.name.clone(), Phase::PreStep)
            .reads_previous(AttrSet::empty().with(port.v_intf).with(port.i_intf))
            .writes(AttrSet::empty().with(history).with(rhs))
            .body(move |ctx| {
                let i_h = ctx.read_previous(port.i_intf)? + g * ctx.read_previous(port.v_intf)?;
                ctx.write(history, i_h)?;
                ctx.update(rhs, |r| inject_current(r, a, b, i_h))
            });

        let post = FnTask::new(self.name.clone(), Phase::PostStep)
            .reads(AttrSet::empty().with(solution).with(history))
            .writes(AttrSet::empty().with(port.v_intf).with(port.i_intf))
            .body(move |ctx| {
                let v = ctx.read_with(solution, |x| branch_voltage(x, a, b))?;
                let i_h = ctx.read(history)?;
                ctx.write(port.v_intf, v)?;
                ctx.write(port.i_intf, g * v + i_h)
            });

        Ok(vec![pre.shared(), post.shared()])
    }

    fn port(&self) -> Option<Port> {
        Some(self.port)
    }
}
