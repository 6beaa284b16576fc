use kirch_core::{Attr, AttrSet, AttributeStore, DVector};
use kirch_task::{FnTask, Phase, SharedTask};

use crate::component::{require_binding, Component, ComponentKind, Layout, Port, SystemEnv};
use crate::error::ComponentError;
use crate::matrix::{branch_voltage, inject_current, SystemMatrix};
use crate::solver::SystemBinding;

use super::{positive, DC_OPEN};

/// Linear capacitor between terminals `[a, b]`.
///
/// Trapezoidal companion model: `G = 2C / dt`,
/// `I_h = G v(n-1) + i(n-1)`, `i(n) = G v(n) - I_h`.
#[derive(Debug)]
pub struct Capacitor {
    name: String,
    capacitance: f64,
    port: Port,
    history: Attr<f64>,
    layout: Layout,
    conductance: f64,
}

impl Capacitor {
    /// Capacitor of `capacitance` farads.
    pub fn new(store: &mut AttributeStore, name: &str, capacitance: f64) -> Result<Self, ComponentError> {
        positive(name, "capacitance", capacitance)?;
        Ok(Self {
            name: name.to_string(),
            capacitance,
            port: Port::create(store, name)?,
            history: store.create(name, "i_hist", 0.0)?,
            layout: Layout::default(),
            conductance: 0.0,
        })
    }

    /// Capacitance in farads.
    pub fn capacitance(&self) -> f64 {
        self.capacitance
    }
}

impl Component for Capacitor {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Capacitor
    }

    fn terminal_count(&self) -> usize {
        2
    }

    fn attach(&mut self, layout: Layout, env: &SystemEnv) -> Result<(), ComponentError> {
        self.layout = layout;
        self.conductance = 2.0 * self.capacitance / env.dt;
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
        matrix.add_conductance(self.layout.terminal(0), self.layout.terminal(1), DC_OPEN);
        Ok(())
    }

    fn apply_steady_state(&self, x: &DVector<f64>, store: &AttributeStore) -> Result<(), ComponentError> {
        let v = branch_voltage(x, self.layout.terminal(0), self.layout.terminal(1));
        store.set(self.port.v_intf, v)?;
        store.set(self.port.i_intf, 0.0)?;
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
                let i_h = g * ctx.read_previous(port.v_intf)? + ctx.read_previous(port.i_intf)?;
                ctx.write(history, i_h)?;
                // The history source pushes current into `a`.
                ctx.update(rhs, |r| inject_current(r, a, b, -i_h))
            });

        let post = FnTask::new(self.name.clone(), Phase::PostStep)
            .reads(AttrSet::empty().with(solution).with(history))
            .writes(AttrSet::empty().with(port.v_intf).with(port.i_intf))
            .body(move |ctx| {
                let v = ctx.read_with(solution, |x| branch_voltage(x, a, b))?;
                let i_h = ctx.read(history)?;
                ctx.write(port.v_intf, v)?;
                ctx.write(port.i_intf, g * v - i_h)
            });

        Ok(vec![pre.shared(), post.shared()])
    }

    fn port(&self) -> Option<Port> {
        Some(self.port)
    }
}
