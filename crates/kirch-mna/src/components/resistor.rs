use kirch_core::{AttrSet, AttributeStore, DVector};
use kirch_task::{FnTask, Phase, SharedTask};

use crate::component::{require_binding, Component, ComponentKind, Layout, Port, SystemEnv};
use crate::error::ComponentError;
use crate::matrix::{branch_voltage, SystemMatrix};
use crate::solver::SystemBinding;

use super::positive;

/// Linear resistor between terminals `[a, b]`.
#[derive(Debug)]
pub struct Resistor {
    name: String,
    resistance: f64,
    port: Port,
    layout: Layout,
}

impl Resistor {
    /// Resistor of `resistance` ohms.
    pub fn new(store: &mut AttributeStore, name: &str, resistance: f64) -> Result<Self, ComponentError> {
        positive(name, "resistance", resistance)?;
        Ok(Self {
            name: name.to_string(),
            resistance,
            port: Port::create(store, name)?,
            layout: Layout::default(),
        })
    }

    /// Resistance in ohms.
    pub fn resistance(&self) -> f64 {
        self.resistance
    }

    fn update_port(&self, x: &DVector<f64>, store: &AttributeStore) -> Result<(), ComponentError> {
        let v = branch_voltage(x, self.layout.terminal(0), self.layout.terminal(1));
        store.set(self.port.v_intf, v)?;
        store.set(self.port.i_intf, v / self.resistance)?;
        Ok(())
    }
}

impl Component for Resistor {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Resistor
    }

    fn terminal_count(&self) -> usize {
        2
    }

    fn attach(&mut self, layout: Layout, _env: &SystemEnv) -> Result<(), ComponentError> {
        self.layout = layout;
        Ok(())
    }

    fn stamp_matrix(&self, matrix: &mut SystemMatrix) {
        matrix.add_conductance(
            self.layout.terminal(0),
            self.layout.terminal(1),
            1.0 / self.resistance,
        );
    }

    fn apply_steady_state(&self, x: &DVector<f64>, store: &AttributeStore) -> Result<(), ComponentError> {
        self.update_port(x, store)
    }

    fn tasks(&self, binding: Option<&SystemBinding>) -> Result<Vec<SharedTask>, ComponentError> {
        let solution = require_binding(&self.name, binding)?.solution;
        let (a, b) = (self.layout.terminal(0), self.layout.terminal(1));
        let (r, port) = (self.resistance, self.port);
        let post = FnTask::new(self.name.clone(), Phase::PostStep)
            .reads(AttrSet::empty().with(solution))
            .writes(AttrSet::empty().with(port.v_intf).with(port.i_intf))
            .body(move |ctx| {
                let v = ctx.read_with(solution, |x| branch_voltage(x, a, b))?;
                ctx.write(port.v_intf, v)?;
                ctx.write(port.i_intf, v / r)
            });
        Ok(vec![post.shared()])
    }

    fn port(&self) -> Option<Port> {
        Some(self.port)
    }
}
