use kirch_core::{Attr, AttrSet, AttributeStore, DVector};
use kirch_task::{FnTask, Phase, SharedTask};

use crate::component::{require_binding, Component, ComponentKind, Layout, Port, SystemEnv};
use crate::error::ComponentError;
use crate::matrix::{branch_voltage, Stamp, VariableStamp};
use crate::solver::SystemBinding;

use super::positive;

/// Two-state resistive switch between terminals `[a, b]`.
///
/// The `closed` cell selects between the open and closed resistance.
/// Flipping it between steps makes the solver pick (or compute) the
/// matching factorisation.
#[derive(Debug)]
pub struct Switch {
    name: String,
    r_open: f64,
    r_closed: f64,
    closed: Attr<bool>,
    port: Port,
    layout: Layout,
}

impl Switch {
    /// Switch with the given resistances and initial state.
    pub fn new(
        store: &mut AttributeStore,
        name: &str,
        r_open: f64,
        r_closed: f64,
        closed: bool,
    ) -> Result<Self, ComponentError> {
        positive(name, "r_open", r_open)?;
        positive(name, "r_closed", r_closed)?;
        if r_closed >= r_open {
            return Err(ComponentError::InvalidParameter {
                component: name.to_string(),
                parameter: "r_closed".to_string(),
                reason: format!("must be below r_open ({r_open}), got {r_closed}"),
            });
        }
        Ok(Self {
            name: name.to_string(),
            r_open,
            r_closed,
            closed: store.create(name, "closed", closed)?,
            port: Port::create(store, name)?,
            layout: Layout::default(),
        })
    }

    /// State cell; `true` is closed.
    pub fn state(&self) -> Attr<bool> {
        self.closed
    }

    fn resistance(&self, closed: bool) -> f64 {
        if closed {
            self.r_closed
        } else {
            self.r_open
        }
    }
}

impl Component for Switch {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Switch
    }

    fn terminal_count(&self) -> usize {
        2
    }

    fn attach(&mut self, layout: Layout, _env: &SystemEnv) -> Result<(), ComponentError> {
        self.layout = layout;
        Ok(())
    }

    fn variable_stamps(&self) -> Vec<VariableStamp> {
        let (a, b) = (self.layout.terminal(0), self.layout.terminal(1));
        vec![VariableStamp {
            state: self.closed,
            open: Stamp::conductance(a, b, 1.0 / self.r_open),
            closed: Stamp::conductance(a, b, 1.0 / self.r_closed),
        }]
    }

    fn apply_steady_state(&self, x: &DVector<f64>, store: &AttributeStore) -> Result<(), ComponentError> {
        let v = branch_voltage(x, self.layout.terminal(0), self.layout.terminal(1));
        let r = self.resistance(store.get(self.closed)?);
        store.set(self.port.v_intf, v)?;
        store.set(self.port.i_intf, v / r)?;
        Ok(())
    }

    fn tasks(&self, binding: Option<&SystemBinding>) -> Result<Vec<SharedTask>, ComponentError> {
        let solution = require_binding(&self.name, binding)?.solution;
        let (a, b) = (self.layout.terminal(0), self.layout.terminal(1));
        let (r_open, r_closed, closed, port) = (self.r_open, self.r_closed, self.closed, self.port);
        let post = FnTask::new(self.name.clone(), Phase::PostStep)
            .reads(AttrSet::empty().with(solution).with(closed))
            .writes(AttrSet::empty().with(port.v_intf).with(port.i_intf))
            .body(move |ctx| {
                let v = ctx.read_with(solution, |x| branch_voltage(x, a, b))?;
                let r = if ctx.read(closed)? { r_closed } else { r_open };
                ctx.write(port.v_intf, v)?;
                ctx.write(port.i_intf, v / r)
            });
        Ok(vec![post.shared()])
    }

    fn port(&self) -> Option<Port> {
        Some(self.port)
    }
}
