use kirch_core::{AttrSet, AttributeStore, DVector};
use kirch_task::{FnTask, Phase, SharedTask};

use crate::component::{require_binding, Component, ComponentKind, Layout, Port, SystemEnv};
use crate::composite::{CompositionPolicy, SubComponents, TerminalMap};
use crate::error::ComponentError;
use crate::matrix::{branch_voltage, SystemMatrix, VariableStamp};
use crate::solver::SystemBinding;

use super::{Capacitor, Inductor, Resistor};

/// Lumped pi-section line between terminals `[a, b]`.
///
/// Series `R` from `a` to an internal node, series `L` from there to
/// `b`, and `C/2` from each end to ground. `i_intf` aliases the series
/// inductor current.
#[derive(Debug)]
pub struct PiLine {
    name: String,
    subs: SubComponents,
    port: Port,
    layout: Layout,
}

impl PiLine {
    /// Line with series resistance `r`, series inductance `l` and total
    /// shunt capacitance `c`.
    pub fn new(store: &mut AttributeStore, name: &str, r: f64, l: f64, c: f64) -> Result<Self, ComponentError> {
        let mut subs = SubComponents::new(name);
        let series_r = Resistor::new(store, &subs.child_name("r"), r)?;
        let series_l = Inductor::new(store, &subs.child_name("l"), l)?;
        let shunt_a = Capacitor::new(store, &subs.child_name("c_a"), c / 2.0)?;
        let shunt_b = Capacitor::new(store, &subs.child_name("c_b"), c / 2.0)?;

        let series_current = series_l
            .port()
            .ok_or_else(|| ComponentError::NotAttached(series_l.name().to_string()))?
            .i_intf;
        let port = Port {
            v_intf: store.create(name, "v_intf", 0.0)?,
            i_intf: store.create_reference(name, "i_intf", series_current)?,
        };

        use TerminalMap::{Ground, Internal, Parent};
        let policy = CompositionPolicy::INDEPENDENT;
        subs.register(series_r, vec![Parent(0), Internal(0)], policy)?;
        subs.register(series_l, vec![Internal(0), Parent(1)], policy)?;
        subs.register(shunt_a, vec![Parent(0), Ground], policy)?;
        subs.register(shunt_b, vec![Parent(1), Ground], policy)?;

        Ok(Self {
            name: name.to_string(),
            subs,
            port,
            layout: Layout::default(),
        })
    }

    /// Registered sub-components.
    pub fn sub_components(&self) -> &SubComponents {
        &self.subs
    }
}

impl Component for PiLine {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::PiLine
    }

    fn terminal_count(&self) -> usize {
        2
    }

    fn internal_nodes(&self) -> usize {
        1 + self.subs.internal_nodes()
    }

    fn extra_unknowns(&self) -> usize {
        self.subs.extra_unknowns()
    }

    fn max_dt(&self) -> Option<f64> {
        self.subs.max_dt()
    }

    fn attach(&mut self, layout: Layout, env: &SystemEnv) -> Result<(), ComponentError> {
        self.subs.attach(&layout, 1, env)?;
        self.layout = layout;
        Ok(())
    }

    fn stamp_matrix(&self, matrix: &mut SystemMatrix) {
        self.subs.stamp_matrix(matrix);
    }

    fn variable_stamps(&self) -> Vec<VariableStamp> {
        self.subs.variable_stamps()
    }

    fn stamp_steady_state(
        &self,
        matrix: &mut SystemMatrix,
        rhs: &mut DVector<f64>,
        store: &AttributeStore,
    ) -> Result<(), ComponentError> {
        self.subs.stamp_steady_state(matrix, rhs, store)
    }

    fn apply_steady_state(&self, x: &DVector<f64>, store: &AttributeStore) -> Result<(), ComponentError> {
        self.subs.apply_steady_state(x, store)?;
        store.set(
            self.port.v_intf,
            branch_voltage(x, self.layout.terminal(0), self.layout.terminal(1)),
        )?;
        Ok(())
    }

    fn tasks(&self, binding: Option<&SystemBinding>) -> Result<Vec<SharedTask>, ComponentError> {
        let solution = require_binding(&self.name, binding)?.solution;
        let (a, b) = (self.layout.terminal(0), self.layout.terminal(1));
        let v_intf = self.port.v_intf;
        let own = FnTask::new(self.name.clone(), Phase::PostStep)
            .reads(AttrSet::empty().with(solution))
            .writes(AttrSet::empty().with(v_intf))
            .body(move |ctx| {
                let v = ctx.read_with(solution, |x| branch_voltage(x, a, b))?;
                ctx.write(v_intf, v)
            });
        self.subs.materialize(vec![own.shared()], binding)
    }

    fn port(&self) -> Option<Port> {
        Some(self.port)
    }
}
