use kirch_core::{Attr, AttrSet, AttributeStore, Complex64, DVector};
use kirch_task::{FnTask, Phase, SharedTask};

use crate::component::{require_binding, Component, ComponentKind, Layout, Port, SystemEnv};
use crate::error::ComponentError;
use crate::matrix::{branch_voltage, inject_current, SystemMatrix};
use crate::solver::SystemBinding;

use super::{instantaneous, non_negative};

/// Ideal current source carrying `Re(I e^{j 2 pi f t})` from `a` to `b`
/// through itself: the current is drawn out of node `a` and delivered
/// into node `b`.
#[derive(Debug)]
pub struct CurrentSource {
    name: String,
    frequency: f64,
    i_ref: Attr<Complex64>,
    port: Port,
    layout: Layout,
}

impl CurrentSource {
    /// Source with phasor `i_ref` at `frequency` hertz.
    pub fn new(
        store: &mut AttributeStore,
        name: &str,
        i_ref: Complex64,
        frequency: f64,
    ) -> Result<Self, ComponentError> {
        non_negative(name, "frequency", frequency)?;
        Ok(Self {
            name: name.to_string(),
            frequency,
            i_ref: store.create(name, "i_ref", i_ref)?,
            port: Port::create(store, name)?,
            layout: Layout::default(),
        })
    }

    /// DC source of `amperes`.
    pub fn dc(store: &mut AttributeStore, name: &str, amperes: f64) -> Result<Self, ComponentError> {
        Self::new(store, name, Complex64::new(amperes, 0.0), 0.0)
    }

    /// Phasor reference cell.
    pub fn i_ref(&self) -> Attr<Complex64> {
        self.i_ref
    }
}

impl Component for CurrentSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::CurrentSource
    }

    fn terminal_count(&self) -> usize {
        2
    }

    fn attach(&mut self, layout: Layout, _env: &SystemEnv) -> Result<(), ComponentError> {
        self.layout = layout;
        Ok(())
    }

    fn stamp_steady_state(
        &self,
        _matrix: &mut SystemMatrix,
        rhs: &mut DVector<f64>,
        store: &AttributeStore,
    ) -> Result<(), ComponentError> {
        let i = instantaneous(store.get(self.i_ref)?, self.frequency, 0.0);
        inject_current(rhs, self.layout.terminal(0), self.layout.terminal(1), i);
        Ok(())
    }

    fn apply_steady_state(&self, x: &DVector<f64>, store: &AttributeStore) -> Result<(), ComponentError> {
        let i = instantaneous(store.get(self.i_ref)?, self.frequency, 0.0);
        store.set(
            self.port.v_intf,
            branch_voltage(x, self.layout.terminal(0), self.layout.terminal(1)),
        )?;
        store.set(self.port.i_intf, i)?;
        Ok(())
    }

    fn tasks(&self, binding: Option<&SystemBinding>) -> Result<Vec<SharedTask>, ComponentError> {
        let binding = require_binding(&self.name, binding)?;
        let (rhs, solution) = (binding.rhs, binding.solution);
        let (a, b) = (self.layout.terminal(0), self.layout.terminal(1));
        let (i_ref, f, port) = (self.i_ref, self.frequency, self.port);

        let pre = FnTask::new(self.name.clone(), Phase::PreStep)
            .reads(AttrSet::empty().with(i_ref))
            .writes(AttrSet::empty().with(rhs).with(port.i_intf))
            .body(move |ctx| {
                let i = instantaneous(ctx.read(i_ref)?, f, ctx.time());
                ctx.update(rhs, |r| inject_current(r, a, b, i))?;
                ctx.write(port.i_intf, i)
            });

        let post = FnTask::new(self.name.clone(), Phase::PostStep)
            .reads(AttrSet::empty().with(solution))
            .writes(AttrSet::empty().with(port.v_intf))
            .body(move |ctx| {
                let v = ctx.read_with(solution, |x| branch_voltage(x, a, b))?;
                ctx.write(port.v_intf, v)
            });

        Ok(vec![pre.shared(), post.shared()])
    }

    fn port(&self) -> Option<Port> {
        Some(self.port)
    }
}
