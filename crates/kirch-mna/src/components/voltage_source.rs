use kirch_core::{Attr, AttrSet, AttributeStore, Complex64, DVector};
use kirch_task::{FnTask, Phase, SharedTask};

use crate::component::{require_binding, Component, ComponentKind, Layout, Port, SystemEnv};
use crate::error::ComponentError;
use crate::matrix::{branch_voltage, SystemMatrix};
use crate::solver::SystemBinding;

use super::{instantaneous, non_negative};

/// Ideal voltage source between terminals `[a, b]`.
///
/// The reference is a complex phasor cell; the source imposes
/// `v(a) - v(b) = Re(V e^{j 2 pi f t})`, a DC value when `f = 0`. Its
/// branch current is an extra unknown of the system.
#[derive(Debug)]
pub struct VoltageSource {
    name: String,
    frequency: f64,
    v_ref: Attr<Complex64>,
    port: Port,
    layout: Layout,
}

impl VoltageSource {
    /// Source with phasor `v_ref` at `frequency` hertz.
    pub fn new(
        store: &mut AttributeStore,
        name: &str,
        v_ref: Complex64,
        frequency: f64,
    ) -> Result<Self, ComponentError> {
        non_negative(name, "frequency", frequency)?;
        Ok(Self {
            name: name.to_string(),
            frequency,
            v_ref: store.create(name, "v_ref", v_ref)?,
            port: Port::create(store, name)?,
            layout: Layout::default(),
        })
    }

    /// DC source of `volts`.
    pub fn dc(store: &mut AttributeStore, name: &str, volts: f64) -> Result<Self, ComponentError> {
        Self::new(store, name, Complex64::new(volts, 0.0), 0.0)
    }

    /// Phasor reference cell.
    pub fn v_ref(&self) -> Attr<Complex64> {
        self.v_ref
    }

    /// Source frequency in hertz.
    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    fn branch(&self) -> Option<usize> {
        self.layout.extras.first().copied()
    }
}

impl Component for VoltageSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::VoltageSource
    }

    fn terminal_count(&self) -> usize {
        2
    }

    fn extra_unknowns(&self) -> usize {
        1
    }

    fn attach(&mut self, layout: Layout, _env: &SystemEnv) -> Result<(), ComponentError> {
        self.layout = layout;
        Ok(())
    }

    fn stamp_matrix(&self, matrix: &mut SystemMatrix) {
        if let Some(k) = self.branch() {
            matrix.add_voltage_branch(self.layout.terminal(0), self.layout.terminal(1), k);
        }
    }

    fn stamp_steady_state(
        &self,
        matrix: &mut SystemMatrix,
        rhs: &mut DVector<f64>,
        store: &AttributeStore,
    ) -> Result<(), ComponentError> {
        self.stamp_matrix(matrix);
        let k = self.branch().ok_or_else(|| ComponentError::NotAttached(self.name.clone()))?;
        rhs[k] += instantaneous(store.get(self.v_ref)?, self.frequency, 0.0);
        Ok(())
    }

    fn apply_steady_state(&self, x: &DVector<f64>, store: &AttributeStore) -> Result<(), ComponentError> {
        let k = self.branch().ok_or_else(|| ComponentError::NotAttached(self.name.clone()))?;
        store.set(
            self.port.v_intf,
            branch_voltage(x, self.layout.terminal(0), self.layout.terminal(1)),
        )?;
        store.set(self.port.i_intf, x[k])?;
        Ok(())
    }

    fn tasks(&self, binding: Option<&SystemBinding>) -> Result<Vec<SharedTask>, ComponentError> {
        let binding = require_binding(&self.name, binding)?;
        let (rhs, solution) = (binding.rhs, binding.solution);
        let k = self.branch().ok_or_else(|| ComponentError::NotAttached(self.name.clone()))?;
        let (v_ref, f, port) = (self.v_ref, self.frequency, self.port);

        let pre = FnTask::new(self.name.clone(), Phase::PreStep)
            .reads(AttrSet::empty().with(v_ref))
            .writes(AttrSet::empty().with(rhs).with(port.v_intf))
            .body(move |ctx| {
                let v = instantaneous(ctx.read(v_ref)?, f, ctx.time());
                ctx.update(rhs, |r| r[k] += v)?;
                ctx.write(port.v_intf, v)
            });

        // The branch unknown is the current entering the source at `a`.
        let post = FnTask::new(self.name.clone(), Phase::PostStep)
            .reads(AttrSet::empty().with(solution))
            .writes(AttrSet::empty().with(port.i_intf))
            .body(move |ctx| {
                let i = ctx.read_with(solution, |x| x[k])?;
                ctx.write(port.i_intf, i)
            });

        Ok(vec![pre.shared(), post.shared()])
    }

    fn port(&self) -> Option<Port> {
        Some(self.port)
    }
}
