use kirch_core::{Attr, AttrSet, AttributeStore, Complex64, DVector};
use kirch_task::{FnTask, Phase, SharedTask};

use crate::component::{Component, ComponentKind, Layout, Port, SystemEnv};
use crate::composite::{CompositionPolicy, SubComponents, TerminalMap};
use crate::error::ComponentError;
use crate::matrix::{SystemMatrix, VariableStamp};
use crate::solver::SystemBinding;

use super::VoltageSource;

/// DC voltage source whose value is `gain * setpoint`, both cells.
///
/// The inner source's pre-step is embedded: the parent task writes the
/// source reference, then runs the source's own pre-step inline, so the
/// new value is stamped in the same step.
#[derive(Debug)]
pub struct ControlledVoltageSource {
    name: String,
    setpoint: Attr<f64>,
    gain: Attr<f64>,
    v_ref: Attr<Complex64>,
    subs: SubComponents,
    port: Port,
}

impl ControlledVoltageSource {
    /// Controlled source with initial `setpoint` and `gain`.
    pub fn new(
        store: &mut AttributeStore,
        name: &str,
        setpoint: f64,
        gain: f64,
    ) -> Result<Self, ComponentError> {
        let mut subs = SubComponents::new(name);
        let source = VoltageSource::dc(store, &subs.child_name("src"), gain * setpoint)?;
        let v_ref = source.v_ref();
        let inner = source
            .port()
            .ok_or_else(|| ComponentError::NotAttached(source.name().to_string()))?;
        let port = Port {
            v_intf: store.create_reference(name, "v_intf", inner.v_intf)?,
            i_intf: store.create_reference(name, "i_intf", inner.i_intf)?,
        };
        subs.register(
            source,
            vec![TerminalMap::Parent(0), TerminalMap::Parent(1)],
            CompositionPolicy::EMBEDDED_PRE_STEP,
        )?;
        Ok(Self {
            name: name.to_string(),
            setpoint: store.create(name, "setpoint", setpoint)?,
            gain: store.create(name, "gain", gain)?,
            v_ref,
            subs,
            port,
        })
    }

    /// Setpoint cell; bind it to drive the source from a signal.
    pub fn setpoint(&self) -> Attr<f64> {
        self.setpoint
    }

    /// Gain cell.
    pub fn gain(&self) -> Attr<f64> {
        self.gain
    }
}

impl Component for ControlledVoltageSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::ControlledVoltageSource
    }

    fn terminal_count(&self) -> usize {
        2
    }

    fn internal_nodes(&self) -> usize {
        self.subs.internal_nodes()
    }

    fn extra_unknowns(&self) -> usize {
        self.subs.extra_unknowns()
    }

    fn attach(&mut self, layout: Layout, env: &SystemEnv) -> Result<(), ComponentError> {
        self.subs.attach(&layout, 0, env)
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
        let v = store.get(self.gain)? * store.get(self.setpoint)?;
        store.set(self.v_ref, Complex64::new(v, 0.0))?;
        self.subs.stamp_steady_state(matrix, rhs, store)
    }

    fn apply_steady_state(&self, x: &DVector<f64>, store: &AttributeStore) -> Result<(), ComponentError> {
        self.subs.apply_steady_state(x, store)
    }

    fn tasks(&self, binding: Option<&SystemBinding>) -> Result<Vec<SharedTask>, ComponentError> {
        let (setpoint, gain, v_ref) = (self.setpoint, self.gain, self.v_ref);
        let own = FnTask::new(self.name.clone(), Phase::PreStep)
            .reads(AttrSet::empty().with(setpoint).with(gain))
            .writes(AttrSet::empty().with(v_ref))
            .body(move |ctx| {
                let v = ctx.read(gain)? * ctx.read(setpoint)?;
                ctx.write(v_ref, Complex64::new(v, 0.0))
            });
        self.subs.materialize(vec![own.shared()], binding)
    }

    fn port(&self) -> Option<Port> {
        Some(self.port)
    }
}
