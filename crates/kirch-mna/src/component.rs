//! The [`Component`] contract between electrical elements and the
//! equation engine.
//!
//! A component states its shape (terminals, internal nodes, extra
//! unknowns), receives its matrix indices through [`Component::attach`],
//! contributes static and switched stamps, and exposes its per-step work
//! as tasks with declared dependencies.

use std::fmt;
use std::str::FromStr;

use kirch_core::{Attr, AttributeStore, DVector};
use kirch_task::SharedTask;

use crate::error::ComponentError;
use crate::matrix::{SystemMatrix, VariableStamp};
use crate::solver::SystemBinding;

/// Closed set of component kinds known to the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    /// Linear resistor.
    Resistor,
    /// Linear inductor, trapezoidal companion model.
    Inductor,
    /// Linear capacitor, trapezoidal companion model.
    Capacitor,
    /// Ideal sinusoidal or DC voltage source.
    VoltageSource,
    /// Ideal sinusoidal or DC current source.
    CurrentSource,
    /// Two-state resistive switch.
    Switch,
    /// One half of a decoupled transmission line.
    DecouplingLine,
    /// Lumped pi-section line built from sub-components.
    PiLine,
    /// Voltage source driven by a gain on a setpoint.
    ControlledVoltageSource,
    /// Signal gain block.
    Gain,
}

impl ComponentKind {
    /// Every kind, in declaration order.
    pub const ALL: [ComponentKind; 10] = [
        Self::Resistor,
        Self::Inductor,
        Self::Capacitor,
        Self::VoltageSource,
        Self::CurrentSource,
        Self::Switch,
        Self::DecouplingLine,
        Self::PiLine,
        Self::ControlledVoltageSource,
        Self::Gain,
    ];

    /// Tag string used by importers.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Resistor => "resistor",
            Self::Inductor => "inductor",
            Self::Capacitor => "capacitor",
            Self::VoltageSource => "voltage_source",
            Self::CurrentSource => "current_source",
            Self::Switch => "switch",
            Self::DecouplingLine => "decoupling_line",
            Self::PiLine => "pi_line",
            Self::ControlledVoltageSource => "controlled_voltage_source",
            Self::Gain => "gain",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for ComponentKind {
    type Err = ComponentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.tag() == s)
            .ok_or_else(|| ComponentError::UnknownKind(s.to_string()))
    }
}

/// Matrix indices assigned to one component.
///
/// `None` marks a terminal on ground.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Layout {
    /// One entry per terminal.
    pub terminals: Vec<Option<usize>>,
    /// Indices of the component's internal nodes.
    pub internal: Vec<usize>,
    /// Indices of the component's extra unknowns.
    pub extras: Vec<usize>,
    /// Subnetwork the component belongs to, if any.
    pub subnetwork: Option<usize>,
}

impl Layout {
    /// Index of terminal `i`, `None` when grounded or absent.
    pub fn terminal(&self, i: usize) -> Option<usize> {
        self.terminals.get(i).copied().flatten()
    }
}

/// Run-wide parameters handed to components at attach time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SystemEnv {
    /// Fixed time step, in seconds.
    pub dt: f64,
    /// Nominal system frequency, in hertz.
    pub frequency: f64,
}

/// Terminal voltage and current cells of a two-terminal element.
///
/// `v_intf = v(a) - v(b)`; `i_intf` flows from `a` to `b` through the
/// element.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Port {
    /// Terminal voltage.
    pub v_intf: Attr<f64>,
    /// Terminal current.
    pub i_intf: Attr<f64>,
}

impl Port {
    /// Create both cells under `owner`.
    pub fn create(store: &mut AttributeStore, owner: &str) -> Result<Self, ComponentError> {
        Ok(Self {
            v_intf: store.create(owner, "v_intf", 0.0)?,
            i_intf: store.create(owner, "i_intf", 0.0)?,
        })
    }
}

/// A series branch the DC solve places between terminal 0 of two
/// components.
///
/// Both ends name each other. Subnetworks joined by a link are solved
/// together for the operating point only.
#[derive(Clone, Debug, PartialEq)]
pub struct SteadyStateLink {
    /// Component at the far end.
    pub counterpart: String,
    /// Series resistance; zero joins both terminals.
    pub resistance: f64,
    /// Receives the DC current flowing from this end into the link.
    pub current: Attr<f64>,
}

/// An element of the network.
///
/// Implementations are built against an [`AttributeStore`] (creating
/// their cells up front), then added to a
/// [`Topology`](crate::Topology). Assembly calls the methods below in
/// order: shape queries, [`attach`](Self::attach), stamping, then
/// [`tasks`](Self::tasks).
pub trait Component: Send + Sync {
    /// Unique name; also the owner label of the component's cells.
    fn name(&self) -> &str;

    /// Kind tag.
    fn kind(&self) -> ComponentKind;

    /// Number of external terminals.
    fn terminal_count(&self) -> usize;

    /// Internal nodes needed, including those of sub-components.
    fn internal_nodes(&self) -> usize {
        0
    }

    /// Extra unknowns needed, including those of sub-components.
    fn extra_unknowns(&self) -> usize {
        0
    }

    /// Largest time step the model supports.
    ///
    /// Return `None` to impose no constraint.
    fn max_dt(&self) -> Option<f64> {
        None
    }

    /// Receive matrix indices and run parameters. Called once, before
    /// any stamping.
    fn attach(&mut self, layout: Layout, env: &SystemEnv) -> Result<(), ComponentError>;

    /// Add constant matrix entries.
    fn stamp_matrix(&self, _matrix: &mut SystemMatrix) {}

    /// Matrix entries that depend on a switch state.
    fn variable_stamps(&self) -> Vec<VariableStamp> {
        Vec::new()
    }

    /// Stamp the DC operating-point system.
    ///
    /// Default: the constant entries only, no right-hand side.
    fn stamp_steady_state(
        &self,
        matrix: &mut SystemMatrix,
        _rhs: &mut DVector<f64>,
        _store: &AttributeStore,
    ) -> Result<(), ComponentError> {
        self.stamp_matrix(matrix);
        Ok(())
    }

    /// Couple this component to another one in the DC solve.
    ///
    /// Link currents are written before
    /// [`apply_steady_state`](Self::apply_steady_state) runs.
    fn steady_state_link(&self) -> Option<SteadyStateLink> {
        None
    }

    /// Set terminal and history quantities from the DC solution.
    fn apply_steady_state(
        &self,
        _solution: &DVector<f64>,
        _store: &AttributeStore,
    ) -> Result<(), ComponentError> {
        Ok(())
    }

    /// Per-step tasks.
    ///
    /// `binding` is the component's subnetwork, `None` for components
    /// without terminals.
    fn tasks(&self, binding: Option<&SystemBinding>) -> Result<Vec<SharedTask>, ComponentError>;

    /// Terminal voltage and current cells, for two-terminal elements.
    fn port(&self) -> Option<Port> {
        None
    }
}

/// The binding, or `NotAttached` naming the component.
pub(crate) fn require_binding<'a>(
    name: &str,
    binding: Option<&'a SystemBinding>,
) -> Result<&'a SystemBinding, ComponentError> {
    binding.ok_or_else(|| ComponentError::NotAttached(name.to_string()))
}
