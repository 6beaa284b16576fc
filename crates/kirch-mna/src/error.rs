//! Error types for topology construction, components and assembly.

use kirch_core::{AttributeError, NumericError};
use kirch_task::ScheduleError;
use thiserror::Error;

/// Malformed topology.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum TopologyError {
    /// A node or component name is already taken.
    #[error("name '{0}' is already in use")]
    DuplicateName(String),

    /// No node with this name.
    #[error("unknown node '{0}'")]
    UnknownNode(String),

    /// No component with this name.
    #[error("unknown component '{0}'")]
    UnknownComponent(String),

    /// A terminal refers to a node that is not part of the topology.
    #[error("terminal {terminal} of '{component}' is not connected to a known node")]
    DanglingTerminal {
        /// Component name.
        component: String,
        /// Terminal index.
        terminal: usize,
    },

    /// Wrong number of terminals supplied.
    #[error("'{component}' has {expected} terminals, {got} supplied")]
    TerminalCountMismatch {
        /// Component name.
        component: String,
        /// Terminals the component declares.
        expected: usize,
        /// Terminals supplied.
        got: usize,
    },

    /// Every terminal of the component is on ground.
    #[error("'{0}' is connected to ground only")]
    FloatingComponent(String),

    /// Removing a node still used by a component.
    #[error("node '{node}' is still connected to '{component}'")]
    NodeInUse {
        /// Node name.
        node: String,
        /// First component connected to it.
        component: String,
    },

    /// The attribute graph is broken (for example a dangling reference).
    #[error(transparent)]
    Attribute(#[from] AttributeError),
}

/// Errors raised while building or wiring a component.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ComponentError {
    /// A parameter value is out of range.
    #[error("'{component}': invalid {parameter}: {reason}")]
    InvalidParameter {
        /// Component name.
        component: String,
        /// Parameter name.
        parameter: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A required parameter is missing.
    #[error("'{component}': missing parameter '{parameter}'")]
    MissingParameter {
        /// Component name.
        component: String,
        /// Parameter name.
        parameter: String,
    },

    /// A supplied parameter is not understood by the component kind.
    #[error("'{component}': unknown parameter '{parameter}'")]
    UnknownParameter {
        /// Component name.
        component: String,
        /// Parameter name.
        parameter: String,
    },

    /// No constructor is registered for this tag.
    #[error("unknown component kind '{0}'")]
    UnknownKind(String),

    /// A sub-component was registered with the wrong number of terminals.
    #[error("'{component}' has {expected} terminals, mapping has {got}")]
    TerminalMap {
        /// Sub-component name.
        component: String,
        /// Terminals it declares.
        expected: usize,
        /// Entries in the mapping.
        got: usize,
    },

    /// A steady-state link names a component that is missing or does not
    /// link back.
    #[error("'{component}' is linked to '{counterpart}', which is not its counterpart in the topology")]
    MissingCounterpart {
        /// Component declaring the link.
        component: String,
        /// Name it links to.
        counterpart: String,
    },

    /// Tasks were requested before the component was attached to a system.
    #[error("'{0}' is not attached to a system")]
    NotAttached(String),

    /// Attribute creation or access failed.
    #[error(transparent)]
    Attribute(#[from] AttributeError),
}

/// Errors turning a topology into solvers and a schedule.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum AssemblyError {
    /// The topology is malformed.
    #[error(transparent)]
    Topology(#[from] TopologyError),

    /// A component could not be wired.
    #[error(transparent)]
    Component(#[from] ComponentError),

    /// The task list is structurally invalid.
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    /// A system matrix cannot be factorised.
    #[error(transparent)]
    Numeric(#[from] NumericError),

    /// Attribute access failed during assembly.
    #[error(transparent)]
    Attribute(#[from] AttributeError),

    /// The time step exceeds a component's stability limit.
    #[error("time step {dt} exceeds limit {max} of '{component}'")]
    TimeStepTooLarge {
        /// Component imposing the limit.
        component: String,
        /// Configured time step.
        dt: f64,
        /// Largest supported time step.
        max: f64,
    },
}
