//! Kirch: a real-time capable electrical network simulation kernel.
//!
//! This facade re-exports the public API of the kirch sub-crates. For
//! most users, adding `kirch` as a single dependency is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use kirch::prelude::*;
//! use kirch::components::{Resistor, VoltageSource};
//!
//! let mut topology = Topology::new();
//! let n1 = topology.add_node("n1").unwrap();
//! let vs = VoltageSource::dc(topology.store_mut(), "vs", 230.0).unwrap();
//! let load = Resistor::new(topology.store_mut(), "load", 23.0).unwrap();
//! topology.add_component(vs, &[n1, GROUND]).unwrap();
//! topology.add_component(load, &[n1, GROUND]).unwrap();
//!
//! let config = SimulationConfig {
//!     time_step: 1e-4,
//!     final_time: 1e-3,
//!     ..SimulationConfig::default()
//! };
//! let mut sim = Simulation::new(config, topology).unwrap();
//! let metrics = sim.run().unwrap();
//! assert_eq!(metrics.steps, 10);
//!
//! let store = sim.store();
//! let current = store.get(store.find_typed::<f64>("load.i_intf").unwrap()).unwrap();
//! assert!((current - 10.0).abs() < 1e-9);
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`cells`] | `kirch-core` | Attribute arena, typed handles, values, core errors |
//! | [`tasks`] | `kirch-task` | Task contract, scheduler, worker pool |
//! | [`mna`] | `kirch-mna` | Topology, nodal solve, composition, registry |
//! | [`components`] | `kirch-mna` | Reference component models |
//! | [`engine`] | `kirch-engine` | Run controller, pacer, interfaces, sinks |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Attribute cells and core errors (`kirch-core`).
pub use kirch_core as cells;

/// Task contract, dependency scheduler and executor (`kirch-task`).
///
/// Implement [`tasks::Task`] or use [`tasks::FnTask`] to add behaviour
/// to a component.
pub use kirch_task as tasks;

/// Nodal equation assembly and composition (`kirch-mna`).
pub use kirch_mna as mna;

/// Reference component models (`kirch-mna`).
pub use kirch_mna::components;

/// Run controller and external interfaces (`kirch-engine`).
pub use kirch_engine as engine;

/// Common imports for typical kirch usage.
///
/// ```rust
/// use kirch::prelude::*;
/// ```
pub mod prelude {
    // Cells
    pub use kirch_core::{Attr, AttrSet, AttrValue, AttributeStore, Complex64, StepId};

    // Errors
    pub use kirch_core::{AttributeError, NumericError, TaskError};

    // Tasks
    pub use kirch_task::{FnTask, Phase, SharedTask, Task, TaskContext};

    // Network
    pub use kirch_mna::{
        Component, ComponentKind, ComponentRegistry, CompositionPolicy, Params, SubComponents,
        TerminalMap, Topology, GROUND,
    };

    // Engine
    pub use kirch_engine::{
        ChannelPair, DataSink, ExportTiming, InitialConditions, Interface, MemorySink, RunHandle,
        RunState, SimError, Simulation, SimulationConfig, SyncPolicy,
    };
}
