//! Nodal equation engine and component composition for the kirch
//! simulation kernel.
//!
//! A [`Topology`] holds named nodes and [`Component`]s. [`assemble`]
//! partitions it into electrically disjoint subnetworks, stamps one
//! system matrix per subnetwork, wraps each in an [`MnaSolver`] and
//! builds a single [`Schedule`](kirch_task::Schedule) from every
//! component's tasks plus one solve task per subnetwork. Composite
//! components are built from sub-components through [`SubComponents`].

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod assembly;
pub mod component;
pub mod components;
pub mod composite;
pub mod error;
pub mod matrix;
pub mod partition;
pub mod registry;
pub mod solver;
pub mod topology;

pub use assembly::{assemble, Assembly};
pub use component::{Component, ComponentKind, Layout, Port, SteadyStateLink, SystemEnv};
pub use composite::{CompositionPolicy, EmbeddingTask, SubComponents, TaskOrder, TerminalMap};
pub use error::{AssemblyError, ComponentError, TopologyError};
pub use matrix::{branch_voltage, inject_current, Entry, Stamp, SystemMatrix, VariableStamp};
pub use partition::{partition, Partition, Subnetwork};
pub use registry::{Built, ComponentRegistry, Constructor, Params};
pub use solver::{factorize, solve_with, MnaSolver, SystemBinding, PIVOT_RATIO_LIMIT};
pub use topology::{NodeId, Topology, GROUND};
