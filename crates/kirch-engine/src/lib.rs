//! Run controller for the kirch simulation kernel.
//!
//! [`Simulation`] turns a [`Topology`](kirch_mna::Topology) and a
//! [`SimulationConfig`] into a steppable run, either offline or paced
//! against the wall clock by a [`Pacer`]. External processes exchange
//! values once per step through [`Interface`]s, and [`DataSink`]s
//! receive recorded values.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod events;
pub mod interface;
pub mod metrics;
pub mod pacer;
pub mod realtime;
pub mod simulation;
pub mod sink;

pub use config::{ConfigError, InitialConditions, SimulationConfig, MAX_WORKERS};
pub use error::{InterfaceError, SimError, StructuralError};
pub use events::{EventQueue, ScheduledEvent};
pub use interface::{ChannelPair, Endpoint, ExportTiming, Frame, Interface, Received, SyncPolicy};
pub use metrics::{RunMetrics, StepMetrics};
pub use pacer::{Pacer, TimingViolation};
pub use realtime::{RunHandle, RunOutcome};
pub use simulation::{RunState, Simulation, StopHandle, StopReason};
pub use sink::{ChannelSink, DataSink, MemorySink, Sample};
