//! Task contract and dependency scheduler for the kirch simulation kernel.
//!
//! Elements expose their per-step work as [`Task`]s with declared
//! same-step reads, same-step writes and previous-step reads.
//! [`build_schedule`] turns a task list into a layered [`Schedule`] once
//! per topology, and the [`Executor`] runs it every step on a fixed
//! worker pool.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod context;
pub mod executor;
pub mod previous;
pub mod schedule;
pub mod task;

pub use context::{Access, StepClock, TaskContext};
pub use executor::{ExecutionReport, Executor, ExecutorError, TaskFailure};
pub use previous::PreviousFrame;
pub use schedule::{build_schedule, Schedule, ScheduleError, WriteConflict};
pub use task::{task_label, FnTask, Phase, SharedTask, Task};
