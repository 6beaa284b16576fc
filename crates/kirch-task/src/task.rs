//! The [`Task`] trait, [`Phase`] and the closure-backed [`FnTask`].
//!
//! A task is one small unit of per-step work owned by an element. It
//! declares three distinct dependency sets once, at schedule build time:
//!
//! - `reads()`: cells whose *current-step* value it needs. Produces an
//!   ordering edge from the cell's writer.
//! - `reads_previous()`: cells whose *previous-step* committed value it
//!   needs. Never produces an edge.
//! - `writes()`: cells it produces this step.
//!
//! Keeping the previous-step set separate at the API level means a
//! forgotten delay shows up as a cycle error, not as silently wrong output.

use std::fmt;
use std::sync::Arc;

use kirch_core::{AttrSet, TaskError};

use crate::context::TaskContext;

/// Step phase a task belongs to.
///
/// Phases are part of a task's identity; they do not impose ordering by
/// themselves. Ordering comes from the declared data dependencies only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    /// Update history terms and source values before assembly.
    PreStep,
    /// Signal-level computation without matrix involvement.
    Step,
    /// Solve a linear system.
    Solve,
    /// Read back the solution into element quantities.
    PostStep,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PreStep => "pre_step",
            Self::Step => "step",
            Self::Solve => "solve",
            Self::PostStep => "post_step",
        };
        f.write_str(s)
    }
}

/// A stateless unit of per-step work.
///
/// # Contract
///
/// - `reads()`, `reads_previous()` and `writes()` are called once when the
///   schedule is built, not per step.
/// - `execute()` may only touch cells it declared; the [`TaskContext`]
///   rejects anything else with `UndeclaredAccess`.
/// - `&self`: tasks hold handles, all mutable state lives in cells.
///
/// # Examples
///
/// ```
/// use kirch_core::{AttributeStore, AttrSet, Attr, TaskError};
/// use kirch_task::{Phase, Task, TaskContext};
///
/// struct Double {
///     input: Attr<f64>,
///     output: Attr<f64>,
/// }
///
/// impl Task for Double {
///     fn owner(&self) -> &str { "gain" }
///     fn phase(&self) -> Phase { Phase::Step }
///     fn reads(&self) -> AttrSet { AttrSet::empty().with(self.input) }
///     fn writes(&self) -> AttrSet { AttrSet::empty().with(self.output) }
///     fn execute(&self, ctx: &TaskContext<'_>) -> Result<(), TaskError> {
///         let x = ctx.read(self.input)?;
///         ctx.write(self.output, 2.0 * x)
///     }
/// }
///
/// let mut store = AttributeStore::new();
/// let task = Double {
///     input: store.create("gain", "in", 1.0).unwrap(),
///     output: store.create("gain", "out", 0.0).unwrap(),
/// };
/// assert_eq!(task.phase(), Phase::Step);
/// ```
pub trait Task: Send + Sync {
    /// Name of the owning element.
    fn owner(&self) -> &str;

    /// Phase of this task; `(owner, phase)` must be unique in a schedule.
    fn phase(&self) -> Phase;

    /// Cells read at their current-step value.
    fn reads(&self) -> AttrSet;

    /// Cells read at their previous-step committed value.
    ///
    /// Default: empty set.
    fn reads_previous(&self) -> AttrSet {
        AttrSet::empty()
    }

    /// Cells written this step.
    fn writes(&self) -> AttrSet;

    /// Run the task for one step.
    fn execute(&self, ctx: &TaskContext<'_>) -> Result<(), TaskError>;
}

/// Shared task handle.
///
/// Composite elements keep handles to sub-element tasks so they can run
/// them inline, hence `Arc` rather than `Box`.
pub type SharedTask = Arc<dyn Task>;

/// `owner::phase` label used in logs and errors.
pub fn task_label(task: &dyn Task) -> String {
    format!("{}::{}", task.owner(), task.phase())
}

type Body = dyn Fn(&TaskContext<'_>) -> Result<(), TaskError> + Send + Sync;

/// A task built from declarations plus a closure.
///
/// Most element tasks are a handful of reads, one or two writes and a
/// short body; this saves a struct and trait impl for each.
pub struct FnTask {
    owner: String,
    phase: Phase,
    reads: AttrSet,
    reads_previous: AttrSet,
    writes: AttrSet,
    body: Box<Body>,
}

impl FnTask {
    /// Start a task with empty declarations and a no-op body.
    pub fn new(owner: impl Into<String>, phase: Phase) -> Self {
        Self {
            owner: owner.into(),
            phase,
            reads: AttrSet::empty(),
            reads_previous: AttrSet::empty(),
            writes: AttrSet::empty(),
            body: Box::new(|_| Ok(())),
        }
    }

    /// Declare current-step reads.
    pub fn reads(mut self, set: AttrSet) -> Self {
        self.reads.extend(&set);
        self
    }

    /// Declare previous-step reads.
    pub fn reads_previous(mut self, set: AttrSet) -> Self {
        self.reads_previous.extend(&set);
        self
    }

    /// Declare writes.
    pub fn writes(mut self, set: AttrSet) -> Self {
        self.writes.extend(&set);
        self
    }

    /// Set the body.
    pub fn body<F>(mut self, f: F) -> Self
    where
        F: Fn(&TaskContext<'_>) -> Result<(), TaskError> + Send + Sync + 'static,
    {
        self.body = Box::new(f);
        self
    }

    /// Wrap into a [`SharedTask`].
    pub fn shared(self) -> SharedTask {
        Arc::new(self)
    }
}

impl Task for FnTask {
    fn owner(&self) -> &str {
        &self.owner
    }

    fn phase(&self) -> Phase {
        self.phase
    }

    fn reads(&self) -> AttrSet {
        self.reads.clone()
    }

    fn reads_previous(&self) -> AttrSet {
        self.reads_previous.clone()
    }

    fn writes(&self) -> AttrSet {
        self.writes.clone()
    }

    fn execute(&self, ctx: &TaskContext<'_>) -> Result<(), TaskError> {
        (self.body)(ctx)
    }
}

impl fmt::Debug for FnTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTask")
            .field("owner", &self.owner)
            .field("phase", &self.phase)
            .field("reads", &self.reads)
            .field("reads_previous", &self.reads_previous)
            .field("writes", &self.writes)
            .finish_non_exhaustive()
    }
}
