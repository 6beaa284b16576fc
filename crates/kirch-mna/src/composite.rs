//! Building one component out of sub-components.
//!
//! A composite registers each sub-component with a terminal map and a
//! [`CompositionPolicy`]. The policy says, per phase, where the
//! sub-component's task goes relative to the parent's own task:
//!
//! - [`TaskOrder::BeforeParent`] / [`TaskOrder::AfterParent`]: scheduled
//!   as an independent task, listed before or after the parent's.
//! - [`TaskOrder::NoTask`]: not scheduled; the parent runs it inline at
//!   the end of its own task body, through an [`EmbeddingTask`] that
//!   carries the union of both declarations.
//!
//! The policy is attached at registration and resolved once, when the
//! composite's task list is materialised.

use std::fmt;
use std::sync::Arc;

use kirch_core::{AttrSet, AttributeStore, DVector, TaskError};
use kirch_task::{FnTask, Phase, SharedTask, Task, TaskContext};

use crate::component::{Component, Layout, SystemEnv};
use crate::error::ComponentError;
use crate::matrix::{SystemMatrix, VariableStamp};
use crate::solver::SystemBinding;

/// Placement of a sub-component's task for one phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskOrder {
    /// Independent task listed before the parent's.
    BeforeParent,
    /// Independent task listed after the parent's.
    AfterParent,
    /// Run inline from the parent's task.
    NoTask,
}

/// Per-phase task placement plus matrix participation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CompositionPolicy {
    /// Placement of the pre-step task.
    pub pre_step: TaskOrder,
    /// Placement of the post-step task.
    pub post_step: TaskOrder,
    /// Whether the sub-component stamps the parent's system matrix.
    pub stamps_matrix: bool,
}

impl CompositionPolicy {
    /// Independent tasks around the parent's, stamping the matrix.
    pub const INDEPENDENT: Self = Self {
        pre_step: TaskOrder::BeforeParent,
        post_step: TaskOrder::AfterParent,
        stamps_matrix: true,
    };

    /// Pre-step run inline by the parent, post-step independent.
    pub const EMBEDDED_PRE_STEP: Self = Self {
        pre_step: TaskOrder::NoTask,
        post_step: TaskOrder::AfterParent,
        stamps_matrix: true,
    };

    /// Placement for a phase. Step and solve tasks always go first.
    pub fn order(&self, phase: Phase) -> TaskOrder {
        match phase {
            Phase::PreStep => self.pre_step,
            Phase::PostStep => self.post_step,
            Phase::Step | Phase::Solve => TaskOrder::BeforeParent,
        }
    }
}

impl Default for CompositionPolicy {
    fn default() -> Self {
        Self::INDEPENDENT
    }
}

/// Where a sub-component terminal connects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TerminalMap {
    /// The parent's external terminal `i`.
    Parent(usize),
    /// The parent's own internal node `i`.
    Internal(usize),
    /// Ground.
    Ground,
}

struct Member {
    component: Box<dyn Component>,
    terminals: Vec<TerminalMap>,
    policy: CompositionPolicy,
}

/// Registered sub-components of one composite.
pub struct SubComponents {
    parent: String,
    members: Vec<Member>,
}

impl SubComponents {
    /// Empty set for the composite `parent`.
    pub fn new(parent: &str) -> Self {
        Self {
            parent: parent.to_string(),
            members: Vec::new(),
        }
    }

    /// Name a sub-component `<parent>:<sub>`.
    pub fn child_name(&self, sub: &str) -> String {
        format!("{}:{sub}", self.parent)
    }

    /// Register a sub-component.
    pub fn register(
        &mut self,
        component: impl Component + 'static,
        terminals: Vec<TerminalMap>,
        policy: CompositionPolicy,
    ) -> Result<(), ComponentError> {
        if terminals.len() != component.terminal_count() {
            return Err(ComponentError::TerminalMap {
                component: component.name().to_string(),
                expected: component.terminal_count(),
                got: terminals.len(),
            });
        }
        self.members.push(Member {
            component: Box::new(component),
            terminals,
            policy,
        });
        Ok(())
    }

    /// Number of registered sub-components.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Sub-component by position.
    pub fn get(&self, index: usize) -> Option<&dyn Component> {
        self.members.get(index).map(|m| m.component.as_ref())
    }

    /// Internal nodes of all sub-components.
    pub fn internal_nodes(&self) -> usize {
        self.members.iter().map(|m| m.component.internal_nodes()).sum()
    }

    /// Extra unknowns of all sub-components.
    pub fn extra_unknowns(&self) -> usize {
        self.members.iter().map(|m| m.component.extra_unknowns()).sum()
    }

    /// Tightest time-step limit among sub-components.
    pub fn max_dt(&self) -> Option<f64> {
        self.members
            .iter()
            .filter_map(|m| m.component.max_dt())
            .reduce(f64::min)
    }

    /// Hand every sub-component its slice of the parent's layout.
    ///
    /// The parent's internal nodes come first (`own_internal` of them),
    /// then each sub-component's in registration order. Extra unknowns
    /// are all the sub-components', in registration order.
    pub fn attach(
        &mut self,
        layout: &Layout,
        own_internal: usize,
        env: &SystemEnv,
    ) -> Result<(), ComponentError> {
        let mut next_internal = own_internal;
        let mut next_extra = 0;
        for member in &mut self.members {
            let terminals = member
                .terminals
                .iter()
                .map(|t| match *t {
                    TerminalMap::Parent(i) => layout.terminal(i),
                    TerminalMap::Internal(i) => layout.internal.get(i).copied(),
                    TerminalMap::Ground => None,
                })
                .collect();
            let n = member.component.internal_nodes();
            let e = member.component.extra_unknowns();
            let sub = Layout {
                terminals,
                internal: slice(&layout.internal, next_internal, n, member.component.as_ref())?,
                extras: slice(&layout.extras, next_extra, e, member.component.as_ref())?,
                subnetwork: layout.subnetwork,
            };
            next_internal += n;
            next_extra += e;
            member.component.attach(sub, env)?;
        }
        Ok(())
    }

    fn stamping(&self) -> impl Iterator<Item = &dyn Component> + '_ {
        self.members
            .iter()
            .filter(|m| m.policy.stamps_matrix)
            .map(|m| m.component.as_ref())
    }

    /// Constant stamps of the matrix-participating sub-components.
    pub fn stamp_matrix(&self, matrix: &mut SystemMatrix) {
        for c in self.stamping() {
            c.stamp_matrix(matrix);
        }
    }

    /// Switched stamps of the matrix-participating sub-components.
    pub fn variable_stamps(&self) -> Vec<VariableStamp> {
        self.stamping().flat_map(|c| c.variable_stamps()).collect()
    }

    /// DC stamps of the matrix-participating sub-components.
    pub fn stamp_steady_state(
        &self,
        matrix: &mut SystemMatrix,
        rhs: &mut DVector<f64>,
        store: &AttributeStore,
    ) -> Result<(), ComponentError> {
        for c in self.stamping() {
            c.stamp_steady_state(matrix, rhs, store)?;
        }
        Ok(())
    }

    /// Forward the DC solution to every sub-component.
    pub fn apply_steady_state(
        &self,
        solution: &DVector<f64>,
        store: &AttributeStore,
    ) -> Result<(), ComponentError> {
        for m in &self.members {
            m.component.apply_steady_state(solution, store)?;
        }
        Ok(())
    }

    fn phase_tasks(
        &self,
        phase: Phase,
        binding: Option<&SystemBinding>,
    ) -> Result<Vec<(TaskOrder, SharedTask)>, ComponentError> {
        let mut out = Vec::new();
        for m in &self.members {
            for task in m.component.tasks(binding)? {
                if task.phase() == phase {
                    out.push((m.policy.order(phase), task));
                }
            }
        }
        Ok(out)
    }

    /// Sub-component tasks the parent must run inline for `phase`.
    pub fn embedded(
        &self,
        phase: Phase,
        binding: Option<&SystemBinding>,
    ) -> Result<Vec<SharedTask>, ComponentError> {
        Ok(self
            .phase_tasks(phase, binding)?
            .into_iter()
            .filter(|(order, _)| *order == TaskOrder::NoTask)
            .map(|(_, t)| t)
            .collect())
    }

    /// `[BeforeParent...] ++ own ++ [AfterParent...]` for one phase.
    ///
    /// Embedded sub-tasks are folded into `own` through an
    /// [`EmbeddingTask`]. When the parent has no task of its own for the
    /// phase but embedded sub-tasks exist, a pass-through parent task is
    /// created for them.
    pub fn splice(
        &self,
        phase: Phase,
        own: Option<SharedTask>,
        binding: Option<&SystemBinding>,
    ) -> Result<Vec<SharedTask>, ComponentError> {
        let tasks = self.phase_tasks(phase, binding)?;
        let mut before = Vec::new();
        let mut after = Vec::new();
        let mut embedded = Vec::new();
        for (order, task) in tasks {
            match order {
                TaskOrder::BeforeParent => before.push(task),
                TaskOrder::AfterParent => after.push(task),
                TaskOrder::NoTask => embedded.push(task),
            }
        }

        let own = match (own, embedded.is_empty()) {
            (own, true) => own,
            (Some(own), false) => Some(EmbeddingTask::new(own, embedded).shared()),
            (None, false) => {
                let pass = FnTask::new(self.parent.clone(), phase).shared();
                Some(EmbeddingTask::new(pass, embedded).shared())
            }
        };

        tracing::trace!(
            parent = %self.parent,
            %phase,
            before = before.len(),
            after = after.len(),
            own = own.is_some(),
            "spliced composite tasks"
        );

        before.extend(own);
        before.extend(after);
        Ok(before)
    }

    /// Full task list: every phase spliced, phases in declaration order.
    ///
    /// `own` holds at most one task per phase.
    pub fn materialize(
        &self,
        own: Vec<SharedTask>,
        binding: Option<&SystemBinding>,
    ) -> Result<Vec<SharedTask>, ComponentError> {
        let mut out = Vec::new();
        for phase in [Phase::PreStep, Phase::Step, Phase::Solve, Phase::PostStep] {
            let mine = own.iter().find(|t| t.phase() == phase).cloned();
            out.extend(self.splice(phase, mine, binding)?);
        }
        Ok(out)
    }
}

fn slice(
    indices: &[usize],
    start: usize,
    len: usize,
    component: &dyn Component,
) -> Result<Vec<usize>, ComponentError> {
    indices
        .get(start..start + len)
        .map(<[usize]>::to_vec)
        .ok_or_else(|| ComponentError::NotAttached(component.name().to_string()))
}

impl fmt::Debug for SubComponents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubComponents")
            .field("parent", &self.parent)
            .field(
                "members",
                &self
                    .members
                    .iter()
                    .map(|m| (m.component.name(), m.terminals.as_slice(), m.policy))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// A parent task followed by sub-tasks run inline.
///
/// Declarations are the union of all of them, so the scheduler orders
/// the combined task as if it were one.
pub struct EmbeddingTask {
    parent: SharedTask,
    embedded: Vec<SharedTask>,
    reads: AttrSet,
    reads_previous: AttrSet,
    writes: AttrSet,
}

impl EmbeddingTask {
    /// Combine `parent` with `embedded`.
    pub fn new(parent: SharedTask, embedded: Vec<SharedTask>) -> Self {
        let mut reads = parent.reads();
        let mut reads_previous = parent.reads_previous();
        let mut writes = parent.writes();
        for t in &embedded {
            reads.extend(&t.reads());
            reads_previous.extend(&t.reads_previous());
            writes.extend(&t.writes());
        }
        Self {
            parent,
            embedded,
            reads,
            reads_previous,
            writes,
        }
    }

    /// Wrap into a [`SharedTask`].
    pub fn shared(self) -> SharedTask {
        Arc::new(self)
    }
}

impl Task for EmbeddingTask {
    fn owner(&self) -> &str {
        self.parent.owner()
    }

    fn phase(&self) -> Phase {
        self.parent.phase()
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
        self.parent.execute(ctx)?;
        for t in &self.embedded {
            t.execute(ctx)?;
        }
        Ok(())
    }
}

impl fmt::Debug for EmbeddingTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddingTask")
            .field("owner", &self.parent.owner())
            .field("phase", &self.parent.phase())
            .field("embedded", &self.embedded.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{Resistor, VoltageSource};
    use kirch_task::task_label;

    fn binding(store: &mut AttributeStore, dim: usize) -> SystemBinding {
        SystemBinding {
            index: 0,
            rhs: store.create_additive("net0", "rhs", DVector::zeros(dim)).unwrap(),
            solution: store.create("net0", "x", DVector::zeros(dim)).unwrap(),
            dimension: dim,
        }
    }

    fn attached(store: &mut AttributeStore, policy: CompositionPolicy) -> SubComponents {
        let mut subs = SubComponents::new("cmp");
        let r = Resistor::new(store, &subs.child_name("r"), 1.0).unwrap();
        let v = VoltageSource::dc(store, &subs.child_name("v"), 1.0).unwrap();
        subs.register(r, vec![TerminalMap::Parent(0), TerminalMap::Internal(0)], CompositionPolicy::INDEPENDENT)
            .unwrap();
        subs.register(v, vec![TerminalMap::Internal(0), TerminalMap::Ground], policy)
            .unwrap();
        let layout = Layout {
            terminals: vec![Some(0)],
            internal: vec![1],
            extras: vec![2],
            subnetwork: Some(0),
        };
        let env = SystemEnv { dt: 1e-3, frequency: 50.0 };
        subs.attach(&layout, 1, &env).unwrap();
        subs
    }

    #[test]
    fn terminal_map_length_checked() {
        let mut store = AttributeStore::new();
        let mut subs = SubComponents::new("cmp");
        let r = Resistor::new(&mut store, "cmp:r", 1.0).unwrap();
        let err = subs
            .register(r, vec![TerminalMap::Ground], CompositionPolicy::INDEPENDENT)
            .unwrap_err();
        assert!(matches!(err, ComponentError::TerminalMap { expected: 2, got: 1, .. }));
    }

    #[test]
    fn splice_orders_before_own_after() {
        let mut store = AttributeStore::new();
        let subs = attached(&mut store, CompositionPolicy::INDEPENDENT);
        let b = binding(&mut store, 3);
        let own = FnTask::new("cmp", Phase::PostStep).shared();
        let labels: Vec<String> = subs
            .splice(Phase::PostStep, Some(own), Some(&b))
            .unwrap()
            .iter()
            .map(|t| task_label(t.as_ref()))
            .collect();
        assert_eq!(labels, ["cmp::post_step", "cmp:r::post_step", "cmp:v::post_step"]);
    }

    #[test]
    fn embedded_tasks_fold_into_parent() {
        let mut store = AttributeStore::new();
        let subs = attached(&mut store, CompositionPolicy::EMBEDDED_PRE_STEP);
        let b = binding(&mut store, 3);
        let own = FnTask::new("cmp", Phase::PreStep).shared();

        assert_eq!(subs.embedded(Phase::PreStep, Some(&b)).unwrap().len(), 1);
        let spliced = subs.splice(Phase::PreStep, Some(own), Some(&b)).unwrap();
        assert_eq!(spliced.len(), 1);
        assert_eq!(spliced[0].owner(), "cmp");
        // The source's rhs write surfaces on the parent task.
        assert!(spliced[0].writes().contains(b.rhs.id()));
    }

    #[test]
    fn layout_slices_follow_registration_order() {
        let mut store = AttributeStore::new();
        let subs = attached(&mut store, CompositionPolicy::INDEPENDENT);
        assert_eq!(subs.extra_unknowns(), 1);
        let mut m = SystemMatrix::zeros(3);
        subs.stamp_matrix(&mut m);
        // Resistor between 0 and 1, source branch on 1 with unknown 2.
        assert_eq!(m.values()[(0, 1)], -1.0);
        assert_eq!(m.values()[(1, 2)], 1.0);
        assert_eq!(m.values()[(2, 1)], 1.0);
    }
}
