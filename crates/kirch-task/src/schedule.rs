//! Dependency analysis and layering.
//!
//! [`build_schedule`] runs once per topology. It checks the task list for
//! structural errors, derives the same-step dependency graph and
//! partitions it into layers that may each run fully in parallel.
//!
//! Edge rule: `A -> B` whenever B reads or writes a cell that A writes.
//! Additive cells relax this for writers: any number of tasks may
//! accumulate into one, and every pure reader of the cell depends on all
//! of them. Previous-step reads never create edges.

use indexmap::{IndexMap, IndexSet};
use kirch_core::{AttrId, AttrSet, AttributeError, AttributeStore};
use smallvec::SmallVec;
use thiserror::Error;

use crate::context::Access;
use crate::task::{task_label, Phase, SharedTask};

// ── Errors ─────────────────────────────────────────────────────────

/// Two tasks writing the same non-additive cell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteConflict {
    /// Qualified name of the contested cell.
    pub attribute: String,
    /// Label of the earlier writer in task-list order.
    pub first_writer: String,
    /// Label of the later writer.
    pub second_writer: String,
}

fn describe_conflicts(conflicts: &[WriteConflict]) -> String {
    conflicts
        .iter()
        .map(|c| {
            format!(
                "'{}' written by '{}' and '{}'",
                c.attribute, c.first_writer, c.second_writer
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Structural errors found while building a schedule.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ScheduleError {
    /// No tasks were supplied.
    #[error("schedule has no tasks")]
    EmptySchedule,

    /// Two tasks share an `(owner, phase)` identity.
    #[error("duplicate task '{label}'")]
    DuplicateTask {
        /// The repeated label.
        label: String,
    },

    /// Non-additive cells with more than one writer.
    #[error("write-write conflicts: {}", describe_conflicts(.0))]
    WriteConflict(Vec<WriteConflict>),

    /// The same-step graph contains a cycle.
    #[error("same-step dependency cycle: {}", .cycle.join(" -> "))]
    DependencyCycle {
        /// Task labels along the cycle; the first label is repeated at the end.
        cycle: Vec<String>,
    },

    /// A declared cell could not be resolved.
    #[error("task '{task}' declares an unusable attribute: {source}")]
    UnresolvedAttribute {
        /// Label of the declaring task.
        task: String,
        /// Why resolution failed.
        source: AttributeError,
    },
}

// ── Schedule ───────────────────────────────────────────────────────

/// A validated, layered execution plan.
///
/// Immutable once built. Layer `k` must complete before layer `k + 1`
/// starts; tasks within a layer have no path between them and touch
/// disjoint non-additive cells.
#[derive(Clone)]
#[must_use]
pub struct Schedule {
    tasks: Vec<SharedTask>,
    labels: Vec<String>,
    access: Vec<Access>,
    layers: Vec<Vec<usize>>,
    layer_of: Vec<usize>,
    edges: Vec<(usize, usize)>,
    previous: AttrSet,
}

impl Schedule {
    /// Number of tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the schedule holds no tasks.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Task indices per layer, each layer in task-list order.
    pub fn layers(&self) -> &[Vec<usize>] {
        &self.layers
    }

    /// Layer a task was placed in.
    pub fn layer_of(&self, task: usize) -> Option<usize> {
        self.layer_of.get(task).copied()
    }

    /// Same-step edges `(from, to)`, sorted and deduplicated.
    pub fn edges(&self) -> &[(usize, usize)] {
        &self.edges
    }

    /// Whether the edge `from -> to` exists.
    pub fn has_edge(&self, from: usize, to: usize) -> bool {
        self.edges.binary_search(&(from, to)).is_ok()
    }

    /// Index of the task identified by `(owner, phase)`.
    pub fn index_of(&self, owner: &str, phase: Phase) -> Option<usize> {
        self.tasks
            .iter()
            .position(|t| t.owner() == owner && t.phase() == phase)
    }

    /// Task at `index`.
    pub fn task(&self, index: usize) -> Option<&SharedTask> {
        self.tasks.get(index)
    }

    /// Label (`owner::phase`) of the task at `index`.
    pub fn label(&self, index: usize) -> &str {
        self.labels.get(index).map(String::as_str).unwrap_or("?")
    }

    /// Resolved declarations of the task at `index`.
    pub fn access(&self, index: usize) -> Option<&Access> {
        self.access.get(index)
    }

    /// Every owning cell read through `reads_previous()` by some task.
    pub fn previous_cells(&self) -> &AttrSet {
        &self.previous
    }
}

impl std::fmt::Debug for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Schedule")
            .field("labels", &self.labels)
            .field("layers", &self.layers)
            .field("edges", &self.edges)
            .finish()
    }
}

// ── Construction ───────────────────────────────────────────────────

/// Validate a task list and build its [`Schedule`].
///
/// Checks performed:
///
/// 1. The list is non-empty.
/// 2. `(owner, phase)` is unique.
/// 3. Every declared cell resolves to a live owning cell.
/// 4. No non-additive cell has two writers.
/// 5. The same-step graph is acyclic.
///
/// Layering is longest-path: a task's layer is one more than the deepest
/// of its predecessors. The result depends only on the task list, so
/// building twice from the same list yields the same schedule.
pub fn build_schedule(
    tasks: Vec<SharedTask>,
    store: &AttributeStore,
) -> Result<Schedule, ScheduleError> {
    if tasks.is_empty() {
        return Err(ScheduleError::EmptySchedule);
    }

    let labels: Vec<String> = tasks.iter().map(|t| task_label(t.as_ref())).collect();
    {
        let mut seen: IndexSet<(&str, Phase)> = IndexSet::new();
        for (task, label) in tasks.iter().zip(&labels) {
            if !seen.insert((task.owner(), task.phase())) {
                return Err(ScheduleError::DuplicateTask {
                    label: label.clone(),
                });
            }
        }
    }

    let access: Vec<Access> = tasks
        .iter()
        .zip(&labels)
        .map(|(task, label)| {
            Access::of(task.as_ref(), store).map_err(|source| ScheduleError::UnresolvedAttribute {
                task: label.clone(),
                source,
            })
        })
        .collect::<Result<_, _>>()?;

    // Writers per cell, in task-list order.
    let mut writers: IndexMap<AttrId, SmallVec<[usize; 2]>> = IndexMap::new();
    for (i, a) in access.iter().enumerate() {
        for id in a.writes.iter() {
            writers.entry(id).or_default().push(i);
        }
    }

    let mut conflicts = Vec::new();
    for (id, ws) in &writers {
        if ws.len() > 1 && !store.is_additive(*id) {
            for pair in ws.windows(2) {
                conflicts.push(WriteConflict {
                    attribute: store.name(*id).unwrap_or("?").to_string(),
                    first_writer: labels[pair[0]].clone(),
                    second_writer: labels[pair[1]].clone(),
                });
            }
        }
    }
    if !conflicts.is_empty() {
        return Err(ScheduleError::WriteConflict(conflicts));
    }

    let n = tasks.len();
    let mut succ: Vec<SmallVec<[usize; 4]>> = vec![SmallVec::new(); n];
    let mut pred: Vec<SmallVec<[usize; 4]>> = vec![SmallVec::new(); n];
    let mut edges: Vec<(usize, usize)> = Vec::new();
    for (b, a) in access.iter().enumerate() {
        for id in a.reads.iter().chain(a.writes.iter()) {
            let Some(ws) = writers.get(&id) else {
                continue;
            };
            // Co-writers of an additive cell are unordered among themselves.
            if ws.contains(&b) {
                continue;
            }
            for &w in ws {
                edges.push((w, b));
            }
        }
    }
    edges.sort_unstable();
    edges.dedup();
    for &(a, b) in &edges {
        succ[a].push(b);
        pred[b].push(a);
    }

    // Kahn's algorithm with longest-path layer assignment.
    let mut indegree: Vec<usize> = pred.iter().map(|p| p.len()).collect();
    let mut layer_of = vec![0usize; n];
    let mut ready: Vec<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
    let mut visited = 0;
    while let Some(u) = ready.pop() {
        visited += 1;
        for &v in &succ[u] {
            layer_of[v] = layer_of[v].max(layer_of[u] + 1);
            indegree[v] -= 1;
            if indegree[v] == 0 {
                ready.push(v);
            }
        }
    }

    if visited < n {
        let cycle = find_cycle(&pred, &indegree);
        return Err(ScheduleError::DependencyCycle {
            cycle: cycle.into_iter().map(|i| labels[i].clone()).collect(),
        });
    }

    let depth = layer_of.iter().copied().max().map_or(0, |d| d + 1);
    let mut layers: Vec<Vec<usize>> = vec![Vec::new(); depth];
    for (i, &l) in layer_of.iter().enumerate() {
        layers[l].push(i);
    }

    let previous: AttrSet = access
        .iter()
        .flat_map(|a| a.previous.iter())
        .collect();

    tracing::debug!(
        tasks = n,
        layers = layers.len(),
        edges = edges.len(),
        "schedule built"
    );
    for (k, layer) in layers.iter().enumerate() {
        tracing::trace!(
            layer = k,
            tasks = ?layer.iter().map(|&i| labels[i].as_str()).collect::<Vec<_>>(),
            "layer"
        );
    }

    Ok(Schedule {
        tasks,
        labels,
        access,
        layers,
        layer_of,
        edges,
        previous,
    })
}

/// Extract one concrete cycle from the nodes Kahn's algorithm left behind.
///
/// Every leftover node has a leftover predecessor, so walking
/// predecessors from the lowest leftover index must revisit a node.
/// The cycle is returned in edge direction, rotated to start at its
/// lowest index, with the first node repeated at the end.
fn find_cycle(pred: &[SmallVec<[usize; 4]>], indegree: &[usize]) -> Vec<usize> {
    let stuck = |i: usize| indegree[i] > 0;
    let Some(start) = (0..indegree.len()).find(|&i| stuck(i)) else {
        return Vec::new();
    };

    let mut walk = vec![start];
    let mut position: IndexMap<usize, usize> = IndexMap::new();
    position.insert(start, 0);
    let mut cursor = start;
    loop {
        let Some(&p) = pred[cursor].iter().filter(|&&p| stuck(p)).min() else {
            return Vec::new();
        };
        if let Some(&at) = position.get(&p) {
            // walk[at..] is the cycle in reverse edge direction.
            let mut cycle: Vec<usize> = walk[at..].iter().rev().copied().collect();
            let min_pos = cycle
                .iter()
                .enumerate()
                .min_by_key(|(_, &v)| v)
                .map_or(0, |(i, _)| i);
            cycle.rotate_left(min_pos);
            cycle.push(cycle[0]);
            return cycle;
        }
        position.insert(p, walk.len());
        walk.push(p);
        cursor = p;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::FnTask;
    use kirch_core::Attr;

    fn task(
        owner: &str,
        phase: Phase,
        reads: &[Attr<f64>],
        writes: &[Attr<f64>],
    ) -> SharedTask {
        FnTask::new(owner, phase)
            .reads(reads.iter().copied().map(AttrId::from).collect())
            .writes(writes.iter().copied().map(AttrId::from).collect())
            .shared()
    }

    fn cells(store: &mut AttributeStore, n: usize) -> Vec<Attr<f64>> {
        (0..n)
            .map(|i| store.create("cell", &i.to_string(), 0.0).unwrap())
            .collect()
    }

    #[test]
    fn empty_rejected() {
        let store = AttributeStore::new();
        assert!(matches!(
            build_schedule(vec![], &store),
            Err(ScheduleError::EmptySchedule)
        ));
    }

    #[test]
    fn chain_gets_one_layer_per_task() {
        let mut store = AttributeStore::new();
        let c = cells(&mut store, 3);
        let tasks = vec![
            task("c", Phase::Step, &[c[1]], &[c[2]]),
            task("a", Phase::Step, &[], &[c[0]]),
            task("b", Phase::Step, &[c[0]], &[c[1]]),
        ];
        let s = build_schedule(tasks, &store).unwrap();
        assert_eq!(s.layers(), &[vec![1], vec![2], vec![0]]);
        assert!(s.has_edge(1, 2));
        assert!(s.has_edge(2, 0));
        assert!(!s.has_edge(1, 0));
    }

    #[test]
    fn independent_tasks_share_a_layer_in_list_order() {
        let mut store = AttributeStore::new();
        let c = cells(&mut store, 3);
        let tasks = vec![
            task("z", Phase::Step, &[], &[c[0]]),
            task("y", Phase::Step, &[], &[c[1]]),
            task("x", Phase::Step, &[c[0], c[1]], &[c[2]]),
        ];
        let s = build_schedule(tasks, &store).unwrap();
        assert_eq!(s.layers(), &[vec![0, 1], vec![2]]);
    }

    #[test]
    fn duplicate_identity_rejected() {
        let mut store = AttributeStore::new();
        let c = cells(&mut store, 2);
        let tasks = vec![
            task("r1", Phase::PreStep, &[], &[c[0]]),
            task("r1", Phase::PreStep, &[], &[c[1]]),
        ];
        match build_schedule(tasks, &store) {
            Err(ScheduleError::DuplicateTask { label }) => assert_eq!(label, "r1::pre_step"),
            other => panic!("expected DuplicateTask, got {other:?}"),
        }
    }

    #[test]
    fn write_conflict_lists_both_writers() {
        let mut store = AttributeStore::new();
        let c = cells(&mut store, 1);
        let tasks = vec![
            task("a", Phase::Step, &[], &[c[0]]),
            task("b", Phase::Step, &[], &[c[0]]),
        ];
        match build_schedule(tasks, &store) {
            Err(ScheduleError::WriteConflict(conflicts)) => {
                assert_eq!(conflicts.len(), 1);
                assert_eq!(conflicts[0].attribute, "cell.0");
                assert_eq!(conflicts[0].first_writer, "a::step");
                assert_eq!(conflicts[0].second_writer, "b::step");
            }
            other => panic!("expected WriteConflict, got {other:?}"),
        }
    }

    #[test]
    fn additive_writers_are_unordered_and_precede_readers() {
        let mut store = AttributeStore::new();
        let rhs = store.create_additive("net", "rhs", 0.0).unwrap();
        let out = store.create("net", "x", 0.0).unwrap();
        let tasks = vec![
            task("s1", Phase::PreStep, &[], &[rhs]),
            task("s2", Phase::PreStep, &[], &[rhs]),
            task("solve", Phase::Solve, &[rhs], &[out]),
        ];
        let s = build_schedule(tasks, &store).unwrap();
        assert_eq!(s.layers(), &[vec![0, 1], vec![2]]);
        assert!(!s.has_edge(0, 1) && !s.has_edge(1, 0));
        assert!(s.has_edge(0, 2) && s.has_edge(1, 2));
    }

    #[test]
    fn aliases_are_resolved_before_analysis() {
        let mut store = AttributeStore::new();
        let v = store.create("l1", "i", 0.0).unwrap();
        let alias = store.create_reference("pi", "i", v).unwrap();
        let out = store.create("reader", "out", 0.0).unwrap();
        let tasks = vec![
            task("reader", Phase::Step, &[alias], &[out]),
            task("l1", Phase::PostStep, &[], &[v]),
        ];
        let s = build_schedule(tasks, &store).unwrap();
        assert!(s.has_edge(1, 0));
    }

    #[test]
    fn previous_reads_add_no_edges() {
        let mut store = AttributeStore::new();
        let c = cells(&mut store, 2);
        let a = FnTask::new("a", Phase::Step)
            .reads_previous(AttrSet::empty().with(c[1]))
            .writes(AttrSet::empty().with(c[0]))
            .shared();
        let b = FnTask::new("b", Phase::Step)
            .reads_previous(AttrSet::empty().with(c[0]))
            .writes(AttrSet::empty().with(c[1]))
            .shared();
        let s = build_schedule(vec![a, b], &store).unwrap();
        assert!(s.edges().is_empty());
        assert_eq!(s.layers().len(), 1);
        assert_eq!(s.previous_cells().len(), 2);
    }

    #[test]
    fn cycle_reported_from_lowest_index() {
        let mut store = AttributeStore::new();
        let c = cells(&mut store, 3);
        // t0 -> t2 -> t1 -> t0
        let tasks = vec![
            task("t0", Phase::Step, &[c[1]], &[c[0]]),
            task("t1", Phase::Step, &[c[2]], &[c[1]]),
            task("t2", Phase::Step, &[c[0]], &[c[2]]),
        ];
        match build_schedule(tasks, &store) {
            Err(ScheduleError::DependencyCycle { cycle }) => {
                assert_eq!(cycle, vec!["t0::step", "t2::step", "t1::step", "t0::step"]);
            }
            other => panic!("expected DependencyCycle, got {other:?}"),
        }
    }

    #[test]
    fn released_cell_is_unresolved() {
        let mut store = AttributeStore::new();
        let gone = store.create("old", "v", 0.0).unwrap();
        store.release_owner("old");
        let tasks = vec![task("a", Phase::Step, &[gone], &[])];
        assert!(matches!(
            build_schedule(tasks, &store),
            Err(ScheduleError::UnresolvedAttribute { .. })
        ));
    }
}
