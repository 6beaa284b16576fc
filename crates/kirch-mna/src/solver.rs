//! Per-subnetwork LU solve.
//!
//! The static part of the matrix is stamped once. Switch contributions
//! are added on top for the current vector of switch states, and the
//! resulting factorisation is cached by that vector, so toggling back to
//! a state seen before costs nothing. A cache miss after the first
//! factorisation counts as a re-factorisation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use indexmap::IndexMap;
use kirch_core::{Attr, AttrSet, AttributeStore, DMatrix, DVector, NumericError, TaskError};
use kirch_task::{Phase, SharedTask, Task, TaskContext};
use nalgebra::linalg::LU;
use nalgebra::Dyn;

use crate::matrix::{SystemMatrix, VariableStamp};

/// Smallest accepted ratio of smallest to largest pivot magnitude.
pub const PIVOT_RATIO_LIMIT: f64 = 1e-14;

type Factorization = LU<f64, Dyn, Dyn>;

/// Cells shared by every component of one subnetwork.
#[derive(Clone, Debug, PartialEq)]
pub struct SystemBinding {
    /// Subnetwork index.
    pub index: usize,
    /// Additive right-hand side; components accumulate into it.
    pub rhs: Attr<DVector<f64>>,
    /// Solution vector written by the solve task.
    pub solution: Attr<DVector<f64>>,
    /// Number of unknowns.
    pub dimension: usize,
}

impl SystemBinding {
    /// Owner label used for the binding's cells and the solve task.
    pub fn owner(index: usize) -> String {
        format!("net{index}")
    }

    /// Whether `owner` names a binding's cells.
    pub fn is_owner(owner: &str) -> bool {
        owner
            .strip_prefix("net")
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
    }
}

/// Factorise `matrix`, rejecting singular and ill-conditioned systems.
pub fn factorize(system: &str, matrix: DMatrix<f64>) -> Result<Factorization, NumericError> {
    let lu = matrix.lu();
    let u = lu.u();
    let (mut min, mut max) = (f64::INFINITY, 0.0_f64);
    for p in u.diagonal().iter().map(|p| p.abs()) {
        min = min.min(p);
        max = max.max(p);
    }
    if min == 0.0 || max == 0.0 || !min.is_finite() {
        return Err(NumericError::Singular {
            system: system.to_string(),
        });
    }
    let ratio = min / max;
    if ratio < PIVOT_RATIO_LIMIT {
        return Err(NumericError::IllConditioned {
            system: system.to_string(),
            ratio,
        });
    }
    Ok(lu)
}

/// Solve with an existing factorisation and check the result.
pub fn solve_with(
    system: &str,
    lu: &Factorization,
    rhs: &DVector<f64>,
) -> Result<DVector<f64>, NumericError> {
    if rhs.len() != lu.l().nrows() {
        return Err(NumericError::DimensionMismatch {
            system: system.to_string(),
            matrix: lu.l().nrows(),
            vector: rhs.len(),
        });
    }
    let x = lu.solve(rhs).ok_or_else(|| NumericError::Singular {
        system: system.to_string(),
    })?;
    if let Some(index) = x.iter().position(|v| !v.is_finite()) {
        return Err(NumericError::NonFinite {
            system: system.to_string(),
            index,
        });
    }
    Ok(x)
}

/// Linear solver of one subnetwork.
pub struct MnaSolver {
    label: String,
    binding: SystemBinding,
    base: DMatrix<f64>,
    switches: Vec<VariableStamp>,
    nodes: Vec<(usize, Attr<f64>)>,
    cache: Mutex<IndexMap<Vec<bool>, Arc<Factorization>>>,
    factorizations: AtomicU64,
}

impl MnaSolver {
    /// Solver over a stamped static matrix plus switch stamps.
    ///
    /// `nodes` maps solution indices to the node voltage cells the solve
    /// task keeps up to date.
    pub fn new(
        binding: SystemBinding,
        base: SystemMatrix,
        switches: Vec<VariableStamp>,
        nodes: Vec<(usize, Attr<f64>)>,
    ) -> Self {
        Self {
            label: SystemBinding::owner(binding.index),
            binding,
            base: base.into_values(),
            switches,
            nodes,
            cache: Mutex::new(IndexMap::new()),
            factorizations: AtomicU64::new(0),
        }
    }

    /// Subnetwork label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Cells of this subnetwork.
    pub fn binding(&self) -> &SystemBinding {
        &self.binding
    }

    /// Number of cache misses after the first factorisation.
    pub fn refactorizations(&self) -> u64 {
        self.factorizations.load(Ordering::Relaxed).saturating_sub(1)
    }

    /// Full matrix for a switch state vector.
    pub fn matrix_for(&self, states: &[bool]) -> DMatrix<f64> {
        let mut m = self.base.clone();
        for (stamp, &closed) in self.switches.iter().zip(states) {
            for e in stamp.select(closed).entries() {
                m[(e.row, e.col)] += e.value;
            }
        }
        m
    }

    /// Current switch state vector.
    pub fn states(&self, store: &AttributeStore) -> Result<Vec<bool>, kirch_core::AttributeError> {
        self.switches.iter().map(|s| store.get(s.state)).collect()
    }

    /// Factorisation for a state vector, from cache or freshly computed.
    pub fn factorization(&self, states: &[bool]) -> Result<Arc<Factorization>, NumericError> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(lu) = cache.get(states) {
            return Ok(Arc::clone(lu));
        }
        let lu = Arc::new(factorize(&self.label, self.matrix_for(states))?);
        let n = self.factorizations.fetch_add(1, Ordering::Relaxed);
        if n > 0 {
            tracing::debug!(system = %self.label, ?states, "re-factorising system matrix");
        }
        cache.insert(states.to_vec(), Arc::clone(&lu));
        Ok(lu)
    }

    /// Solve for a right-hand side under the given switch states.
    pub fn solve(&self, states: &[bool], rhs: &DVector<f64>) -> Result<DVector<f64>, NumericError> {
        let lu = self.factorization(states)?;
        solve_with(&self.label, &lu, rhs)
    }

    /// The per-step solve task.
    pub fn task(self: &Arc<Self>) -> SharedTask {
        Arc::new(SolveTask {
            solver: Arc::clone(self),
        })
    }
}

impl std::fmt::Debug for MnaSolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MnaSolver")
            .field("label", &self.label)
            .field("dimension", &self.binding.dimension)
            .field("switches", &self.switches.len())
            .finish_non_exhaustive()
    }
}

/// Reads the accumulated right-hand side and switch states, writes the
/// solution and node voltages.
struct SolveTask {
    solver: Arc<MnaSolver>,
}

impl Task for SolveTask {
    fn owner(&self) -> &str {
        &self.solver.label
    }

    fn phase(&self) -> Phase {
        Phase::Solve
    }

    fn reads(&self) -> AttrSet {
        let mut set = AttrSet::empty().with(self.solver.binding.rhs);
        for s in &self.solver.switches {
            set.insert(s.state);
        }
        set
    }

    fn writes(&self) -> AttrSet {
        let mut set = AttrSet::empty().with(self.solver.binding.solution);
        for (_, v) in &self.solver.nodes {
            set.insert(*v);
        }
        set
    }

    fn execute(&self, ctx: &TaskContext<'_>) -> Result<(), TaskError> {
        let solver = &self.solver;
        let states = solver
            .switches
            .iter()
            .map(|s| ctx.read(s.state))
            .collect::<Result<Vec<bool>, TaskError>>()?;
        let x = ctx.read_with(solver.binding.rhs, |rhs| solver.solve(&states, rhs))??;
        for (index, cell) in &solver.nodes {
            ctx.write(*cell, x[*index])?;
        }
        ctx.write(solver.binding.solution, x)
    }
}
