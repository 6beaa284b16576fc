//! System matrix and stamp helpers.
//!
//! Indices are local to one subnetwork. A terminal on ground carries no
//! index (`None`) and every entry touching it is dropped.

use kirch_core::{Attr, DMatrix, DVector};
use smallvec::SmallVec;

/// One additive matrix entry.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Entry {
    /// Row index.
    pub row: usize,
    /// Column index.
    pub col: usize,
    /// Value added at `(row, col)`.
    pub value: f64,
}

/// A small list of matrix entries.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Stamp {
    entries: SmallVec<[Entry; 4]>,
}

impl Stamp {
    /// Empty stamp.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `value` at `(row, col)` if both are off ground.
    pub fn add(&mut self, row: Option<usize>, col: Option<usize>, value: f64) {
        if let (Some(row), Some(col)) = (row, col) {
            self.entries.push(Entry { row, col, value });
        }
    }

    /// Conductance `g` between `a` and `b`.
    pub fn conductance(a: Option<usize>, b: Option<usize>, g: f64) -> Self {
        let mut s = Self::new();
        s.add(a, a, g);
        s.add(b, b, g);
        s.add(a, b, -g);
        s.add(b, a, -g);
        s
    }

    /// Entries of the stamp.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }
}

/// Dense system matrix of one subnetwork.
#[derive(Clone, Debug, PartialEq)]
pub struct SystemMatrix {
    values: DMatrix<f64>,
}

impl SystemMatrix {
    /// All-zero `dim x dim` matrix.
    pub fn zeros(dim: usize) -> Self {
        Self {
            values: DMatrix::zeros(dim, dim),
        }
    }

    /// Dimension.
    pub fn dim(&self) -> usize {
        self.values.nrows()
    }

    /// Add `value` at `(row, col)`; no-op when either index is ground.
    pub fn add(&mut self, row: Option<usize>, col: Option<usize>, value: f64) {
        if let (Some(r), Some(c)) = (row, col) {
            self.values[(r, c)] += value;
        }
    }

    /// Stamp a conductance between two nodes.
    pub fn add_conductance(&mut self, a: Option<usize>, b: Option<usize>, g: f64) {
        self.apply(&Stamp::conductance(a, b, g));
    }

    /// Stamp the incidence of a voltage source branch with unknown `k`.
    pub fn add_voltage_branch(&mut self, a: Option<usize>, b: Option<usize>, k: usize) {
        self.add(a, Some(k), 1.0);
        self.add(b, Some(k), -1.0);
        self.add(Some(k), a, 1.0);
        self.add(Some(k), b, -1.0);
    }

    /// Add every entry of a stamp.
    pub fn apply(&mut self, stamp: &Stamp) {
        for e in stamp.entries() {
            self.values[(e.row, e.col)] += e.value;
        }
    }

    /// Underlying dense matrix.
    pub fn values(&self) -> &DMatrix<f64> {
        &self.values
    }

    /// Take the underlying dense matrix.
    pub fn into_values(self) -> DMatrix<f64> {
        self.values
    }
}

/// Inject a current `i` flowing from `a` to `b` through the element.
///
/// The current leaves node `a` and enters node `b`.
pub fn inject_current(rhs: &mut DVector<f64>, a: Option<usize>, b: Option<usize>, i: f64) {
    if let Some(a) = a {
        rhs[a] -= i;
    }
    if let Some(b) = b {
        rhs[b] += i;
    }
}

/// Voltage `v(a) - v(b)` from a solution vector.
pub fn branch_voltage(x: &DVector<f64>, a: Option<usize>, b: Option<usize>) -> f64 {
    let va = a.map_or(0.0, |a| x[a]);
    let vb = b.map_or(0.0, |b| x[b]);
    va - vb
}

/// Matrix entries that depend on a switch state.
#[derive(Clone, Debug, PartialEq)]
pub struct VariableStamp {
    /// State cell; `true` selects `closed`.
    pub state: Attr<bool>,
    /// Entries while the state is `false`.
    pub open: Stamp,
    /// Entries while the state is `true`.
    pub closed: Stamp,
}

impl VariableStamp {
    /// Entries for a given state.
    pub fn select(&self, closed: bool) -> &Stamp {
        if closed {
            &self.closed
        } else {
            &self.open
        }
    }
}
