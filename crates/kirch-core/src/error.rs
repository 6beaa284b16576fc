//! Error types shared across the workspace.
//!
//! [`AttributeError`] covers cell access, [`NumericError`] the linear
//! solve path, and [`TaskError`] is what a task body returns.

use thiserror::Error;

use crate::id::AttrId;
use crate::value::ValueKind;

/// Errors from the attribute arena.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AttributeError {
    /// No slot with this index was ever allocated.
    #[error("unknown attribute {0}")]
    UnknownAttribute(AttrId),

    /// No live attribute has this qualified name.
    #[error("no attribute named '{0}'")]
    UnknownName(String),

    /// The slot was released and possibly reused since the handle was issued.
    #[error("stale attribute handle {0}")]
    StaleHandle(AttrId),

    /// The stored value has a different kind than requested.
    #[error("attribute '{name}' holds {actual}, accessed as {expected}")]
    TypeMismatch {
        /// Qualified attribute name.
        name: String,
        /// Kind requested by the caller.
        expected: ValueKind,
        /// Kind actually stored.
        actual: ValueKind,
    },

    /// Binding would make a reference chain loop back on itself.
    #[error("binding '{cell}' to '{target}' would create a reference cycle")]
    ReferenceCycle {
        /// The cell being bound.
        cell: String,
        /// The requested target.
        target: String,
    },

    /// A referencing cell whose target has been released.
    #[error("attribute '{name}' references a released cell")]
    DanglingReference {
        /// Qualified name of the referencing cell.
        name: String,
    },

    /// An attribute with this qualified name already exists.
    #[error("attribute '{0}' already exists")]
    DuplicateName(String),

    /// A task touched a cell it did not declare.
    #[error("undeclared {access} of attribute '{name}'")]
    UndeclaredAccess {
        /// Qualified attribute name.
        name: String,
        /// Which kind of access was attempted.
        access: &'static str,
    },
}

/// Errors from the linear solve path.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum NumericError {
    /// LU factorisation hit a zero pivot.
    #[error("system matrix of '{system}' is singular")]
    Singular {
        /// Label of the system (subnetwork) being solved.
        system: String,
    },

    /// Smallest to largest pivot magnitude ratio fell below the limit.
    #[error("system matrix of '{system}' is ill-conditioned (pivot ratio {ratio:e})")]
    IllConditioned {
        /// Label of the system being solved.
        system: String,
        /// Observed min/max pivot magnitude ratio.
        ratio: f64,
    },

    /// Right-hand side length does not match the matrix dimension.
    #[error("dimension mismatch in '{system}': matrix {matrix}, vector {vector}")]
    DimensionMismatch {
        /// Label of the system being solved.
        system: String,
        /// Matrix dimension.
        matrix: usize,
        /// Vector length.
        vector: usize,
    },

    /// The solve produced NaN or infinity.
    #[error("non-finite solution in '{system}' at index {index}")]
    NonFinite {
        /// Label of the system being solved.
        system: String,
        /// First offending index.
        index: usize,
    },
}

/// Error returned from a task body.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum TaskError {
    /// Attribute access failed.
    #[error(transparent)]
    Attribute(#[from] AttributeError),

    /// The solve path failed.
    #[error(transparent)]
    Numeric(#[from] NumericError),

    /// Any other failure inside a task body.
    #[error("execution failed: {reason}")]
    ExecutionFailed {
        /// Human-readable description.
        reason: String,
    },
}
