//! Core types for the kirch simulation kernel.
//!
//! This is the leaf crate of the workspace. It defines the attribute
//! cell arena that every element, task and interface shares, the typed
//! handles into it, step identifiers, and the error types raised by
//! attribute access and task execution.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod error;
pub mod id;
pub mod set;
pub mod store;
pub mod value;

pub use error::{AttributeError, NumericError, TaskError};
pub use id::{AttrId, StepId};
pub use set::AttrSet;
pub use store::AttributeStore;
pub use value::{Attr, AttrType, AttrValue, Complex64, DMatrix, DVector, ValueKind};
