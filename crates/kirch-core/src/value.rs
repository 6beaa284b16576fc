//! Attribute values and typed handles.
//!
//! Every cell holds one [`AttrValue`]. Element code never matches on the
//! enum directly: it goes through an [`Attr<T>`] handle whose type
//! parameter fixes the variant, so a resistor's `f64` current cannot be
//! read back as a vector.

use std::fmt;
use std::marker::PhantomData;

pub use nalgebra::{DMatrix, DVector};
pub use num_complex::Complex64;

use crate::id::AttrId;

/// Discriminant of an [`AttrValue`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Boolean flag (switch states).
    Bool,
    /// Real scalar.
    Real,
    /// Complex scalar (phasors).
    Complex,
    /// Dense real column vector.
    Vector,
    /// Dense real matrix.
    Matrix,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Bool => "bool",
            Self::Real => "real",
            Self::Complex => "complex",
            Self::Vector => "vector",
            Self::Matrix => "matrix",
        };
        f.write_str(s)
    }
}

/// The value stored in an attribute cell.
#[derive(Clone, Debug, PartialEq)]
pub enum AttrValue {
    /// Boolean flag.
    Bool(bool),
    /// Real scalar.
    Real(f64),
    /// Complex scalar.
    Complex(Complex64),
    /// Dense real column vector.
    Vector(DVector<f64>),
    /// Dense real matrix.
    Matrix(DMatrix<f64>),
}

impl AttrValue {
    /// Kind of the stored value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Bool(_) => ValueKind::Bool,
            Self::Real(_) => ValueKind::Real,
            Self::Complex(_) => ValueKind::Complex,
            Self::Vector(_) => ValueKind::Vector,
            Self::Matrix(_) => ValueKind::Matrix,
        }
    }

    /// Zero value of the same kind and shape.
    ///
    /// Used to reset additive accumulators between steps.
    pub fn zeroed(&self) -> Self {
        match self {
            Self::Bool(_) => Self::Bool(false),
            Self::Real(_) => Self::Real(0.0),
            Self::Complex(_) => Self::Complex(Complex64::new(0.0, 0.0)),
            Self::Vector(v) => Self::Vector(DVector::zeros(v.len())),
            Self::Matrix(m) => Self::Matrix(DMatrix::zeros(m.nrows(), m.ncols())),
        }
    }

    /// Real part of a scalar value, if this is a scalar.
    ///
    /// Booleans map to `0.0` / `1.0`.
    pub fn as_real(&self) -> Option<f64> {
        match self {
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Real(v) => Some(*v),
            Self::Complex(c) => Some(c.re),
            Self::Vector(_) | Self::Matrix(_) => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Real(v) => write!(f, "{v}"),
            Self::Complex(c) => write!(f, "{c}"),
            Self::Vector(v) => write!(f, "vector[{}]", v.len()),
            Self::Matrix(m) => write!(f, "matrix[{}x{}]", m.nrows(), m.ncols()),
        }
    }
}

/// A Rust type that can live in an attribute cell.
pub trait AttrType: Clone + Send + Sync + 'static {
    /// The [`ValueKind`] this type maps to.
    const KIND: ValueKind;

    /// Wrap into an [`AttrValue`].
    fn into_value(self) -> AttrValue;

    /// Borrow out of an [`AttrValue`] of the matching kind.
    fn from_value(value: &AttrValue) -> Option<&Self>;

    /// Mutably borrow out of an [`AttrValue`] of the matching kind.
    fn from_value_mut(value: &mut AttrValue) -> Option<&mut Self>;
}

macro_rules! attr_type {
    ($ty:ty, $variant:ident) => {
        impl AttrType for $ty {
            const KIND: ValueKind = ValueKind::$variant;

            fn into_value(self) -> AttrValue {
                AttrValue::$variant(self)
            }

            fn from_value(value: &AttrValue) -> Option<&Self> {
                match value {
                    AttrValue::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn from_value_mut(value: &mut AttrValue) -> Option<&mut Self> {
                match value {
                    AttrValue::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

attr_type!(bool, Bool);
attr_type!(f64, Real);
attr_type!(Complex64, Complex);
attr_type!(DVector<f64>, Vector);
attr_type!(DMatrix<f64>, Matrix);

/// Typed handle to an attribute cell.
///
/// A thin wrapper over [`AttrId`]; copying it never copies the value.
pub struct Attr<T> {
    id: AttrId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Attr<T> {
    pub(crate) fn new(id: AttrId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    /// Untyped identity of the cell.
    pub fn id(&self) -> AttrId {
        self.id
    }
}

impl<T> Clone for Attr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Attr<T> {}

impl<T> PartialEq for Attr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Attr<T> {}

impl<T> fmt::Debug for Attr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Attr({})", self.id)
    }
}

impl<T> From<Attr<T>> for AttrId {
    fn from(attr: Attr<T>) -> Self {
        attr.id
    }
}
