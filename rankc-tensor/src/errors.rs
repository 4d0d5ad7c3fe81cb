//! Error types that are reported by tensor type and value operations.

use std::error::Error;
use std::fmt::{Display, Formatter};

use crate::TensorType;

/// Errors from combining or transforming tensor types.
#[derive(Clone, Debug, PartialEq)]
pub enum TypeError {
    /// A tensor type spec could not be parsed.
    InvalidSpec { spec: String, reason: &'static str },

    /// A type has more than one dimension with the same name.
    DuplicateDimension(String),

    /// An operation referred to a dimension which the type does not have.
    UnknownDimension { dim: String, ty: TensorType },

    /// Two indexed dimensions with the same name have different sizes.
    IncompatibleSizes {
        dim: String,
        lhs: usize,
        rhs: usize,
    },

    /// A dimension is mapped in one operand and indexed in the other.
    IncompatibleKinds { dim: String },

    /// The source and target dimension lists of a rename differ in length.
    RenameArity { from: usize, to: usize },
}

impl Display for TypeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidSpec { spec, reason } => {
                write!(f, "invalid tensor type spec \"{}\": {}", spec, reason)
            }
            Self::DuplicateDimension(dim) => write!(f, "dimension '{}' is repeated", dim),
            Self::UnknownDimension { dim, ty } => {
                write!(f, "dimension '{}' is not present in {}", dim, ty)
            }
            Self::IncompatibleSizes { dim, lhs, rhs } => write!(
                f,
                "dimension '{}' has incompatible sizes {} and {}",
                dim, lhs, rhs
            ),
            Self::IncompatibleKinds { dim } => {
                write!(f, "dimension '{}' is mapped on one side and indexed on the other", dim)
            }
            Self::RenameArity { from, to } => write!(
                f,
                "rename has {} source dimensions but {} target dimensions",
                from, to
            ),
        }
    }
}

impl Error for TypeError {}

/// Errors that can occur when constructing or transforming a tensor value.
#[derive(Clone, Debug, PartialEq)]
pub enum ValueError {
    /// Values can only be created for types whose dimensions are all indexed
    /// with a known size.
    NotDense(TensorType),

    /// The data length does not match the number of cells in the type.
    LengthMismatch { expected: usize, actual: usize },

    /// A dimension that was expected to have size 1 has another size.
    NotUnitDimension(String),

    /// The transformed type is invalid.
    Type(TypeError),
}

impl Display for ValueError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotDense(ty) => write!(f, "type {} is not dense", ty),
            Self::LengthMismatch { expected, actual } => write!(
                f,
                "data length {} does not match cell count {}",
                actual, expected
            ),
            Self::NotUnitDimension(dim) => write!(f, "dimension '{}' does not have size 1", dim),
            Self::Type(err) => err.fmt(f),
        }
    }
}

impl Error for ValueError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Type(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TypeError> for ValueError {
    fn from(val: TypeError) -> Self {
        Self::Type(val)
    }
}
