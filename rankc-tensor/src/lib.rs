//! rankc_tensor provides the tensor types and dense tensor values used by
//! ranking expressions.
//!
//! # Tensor types
//!
//! A [`TensorType`] is a cell type plus a set of *named* dimensions. Unlike
//! array libraries where axes are identified by position, ranking expressions
//! identify axes by name and operations such as `join` combine dimensions
//! which share a name. Types have a canonical text form:
//!
//! ```text
//! tensor<float>(d0[1],d1[784])   // float cells, two indexed dimensions
//! tensor(key{})                  // double cells, one mapped dimension
//! tensor()                       // double scalar
//! ```
//!
//! The type-level rules for `join`, `reduce`, `rename` and `concat` are
//! implemented as methods on [`TensorType`].
//!
//! # Tensor values
//!
//! [`TensorValue`] is a dense tensor: every dimension is indexed with a known
//! size. Values are used for model weights and for small literal tensors in
//! expressions.
//!
//! # Serialization
//!
//! With the `serde` feature enabled, types serialize as their spec string and
//! values as an object with `type` and `values` fields:
//!
//! ```json
//! {
//!   "type": "tensor<float>(d0[2])",
//!   "values": [0.5, 1.5]
//! }
//! ```

pub mod errors;
#[cfg(feature = "serde")]
mod impl_serialize;
mod tensor_type;
mod value;

pub use errors::{TypeError, ValueError};
pub use tensor_type::{DimSize, Dimension, TensorType, ValueType};
pub use value::{format_number, TensorValue};
