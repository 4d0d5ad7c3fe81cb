use std::fmt;

use crate::errors::ValueError;
use crate::tensor_type::{Dimension, TensorType, ValueType};

/// A dense tensor value.
///
/// Cells are stored in row-major order over the type's dimensions, which are
/// sorted by name. Cells are stored as `f64` regardless of the cell type;
/// the cell type only affects how the value is typed in expressions.
#[derive(Clone, Debug, PartialEq)]
pub struct TensorValue {
    ty: TensorType,
    data: Vec<f64>,
}

impl TensorValue {
    /// Create a tensor from data in row-major order over the type's
    /// (name-sorted) dimensions.
    pub fn from_data(ty: TensorType, data: Vec<f64>) -> Result<TensorValue, ValueError> {
        let expected = ty.dense_len().ok_or_else(|| ValueError::NotDense(ty.clone()))?;
        if data.len() != expected {
            return Err(ValueError::LengthMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(TensorValue { ty, data })
    }

    /// Create a tensor where every cell has the same value.
    pub fn filled(ty: TensorType, value: f64) -> Result<TensorValue, ValueError> {
        let len = ty.dense_len().ok_or_else(|| ValueError::NotDense(ty.clone()))?;
        Ok(TensorValue {
            ty,
            data: vec![value; len],
        })
    }

    pub fn scalar(value_type: ValueType, value: f64) -> TensorValue {
        TensorValue {
            ty: TensorType::scalar(value_type),
            data: vec![value],
        }
    }

    /// Create a tensor from data in row-major order over `dims`, which may be
    /// listed in any order.
    ///
    /// The data is transposed into the canonical (name-sorted) order.
    pub fn from_ordered(
        value_type: ValueType,
        dims: &[(&str, usize)],
        data: Vec<f64>,
    ) -> Result<TensorValue, ValueError> {
        let ty = TensorType::new(
            value_type,
            dims.iter().map(|&(name, size)| Dimension::indexed(name, size)),
        )?;
        let expected: usize = dims.iter().map(|&(_, size)| size).product();
        if data.len() != expected {
            return Err(ValueError::LengthMismatch {
                expected,
                actual: data.len(),
            });
        }

        // Position of each canonical dimension in `dims`.
        let order: Vec<usize> = ty
            .dimensions()
            .iter()
            .map(|dim| {
                dims.iter()
                    .position(|&(name, _)| name == dim.name())
                    .unwrap_or_default()
            })
            .collect();
        if order.iter().enumerate().all(|(i, &src)| i == src) {
            return Ok(TensorValue { ty, data });
        }

        let shape: Vec<usize> = dims.iter().map(|&(_, size)| size).collect();
        let mut src_strides = vec![1usize; shape.len()];
        for i in (0..shape.len().saturating_sub(1)).rev() {
            src_strides[i] = src_strides[i + 1] * shape[i + 1];
        }

        let out_shape: Vec<usize> = order.iter().map(|&src| shape[src]).collect();
        let out_strides: Vec<usize> = order.iter().map(|&src| src_strides[src]).collect();
        let mut index = vec![0usize; out_shape.len()];
        let mut out = Vec::with_capacity(data.len());
        for _ in 0..data.len() {
            let offset: usize = index.iter().zip(&out_strides).map(|(i, s)| i * s).sum();
            out.push(data[offset]);

            // Increment the multi-dimensional index, last dimension fastest.
            for axis in (0..index.len()).rev() {
                index[axis] += 1;
                if index[axis] < out_shape[axis] {
                    break;
                }
                index[axis] = 0;
            }
        }

        Ok(TensorValue { ty, data: out })
    }

    /// Create a tensor with dimensions named `d0`, `d1` ... after their
    /// position in `shape`, from data in row-major order.
    pub fn from_positional(
        value_type: ValueType,
        shape: &[usize],
        data: Vec<f64>,
    ) -> Result<TensorValue, ValueError> {
        let names: Vec<String> = (0..shape.len()).map(|i| format!("d{}", i)).collect();
        let dims: Vec<(&str, usize)> = names
            .iter()
            .map(|n| n.as_str())
            .zip(shape.iter().copied())
            .collect();
        Self::from_ordered(value_type, &dims, data)
    }

    pub fn ty(&self) -> &TensorType {
        &self.ty
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Return the value of every cell, if all cells have the same value.
    pub fn uniform_value(&self) -> Option<f64> {
        let (first, rest) = self.data.split_first()?;
        rest.iter()
            .all(|x| x.to_bits() == first.to_bits())
            .then_some(*first)
    }

    /// Return a copy of this tensor with dimensions `from[i]` renamed to
    /// `to[i]`, transposing cells into the new canonical order.
    pub fn rename<S: AsRef<str>>(&self, from: &[S], to: &[S]) -> Result<TensorValue, ValueError> {
        // Validates the rename.
        self.ty.rename(from, to)?;

        let renamed: Vec<(String, usize)> = self
            .ty
            .dimensions()
            .iter()
            .map(|dim| {
                let name = match from.iter().position(|f| f.as_ref() == dim.name()) {
                    Some(i) => to[i].as_ref().to_string(),
                    None => dim.name().to_string(),
                };
                (name, dim.fixed_size().unwrap_or(1))
            })
            .collect();
        let dims: Vec<(&str, usize)> = renamed.iter().map(|(n, s)| (n.as_str(), *s)).collect();
        Self::from_ordered(self.ty.value_type(), &dims, self.data.clone())
    }

    /// Return a copy of this tensor without the named dimensions, which must
    /// all have size 1.
    ///
    /// This has the same result as summing over those dimensions, including
    /// the cell type becoming `double` if no dimensions remain.
    pub fn remove_unit_dims<S: AsRef<str>>(&self, names: &[S]) -> Result<TensorValue, ValueError> {
        for name in names {
            let name = name.as_ref();
            match self.ty.dimension(name).and_then(|d| d.fixed_size()) {
                Some(1) => {}
                _ => return Err(ValueError::NotUnitDimension(name.to_string())),
            }
        }
        let ty = if names.is_empty() {
            self.ty.clone()
        } else {
            self.ty.reduce(names)?
        };
        Ok(TensorValue {
            ty,
            data: self.data.clone(),
        })
    }
}

/// Format a number such that it can be parsed back into the same `f64`.
pub fn format_number(f: &mut fmt::Formatter<'_>, value: f64) -> fmt::Result {
    write!(f, "{:?}", value)
}

/// Formats the tensor as a literal.
///
/// Tensors whose cells all have the same value use the short form
/// `tensor<float>(d0[1])(1.0)`. Other tensors list the cells in canonical
/// order, eg. `tensor(d0[3]):[1.0, 2.0, 3.0]`.
impl fmt::Display for TensorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(value) = self.uniform_value() {
            write!(f, "{}(", self.ty)?;
            format_number(f, value)?;
            return write!(f, ")");
        }
        write!(f, "{}:[", self.ty)?;
        for (i, value) in self.data.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            format_number(f, *value)?;
        }
        write!(f, "]")
    }
}
