use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use smallvec::SmallVec;

use crate::errors::TypeError;

/// Cell type of a tensor.
///
/// The ordering is by precision, so the cell type of a combined tensor is
/// the larger of the operands' cell types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueType {
    Float,
    Double,
}

impl ValueType {
    pub fn name(self) -> &'static str {
        match self {
            ValueType::Float => "float",
            ValueType::Double => "double",
        }
    }

    fn from_name(name: &str) -> Option<ValueType> {
        match name {
            "float" => Some(ValueType::Float),
            "double" => Some(ValueType::Double),
            _ => None,
        }
    }
}

/// Size of a tensor dimension.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DimSize {
    /// Indexed dimension with a fixed size, eg. `x[3]`.
    Indexed(usize),

    /// Indexed dimension whose size is only known at runtime, eg. `x[]`.
    Unbound,

    /// Sparse dimension with string labels, eg. `x{}`.
    Mapped,
}

/// A named dimension of a [`TensorType`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Dimension {
    name: String,
    size: DimSize,
}

impl Dimension {
    pub fn new(name: impl Into<String>, size: DimSize) -> Dimension {
        Dimension {
            name: name.into(),
            size,
        }
    }

    pub fn indexed(name: impl Into<String>, size: usize) -> Dimension {
        Self::new(name, DimSize::Indexed(size))
    }

    pub fn unbound(name: impl Into<String>) -> Dimension {
        Self::new(name, DimSize::Unbound)
    }

    pub fn mapped(name: impl Into<String>) -> Dimension {
        Self::new(name, DimSize::Mapped)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> &DimSize {
        &self.size
    }

    /// Return the size if this is an indexed dimension with a known size.
    pub fn fixed_size(&self) -> Option<usize> {
        match self.size {
            DimSize::Indexed(n) => Some(n),
            DimSize::Unbound | DimSize::Mapped => None,
        }
    }

    fn renamed(&self, name: &str) -> Dimension {
        Dimension::new(name, self.size.clone())
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.size {
            DimSize::Indexed(n) => write!(f, "{}[{}]", self.name, n),
            DimSize::Unbound => write!(f, "{}[]", self.name),
            DimSize::Mapped => write!(f, "{}{{}}", self.name),
        }
    }
}

/// The type of a tensor: a cell type plus a set of named dimensions.
///
/// Dimensions are kept sorted by name, so two types which list the same
/// dimensions in a different order are equal, and the textual form is
/// canonical.
///
/// ```
/// use rankc_tensor::{TensorType, ValueType};
///
/// let ty: TensorType = "tensor<float>(d1[784],d0[1])".parse().unwrap();
/// assert_eq!(ty.to_string(), "tensor<float>(d0[1],d1[784])");
/// assert_eq!(ty.value_type(), ValueType::Float);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TensorType {
    value_type: ValueType,
    dims: SmallVec<[Dimension; 4]>,
}

impl TensorType {
    /// Create a tensor type from a list of dimensions in any order.
    pub fn new<I: IntoIterator<Item = Dimension>>(
        value_type: ValueType,
        dims: I,
    ) -> Result<TensorType, TypeError> {
        let mut dims: SmallVec<[Dimension; 4]> = dims.into_iter().collect();
        dims.sort_by(|a, b| a.name.cmp(&b.name));
        for pair in dims.windows(2) {
            if pair[0].name == pair[1].name {
                return Err(TypeError::DuplicateDimension(pair[0].name.clone()));
            }
        }
        Ok(TensorType { value_type, dims })
    }

    /// Create a type with no dimensions.
    pub fn scalar(value_type: ValueType) -> TensorType {
        TensorType {
            value_type,
            dims: SmallVec::new(),
        }
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// Return the dimensions, sorted by name.
    pub fn dimensions(&self) -> &[Dimension] {
        &self.dims
    }

    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.dims.iter().find(|d| d.name == name)
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }

    /// Return the number of cells if every dimension is indexed with a known
    /// size.
    pub fn dense_len(&self) -> Option<usize> {
        self.dims
            .iter()
            .try_fold(1usize, |len, dim| dim.fixed_size().map(|size| len * size))
    }

    /// Return the type produced by joining tensors of type `self` and `other`.
    ///
    /// The result has the union of the dimensions. Dimensions that occur on
    /// both sides must be compatible.
    pub fn join(&self, other: &TensorType) -> Result<TensorType, TypeError> {
        let value_type = if self.is_scalar() {
            other.value_type
        } else if other.is_scalar() {
            self.value_type
        } else {
            self.value_type.max(other.value_type)
        };

        let (lhs, rhs) = (&self.dims, &other.dims);
        let mut dims: SmallVec<[Dimension; 4]> = SmallVec::with_capacity(lhs.len() + rhs.len());
        let (mut i, mut j) = (0, 0);
        while i < lhs.len() || j < rhs.len() {
            let order = match (lhs.get(i), rhs.get(j)) {
                (Some(a), Some(b)) => a.name.cmp(&b.name),
                (Some(_), None) => Ordering::Less,
                _ => Ordering::Greater,
            };
            match order {
                Ordering::Less => {
                    dims.push(lhs[i].clone());
                    i += 1;
                }
                Ordering::Greater => {
                    dims.push(rhs[j].clone());
                    j += 1;
                }
                Ordering::Equal => {
                    let size = join_sizes(&lhs[i].name, &lhs[i].size, &rhs[j].size)?;
                    dims.push(Dimension::new(lhs[i].name.clone(), size));
                    i += 1;
                    j += 1;
                }
            }
        }

        Ok(TensorType { value_type, dims })
    }

    /// Return the type produced by reducing over `dims`.
    ///
    /// An empty list reduces over all dimensions. The result of reducing to a
    /// scalar is always a double.
    pub fn reduce<S: AsRef<str>>(&self, dims: &[S]) -> Result<TensorType, TypeError> {
        for dim in dims {
            self.require(dim.as_ref())?;
        }
        let remaining: SmallVec<[Dimension; 4]> = if dims.is_empty() {
            SmallVec::new()
        } else {
            self.dims
                .iter()
                .filter(|d| !dims.iter().any(|r| r.as_ref() == d.name))
                .cloned()
                .collect()
        };
        let value_type = if remaining.is_empty() {
            ValueType::Double
        } else {
            self.value_type
        };
        Ok(TensorType {
            value_type,
            dims: remaining,
        })
    }

    /// Return the type produced by renaming dimensions `from[i]` to `to[i]`.
    pub fn rename<S: AsRef<str>>(&self, from: &[S], to: &[S]) -> Result<TensorType, TypeError> {
        if from.len() != to.len() {
            return Err(TypeError::RenameArity {
                from: from.len(),
                to: to.len(),
            });
        }
        for dim in from {
            self.require(dim.as_ref())?;
        }
        let dims = self.dims.iter().map(|dim| {
            match from.iter().position(|f| f.as_ref() == dim.name) {
                Some(i) => dim.renamed(to[i].as_ref()),
                None => dim.clone(),
            }
        });
        Self::new(self.value_type, dims)
    }

    /// Return the type produced by concatenating along `dim`.
    ///
    /// An operand which lacks `dim` is treated as having it with size 1.
    pub fn concat(&self, other: &TensorType, dim: &str) -> Result<TensorType, TypeError> {
        let size_of = |ty: &TensorType| match ty.dimension(dim).map(|d| &d.size) {
            None => Ok(DimSize::Indexed(1)),
            Some(DimSize::Mapped) => Err(TypeError::IncompatibleKinds {
                dim: dim.to_string(),
            }),
            Some(size) => Ok(size.clone()),
        };
        let size = match (size_of(self)?, size_of(other)?) {
            (DimSize::Indexed(a), DimSize::Indexed(b)) => DimSize::Indexed(a + b),
            _ => DimSize::Unbound,
        };

        let without = |ty: &TensorType| TensorType {
            value_type: ty.value_type,
            dims: ty.dims.iter().filter(|d| d.name != dim).cloned().collect(),
        };
        let mut joined = without(self).join(&without(other))?;
        joined.value_type = self.value_type.max(other.value_type);
        let dims = joined
            .dims
            .into_iter()
            .chain(std::iter::once(Dimension::new(dim, size)));
        Self::new(joined.value_type, dims)
    }

    fn require(&self, dim: &str) -> Result<&Dimension, TypeError> {
        self.dimension(dim).ok_or_else(|| TypeError::UnknownDimension {
            dim: dim.to_string(),
            ty: self.clone(),
        })
    }

    /// Parse a type spec at the start of `spec`.
    ///
    /// Returns the type and the number of bytes consumed, which allows the
    /// spec to be embedded in a larger string such as an expression.
    pub fn parse_prefix(spec: &str) -> Result<(TensorType, usize), TypeError> {
        let mut parser = SpecParser { spec, pos: 0 };
        let ty = parser.parse()?;
        Ok((ty, parser.pos))
    }
}

fn join_sizes(dim: &str, lhs: &DimSize, rhs: &DimSize) -> Result<DimSize, TypeError> {
    match (lhs, rhs) {
        (DimSize::Indexed(a), DimSize::Indexed(b)) if a == b => Ok(DimSize::Indexed(*a)),
        (DimSize::Indexed(a), DimSize::Indexed(b)) => Err(TypeError::IncompatibleSizes {
            dim: dim.to_string(),
            lhs: *a,
            rhs: *b,
        }),
        (DimSize::Indexed(_) | DimSize::Unbound, DimSize::Indexed(_) | DimSize::Unbound) => {
            Ok(DimSize::Unbound)
        }
        (DimSize::Mapped, DimSize::Mapped) => Ok(DimSize::Mapped),
        _ => Err(TypeError::IncompatibleKinds {
            dim: dim.to_string(),
        }),
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value_type {
            ValueType::Double => write!(f, "tensor(")?,
            vt => write!(f, "tensor<{}>(", vt.name())?,
        }
        for (i, dim) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", dim)?;
        }
        write!(f, ")")
    }
}

impl FromStr for TensorType {
    type Err = TypeError;

    fn from_str(spec: &str) -> Result<TensorType, TypeError> {
        let (ty, len) = TensorType::parse_prefix(spec)?;
        if !spec[len..].trim().is_empty() {
            return Err(TypeError::InvalidSpec {
                spec: spec.to_string(),
                reason: "unexpected trailing characters",
            });
        }
        Ok(ty)
    }
}

struct SpecParser<'a> {
    spec: &'a str,
    pos: usize,
}

impl SpecParser<'_> {
    fn error(&self, reason: &'static str) -> TypeError {
        TypeError::InvalidSpec {
            spec: self.spec.to_string(),
            reason,
        }
    }

    fn rest(&self) -> &str {
        &self.spec[self.pos..]
    }

    fn skip_whitespace(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.spec.len() - trimmed.len();
    }

    fn eat(&mut self, ch: char) -> bool {
        self.skip_whitespace();
        if self.rest().starts_with(ch) {
            self.pos += ch.len_utf8();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, ch: char, reason: &'static str) -> Result<(), TypeError> {
        if self.eat(ch) {
            Ok(())
        } else {
            Err(self.error(reason))
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &str {
        self.skip_whitespace();
        let start = self.pos;
        let len = self
            .rest()
            .char_indices()
            .find(|&(_, c)| !pred(c))
            .map(|(i, _)| i)
            .unwrap_or(self.rest().len());
        self.pos += len;
        &self.spec[start..self.pos]
    }

    fn parse(&mut self) -> Result<TensorType, TypeError> {
        if self.take_while(|c| c.is_ascii_alphabetic()) != "tensor" {
            return Err(self.error("expected \"tensor\""));
        }

        let mut value_type = ValueType::Double;
        if self.eat('<') {
            let name = self.take_while(|c| c.is_ascii_alphanumeric());
            value_type =
                ValueType::from_name(name).ok_or_else(|| self.error("unknown cell type"))?;
            self.expect('>', "expected '>' after cell type")?;
        }

        self.expect('(', "expected '(' before dimensions")?;
        let mut dims = Vec::new();
        if !self.eat(')') {
            loop {
                dims.push(self.parse_dimension()?);
                if self.eat(')') {
                    break;
                }
                self.expect(',', "expected ',' or ')' after dimension")?;
            }
        }

        TensorType::new(value_type, dims).map_err(|err| match err {
            TypeError::DuplicateDimension(_) => self.error("dimension is repeated"),
            other => other,
        })
    }

    fn parse_dimension(&mut self) -> Result<Dimension, TypeError> {
        let name = self
            .take_while(|c| c.is_ascii_alphanumeric() || c == '_')
            .to_string();
        if name.is_empty() {
            return Err(self.error("expected dimension name"));
        }
        if self.eat('{') {
            self.expect('}', "expected '}' after '{'")?;
            return Ok(Dimension::mapped(name));
        }
        self.expect('[', "expected '[' or '{' after dimension name")?;
        let digits = self.take_while(|c| c.is_ascii_digit());
        let dim = if digits.is_empty() {
            Dimension::unbound(name)
        } else {
            let size = digits
                .parse()
                .map_err(|_| self.error("invalid dimension size"))?;
            Dimension::indexed(name, size)
        };
        self.expect(']', "expected ']' after dimension size")?;
        Ok(dim)
    }
}
