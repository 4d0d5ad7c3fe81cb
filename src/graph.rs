//! In-memory representation of an imported model graph.

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rankc_tensor::{self as tensor, TensorType, TensorValue, ValueType};
use smallvec::SmallVec;

use crate::expr::{Aggregator, BinaryOp, UnaryFn};

mod builder;
mod reader;

pub use builder::GraphBuilder;
pub use reader::{GraphSource, InMemoryGraphs, ModelDirectory};

/// Name of the signature used when a model reference does not specify one.
pub const DEFAULT_SIGNATURE: &str = "default";

/// ID of a node in an [`ImportedGraph`].
///
/// Nodes are stored in an arena in the order they were added, so a node's
/// inputs always have smaller IDs than the node itself.
pub type NodeId = usize;

/// Size of a dimension of a graph value.
#[derive(Clone, Debug, PartialEq)]
pub enum Dimension {
    /// A dimension whose size is fixed and specified as part of the model.
    Fixed(usize),

    /// A dimension whose size is determined at runtime, eg. a batch size.
    Symbolic(String),
}

impl Dimension {
    pub fn fixed(&self) -> Option<usize> {
        match self {
            Dimension::Fixed(size) => Some(*size),
            Dimension::Symbolic(_) => None,
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Fixed(size) => write!(f, "{}", size),
            Dimension::Symbolic(name) => write!(f, "{}", name),
        }
    }
}

/// Cell type and positional shape of a graph value.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeShape {
    pub value_type: ValueType,
    pub dims: SmallVec<[Dimension; 4]>,
}

impl NodeShape {
    pub fn new(value_type: ValueType, dims: impl IntoIterator<Item = Dimension>) -> NodeShape {
        NodeShape {
            value_type,
            dims: dims.into_iter().collect(),
        }
    }

    pub fn fixed(value_type: ValueType, shape: &[usize]) -> NodeShape {
        Self::new(value_type, shape.iter().map(|&size| Dimension::Fixed(size)))
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Return the tensor type of this value.
    ///
    /// Axis `i` becomes the dimension `d<i>`. Symbolic sizes become unbound
    /// indexed dimensions.
    pub fn tensor_type(&self) -> TensorType {
        let dims = self.dims.iter().enumerate().map(|(i, dim)| match dim {
            Dimension::Fixed(size) => tensor::Dimension::indexed(dim_name(i), *size),
            Dimension::Symbolic(_) => tensor::Dimension::unbound(dim_name(i)),
        });
        // Positional names are unique.
        TensorType::new(self.value_type, dims).unwrap_or_else(|_| TensorType::scalar(self.value_type))
    }
}

impl fmt::Display for NodeShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.value_type.name())?;
        for (i, dim) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", dim)?;
        }
        write!(f, "]")
    }
}

/// Return the name of the dimension for axis `axis` of a graph value.
pub fn dim_name(axis: usize) -> String {
    format!("d{}", axis)
}

/// Operator kinds supported in imported graphs.
///
/// Axes are stored as non-negative indices once a node has been added to a
/// graph. Negative axes passed to [`GraphBuilder::add_node`] are resolved
/// against the rank of the node's first input.
#[derive(Clone, Debug, PartialEq)]
pub enum OpKind {
    /// Model input, bound to a rank profile function.
    Input,

    /// Constant tensor. Dimensions are named positionally.
    Constant(Arc<TensorValue>),

    Identity,

    /// Element-wise arithmetic with broadcasting.
    Binary(BinaryOp),

    /// Matrix multiplication over the last two axes.
    MatMul,

    /// `alpha * A' B' + beta * C`, where `A'` and `B'` are optionally
    /// transposed.
    Gemm {
        alpha: f64,
        beta: f64,
        trans_a: bool,
        trans_b: bool,
    },

    /// Element-wise activation.
    Unary(UnaryFn),

    /// Reduction over `axes`, or all axes if empty.
    Reduce {
        aggregator: Aggregator,
        axes: SmallVec<[i32; 4]>,
        keep_dims: bool,
    },

    Softmax {
        axis: i32,
    },

    /// Permute axes. An empty permutation reverses the axes.
    Transpose {
        perm: SmallVec<[i32; 4]>,
    },

    Concat {
        axis: i32,
    },

    /// Remove unit axes. If `axes` is empty, all unit axes are removed.
    Squeeze {
        axes: SmallVec<[i32; 4]>,
    },

    /// Insert unit axes at positions `axes` of the output.
    Unsqueeze {
        axes: SmallVec<[i32; 4]>,
    },
}

impl OpKind {
    /// Return the operator name used in model files and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Input => "Input",
            OpKind::Constant(_) => "Constant",
            OpKind::Identity => "Identity",
            OpKind::Binary(BinaryOp::Add) => "Add",
            OpKind::Binary(BinaryOp::Sub) => "Sub",
            OpKind::Binary(BinaryOp::Mul) => "Mul",
            OpKind::Binary(BinaryOp::Div) => "Div",
            OpKind::MatMul => "MatMul",
            OpKind::Gemm { .. } => "Gemm",
            OpKind::Unary(UnaryFn::Exp) => "Exp",
            OpKind::Unary(UnaryFn::Log) => "Log",
            OpKind::Unary(UnaryFn::Sqrt) => "Sqrt",
            OpKind::Unary(UnaryFn::Tanh) => "Tanh",
            OpKind::Unary(UnaryFn::Sigmoid) => "Sigmoid",
            OpKind::Unary(UnaryFn::Relu) => "Relu",
            OpKind::Unary(UnaryFn::Neg) => "Neg",
            OpKind::Unary(UnaryFn::Abs) => "Abs",
            OpKind::Reduce { aggregator, .. } => match aggregator {
                Aggregator::Sum => "ReduceSum",
                Aggregator::Avg => "ReduceMean",
                Aggregator::Max => "ReduceMax",
                Aggregator::Min => "ReduceMin",
                Aggregator::Prod => "ReduceProd",
                Aggregator::Count => "ReduceCount",
            },
            OpKind::Softmax { .. } => "Softmax",
            OpKind::Transpose { .. } => "Transpose",
            OpKind::Concat { .. } => "Concat",
            OpKind::Squeeze { .. } => "Squeeze",
            OpKind::Unsqueeze { .. } => "Unsqueeze",
        }
    }
}

/// A node in an [`ImportedGraph`].
#[derive(Clone, Debug)]
pub struct GraphNode {
    name: String,
    op: OpKind,
    inputs: SmallVec<[NodeId; 3]>,
    shape: NodeShape,
    exported: bool,
}

impl GraphNode {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn op(&self) -> &OpKind {
        &self.op
    }

    pub fn inputs(&self) -> &[NodeId] {
        &self.inputs
    }

    /// Return the inferred shape of this node's output.
    pub fn shape(&self) -> &NodeShape {
        &self.shape
    }

    /// Return true if this node should always be emitted as a separate
    /// function.
    pub fn exported(&self) -> bool {
        self.exported
    }
}

/// A typed model graph.
///
/// Graphs are created with a [`GraphBuilder`] and are immutable afterwards.
#[derive(Debug)]
pub struct ImportedGraph {
    name: String,
    nodes: Vec<GraphNode>,
    consumers: Vec<usize>,
    inputs: BTreeMap<String, NodeId>,
    signatures: BTreeMap<String, BTreeMap<String, NodeId>>,
}

impl ImportedGraph {
    /// Return the model name, used as a prefix for generated names.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node(&self, id: NodeId) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    /// Return the number of times node `id` is used as an input by other
    /// nodes.
    pub fn consumer_count(&self, id: NodeId) -> usize {
        self.consumers.get(id).copied().unwrap_or(0)
    }

    /// Return the model inputs and their required types, ordered by name.
    pub fn inputs(&self) -> impl Iterator<Item = (&str, TensorType)> + '_ {
        self.inputs
            .iter()
            .map(|(name, &id)| (name.as_str(), self.nodes[id].shape.tensor_type()))
    }

    pub fn input_type(&self, name: &str) -> Option<TensorType> {
        self.inputs
            .get(name)
            .map(|&id| self.nodes[id].shape.tensor_type())
    }

    /// Return the names of the signatures in the model.
    pub fn signatures(&self) -> impl Iterator<Item = &str> + '_ {
        self.signatures.keys().map(|s| s.as_str())
    }

    /// Return the outputs of a signature, mapping output name to node.
    pub fn outputs(&self, signature: &str) -> Option<&BTreeMap<String, NodeId>> {
        self.signatures.get(signature)
    }

    /// Return all outputs as `signature.output` names.
    pub fn qualified_output_names(&self) -> Vec<String> {
        self.signatures
            .iter()
            .flat_map(|(sig, outputs)| outputs.keys().map(move |out| format!("{}.{}", sig, out)))
            .collect()
    }
}

/// Derive a model name from a model file path.
///
/// The name is the file name without its extension, with every character
/// other than ASCII alphanumerics and `_` replaced by `_`.
pub fn model_name(path: &str) -> String {
    let stem = Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    sanitize_name(&stem)
}

/// Replace characters which are not valid in expression names with `_`.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Errors reading or constructing an imported graph.
#[derive(Debug)]
pub enum GraphError {
    /// The model file could not be read.
    ReadFailed { path: PathBuf, error: std::io::Error },

    /// The model file could not be parsed.
    ParseFailed {
        path: PathBuf,
        error: serde_json::Error,
    },

    /// Two nodes have the same name.
    DuplicateNode(String),

    /// A node refers to an input which is not an earlier node in the graph.
    UnknownNode { node: String, input: String },

    /// A node uses an operator which is not supported.
    UnsupportedOp { node: String, op: String },

    /// A node's inputs or attributes are invalid for its operator.
    InvalidNode { node: String, reason: String },

    /// A signature output refers to a node that does not exist.
    UnknownOutputNode {
        signature: String,
        output: String,
        node: String,
    },
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFailed { path, error } => {
                write!(f, "failed to read model {}: {}", path.display(), error)
            }
            Self::ParseFailed { path, error } => {
                write!(f, "failed to parse model {}: {}", path.display(), error)
            }
            Self::DuplicateNode(name) => write!(f, "node '{}' is defined more than once", name),
            Self::UnknownNode { node, input } => write!(
                f,
                "node '{}' refers to '{}', which is not an earlier node",
                node, input
            ),
            Self::UnsupportedOp { node, op } => {
                write!(f, "node '{}' uses unsupported operator '{}'", node, op)
            }
            Self::InvalidNode { node, reason } => write!(f, "node '{}' is invalid: {}", node, reason),
            Self::UnknownOutputNode {
                signature,
                output,
                node,
            } => write!(
                f,
                "output '{}.{}' refers to unknown node '{}'",
                signature, output, node
            ),
        }
    }
}

impl Error for GraphError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::ReadFailed { error, .. } => Some(error),
            Self::ParseFailed { error, .. } => Some(error),
            _ => None,
        }
    }
}
