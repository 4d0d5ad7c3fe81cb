//! Translation of imported graphs into ranking expressions.
//!
//! Graph values are positional: axis `i` of a node's output is the
//! dimension `d<i>`. Each node is translated to an expression whose type is
//! exactly the node's positional type. Operators which combine operands
//! whose axes do not line up by position (broadcasting, matrix products,
//! transposes) rename the operand dimensions first.

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use rankc_tensor::{Dimension, TensorType, TensorValue, ValueError, ValueType};

use crate::expr::{Aggregator, BinaryOp, Expr, ExprRef, ModelRef, UnaryFn};
use crate::graph::{
    dim_name, sanitize_name, GraphNode, ImportedGraph, NodeId, NodeShape, OpKind,
    DEFAULT_SIGNATURE,
};

/// Prefix of the names of functions generated for graph nodes.
pub const FUNCTION_PREFIX: &str = "imported_ml_function_";

/// Result of converting one output of an imported graph.
#[derive(Clone, Debug)]
pub struct Conversion {
    /// Expression for the requested output. Constants are referenced as
    /// `constant(name)` and promoted nodes by function name.
    pub expression: ExprRef,

    /// Functions generated for nodes which are used more than once or are
    /// marked as exported.
    pub functions: BTreeMap<String, ExprRef>,

    /// Constants referenced by the expression and functions.
    pub constants: BTreeMap<String, Arc<TensorValue>>,

    /// Model inputs used by the output, with the type that the function
    /// bound to each input must have.
    pub inputs: BTreeMap<String, TensorType>,
}

/// Errors converting a graph output into an expression.
#[derive(Clone, Debug, PartialEq)]
pub enum ConvertError {
    /// The model has no signature with the requested name.
    UnknownSignature {
        model: String,
        signature: String,
        available: Vec<String>,
    },

    /// The requested output does not exist.
    UnknownOutput {
        model: String,
        output: String,
        available: Vec<String>,
    },

    /// No output was requested and the signature has more than one.
    AmbiguousOutput {
        model: String,
        available: Vec<String>,
    },

    /// A model input has no function with the same name in the rank profile.
    MissingInputBinding { input: String, required: TensorType },

    /// A constant could not be transformed to match its use.
    InvalidConstant { node: String, error: ValueError },
}

impl fmt::Display for ConvertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownSignature {
                model,
                signature,
                available,
            } => write!(
                f,
                "Model '{}' does not have a signature named '{}'. Available signatures: {}",
                model,
                signature,
                available.join(", ")
            ),
            Self::UnknownOutput {
                model,
                output,
                available,
            } => write!(
                f,
                "No expressions named '{}' in model '{}'. Available expressions: {}",
                output,
                model,
                available.join(", ")
            ),
            Self::AmbiguousOutput { model, available } => write!(
                f,
                "Model '{}' has multiple outputs. Specify one of: {}",
                model,
                available.join(", ")
            ),
            Self::MissingInputBinding { input, required } => write!(
                f,
                "Model refers input '{}' of type {} but no function with this name is present in the rank profile",
                input, required
            ),
            Self::InvalidConstant { node, error } => {
                write!(f, "Constant '{}' can not be used: {}", node, error)
            }
        }
    }
}

impl Error for ConvertError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidConstant { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Return the name of the function generated for `node` of model `model`.
pub fn function_name(model: &str, node: &str) -> String {
    format!("{}{}_{}", FUNCTION_PREFIX, model, sanitize_name(node))
}

/// Return the name of the constant generated for `node` of model `model`.
pub fn constant_name(model: &str, node: &str) -> String {
    format!("{}_{}", model, sanitize_name(node))
}

/// Find the node for the output requested by `model_ref`.
fn resolve_output(graph: &ImportedGraph, model_ref: &ModelRef) -> Result<NodeId, ConvertError> {
    let model = Path::new(&model_ref.model)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| model_ref.model.clone());

    let signature = model_ref.signature().unwrap_or(DEFAULT_SIGNATURE);
    let outputs = graph
        .outputs(signature)
        .ok_or_else(|| ConvertError::UnknownSignature {
            model: model.clone(),
            signature: signature.to_string(),
            available: graph.signatures().map(|s| s.to_string()).collect(),
        })?;

    match model_ref.output_name() {
        Some(name) => outputs
            .get(name)
            .copied()
            .ok_or_else(|| ConvertError::UnknownOutput {
                model,
                output: name.to_string(),
                available: graph.qualified_output_names(),
            }),
        None => {
            let mut iter = outputs.values();
            match (iter.next(), iter.next()) {
                (Some(&id), None) => Ok(id),
                (None, _) => Err(ConvertError::UnknownOutput {
                    model,
                    output: signature.to_string(),
                    available: graph.qualified_output_names(),
                }),
                (Some(_), Some(_)) => Err(ConvertError::AmbiguousOutput {
                    model,
                    available: graph.qualified_output_names(),
                }),
            }
        }
    }
}

/// Convert the output of `graph` requested by `model_ref` into an
/// expression.
///
/// `is_bound` reports whether the rank profile has a function with a given
/// name. Every model input used by the output must be bound.
pub fn convert(
    graph: &ImportedGraph,
    model_ref: &ModelRef,
    is_bound: &dyn Fn(&str) -> bool,
) -> Result<Conversion, ConvertError> {
    let output = resolve_output(graph, model_ref)?;
    let mut converter = Converter {
        graph,
        is_bound,
        memo: vec![None; graph.nodes().len()],
        functions: BTreeMap::new(),
        constants: BTreeMap::new(),
        inputs: BTreeMap::new(),
    };
    let expression = converter.translate(output, true)?;
    Ok(Conversion {
        expression,
        functions: converter.functions,
        constants: converter.constants,
        inputs: converter.inputs,
    })
}

/// How an operand's dimensions are adapted to the positions used by its
/// consumer.
#[derive(Default)]
struct Adapt {
    /// Unit dimensions which are summed away.
    remove: Vec<String>,

    /// New names for the remaining dimensions, in axis order.
    rename: Vec<(String, String)>,
}

impl Adapt {
    /// Build an adaptation from a target for each axis of the operand, where
    /// `None` removes the axis.
    fn from_targets(targets: impl IntoIterator<Item = Option<String>>) -> Adapt {
        let mut adapt = Adapt::default();
        for (axis, target) in targets.into_iter().enumerate() {
            match target {
                Some(to) => adapt.rename.push((dim_name(axis), to)),
                None => adapt.remove.push(dim_name(axis)),
            }
        }
        adapt
    }

    /// Rename each axis of the operand to the output axis `map[i]`.
    fn positions(map: impl IntoIterator<Item = usize>) -> Adapt {
        Self::from_targets(map.into_iter().map(|pos| Some(dim_name(pos))))
    }

    fn renames(&self) -> bool {
        self.rename.iter().any(|(from, to)| from != to)
    }
}

struct Converter<'a> {
    graph: &'a ImportedGraph,
    is_bound: &'a dyn Fn(&str) -> bool,
    memo: Vec<Option<ExprRef>>,
    functions: BTreeMap<String, ExprRef>,
    constants: BTreeMap<String, Arc<TensorValue>>,
    inputs: BTreeMap<String, TensorType>,
}

impl Converter<'_> {
    fn node(&self, id: NodeId) -> &GraphNode {
        &self.graph.nodes()[id]
    }

    fn shape(&self, id: NodeId) -> &NodeShape {
        self.node(id).shape()
    }

    /// Return the expression for node `id`.
    ///
    /// Nodes other than the requested output which are used more than once,
    /// or marked as exported, are emitted as functions and referenced by
    /// name.
    fn translate(&mut self, id: NodeId, is_output: bool) -> Result<ExprRef, ConvertError> {
        if let Some(expr) = &self.memo[id] {
            return Ok(expr.clone());
        }

        let graph = self.graph;
        let node = &graph.nodes()[id];
        let expr = self.translate_op(node)?;

        let promote = !is_output
            && !matches!(node.op(), OpKind::Input | OpKind::Constant(_))
            && (node.exported() || graph.consumer_count(id) > 1);
        let expr = if promote {
            let name = function_name(graph.name(), node.name());
            self.functions.insert(name.clone(), expr);
            Expr::variable(name)
        } else {
            expr
        };

        self.memo[id] = Some(expr.clone());
        Ok(expr)
    }

    /// Return the expression for input `id` of a node, adapted to the
    /// consumer's dimension positions.
    ///
    /// Constants which have no other consumers have the adaptation applied to
    /// their value instead.
    fn operand(&mut self, id: NodeId, adapt: &Adapt) -> Result<ExprRef, ConvertError> {
        let graph = self.graph;
        let node = &graph.nodes()[id];
        if let OpKind::Constant(value) = node.op() {
            if graph.consumer_count(id) <= 1 {
                let folded = fold_constant(value, adapt).map_err(|error| {
                    ConvertError::InvalidConstant {
                        node: node.name().to_string(),
                        error,
                    }
                })?;
                let name = constant_name(graph.name(), node.name());
                self.constants.insert(name.clone(), folded);
                return Ok(Expr::constant(name));
            }
        }

        let mut expr = self.translate(id, false)?;
        if !adapt.remove.is_empty() {
            expr = Expr::reduce(expr, Aggregator::Sum, adapt.remove.iter().cloned());
        }
        if adapt.renames() {
            let (from, to) = adapt.rename.iter().cloned().unzip();
            expr = Expr::rename(expr, from, to);
        }
        Ok(expr)
    }

    /// Return input `id` with its axes unchanged.
    fn operand_as_is(&mut self, id: NodeId) -> Result<ExprRef, ConvertError> {
        let rank = self.shape(id).rank();
        self.operand(id, &Adapt::positions(0..rank))
    }

    /// Adapt input `id` for broadcasting against an output of shape `out`.
    ///
    /// Axes are aligned from the right. Unit axes broadcast against larger
    /// axes are removed.
    fn broadcast_operand(&mut self, id: NodeId, out: &NodeShape) -> Result<ExprRef, ConvertError> {
        let shape = self.shape(id);
        let pad = out.rank() - shape.rank().min(out.rank());
        let one = crate::graph::Dimension::Fixed(1);
        let adapt = Adapt::from_targets(shape.dims.iter().enumerate().map(|(axis, dim)| {
            let pos = axis + pad;
            if *dim == one && out.dims.get(pos) != Some(&one) {
                None
            } else {
                Some(dim_name(pos))
            }
        }));
        self.operand(id, &adapt)
    }

    fn translate_op(&mut self, node: &GraphNode) -> Result<ExprRef, ConvertError> {
        let inputs = node.inputs();
        let out = node.shape();
        let rank = out.rank();

        let expr = match node.op() {
            OpKind::Input => {
                let name = node.name();
                let required = out.tensor_type();
                if !(self.is_bound)(name) {
                    return Err(ConvertError::MissingInputBinding {
                        input: name.to_string(),
                        required,
                    });
                }
                self.inputs.insert(name.to_string(), required);
                Expr::variable(name)
            }
            OpKind::Constant(value) => {
                let name = constant_name(self.graph.name(), node.name());
                self.constants.insert(name.clone(), value.clone());
                Expr::constant(name)
            }
            OpKind::Identity => self.operand_as_is(inputs[0])?,
            OpKind::Unary(function) => Expr::map(self.operand_as_is(inputs[0])?, *function),
            OpKind::Binary(op) => {
                let lhs = self.broadcast_operand(inputs[0], out)?;
                let rhs = self.broadcast_operand(inputs[1], out)?;
                Expr::join(lhs, rhs, *op)
            }
            OpKind::MatMul => {
                // Contract the last axis of A with the second-last axis of B
                // over a new dimension `d<rank>`.
                let a = Adapt::positions((0..rank).map(|i| if i == rank - 1 { rank } else { i }));
                let b = Adapt::positions((0..rank).map(|i| if i == rank - 2 { rank } else { i }));
                let product = Expr::join(
                    self.operand(inputs[0], &a)?,
                    self.operand(inputs[1], &b)?,
                    BinaryOp::Mul,
                );
                Expr::reduce(product, Aggregator::Sum, [dim_name(rank)])
            }
            OpKind::Gemm {
                alpha,
                beta,
                trans_a,
                trans_b,
            } => {
                // Output axes are `d0` (M) and `d1` (N). K is contracted over `d2`.
                let a = if *trans_a {
                    Adapt::positions([2, 0])
                } else {
                    Adapt::positions([0, 2])
                };
                let b = if *trans_b {
                    Adapt::positions([1, 2])
                } else {
                    Adapt::positions([2, 1])
                };
                let product = Expr::join(
                    self.operand(inputs[0], &a)?,
                    self.operand(inputs[1], &b)?,
                    BinaryOp::Mul,
                );
                let scaled = Expr::arithmetic(
                    Expr::reduce(product, Aggregator::Sum, [dim_name(2)]),
                    Expr::number(*alpha),
                    BinaryOp::Mul,
                );
                match inputs.get(2) {
                    Some(&c) => {
                        let bias = Expr::arithmetic(
                            self.broadcast_operand(c, out)?,
                            Expr::number(*beta),
                            BinaryOp::Mul,
                        );
                        Expr::join(scaled, bias, BinaryOp::Add)
                    }
                    None => scaled,
                }
            }
            OpKind::Reduce {
                aggregator,
                axes,
                keep_dims,
            } => {
                let input = inputs[0];
                let in_rank = self.shape(input).rank();
                let in_type = self.shape(input).value_type;
                let reduced: Vec<usize> = if axes.is_empty() {
                    (0..in_rank).collect()
                } else {
                    axes.iter().map(|&axis| axis as usize).collect()
                };
                let arg = self.operand_as_is(input)?;
                let expr = Expr::reduce(arg, *aggregator, reduced.iter().map(|&i| dim_name(i)));
                if *keep_dims {
                    Expr::join(expr, unit_tensor(in_type, &reduced)?, BinaryOp::Mul)
                } else {
                    // Close the gaps left by the reduced axes.
                    let kept = (0..in_rank).filter(|i| !reduced.contains(i));
                    rename_to_positions(expr, kept)
                }
            }
            OpKind::Softmax { axis } => {
                let exp = Expr::map(self.operand_as_is(inputs[0])?, UnaryFn::Exp);
                let sum = Expr::reduce(exp.clone(), Aggregator::Sum, [dim_name(*axis as usize)]);
                Expr::join(exp, sum, BinaryOp::Div)
            }
            OpKind::Transpose { perm } => {
                // Output axis `i` is input axis `perm[i]`.
                let mut positions = vec![0; perm.len()];
                for (out_axis, &in_axis) in perm.iter().enumerate() {
                    positions[in_axis as usize] = out_axis;
                }
                self.operand(inputs[0], &Adapt::positions(positions))?
            }
            OpKind::Concat { axis } => {
                let dim = dim_name(*axis as usize);
                let mut expr = self.operand_as_is(inputs[0])?;
                for &input in &inputs[1..] {
                    let next = self.operand_as_is(input)?;
                    expr = Expr::concat(expr, next, dim.clone());
                }
                expr
            }
            OpKind::Squeeze { axes } => {
                let in_rank = self.shape(inputs[0]).rank();
                let mut next = 0;
                let targets = (0..in_rank).map(|i| {
                    if axes.contains(&(i as i32)) {
                        None
                    } else {
                        next += 1;
                        Some(dim_name(next - 1))
                    }
                });
                let adapt = Adapt::from_targets(targets.collect::<Vec<_>>());
                self.operand(inputs[0], &adapt)?
            }
            OpKind::Unsqueeze { axes } => {
                let inserted: Vec<usize> = axes.iter().map(|&axis| axis as usize).collect();
                let kept: Vec<usize> = (0..rank).filter(|i| !inserted.contains(i)).collect();
                let arg = self.operand(inputs[0], &Adapt::positions(kept))?;
                let in_type = self.shape(inputs[0]).value_type;
                Expr::join(arg, unit_tensor(in_type, &inserted)?, BinaryOp::Mul)
            }
        };
        Ok(expr)
    }
}

/// Apply an operand adaptation to a constant value.
fn fold_constant(value: &Arc<TensorValue>, adapt: &Adapt) -> Result<Arc<TensorValue>, ValueError> {
    if adapt.remove.is_empty() && !adapt.renames() {
        return Ok(value.clone());
    }
    let mut folded = value.remove_unit_dims(&adapt.remove)?;
    if adapt.renames() {
        let (from, to): (Vec<&str>, Vec<&str>) = adapt
            .rename
            .iter()
            .map(|(from, to)| (from.as_str(), to.as_str()))
            .unzip();
        folded = folded.rename(&from, &to)?;
    }
    Ok(Arc::new(folded))
}

/// Return a tensor of ones with unit dimensions at `axes`.
fn unit_tensor(value_type: ValueType, axes: &[usize]) -> Result<ExprRef, ConvertError> {
    let dims = axes.iter().map(|&axis| Dimension::indexed(dim_name(axis), 1));
    let value = TensorType::new(value_type, dims)
        .map_err(ValueError::from)
        .and_then(|ty| TensorValue::filled(ty, 1.0))
        .map_err(|error| ConvertError::InvalidConstant {
            node: "ones".to_string(),
            error,
        })?;
    Ok(Expr::literal(value))
}

/// Rename the dimensions `d<kept[i]>` of `expr` to `d<i>`.
fn rename_to_positions(expr: ExprRef, kept: impl Iterator<Item = usize>) -> ExprRef {
    let (from, to): (Vec<String>, Vec<String>) = kept
        .enumerate()
        .map(|(pos, axis)| (dim_name(axis), dim_name(pos)))
        .unzip();
    if from == to {
        expr
    } else {
        Expr::rename(expr, from, to)
    }
}
