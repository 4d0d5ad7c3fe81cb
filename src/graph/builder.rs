use std::collections::BTreeMap;
use std::sync::Arc;

use rankc_tensor::{TensorValue, ValueType};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::{dim_name, Dimension, GraphError, GraphNode, ImportedGraph, NodeId, NodeShape, OpKind};

/// Incrementally constructs an [`ImportedGraph`].
///
/// Nodes must be added after the nodes they use as inputs. The shape of each
/// node is inferred when it is added, so invalid combinations of operators
/// and input shapes are reported by the builder rather than during
/// conversion.
///
/// ```
/// use rankc::expr::BinaryOp;
/// use rankc::graph::{GraphBuilder, NodeShape, OpKind};
/// use rankc_tensor::ValueType;
///
/// let mut builder = GraphBuilder::new("adder");
/// builder.add_input("x", NodeShape::fixed(ValueType::Float, &[1, 4])).unwrap();
/// builder.add_input("y", NodeShape::fixed(ValueType::Float, &[4])).unwrap();
/// builder.add_node("sum", OpKind::Binary(BinaryOp::Add), &["x", "y"]).unwrap();
/// builder.add_output("default", "sum", "sum").unwrap();
/// let graph = builder.build();
///
/// assert_eq!(graph.nodes()[2].shape().to_string(), "float[1, 4]");
/// ```
pub struct GraphBuilder {
    name: String,
    nodes: Vec<GraphNode>,
    ids: FxHashMap<String, NodeId>,
    inputs: BTreeMap<String, NodeId>,
    signatures: BTreeMap<String, BTreeMap<String, NodeId>>,
}

impl GraphBuilder {
    /// Create a builder for a graph whose model name is `name`.
    pub fn new(name: &str) -> GraphBuilder {
        GraphBuilder {
            name: name.to_string(),
            nodes: Vec::new(),
            ids: FxHashMap::default(),
            inputs: BTreeMap::new(),
            signatures: BTreeMap::new(),
        }
    }

    /// Return the ID of the node named `name`.
    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.ids.get(name).copied()
    }

    /// Return the inferred shape of the node named `name`.
    pub fn node_shape(&self, name: &str) -> Option<&NodeShape> {
        self.node_id(name).map(|id| &self.nodes[id].shape)
    }

    /// Add a model input with the shape that the bound function must have.
    pub fn add_input(&mut self, name: &str, shape: NodeShape) -> Result<NodeId, GraphError> {
        let id = self.push(name, OpKind::Input, SmallVec::new(), shape)?;
        self.inputs.insert(name.to_string(), id);
        Ok(id)
    }

    /// Add a constant node.
    ///
    /// The value's dimensions must be named `d0`, `d1` ... after their
    /// position and have fixed sizes.
    pub fn add_constant(&mut self, name: &str, value: TensorValue) -> Result<NodeId, GraphError> {
        let shape = positional_shape(&value).ok_or_else(|| GraphError::InvalidNode {
            node: name.to_string(),
            reason: format!(
                "constant type {} does not have positional dimensions",
                value.ty()
            ),
        })?;
        self.push(name, OpKind::Constant(Arc::new(value)), SmallVec::new(), shape)
    }

    /// Add an operator node whose inputs are the earlier nodes named by
    /// `inputs`.
    pub fn add_node(
        &mut self,
        name: &str,
        mut op: OpKind,
        inputs: &[&str],
    ) -> Result<NodeId, GraphError> {
        let input_ids = inputs
            .iter()
            .map(|input| {
                self.node_id(input).ok_or_else(|| GraphError::UnknownNode {
                    node: name.to_string(),
                    input: input.to_string(),
                })
            })
            .collect::<Result<SmallVec<[NodeId; 3]>, _>>()?;
        let shape = {
            let input_shapes: SmallVec<[&NodeShape; 3]> =
                input_ids.iter().map(|&id| &self.nodes[id].shape).collect();
            infer_shape(&mut op, &input_shapes).map_err(|reason| GraphError::InvalidNode {
                node: name.to_string(),
                reason,
            })?
        };
        self.push(name, op, input_ids, shape)
    }

    /// Mark a node as exported, so it is always emitted as a separate
    /// function.
    pub fn set_exported(&mut self, name: &str) -> Result<(), GraphError> {
        let id = self.require(name)?;
        self.nodes[id].exported = true;
        Ok(())
    }

    /// Expose the node `node` as output `output` of `signature`.
    pub fn add_output(&mut self, signature: &str, output: &str, node: &str) -> Result<(), GraphError> {
        let id = self
            .node_id(node)
            .ok_or_else(|| GraphError::UnknownOutputNode {
                signature: signature.to_string(),
                output: output.to_string(),
                node: node.to_string(),
            })?;
        self.signatures
            .entry(signature.to_string())
            .or_default()
            .insert(output.to_string(), id);
        Ok(())
    }

    pub fn build(self) -> ImportedGraph {
        let mut consumers = vec![0; self.nodes.len()];
        for node in &self.nodes {
            for &input in &node.inputs {
                consumers[input] += 1;
            }
        }
        ImportedGraph {
            name: self.name,
            nodes: self.nodes,
            consumers,
            inputs: self.inputs,
            signatures: self.signatures,
        }
    }

    fn require(&self, name: &str) -> Result<NodeId, GraphError> {
        self.node_id(name).ok_or_else(|| GraphError::InvalidNode {
            node: name.to_string(),
            reason: "node does not exist".to_string(),
        })
    }

    fn push(
        &mut self,
        name: &str,
        op: OpKind,
        inputs: SmallVec<[NodeId; 3]>,
        shape: NodeShape,
    ) -> Result<NodeId, GraphError> {
        if self.ids.contains_key(name) {
            return Err(GraphError::DuplicateNode(name.to_string()));
        }
        let id = self.nodes.len();
        self.nodes.push(GraphNode {
            name: name.to_string(),
            op,
            inputs,
            shape,
            exported: false,
        });
        self.ids.insert(name.to_string(), id);
        Ok(id)
    }
}

/// Return the shape of a constant whose dimensions are named positionally.
fn positional_shape(value: &TensorValue) -> Option<NodeShape> {
    let ty = value.ty();
    let dims = (0..ty.rank())
        .map(|i| {
            ty.dimension(&dim_name(i))
                .and_then(|dim| dim.fixed_size())
                .map(Dimension::Fixed)
        })
        .collect::<Option<SmallVec<[Dimension; 4]>>>()?;
    Some(NodeShape {
        value_type: ty.value_type(),
        dims,
    })
}

/// Resolve an axis in `[-ndim, ndim - 1]` to a zero-based index.
///
/// Negative values count backwards from the last dimension.
fn resolve_axis(ndim: usize, axis: i32) -> Result<usize, String> {
    let resolved = if axis < 0 {
        ndim as i64 + axis as i64
    } else {
        axis as i64
    };
    if resolved < 0 || resolved >= ndim as i64 {
        return Err(format!("axis {} is out of range for rank {}", axis, ndim));
    }
    Ok(resolved as usize)
}

/// Resolve axes in place, then return them sorted and without duplicates.
fn resolve_axes(ndim: usize, axes: &mut SmallVec<[i32; 4]>) -> Result<SmallVec<[usize; 4]>, String> {
    let mut resolved = axes
        .iter()
        .map(|&axis| resolve_axis(ndim, axis))
        .collect::<Result<SmallVec<[usize; 4]>, _>>()?;
    resolved.sort();
    resolved.dedup();
    *axes = resolved.iter().map(|&axis| axis as i32).collect();
    Ok(resolved)
}

fn expect_inputs(inputs: &[&NodeShape], min: usize, max: usize) -> Result<(), String> {
    if inputs.len() < min || inputs.len() > max {
        let expected = if min == max {
            min.to_string()
        } else if max == usize::MAX {
            format!("at least {}", min)
        } else {
            format!("{} to {}", min, max)
        };
        return Err(format!(
            "expected {} inputs but got {}",
            expected,
            inputs.len()
        ));
    }
    Ok(())
}

/// Combine two sizes for the same axis that must be equal.
fn unify(a: &Dimension, b: &Dimension) -> Option<Dimension> {
    match (a, b) {
        (Dimension::Fixed(x), Dimension::Fixed(y)) => (x == y).then(|| a.clone()),
        (Dimension::Symbolic(_), _) => Some(a.clone()),
        (_, Dimension::Symbolic(_)) => Some(b.clone()),
    }
}

/// Compute the output shape of a broadcasting operation, right-aligning the
/// input shapes.
///
/// Also returns, for each input, whether every axis of that input is removed
/// because it has size 1 and is broadcast against a larger size.
fn broadcast(a: &NodeShape, b: &NodeShape) -> Result<(NodeShape, [bool; 2]), String> {
    let rank = a.rank().max(b.rank());
    let one = Dimension::Fixed(1);
    let padded = |shape: &NodeShape, i: usize| {
        let pad = rank - shape.rank();
        if i < pad {
            one.clone()
        } else {
            shape.dims[i - pad].clone()
        }
    };

    let mut dims = SmallVec::<[Dimension; 4]>::with_capacity(rank);
    for i in 0..rank {
        let (x, y) = (padded(a, i), padded(b, i));
        let dim = match (&x, &y) {
            _ if x == y => &x,
            (Dimension::Fixed(1), _) => &y,
            (_, Dimension::Fixed(1)) => &x,
            (Dimension::Fixed(_), Dimension::Fixed(_)) => {
                return Err(format!("shapes {} and {} can not be broadcast", a, b));
            }
            (Dimension::Symbolic(_), _) => &x,
            (_, Dimension::Symbolic(_)) => &y,
        };
        dims.push(dim.clone());
    }

    let all_removed = |shape: &NodeShape| {
        let pad = rank - shape.rank();
        shape
            .dims
            .iter()
            .enumerate()
            .all(|(i, dim)| dim == &one && dims[i + pad] != one)
    };
    let removed = [all_removed(a), all_removed(b)];

    Ok((
        NodeShape {
            value_type: a.value_type,
            dims,
        },
        removed,
    ))
}

/// Return the cell type of joining two operands.
///
/// A scalar operand takes on the cell type of the other operand.
fn join_value_type(a: ValueType, b: ValueType, scalar: [bool; 2]) -> ValueType {
    match scalar {
        [true, _] => b,
        [false, true] => a,
        [false, false] => a.max(b),
    }
}

/// Infer the output shape of an operator and normalize its axes.
fn infer_shape(op: &mut OpKind, inputs: &[&NodeShape]) -> Result<NodeShape, String> {
    match op {
        OpKind::Input | OpKind::Constant(_) => {
            Err(format!("{} nodes can not have inputs", op.name()))
        }
        OpKind::Identity | OpKind::Unary(_) => {
            expect_inputs(inputs, 1, 1)?;
            Ok(inputs[0].clone())
        }
        OpKind::Binary(_) => {
            expect_inputs(inputs, 2, 2)?;
            let (a, b) = (inputs[0], inputs[1]);
            let (mut shape, removed) = broadcast(a, b)?;
            shape.value_type = join_value_type(a.value_type, b.value_type, removed);
            Ok(shape)
        }
        OpKind::MatMul => {
            expect_inputs(inputs, 2, 2)?;
            let (a, b) = (inputs[0], inputs[1]);
            let rank = a.rank();
            if rank < 2 || b.rank() != rank {
                return Err(format!(
                    "inputs must have the same rank of at least 2, got {} and {}",
                    a, b
                ));
            }
            let mut dims = SmallVec::<[Dimension; 4]>::with_capacity(rank);
            for i in 0..rank - 2 {
                let dim = unify(&a.dims[i], &b.dims[i])
                    .ok_or_else(|| format!("batch dimensions of {} and {} differ", a, b))?;
                dims.push(dim);
            }
            unify(&a.dims[rank - 1], &b.dims[rank - 2])
                .ok_or_else(|| format!("inner dimensions of {} and {} differ", a, b))?;
            dims.push(a.dims[rank - 2].clone());
            dims.push(b.dims[rank - 1].clone());
            Ok(NodeShape {
                value_type: a.value_type.max(b.value_type),
                dims,
            })
        }
        OpKind::Gemm {
            trans_a, trans_b, ..
        } => {
            expect_inputs(inputs, 2, 3)?;
            let (a, b) = (inputs[0], inputs[1]);
            if a.rank() != 2 || b.rank() != 2 {
                return Err(format!("A and B must be matrices, got {} and {}", a, b));
            }
            let (m, k_a) = if *trans_a {
                (&a.dims[1], &a.dims[0])
            } else {
                (&a.dims[0], &a.dims[1])
            };
            let (k_b, n) = if *trans_b {
                (&b.dims[1], &b.dims[0])
            } else {
                (&b.dims[0], &b.dims[1])
            };
            unify(k_a, k_b).ok_or_else(|| format!("inner dimensions of {} and {} differ", a, b))?;
            let product = NodeShape {
                value_type: a.value_type.max(b.value_type),
                dims: [m.clone(), n.clone()].into_iter().collect(),
            };
            let Some(c) = inputs.get(2) else {
                return Ok(product);
            };
            let (shape, removed) = broadcast(&product, c)?;
            if shape.dims != product.dims {
                return Err(format!("C of shape {} can not be broadcast to {}", c, product));
            }
            Ok(NodeShape {
                value_type: join_value_type(product.value_type, c.value_type, [false, removed[1]]),
                dims: product.dims,
            })
        }
        OpKind::Reduce {
            axes, keep_dims, ..
        } => {
            expect_inputs(inputs, 1, 1)?;
            let input = inputs[0];
            let mut resolved = resolve_axes(input.rank(), axes)?;
            if resolved.is_empty() {
                resolved = (0..input.rank()).collect();
            }
            let dims: SmallVec<[Dimension; 4]> = input
                .dims
                .iter()
                .enumerate()
                .filter_map(|(i, dim)| {
                    if !resolved.contains(&i) {
                        Some(dim.clone())
                    } else if *keep_dims {
                        Some(Dimension::Fixed(1))
                    } else {
                        None
                    }
                })
                .collect();
            let value_type = if !*keep_dims && dims.is_empty() {
                ValueType::Double
            } else {
                input.value_type
            };
            Ok(NodeShape { value_type, dims })
        }
        OpKind::Softmax { axis } => {
            expect_inputs(inputs, 1, 1)?;
            *axis = resolve_axis(inputs[0].rank(), *axis)? as i32;
            Ok(inputs[0].clone())
        }
        OpKind::Transpose { perm } => {
            expect_inputs(inputs, 1, 1)?;
            let input = inputs[0];
            let rank = input.rank();
            if perm.is_empty() {
                *perm = (0..rank as i32).rev().collect();
            }
            let mut seen: SmallVec<[usize; 4]> = perm
                .iter()
                .map(|&axis| resolve_axis(rank, axis))
                .collect::<Result<_, _>>()?;
            *perm = seen.iter().map(|&axis| axis as i32).collect();
            let dims = seen.iter().map(|&axis| input.dims[axis].clone()).collect();
            seen.sort();
            seen.dedup();
            if seen.len() != rank {
                return Err(format!("{:?} is not a permutation of rank {}", perm, rank));
            }
            Ok(NodeShape {
                value_type: input.value_type,
                dims,
            })
        }
        OpKind::Concat { axis } => {
            expect_inputs(inputs, 1, usize::MAX)?;
            let first = inputs[0];
            let rank = first.rank();
            let resolved = resolve_axis(rank, *axis)?;
            *axis = resolved as i32;

            let mut shape = first.clone();
            for input in &inputs[1..] {
                if input.rank() != rank {
                    return Err(format!("inputs {} and {} differ in rank", first, input));
                }
                for i in 0..rank {
                    let (x, y) = (&shape.dims[i], &input.dims[i]);
                    shape.dims[i] = if i == resolved {
                        match (x, y) {
                            (Dimension::Fixed(a), Dimension::Fixed(b)) => Dimension::Fixed(a + b),
                            (Dimension::Symbolic(_), _) => x.clone(),
                            (_, Dimension::Symbolic(_)) => y.clone(),
                        }
                    } else {
                        unify(x, y).ok_or_else(|| {
                            format!("inputs {} and {} differ outside axis {}", first, input, resolved)
                        })?
                    };
                }
                shape.value_type = shape.value_type.max(input.value_type);
            }
            Ok(shape)
        }
        OpKind::Squeeze { axes } => {
            expect_inputs(inputs, 1, 1)?;
            let input = inputs[0];
            let mut resolved = resolve_axes(input.rank(), axes)?;
            if resolved.is_empty() {
                resolved = (0..input.rank())
                    .filter(|&i| input.dims[i] == Dimension::Fixed(1))
                    .collect();
                *axes = resolved.iter().map(|&axis| axis as i32).collect();
            }
            if let Some(&axis) = resolved.iter().find(|&&i| input.dims[i] != Dimension::Fixed(1)) {
                return Err(format!("axis {} of {} does not have size 1", axis, input));
            }
            let dims: SmallVec<[Dimension; 4]> = input
                .dims
                .iter()
                .enumerate()
                .filter(|(i, _)| !resolved.contains(i))
                .map(|(_, dim)| dim.clone())
                .collect();
            let value_type = if dims.is_empty() && !resolved.is_empty() {
                ValueType::Double
            } else {
                input.value_type
            };
            Ok(NodeShape { value_type, dims })
        }
        OpKind::Unsqueeze { axes } => {
            expect_inputs(inputs, 1, 1)?;
            let input = inputs[0];
            let requested = axes.len();
            let out_rank = input.rank() + requested;
            let resolved = resolve_axes(out_rank, axes)?;
            if resolved.len() != requested || resolved.is_empty() {
                return Err("axes must be distinct and non-empty".to_string());
            }
            let mut rest = input.dims.iter();
            let dims = (0..out_rank)
                .map(|i| {
                    if resolved.contains(&i) {
                        Dimension::Fixed(1)
                    } else {
                        rest.next().cloned().unwrap_or(Dimension::Fixed(1))
                    }
                })
                .collect();
            Ok(NodeShape {
                value_type: input.value_type,
                dims,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use rankc_tensor::{TensorValue, ValueType};
    use rankc_testing::TestCases;
    use smallvec::smallvec;

    use super::GraphBuilder;
    use crate::expr::{Aggregator, BinaryOp, UnaryFn};
    use crate::graph::{Dimension, GraphError, NodeShape, OpKind};

    fn float(shape: &[usize]) -> NodeShape {
        NodeShape::fixed(ValueType::Float, shape)
    }

    #[test]
    fn test_infer_shapes() {
        #[derive(Debug)]
        struct Case {
            op: OpKind,
            inputs: Vec<NodeShape>,
            expected: Result<&'static str, &'static str>,
        }

        let cases = [
            Case {
                op: OpKind::Binary(BinaryOp::Add),
                inputs: vec![float(&[2, 1]), float(&[3])],
                expected: Ok("float[2, 3]"),
            },
            Case {
                op: OpKind::Binary(BinaryOp::Add),
                inputs: vec![float(&[2]), float(&[3])],
                expected: Err("shapes float[2] and float[3] can not be broadcast"),
            },
            Case {
                op: OpKind::Binary(BinaryOp::Div),
                inputs: vec![float(&[3]), NodeShape::fixed(ValueType::Double, &[1])],
                expected: Ok("float[3]"),
            },
            Case {
                op: OpKind::MatMul,
                inputs: vec![float(&[2, 3]), float(&[3, 4])],
                expected: Ok("float[2, 4]"),
            },
            Case {
                op: OpKind::MatMul,
                inputs: vec![float(&[2, 3]), float(&[2, 4])],
                expected: Err("inner dimensions of float[2, 3] and float[2, 4] differ"),
            },
            Case {
                op: OpKind::Gemm {
                    alpha: 1.0,
                    beta: 1.0,
                    trans_a: false,
                    trans_b: true,
                },
                inputs: vec![float(&[1, 784]), float(&[10, 784]), float(&[10])],
                expected: Ok("float[1, 10]"),
            },
            Case {
                op: OpKind::Reduce {
                    aggregator: Aggregator::Sum,
                    axes: smallvec![-1],
                    keep_dims: true,
                },
                inputs: vec![float(&[2, 3])],
                expected: Ok("float[2, 1]"),
            },
            Case {
                op: OpKind::Reduce {
                    aggregator: Aggregator::Max,
                    axes: smallvec![],
                    keep_dims: false,
                },
                inputs: vec![float(&[2, 3])],
                expected: Ok("double[]"),
            },
            Case {
                op: OpKind::Transpose { perm: smallvec![] },
                inputs: vec![float(&[2, 3, 4])],
                expected: Ok("float[4, 3, 2]"),
            },
            Case {
                op: OpKind::Transpose {
                    perm: smallvec![0, 0],
                },
                inputs: vec![float(&[2, 3])],
                expected: Err("[0, 0] is not a permutation of rank 2"),
            },
            Case {
                op: OpKind::Concat { axis: 1 },
                inputs: vec![float(&[2, 3]), float(&[2, 4])],
                expected: Ok("float[2, 7]"),
            },
            Case {
                op: OpKind::Squeeze { axes: smallvec![] },
                inputs: vec![float(&[1, 3, 1])],
                expected: Ok("float[3]"),
            },
            Case {
                op: OpKind::Squeeze { axes: smallvec![1] },
                inputs: vec![float(&[1, 3])],
                expected: Err("axis 1 of float[1, 3] does not have size 1"),
            },
            Case {
                op: OpKind::Unsqueeze {
                    axes: smallvec![0, -1],
                },
                inputs: vec![float(&[3])],
                expected: Ok("float[1, 3, 1]"),
            },
            Case {
                op: OpKind::Softmax { axis: 2 },
                inputs: vec![float(&[3])],
                expected: Err("axis 2 is out of range for rank 1"),
            },
            Case {
                op: OpKind::Unary(UnaryFn::Exp),
                inputs: vec![float(&[3]), float(&[3])],
                expected: Err("expected 1 inputs but got 2"),
            },
        ];

        cases.test_each(|case| {
            let mut builder = GraphBuilder::new("test");
            let mut names = Vec::new();
            for (i, shape) in case.inputs.iter().enumerate() {
                let name = format!("in{}", i);
                builder.add_input(&name, shape.clone()).unwrap();
                names.push(name);
            }
            let names: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
            let result = builder.add_node("out", case.op.clone(), &names);
            match (result, case.expected) {
                (Ok(_), Ok(expected)) => {
                    assert_eq!(builder.node_shape("out").unwrap().to_string(), expected)
                }
                (Err(GraphError::InvalidNode { reason, .. }), Err(expected)) => {
                    assert_eq!(reason, expected)
                }
                (result, expected) => panic!("got {:?}, expected {:?}", result, expected),
            }
        })
    }

    #[test]
    fn test_normalizes_axes() {
        let mut builder = GraphBuilder::new("test");
        builder.add_input("x", float(&[2, 3])).unwrap();
        let id = builder
            .add_node(
                "sum",
                OpKind::Reduce {
                    aggregator: Aggregator::Sum,
                    axes: smallvec![-1, 1],
                    keep_dims: false,
                },
                &["x"],
            )
            .unwrap();
        let graph = builder.build();
        assert_eq!(
            graph.node(id).unwrap().op(),
            &OpKind::Reduce {
                aggregator: Aggregator::Sum,
                axes: smallvec![1],
                keep_dims: false,
            }
        );
    }

    #[test]
    fn test_rejects_invalid_references() {
        let mut builder = GraphBuilder::new("test");
        builder.add_input("x", float(&[2])).unwrap();

        let err = builder
            .add_node("y", OpKind::Identity, &["later"])
            .unwrap_err();
        assert!(matches!(err, GraphError::UnknownNode { ref input, .. } if input == "later"));

        let err = builder.add_input("x", float(&[2])).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateNode(ref name) if name == "x"));

        let err = builder.add_output("default", "out", "missing").unwrap_err();
        assert!(matches!(err, GraphError::UnknownOutputNode { .. }));

        let value = TensorValue::from_data("tensor(x[2])".parse().unwrap(), vec![1.0, 2.0]).unwrap();
        let err = builder.add_constant("c", value).unwrap_err();
        assert!(matches!(err, GraphError::InvalidNode { .. }));
    }

    #[test]
    fn test_build_counts_consumers() {
        let mut builder = GraphBuilder::new("test");
        let x = builder
            .add_input(
                "x",
                NodeShape::new(ValueType::Float, [Dimension::Symbolic("batch".into())]),
            )
            .unwrap();
        let e = builder
            .add_node("e", OpKind::Unary(UnaryFn::Exp), &["x"])
            .unwrap();
        builder
            .add_node("sq", OpKind::Binary(BinaryOp::Mul), &["e", "e"])
            .unwrap();
        builder.set_exported("x").unwrap();
        builder.add_output("default", "out", "sq").unwrap();

        let graph = builder.build();
        assert_eq!(graph.consumer_count(x), 1);
        assert_eq!(graph.consumer_count(e), 2);
        assert!(graph.node(x).unwrap().exported());
        assert_eq!(graph.qualified_output_names(), vec!["default.out".to_string()]);
        assert_eq!(graph.input_type("x").unwrap().to_string(), "tensor<float>(d0[])");
    }
}
