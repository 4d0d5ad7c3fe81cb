use rankc_tensor::{TensorValue, ValueType};
use smallvec::smallvec;

use crate::expr::{Aggregator, BinaryOp, UnaryFn};
use crate::graph::{GraphBuilder, ImportedGraph, NodeShape, OpKind};

/// Expression produced for the output of [`mnist_softmax`].
pub const MNIST_EXPRESSION: &str = "join(reduce(join(rename(Placeholder, (d0, d1), (d0, d2)), \
    constant(mnist_softmax_layer_Variable), f(a,b)(a * b)), sum, d2) * 1.0, \
    constant(mnist_softmax_layer_Variable_1) * 1.0, f(a,b)(a + b))";

/// Create a single-layer classifier of 28x28 images, with one output
/// `layer_add` computed by a `Gemm` over a 784x10 weight matrix.
pub fn mnist_softmax() -> ImportedGraph {
    let mut builder = GraphBuilder::new("mnist_softmax");
    builder
        .add_input("Placeholder", NodeShape::fixed(ValueType::Float, &[1, 784]))
        .unwrap();

    let weights: Vec<f64> = (0..784 * 10).map(|i| (i % 13) as f64 * 0.125 - 0.75).collect();
    builder
        .add_constant(
            "layer/Variable",
            TensorValue::from_positional(ValueType::Float, &[784, 10], weights).unwrap(),
        )
        .unwrap();
    let bias: Vec<f64> = (0..10).map(|i| i as f64 * 0.5).collect();
    builder
        .add_constant(
            "layer/Variable_1",
            TensorValue::from_positional(ValueType::Float, &[10], bias).unwrap(),
        )
        .unwrap();

    builder
        .add_node(
            "layer/add",
            OpKind::Gemm {
                alpha: 1.0,
                beta: 1.0,
                trans_a: false,
                trans_b: false,
            },
            &["Placeholder", "layer/Variable", "layer/Variable_1"],
        )
        .unwrap();
    builder
        .add_output("default", "layer_add", "layer/add")
        .unwrap();
    builder.build()
}

/// Create a softmax over a 3-element input whose denominator has a scalar
/// `epsilon` constant added. The exponential is used twice, so it is emitted
/// as a generated function.
pub fn small_constants_and_functions() -> ImportedGraph {
    let mut builder = GraphBuilder::new("small_constants_and_functions");
    builder
        .add_input("input", NodeShape::fixed(ValueType::Float, &[3]))
        .unwrap();
    builder
        .add_constant("epsilon", TensorValue::scalar(ValueType::Float, 1e-5))
        .unwrap();
    builder
        .add_node("exp_output", OpKind::Unary(UnaryFn::Exp), &["input"])
        .unwrap();
    builder
        .add_node(
            "reduce_sum",
            OpKind::Reduce {
                aggregator: Aggregator::Sum,
                axes: smallvec![],
                keep_dims: true,
            },
            &["exp_output"],
        )
        .unwrap();
    builder
        .add_node("add", OpKind::Binary(BinaryOp::Add), &["reduce_sum", "epsilon"])
        .unwrap();
    builder
        .add_node("div", OpKind::Binary(BinaryOp::Div), &["exp_output", "add"])
        .unwrap();
    builder.add_output("default", "output", "div").unwrap();
    builder.build()
}
