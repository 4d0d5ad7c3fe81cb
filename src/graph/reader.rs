use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rankc_tensor::{TensorValue, ValueType};
use rustc_hash::FxHashMap;
use serde::Deserialize;
use smallvec::SmallVec;

use super::{model_name, Dimension, GraphBuilder, GraphError, ImportedGraph, NodeShape, OpKind};
use crate::expr::{Aggregator, BinaryOp, UnaryFn};

/// Provides the graphs of models referenced by rank profiles.
pub trait GraphSource: Sync {
    /// Read the graph of the model at `path`, relative to the application's
    /// model directory.
    ///
    /// Returns `Ok(None)` if there is no such model.
    fn read_graph(&self, path: &str) -> Result<Option<Arc<ImportedGraph>>, GraphError>;
}

/// Graph source backed by graphs held in memory.
#[derive(Default)]
pub struct InMemoryGraphs {
    graphs: FxHashMap<String, Arc<ImportedGraph>>,
}

impl InMemoryGraphs {
    pub fn new() -> InMemoryGraphs {
        InMemoryGraphs::default()
    }

    /// Register `graph` as the model at `path`.
    pub fn insert(&mut self, path: &str, graph: ImportedGraph) {
        self.graphs.insert(path.to_string(), Arc::new(graph));
    }
}

impl GraphSource for InMemoryGraphs {
    fn read_graph(&self, path: &str) -> Result<Option<Arc<ImportedGraph>>, GraphError> {
        Ok(self.graphs.get(path).cloned())
    }
}

/// Graph source which reads JSON graph descriptions from a directory.
///
/// The description of the model at `models/mnist_softmax.onnx` is read from
/// `<root>/models/mnist_softmax.json`. The description format is:
///
/// ```json
/// {
///   "inputs": [{ "name": "x", "cell_type": "float", "shape": ["batch", 784] }],
///   "nodes": [
///     { "name": "w", "op": "Constant", "value": { "type": "tensor<float>(d0[784],d1[10])", "values": [...] } },
///     { "name": "y", "op": "MatMul", "inputs": ["x", "w"] }
///   ],
///   "signatures": { "default": { "y": "y" } }
/// }
/// ```
///
/// Operators are named as in ONNX. Attributes are given as fields of the
/// node: `alpha`, `beta`, `trans_a`, `trans_b`, `axis`, `axes`, `keep_dims`
/// and `perm`.
pub struct ModelDirectory {
    root: PathBuf,
}

impl ModelDirectory {
    pub fn new(root: impl Into<PathBuf>) -> ModelDirectory {
        ModelDirectory { root: root.into() }
    }

    /// Return the path of the description for the model at `path`.
    pub fn description_path(&self, path: &str) -> PathBuf {
        self.root.join(path).with_extension("json")
    }
}

impl GraphSource for ModelDirectory {
    fn read_graph(&self, path: &str) -> Result<Option<Arc<ImportedGraph>>, GraphError> {
        let file = self.description_path(path);
        if !file.exists() {
            return Ok(None);
        }
        log::debug!("Reading model graph from {}", file.display());
        let data = std::fs::read(&file).map_err(|error| GraphError::ReadFailed {
            path: file.clone(),
            error,
        })?;
        let graph = parse_graph(&model_name(path), &data, &file)?;
        Ok(Some(Arc::new(graph)))
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct GraphDescription {
    #[serde(default)]
    inputs: Vec<InputDescription>,
    #[serde(default)]
    nodes: Vec<NodeDescription>,
    signatures: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct InputDescription {
    name: String,
    #[serde(default = "default_cell_type")]
    cell_type: String,
    shape: Vec<DimDescription>,
}

fn default_cell_type() -> String {
    "float".to_string()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DimDescription {
    Fixed(usize),
    Symbolic(String),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct NodeDescription {
    name: String,
    op: String,
    #[serde(default)]
    inputs: Vec<String>,
    #[serde(default)]
    exported: bool,
    value: Option<TensorValue>,
    alpha: Option<f64>,
    beta: Option<f64>,
    #[serde(default)]
    trans_a: bool,
    #[serde(default)]
    trans_b: bool,
    axis: Option<i32>,
    axes: Option<Vec<i32>>,
    keep_dims: Option<bool>,
    perm: Option<Vec<i32>>,
}

/// Parse a JSON graph description and build the graph of model `name`.
///
/// `path` is used only for error reporting.
pub(crate) fn parse_graph(name: &str, data: &[u8], path: &Path) -> Result<ImportedGraph, GraphError> {
    let desc: GraphDescription =
        serde_json::from_slice(data).map_err(|error| GraphError::ParseFailed {
            path: path.to_path_buf(),
            error,
        })?;

    let mut builder = GraphBuilder::new(name);
    for input in desc.inputs {
        let value_type = match input.cell_type.as_str() {
            "float" => ValueType::Float,
            "double" => ValueType::Double,
            other => {
                return Err(GraphError::InvalidNode {
                    node: input.name,
                    reason: format!("unsupported cell type \"{}\"", other),
                })
            }
        };
        let dims = input.shape.into_iter().map(|dim| match dim {
            DimDescription::Fixed(size) => Dimension::Fixed(size),
            DimDescription::Symbolic(name) => Dimension::Symbolic(name),
        });
        builder.add_input(&input.name, NodeShape::new(value_type, dims))?;
    }

    for node in desc.nodes {
        let name = node.name.clone();
        let exported = node.exported;
        if node.op == "Constant" {
            let Some(value) = node.value else {
                return Err(GraphError::InvalidNode {
                    node: name,
                    reason: "constant has no value".to_string(),
                });
            };
            builder.add_constant(&name, value)?;
        } else {
            let inputs: Vec<&str> = node.inputs.iter().map(|s| s.as_str()).collect();
            let op = node_op(&node)?;
            builder.add_node(&name, op, &inputs)?;
        }
        if exported {
            builder.set_exported(&name)?;
        }
    }

    for (signature, outputs) in &desc.signatures {
        for (output, node) in outputs {
            builder.add_output(signature, output, node)?;
        }
    }

    Ok(builder.build())
}

fn axes(values: &Option<Vec<i32>>) -> SmallVec<[i32; 4]> {
    values.iter().flatten().copied().collect()
}

/// Map an operator name and its attributes to an [`OpKind`].
fn node_op(node: &NodeDescription) -> Result<OpKind, GraphError> {
    let missing = |attr: &str| GraphError::InvalidNode {
        node: node.name.clone(),
        reason: format!("{} requires attribute \"{}\"", node.op, attr),
    };
    let reduce = |aggregator| OpKind::Reduce {
        aggregator,
        axes: axes(&node.axes),
        keep_dims: node.keep_dims.unwrap_or(true),
    };

    let op = match node.op.as_str() {
        "Identity" => OpKind::Identity,
        "Add" => OpKind::Binary(BinaryOp::Add),
        "Sub" => OpKind::Binary(BinaryOp::Sub),
        "Mul" => OpKind::Binary(BinaryOp::Mul),
        "Div" => OpKind::Binary(BinaryOp::Div),
        "MatMul" => OpKind::MatMul,
        "Gemm" => OpKind::Gemm {
            alpha: node.alpha.unwrap_or(1.0),
            beta: node.beta.unwrap_or(1.0),
            trans_a: node.trans_a,
            trans_b: node.trans_b,
        },
        "Exp" => OpKind::Unary(UnaryFn::Exp),
        "Log" => OpKind::Unary(UnaryFn::Log),
        "Sqrt" => OpKind::Unary(UnaryFn::Sqrt),
        "Tanh" => OpKind::Unary(UnaryFn::Tanh),
        "Sigmoid" => OpKind::Unary(UnaryFn::Sigmoid),
        "Relu" => OpKind::Unary(UnaryFn::Relu),
        "Neg" => OpKind::Unary(UnaryFn::Neg),
        "Abs" => OpKind::Unary(UnaryFn::Abs),
        "ReduceSum" => reduce(Aggregator::Sum),
        "ReduceMean" => reduce(Aggregator::Avg),
        "ReduceMax" => reduce(Aggregator::Max),
        "ReduceMin" => reduce(Aggregator::Min),
        "ReduceProd" => reduce(Aggregator::Prod),
        "Softmax" => OpKind::Softmax {
            axis: node.axis.unwrap_or(-1),
        },
        "Transpose" => OpKind::Transpose {
            perm: axes(&node.perm),
        },
        "Concat" => OpKind::Concat {
            axis: node.axis.ok_or_else(|| missing("axis"))?,
        },
        "Squeeze" => OpKind::Squeeze {
            axes: axes(&node.axes),
        },
        "Unsqueeze" => OpKind::Unsqueeze {
            axes: node
                .axes
                .as_ref()
                .map(|axes| axes.iter().copied().collect())
                .ok_or_else(|| missing("axes"))?,
        },
        _ => {
            return Err(GraphError::UnsupportedOp {
                node: node.name.clone(),
                op: node.op.clone(),
            })
        }
    };
    Ok(op)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{parse_graph, GraphSource, ModelDirectory};
    use crate::graph::{GraphError, OpKind};

    const MODEL: &str = r#"{
        "inputs": [{ "name": "x", "shape": ["batch", 3] }],
        "nodes": [
            {
                "name": "layer/w",
                "op": "Constant",
                "value": { "type": "tensor<float>(d0[3],d1[2])", "values": [1, 2, 3, 4, 5, 6] }
            },
            { "name": "layer/mm", "op": "MatMul", "inputs": ["x", "layer/w"] },
            { "name": "layer/out", "op": "Softmax", "inputs": ["layer/mm"], "exported": true }
        ],
        "signatures": { "default": { "output": "layer/out" } }
    }"#;

    #[test]
    fn test_parse_graph() {
        let graph = parse_graph("model", MODEL.as_bytes(), Path::new("model.json")).unwrap();
        assert_eq!(graph.name(), "model");
        assert_eq!(graph.nodes().len(), 4);
        assert_eq!(
            graph.input_type("x").unwrap().to_string(),
            "tensor<float>(d0[],d1[3])"
        );

        let out = graph.outputs("default").unwrap()["output"];
        let node = graph.node(out).unwrap();
        assert_eq!(node.op(), &OpKind::Softmax { axis: 1 });
        assert!(node.exported());
        assert_eq!(node.shape().to_string(), "float[batch, 2]");
    }

    #[test]
    fn test_parse_graph_errors() {
        let unsupported = r#"{
            "inputs": [{ "name": "x", "shape": [2] }],
            "nodes": [{ "name": "y", "op": "Erf", "inputs": ["x"] }],
            "signatures": {}
        }"#;
        let err = parse_graph("m", unsupported.as_bytes(), Path::new("m.json")).unwrap_err();
        assert!(matches!(err, GraphError::UnsupportedOp { ref op, .. } if op == "Erf"));

        let forward = r#"{
            "inputs": [{ "name": "x", "shape": [2] }],
            "nodes": [
                { "name": "y", "op": "Add", "inputs": ["x", "z"] },
                { "name": "z", "op": "Identity", "inputs": ["x"] }
            ],
            "signatures": {}
        }"#;
        let err = parse_graph("m", forward.as_bytes(), Path::new("m.json")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "node 'y' refers to 'z', which is not an earlier node"
        );

        let err = parse_graph("m", b"{", Path::new("m.json")).unwrap_err();
        assert!(matches!(err, GraphError::ParseFailed { .. }));
    }

    #[test]
    fn test_model_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("models")).unwrap();
        std::fs::write(dir.path().join("models/my-model.json"), MODEL).unwrap();

        let source = ModelDirectory::new(dir.path());
        let graph = source.read_graph("models/my-model.onnx").unwrap().unwrap();
        assert_eq!(graph.name(), "my_model");

        assert!(source.read_graph("models/missing.onnx").unwrap().is_none());
    }
}
