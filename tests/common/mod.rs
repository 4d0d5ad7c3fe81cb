//! Helpers for setting up application directories in integration tests.

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use rankc::expr::parse;
use rankc::{FunctionDef, RankProfile};
use serde_json::json;
use tempfile::TempDir;

pub const MNIST: &str = "onnx_import(\"models/mnist_softmax.onnx\")";
pub const SMALL: &str = "onnx_import(\"models/small_constants_and_functions.onnx\")";
pub const EPSILON: &str = "small_constants_and_functions_epsilon";

/// Return the path of a file under `test-data/`.
pub fn test_data(path: &str) -> PathBuf {
    let mut abs_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    abs_path.push("test-data");
    abs_path.push(path);
    abs_path
}

/// Create an application directory containing the test models.
///
/// The MNIST classifier is generated rather than checked in, as its weight
/// matrix is large.
pub fn app_dir() -> Result<TempDir, Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    rankc_testing::copy_tree(&test_data("models"), &dir.path().join("models"))?;
    write_mnist_softmax(dir.path())?;
    Ok(dir)
}

fn write_mnist_softmax(app_dir: &Path) -> Result<(), Box<dyn Error>> {
    let weights: Vec<f64> = (0..784 * 10).map(|i| (i % 13) as f64 * 0.125 - 0.75).collect();
    let bias: Vec<f64> = (0..10).map(|i| i as f64 * 0.5).collect();
    let desc = json!({
        "inputs": [{ "name": "Placeholder", "shape": [1, 784] }],
        "nodes": [
            {
                "name": "layer/Variable",
                "op": "Constant",
                "value": { "type": "tensor<float>(d0[784],d1[10])", "values": weights }
            },
            {
                "name": "layer/Variable_1",
                "op": "Constant",
                "value": { "type": "tensor<float>(d0[10])", "values": bias }
            },
            {
                "name": "layer/add",
                "op": "Gemm",
                "inputs": ["Placeholder", "layer/Variable", "layer/Variable_1"]
            }
        ],
        "signatures": { "default": { "layer_add": "layer/add" } }
    });
    fs::write(
        app_dir.join("models/mnist_softmax.json"),
        serde_json::to_vec(&desc)?,
    )?;
    Ok(())
}

/// Create a profile which binds the inputs of both test models and uses
/// them in its phases.
pub fn base_profile() -> Result<RankProfile, Box<dyn Error>> {
    let mut profile = RankProfile::new("base");
    profile
        .add_function(
            "Placeholder",
            FunctionDef::parse("tensor<float>(d0[1],d1[784])(0.5)")?,
        )
        .add_function("input", FunctionDef::parse("tensor<float>(d0[3])(1.0)")?)
        .add_function("mnist", FunctionDef::parse(MNIST)?)
        .set_first_phase(parse(&format!("reduce({}, sum)", SMALL))?)
        .set_second_phase(parse("reduce(mnist, max)")?);
    Ok(profile)
}
