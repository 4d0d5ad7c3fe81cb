use std::error::Error;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use rankc::graph::ModelDirectory;
use rankc::store::{FileArtifactStore, GENERATED_DIR};
use rankc::{
    BuildOutput, CompileOptions, Compiler, ErrorKind, Expr, ExprRef, FunctionDef, RankProfile,
    RankProfileRegistry,
};
use rankc_testing::{copy_tree, list_files};

mod common;

use common::{app_dir, base_profile, EPSILON, MNIST, SMALL};

fn options() -> CompileOptions {
    let mut options = CompileOptions::with_defaults();
    options.ignore_stored_models(false).parallel(false);
    options
}

/// Compile `registry` in the application directory at `app_dir`.
fn compile(app_dir: &Path, registry: &RankProfileRegistry, options: CompileOptions) -> BuildOutput {
    let graphs = ModelDirectory::new(app_dir);
    let store = FileArtifactStore::new(app_dir);
    let compiler = Compiler::new(&graphs, &store, options);
    compiler.compile_all(registry)
}

/// Return the largest number of cells in any tensor literal in `expr`.
fn max_literal_len(expr: &ExprRef) -> usize {
    let mut max_len = match expr.as_ref() {
        Expr::Literal(value) => value.len(),
        _ => 0,
    };
    expr.for_each_child(|child| max_len = max_len.max(max_literal_len(child)));
    max_len
}

/// Read the contents of every file under `root`.
fn read_tree(root: &Path) -> Result<Vec<(String, Vec<u8>)>, Box<dyn Error>> {
    let mut files = Vec::new();
    for path in list_files(root)? {
        let data = fs::read(root.join(&path))?;
        files.push((path, data));
    }
    Ok(files)
}

#[test]
fn test_stored_models_used_without_model_files() -> Result<(), Box<dyn Error>> {
    let app = app_dir()?;
    let mut registry = RankProfileRegistry::new();
    registry.insert(base_profile()?);

    let output = compile(app.path(), &registry, options());
    assert!(output.is_success(), "{:?}", output.errors().collect::<Vec<_>>());
    let compiled = output.profile("base").unwrap();

    let generated = app.path().join(GENERATED_DIR);
    assert_eq!(
        list_files(&generated)?,
        [
            "mnist_softmax/default/constants/mnist_softmax_layer_Variable.json",
            "mnist_softmax/default/constants/mnist_softmax_layer_Variable_1.json",
            "mnist_softmax/default/model.json",
            "small_constants_and_functions/default/model.json",
        ]
    );

    // Deploy only the generated files to a directory without the models.
    let deployed = tempfile::tempdir()?;
    copy_tree(&generated, &deployed.path().join(GENERATED_DIR))?;
    let output = compile(deployed.path(), &registry, options());
    assert!(output.is_success(), "{:?}", output.errors().collect::<Vec<_>>());
    let restored = output.profile("base").unwrap();

    assert_eq!(restored.functions, compiled.functions);
    assert_eq!(restored.generated_functions, compiled.generated_functions);
    assert_eq!(restored.first_phase, compiled.first_phase);
    assert_eq!(restored.second_phase, compiled.second_phase);
    assert_eq!(output.constants().len(), 2);
    for constant in output.constants().values() {
        assert!(deployed.path().join(&constant.path).exists());
    }
    assert_eq!(
        restored.function(EPSILON).map(|expr| expr.to_string()),
        Some("tensor<float>()(1e-5)".to_string())
    );

    // Without stored models, the missing model files are an error.
    let mut ignore_stored = options();
    ignore_stored.ignore_stored_models(true);
    let output = compile(deployed.path(), &registry, ignore_stored);
    let err = output.error("base").unwrap();
    assert_eq!(err.kind(), ErrorKind::ModelNotFound);

    Ok(())
}

#[test]
fn test_compile_is_idempotent() -> Result<(), Box<dyn Error>> {
    let app = app_dir()?;
    let mut registry = RankProfileRegistry::new();
    registry.insert(base_profile()?);

    let mut ignore_stored = options();
    ignore_stored.ignore_stored_models(true);

    let first = compile(app.path(), &registry, ignore_stored.clone());
    assert!(first.is_success());
    let generated = app.path().join(GENERATED_DIR);
    let before = read_tree(&generated)?;

    let second = compile(app.path(), &registry, ignore_stored);
    assert!(second.is_success());
    let after = read_tree(&generated)?;

    assert_eq!(before, after);
    assert_eq!(
        first.profile("base").unwrap().functions,
        second.profile("base").unwrap().functions
    );
    Ok(())
}

#[test]
fn test_input_type_mismatch() -> Result<(), Box<dyn Error>> {
    let app = app_dir()?;
    let mut profile = RankProfile::new("wrong_input");
    profile
        .add_function(
            "Placeholder",
            FunctionDef::parse("tensor<float>(d0[1],d1[10])(0.5)")?,
        )
        .add_function("mnist", FunctionDef::parse(MNIST)?);
    let mut registry = RankProfileRegistry::new();
    registry.insert(profile);

    let output = compile(app.path(), &registry, options());
    let err = output.error("wrong_input").unwrap();
    assert_eq!(err.kind(), ErrorKind::InputTypeMismatch);
    assert_eq!(err.profile(), "wrong_input");
    assert!(err.to_string().starts_with(
        "rank profile 'wrong_input' is invalid: could not use ONNX model from \
         onnx_import(\"models/mnist_softmax.onnx\"): Model refers input 'Placeholder'. \
         The required type of this is tensor<float>(d0[1],d1[784])"
    ));

    // Models which fail verification are not stored.
    assert!(!app.path().join(GENERATED_DIR).join("mnist_softmax").exists());
    Ok(())
}

#[test]
fn test_inherited_profiles() -> Result<(), Box<dyn Error>> {
    let app = app_dir()?;

    let mut child = RankProfile::with_parent("child", "base");
    child
        .add_function("input", FunctionDef::parse("tensor<float>(d0[3])(2.0)")?)
        .add_function(EPSILON, FunctionDef::parse("tensor<float>()(0.25)")?);
    let sibling = RankProfile::with_parent("sibling", "base");

    let mut registry = RankProfileRegistry::new();
    registry.insert(base_profile()?);
    registry.insert(child);
    registry.insert(sibling);

    let output = compile(app.path(), &registry, options());
    assert!(output.is_success(), "{:?}", output.errors().collect::<Vec<_>>());

    let base = output.profile("base").unwrap();
    let child = output.profile("child").unwrap();
    let sibling = output.profile("sibling").unwrap();

    let mnist = rankc::expr::parse(MNIST)?;
    let small = rankc::expr::parse(SMALL)?;
    let model_ref = |expr: &rankc::ExprRef| expr.model_refs().remove(0);
    let (mnist, small) = (model_ref(&mnist), model_ref(&small));

    // The child overrides functions the small model depends on, but not
    // those of the MNIST model.
    assert!(Arc::ptr_eq(&base.artifacts[&mnist], &child.artifacts[&mnist]));
    assert!(!Arc::ptr_eq(&base.artifacts[&small], &child.artifacts[&small]));
    assert!(!child.generated_functions.contains_key(EPSILON));
    assert_eq!(
        child.function(EPSILON).map(|expr| expr.to_string()),
        Some("tensor<float>()(0.25)".to_string())
    );

    // The sibling overrides nothing.
    for model in [&mnist, &small] {
        assert!(Arc::ptr_eq(&base.artifacts[model], &sibling.artifacts[model]));
    }
    assert_eq!(sibling.first_phase, base.first_phase);
    Ok(())
}

#[test]
fn test_output_selection() -> Result<(), Box<dyn Error>> {
    #[derive(Debug)]
    struct Case<'a> {
        output: Option<&'a str>,
        expected: Result<&'a str, ErrorKind>,
    }

    let cases = [
        Case {
            output: None,
            expected: Err(ErrorKind::AmbiguousOutput),
        },
        Case {
            output: Some("largest"),
            expected: Ok("default.largest"),
        },
        Case {
            output: Some("default.total"),
            expected: Ok("default.total"),
        },
        Case {
            output: Some("serving.score"),
            expected: Ok("serving.score"),
        },
        Case {
            output: Some("serving.total"),
            expected: Err(ErrorKind::UnknownOutput),
        },
        Case {
            output: Some("training.total"),
            expected: Err(ErrorKind::UnknownSignature),
        },
    ];

    let app = app_dir()?;
    let mut registry = RankProfileRegistry::new();
    for (i, case) in cases.iter().enumerate() {
        let model_ref = match case.output {
            Some(output) => format!("onnx_import(\"models/two_outputs.onnx\", \"{}\")", output),
            None => "onnx_import(\"models/two_outputs.onnx\")".to_string(),
        };
        let mut profile = RankProfile::new(&format!("profile_{}", i));
        profile
            .add_function("features", FunctionDef::parse("tensor<float>(d0[1],d1[4])(1.0)")?)
            .add_function("score", FunctionDef::parse(&model_ref)?);
        registry.insert(profile);
    }

    let output = compile(app.path(), &registry, options());
    for (i, case) in cases.iter().enumerate() {
        let name = format!("profile_{}", i);
        match case.expected {
            Ok(dir) => {
                assert!(output.profile(&name).is_some(), "{:?} failed", case);
                let model_dir = app.path().join(GENERATED_DIR).join("two_outputs").join(dir);
                assert!(model_dir.join("model.json").exists(), "{:?} not stored", case);
            }
            Err(kind) => {
                let err = output.error(&name).unwrap();
                assert_eq!(err.kind(), kind, "{:?}", case);
            }
        }
    }

    let ambiguous = output.error("profile_0").unwrap().to_string();
    assert!(ambiguous.ends_with(
        "Model 'two_outputs.onnx' has multiple outputs. Specify one of: \
         default.largest, default.total, serving.score"
    ));
    Ok(())
}

#[test]
fn test_large_constants_are_not_inlined() -> Result<(), Box<dyn Error>> {
    let app = app_dir()?;
    let mut registry = RankProfileRegistry::new();
    registry.insert(base_profile()?);

    let output = compile(app.path(), &registry, options());
    let compiled = output.profile("base").unwrap();
    for artifact in compiled.artifacts.values() {
        assert!(max_literal_len(&artifact.expression) <= 1);
        for body in artifact.generated_functions.values() {
            assert!(max_literal_len(body) <= 1, "{}", body);
        }
    }
    assert!(compiled.constants.contains_key("mnist_softmax_layer_Variable"));
    Ok(())
}

/// Create a profile which binds the MNIST input to a function of the wrong
/// type.
fn wrong_input_profile(name: &str, parent: Option<&str>) -> Result<RankProfile, Box<dyn Error>> {
    let mut profile = match parent {
        Some(parent) => RankProfile::with_parent(name, parent),
        None => base_profile()?,
    };
    profile.name = name.to_string();
    profile.add_function(
        "Placeholder",
        FunctionDef::parse("tensor(d0[1],d5[10])(0.0)")?,
    );
    Ok(profile)
}

#[test]
fn test_input_type_mismatch_in_inherited_and_later_profiles() -> Result<(), Box<dyn Error>> {
    let app = app_dir()?;
    let mut registry = RankProfileRegistry::new();
    registry.insert(base_profile()?);
    registry.insert(wrong_input_profile("child", Some("base"))?);
    registry.insert(wrong_input_profile("unrelated", None)?);

    let output = compile(app.path(), &registry, options());
    assert!(output.profile("base").is_some());
    for name in ["child", "unrelated"] {
        let err = output.error(name).unwrap();
        assert_eq!(err.kind(), ErrorKind::InputTypeMismatch, "{}", name);
    }

    // Compiling again, when the models are already stored, reports the same
    // errors.
    let output = compile(app.path(), &registry, options());
    for name in ["child", "unrelated"] {
        assert_eq!(output.error(name).unwrap().kind(), ErrorKind::InputTypeMismatch);
    }
    Ok(())
}

#[test]
fn test_input_type_mismatch_with_stored_model() -> Result<(), Box<dyn Error>> {
    let app = app_dir()?;
    let mut registry = RankProfileRegistry::new();
    registry.insert(base_profile()?);
    assert!(compile(app.path(), &registry, options()).is_success());

    let deployed = tempfile::tempdir()?;
    copy_tree(
        &app.path().join(GENERATED_DIR),
        &deployed.path().join(GENERATED_DIR),
    )?;
    let mut registry = RankProfileRegistry::new();
    registry.insert(wrong_input_profile("wrong", None)?);

    let output = compile(deployed.path(), &registry, options());
    let err = output.error("wrong").unwrap();
    assert_eq!(err.kind(), ErrorKind::InputTypeMismatch);
    Ok(())
}

#[test]
fn test_recompile_after_model_change() -> Result<(), Box<dyn Error>> {
    let app = app_dir()?;
    let mut profile = RankProfile::new("p");
    profile
        .add_function("features", FunctionDef::parse("tensor<float>(d0[1],d1[4])(1.0)")?)
        .add_function(
            "score",
            FunctionDef::parse("onnx_import(\"models/two_outputs.onnx\", \"largest\")")?,
        );
    let mut registry = RankProfileRegistry::new();
    registry.insert(profile);

    let manifest = app
        .path()
        .join(GENERATED_DIR)
        .join("two_outputs/default.largest/model.json");
    let score = |output: &BuildOutput| {
        output.profile("p").unwrap().functions["score"]
            .expression
            .to_string()
    };

    let first = compile(app.path(), &registry, options());
    assert!(score(&first).contains(", max, d1)"), "{}", score(&first));
    let stored_before = fs::read_to_string(&manifest)?;

    let model_path = app.path().join("models/two_outputs.json");
    let model = fs::read_to_string(&model_path)?;
    fs::write(&model_path, model.replace("ReduceMax", "ReduceMin"))?;

    let second = compile(app.path(), &registry, options());
    let score = score(&second);
    assert!(score.contains(", min, d1)") && !score.contains("max"), "{}", score);
    let stored_after = fs::read_to_string(&manifest)?;
    assert_ne!(stored_before, stored_after);
    assert!(stored_after.contains(", min, d1)"));
    Ok(())
}
