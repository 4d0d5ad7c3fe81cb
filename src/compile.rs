//! Compilation of rank profiles which reference imported models.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use rustc_hash::FxHashMap;

use crate::artifact::{CompiledModelArtifact, ImportedModel, RankingConstant};
use crate::convert::convert;
use crate::env::env_flag;
use crate::error::{CompileError, CompileErrorImpl};
use crate::expr::{Expr, ExprRef, ModelRef};
use crate::graph::{GraphSource, ImportedGraph};
use crate::iter_util::MaybeParIter;
use crate::profile::{EffectiveProfile, FunctionDef, RankProfile, RankProfileRegistry};
use crate::store::{ArtifactKey, ArtifactStore};
use crate::verify::{MapEnvironment, TypeVerifier};

/// Options which customize how rank profiles are compiled.
#[derive(Clone, Debug)]
pub struct CompileOptions {
    ignore_stored_models: bool,
    parallel: bool,
}

impl CompileOptions {
    /// Create the default options.
    ///
    /// Stored models are used for models whose graphs are unavailable, and
    /// independent profiles are compiled in parallel. The
    /// `RANKC_IGNORE_STORED_MODELS` and `RANKC_SEQUENTIAL` environment
    /// variables override these defaults.
    pub fn with_defaults() -> CompileOptions {
        CompileOptions {
            ignore_stored_models: env_flag("RANKC_IGNORE_STORED_MODELS", false),
            parallel: !env_flag("RANKC_SEQUENTIAL", false),
        }
    }

    /// Set whether stored models are ignored, so a model reference whose
    /// graph is unavailable fails with a model-not-found error.
    pub fn ignore_stored_models(&mut self, ignore: bool) -> &mut Self {
        self.ignore_stored_models = ignore;
        self
    }

    /// Set whether profiles which do not depend on each other are compiled
    /// in parallel.
    pub fn parallel(&mut self, parallel: bool) -> &mut Self {
        self.parallel = parallel;
        self
    }
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// A rank profile with its model references compiled.
#[derive(Debug)]
pub struct CompiledProfile {
    pub name: String,

    /// Phase expressions with model references replaced.
    pub first_phase: Option<ExprRef>,
    pub second_phase: Option<ExprRef>,

    /// The profile's effective functions, with model references replaced.
    pub functions: BTreeMap<String, FunctionDef>,

    /// Functions generated for imported models.
    pub generated_functions: BTreeMap<String, ExprRef>,

    /// Ranking constants used by the generated expressions.
    pub constants: BTreeMap<String, RankingConstant>,

    pub artifacts: BTreeMap<ModelRef, Arc<CompiledModelArtifact>>,

    effective: EffectiveProfile,
}

impl CompiledProfile {
    /// Return the profile's effective functions and phases, before model
    /// references were replaced.
    pub fn effective(&self) -> &EffectiveProfile {
        &self.effective
    }

    /// Return the expression of a function, looking in both profile and
    /// generated functions.
    pub fn function(&self, name: &str) -> Option<&ExprRef> {
        self.functions
            .get(name)
            .map(|def| &def.expression)
            .or_else(|| self.generated_functions.get(name))
    }
}

/// Compilation state of a rank profile.
#[derive(Debug)]
pub enum ProfileState {
    Uncompiled,
    Compiling,
    Compiled(Arc<CompiledProfile>),
    Failed(CompileError),
}

/// Result of compiling all profiles in a registry.
#[derive(Debug, Default)]
pub struct BuildOutput {
    states: BTreeMap<String, ProfileState>,
    constants: BTreeMap<String, RankingConstant>,
}

impl BuildOutput {
    pub fn state(&self, profile: &str) -> Option<&ProfileState> {
        self.states.get(profile)
    }

    /// Return a profile if it compiled successfully.
    pub fn profile(&self, profile: &str) -> Option<&Arc<CompiledProfile>> {
        match self.states.get(profile) {
            Some(ProfileState::Compiled(compiled)) => Some(compiled),
            _ => None,
        }
    }

    /// Return the error for a profile which failed to compile.
    pub fn error(&self, profile: &str) -> Option<&CompileError> {
        match self.states.get(profile) {
            Some(ProfileState::Failed(err)) => Some(err),
            _ => None,
        }
    }

    /// Iterate over the errors of all failed profiles.
    pub fn errors(&self) -> impl Iterator<Item = &CompileError> {
        self.states.values().filter_map(|state| match state {
            ProfileState::Failed(err) => Some(err),
            _ => None,
        })
    }

    pub fn is_success(&self) -> bool {
        self.errors().next().is_none()
    }

    /// Return the ranking constants of all compiled profiles.
    pub fn constants(&self) -> &BTreeMap<String, RankingConstant> {
        &self.constants
    }
}

/// Compiles rank profiles, converting the models they reference.
///
/// A compiler caches the graphs it reads, so it should be used for a single
/// build.
pub struct Compiler<'a> {
    graphs: &'a dyn GraphSource,
    store: &'a dyn ArtifactStore,
    options: CompileOptions,
    graph_cache: Mutex<FxHashMap<String, Arc<ImportedGraph>>>,
}

impl<'a> Compiler<'a> {
    pub fn new(
        graphs: &'a dyn GraphSource,
        store: &'a dyn ArtifactStore,
        options: CompileOptions,
    ) -> Compiler<'a> {
        Compiler {
            graphs,
            store,
            options,
            graph_cache: Mutex::new(FxHashMap::default()),
        }
    }

    /// Compile every profile in `registry`.
    ///
    /// Profiles are compiled after the profile they inherit from. A profile
    /// whose parent fails is not compiled.
    pub fn compile_all(&self, registry: &RankProfileRegistry) -> BuildOutput {
        let mut states: BTreeMap<String, ProfileState> = registry
            .profiles()
            .map(|profile| (profile.name.clone(), ProfileState::Uncompiled))
            .collect();

        let (levels, unresolved) = registry.levels();
        for profile in unresolved {
            let err = CompileError::new(
                &profile.name,
                CompileErrorImpl::UnresolvedParent(profile.parent),
            );
            log::warn!("{}", err);
            states.insert(profile.name, ProfileState::Failed(err));
        }

        for level in levels {
            let jobs: Vec<_> = level
                .into_iter()
                .map(|profile| {
                    let parent = match &profile.parent {
                        None => Ok(None),
                        Some(parent) => match states.get(parent) {
                            Some(ProfileState::Compiled(compiled)) => Ok(Some(compiled.clone())),
                            _ => Err(parent.clone()),
                        },
                    };
                    (profile, parent)
                })
                .collect();
            for (profile, _) in &jobs {
                states.insert(profile.name.clone(), ProfileState::Compiling);
            }

            let results = jobs
                .maybe_par_iter(self.options.parallel)
                .map_collect(|(profile, parent)| {
                    let result = match parent {
                        Ok(parent) => self.compile_profile(profile, parent.as_deref()),
                        Err(parent) => Err(CompileError::new(
                            &profile.name,
                            CompileErrorImpl::ParentFailed(parent),
                        )),
                    };
                    (profile.name.clone(), result)
                });

            for (name, result) in results {
                let state = match result {
                    Ok(compiled) => {
                        log::info!(
                            "compiled rank profile '{}' with {} model references",
                            name,
                            compiled.artifacts.len()
                        );
                        ProfileState::Compiled(Arc::new(compiled))
                    }
                    Err(err) => {
                        log::warn!("{}", err);
                        ProfileState::Failed(err)
                    }
                };
                states.insert(name, state);
            }
        }

        let mut constants = BTreeMap::new();
        for state in states.values() {
            if let ProfileState::Compiled(profile) = state {
                for (name, constant) in &profile.constants {
                    constants.insert(name.clone(), constant.clone());
                }
            }
        }

        BuildOutput { states, constants }
    }

    /// Compile one profile, given its compiled parent.
    pub fn compile_profile(
        &self,
        profile: &RankProfile,
        parent: Option<&CompiledProfile>,
    ) -> Result<CompiledProfile, CompileError> {
        let effective = EffectiveProfile::resolve(profile, parent.map(|p| &p.effective));

        let mut artifacts = BTreeMap::new();
        for model_ref in effective.model_refs() {
            let artifact = match parent.and_then(|p| reusable_artifact(p, &effective, &model_ref)) {
                Some(artifact) => {
                    log::debug!(
                        "rank profile '{}' reuses {} from its parent",
                        profile.name,
                        model_ref
                    );
                    artifact
                }
                None => Arc::new(self.compile_model(
                    &profile.name,
                    &model_ref,
                    &effective.functions,
                )?),
            };
            artifacts.insert(model_ref, artifact);
        }

        let replace = |expr: &ExprRef| {
            Expr::replace_model_refs(expr, &|model_ref| {
                artifacts
                    .get(model_ref)
                    .map(|artifact| artifact.expression.clone())
            })
        };
        let functions: BTreeMap<String, FunctionDef> = effective
            .functions
            .iter()
            .map(|(name, def)| {
                let def = FunctionDef {
                    expression: replace(&def.expression),
                    return_type: def.return_type.clone(),
                };
                (name.clone(), def)
            })
            .collect();

        let mut generated_functions = BTreeMap::new();
        let mut constants = BTreeMap::new();
        for artifact in artifacts.values() {
            for (name, body) in &artifact.generated_functions {
                if !functions.contains_key(name) {
                    generated_functions.insert(name.clone(), body.clone());
                }
            }
            for (name, constant) in &artifact.large_constants {
                constants.insert(name.clone(), constant.clone());
            }
        }

        let first_phase = effective.first_phase.as_ref().map(replace);
        let second_phase = effective.second_phase.as_ref().map(replace);

        Ok(CompiledProfile {
            name: profile.name.clone(),
            first_phase,
            second_phase,
            functions,
            generated_functions,
            constants,
            artifacts,
            effective,
        })
    }

    /// Compile one model reference for a profile with the given effective
    /// functions.
    ///
    /// The model is converted from its graph when the graph source has it,
    /// replacing any stored model. Otherwise the stored model is used. Either
    /// way the result is verified against `functions`.
    fn compile_model(
        &self,
        profile: &str,
        model_ref: &ModelRef,
        functions: &BTreeMap<String, FunctionDef>,
    ) -> Result<CompiledModelArtifact, CompileError> {
        let error = |kind: CompileErrorImpl| CompileError::for_model(profile, model_ref, kind);
        let key = ArtifactKey::new(model_ref);

        let (model, converted) = match self.graph(&model_ref.model).map_err(error)? {
            Some(graph) => {
                let conversion = convert(&graph, model_ref, &|name| functions.contains_key(name))
                    .map_err(|err| error(err.into()))?;
                (ImportedModel::from_conversion(conversion), true)
            }
            None if self.options.ignore_stored_models => {
                return Err(error(CompileErrorImpl::ModelNotFound(
                    model_ref.model.clone(),
                )));
            }
            None => {
                let stored = self
                    .store
                    .load(&key)
                    .map_err(|err| error(err.into()))?
                    .ok_or_else(|| error(CompileErrorImpl::ModelNotFound(model_ref.model.clone())))?;
                log::debug!("using stored model {} for {}", key, model_ref);
                (stored, false)
            }
        };

        let artifact = model
            .bind(model_ref, &key, functions)
            .map_err(|err| error(err.into()))?;
        verify_artifact(&artifact, functions).map_err(error)?;

        if converted {
            self.store
                .save(&key, &model)
                .map_err(|err| error(err.into()))?;
            log::debug!(
                "converted {} into {} generated functions and {} constants",
                model_ref,
                artifact.generated_functions.len(),
                artifact.large_constants.len()
            );
        }
        Ok(artifact)
    }

    /// Return the graph for a model path, reading it if it has not been read
    /// before.
    ///
    /// Returns `Ok(None)` if the graph source does not have the model.
    fn graph(&self, path: &str) -> Result<Option<Arc<ImportedGraph>>, CompileErrorImpl> {
        let cached = self
            .graph_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned();
        if let Some(graph) = cached {
            return Ok(Some(graph));
        }

        let Some(graph) = self.graphs.read_graph(path)? else {
            return Ok(None);
        };
        let mut cache = self.graph_cache.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(Some(cache.entry(path.to_string()).or_insert(graph).clone()))
    }
}

/// Return the parent's artifact for `model_ref` if every function it depends
/// on has the same definition in `effective`.
fn reusable_artifact(
    parent: &CompiledProfile,
    effective: &EffectiveProfile,
    model_ref: &ModelRef,
) -> Option<Arc<CompiledModelArtifact>> {
    let artifact = parent.artifacts.get(model_ref)?;
    let unchanged = artifact.dependencies.iter().all(|name| {
        parent.effective.functions.get(name) == effective.functions.get(name)
    });
    unchanged.then(|| artifact.clone())
}

/// Type check a newly converted artifact against the profile's functions.
fn verify_artifact(
    artifact: &CompiledModelArtifact,
    functions: &BTreeMap<String, FunctionDef>,
) -> Result<(), CompileErrorImpl> {
    let generated: BTreeMap<String, FunctionDef> = artifact
        .generated_functions
        .iter()
        .map(|(name, body)| (name.clone(), FunctionDef::new(body.clone())))
        .collect();
    let env = MapEnvironment {
        functions: vec![functions, &generated],
        constants: artifact
            .large_constants
            .iter()
            .map(|(name, constant)| (name.clone(), constant.ty.clone()))
            .collect(),
    };

    let mut verifier = TypeVerifier::new(&env);
    verifier.check_inputs(&artifact.inputs)?;
    verifier.verify(&artifact.expression)?;
    for body in artifact.generated_functions.values() {
        verifier.verify(body)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rankc_tensor::ValueType;

    use super::{CompileOptions, Compiler, ProfileState};
    use crate::error::ErrorKind;
    use crate::expr::{parse, UnaryFn};
    use crate::graph::{GraphBuilder, InMemoryGraphs, NodeShape, OpKind};
    use crate::profile::{FunctionDef, RankProfile, RankProfileRegistry};
    use crate::store::{ArtifactKey, ArtifactStore, MemoryArtifactStore};
    use crate::test_util::{mnist_softmax, small_constants_and_functions, MNIST_EXPRESSION};

    const MNIST: &str = "onnx_import(\"mnist_softmax.onnx\")";
    const SMALL: &str = "onnx_import(\"small_constants_and_functions.onnx\")";
    const EPSILON: &str = "small_constants_and_functions_epsilon";

    fn graphs() -> InMemoryGraphs {
        let mut graphs = InMemoryGraphs::new();
        graphs.insert("mnist_softmax.onnx", mnist_softmax());
        graphs.insert(
            "small_constants_and_functions.onnx",
            small_constants_and_functions(),
        );
        graphs
    }

    fn options() -> CompileOptions {
        let mut options = CompileOptions::with_defaults();
        options.ignore_stored_models(false).parallel(false);
        options
    }

    fn base_profile() -> RankProfile {
        let mut profile = RankProfile::new("base");
        profile
            .add_function(
                "Placeholder",
                FunctionDef::parse("tensor<float>(d0[1],d1[784])(0.5)").unwrap(),
            )
            .add_function("input", FunctionDef::parse("tensor<float>(d0[3])(1.0)").unwrap())
            .add_function("mnist", FunctionDef::parse(MNIST).unwrap())
            .set_first_phase(parse(&format!("reduce({}, sum)", SMALL)).unwrap())
            .set_second_phase(parse("reduce(mnist, max)").unwrap());
        profile
    }

    #[test]
    fn test_compile_profile() {
        let graphs = graphs();
        let store = MemoryArtifactStore::new();
        let compiler = Compiler::new(&graphs, &store, options());

        let mut registry = RankProfileRegistry::new();
        registry.insert(base_profile());
        let output = compiler.compile_all(&registry);
        assert!(output.is_success());

        let profile = output.profile("base").unwrap();
        assert_eq!(
            profile.functions["mnist"].expression.to_string(),
            MNIST_EXPRESSION
        );
        assert_eq!(
            profile.second_phase.as_ref().unwrap().to_string(),
            "reduce(mnist, max)"
        );
        let first_phase = profile.first_phase.as_ref().unwrap().to_string();
        assert!(first_phase.starts_with("reduce(join(imported_ml_function_"));
        assert!(profile.generated_functions.contains_key(EPSILON));
        assert!(profile
            .generated_functions
            .contains_key("imported_ml_function_small_constants_and_functions_exp_output"));

        assert_eq!(
            output.constants().keys().collect::<Vec<_>>(),
            ["mnist_softmax_layer_Variable", "mnist_softmax_layer_Variable_1"]
        );
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_child_reuses_unaffected_artifacts() {
        let graphs = graphs();
        let store = MemoryArtifactStore::new();
        let compiler = Compiler::new(&graphs, &store, options());

        let mut registry = RankProfileRegistry::new();
        registry.insert(base_profile());
        let mut child = RankProfile::with_parent("child", "base");
        child.add_function(EPSILON, FunctionDef::parse("tensor<float>()(0.25)").unwrap());
        registry.insert(child);
        registry.insert(RankProfile::with_parent("sibling", "base"));

        let output = compiler.compile_all(&registry);
        assert!(output.is_success());
        let base = output.profile("base").unwrap();
        let child = output.profile("child").unwrap();
        let sibling = output.profile("sibling").unwrap();

        let mnist = parse(MNIST).unwrap().model_refs().remove(0);
        let small = parse(SMALL).unwrap().model_refs().remove(0);

        // The override only affects the model which uses the constant.
        assert!(Arc::ptr_eq(&base.artifacts[&mnist], &child.artifacts[&mnist]));
        assert!(!Arc::ptr_eq(&base.artifacts[&small], &child.artifacts[&small]));
        assert!(!child.artifacts[&small]
            .generated_functions
            .contains_key(EPSILON));
        assert_eq!(
            child.function(EPSILON).unwrap().to_string(),
            "tensor<float>()(0.25)"
        );
        assert_eq!(
            base.function(EPSILON).unwrap().to_string(),
            "tensor<float>()(1e-5)"
        );

        // A profile which changes nothing reuses everything.
        assert!(Arc::ptr_eq(&base.artifacts[&small], &sibling.artifacts[&small]));
        assert!(Arc::ptr_eq(&base.artifacts[&mnist], &sibling.artifacts[&mnist]));
    }

    #[test]
    fn test_compile_uses_stored_models() {
        let store = MemoryArtifactStore::new();
        let mut registry = RankProfileRegistry::new();
        registry.insert(base_profile());

        let graphs = graphs();
        let first = Compiler::new(&graphs, &store, options()).compile_all(&registry);
        assert!(first.is_success());

        // A compiler without any model graphs can use the stored models.
        let no_graphs = InMemoryGraphs::new();
        let second = Compiler::new(&no_graphs, &store, options()).compile_all(&registry);
        assert!(second.is_success());
        let (first, second) = (
            first.profile("base").unwrap(),
            second.profile("base").unwrap(),
        );
        assert_eq!(first.first_phase, second.first_phase);
        assert_eq!(first.functions, second.functions);
        assert_eq!(first.generated_functions, second.generated_functions);

        // Unless stored models are ignored.
        let mut ignore = options();
        ignore.ignore_stored_models(true);
        let third = Compiler::new(&no_graphs, &store, ignore).compile_all(&registry);
        assert_eq!(third.error("base").unwrap().kind(), ErrorKind::ModelNotFound);
    }

    #[test]
    fn test_input_types_checked_for_every_profile() {
        let graphs = graphs();
        let store = MemoryArtifactStore::new();
        let compiler = Compiler::new(&graphs, &store, options());

        let wrong_placeholder = "tensor(d0[1],d5[10])(0.0)";
        let mut registry = RankProfileRegistry::new();
        registry.insert(base_profile());
        let mut child = RankProfile::with_parent("child", "base");
        child.add_function("Placeholder", FunctionDef::parse(wrong_placeholder).unwrap());
        registry.insert(child);
        let mut unrelated = base_profile();
        unrelated.name = "unrelated".to_string();
        unrelated.add_function("Placeholder", FunctionDef::parse(wrong_placeholder).unwrap());
        registry.insert(unrelated);

        let output = compiler.compile_all(&registry);
        assert!(output.profile("base").is_some());
        for name in ["child", "unrelated"] {
            let err = output.error(name).unwrap();
            assert_eq!(err.kind(), ErrorKind::InputTypeMismatch, "{}", name);
        }

        // The same binding is rejected when the model is only available from
        // the store.
        let no_graphs = InMemoryGraphs::new();
        let mut registry = RankProfileRegistry::new();
        let mut stored_only = base_profile();
        stored_only.add_function("Placeholder", FunctionDef::parse(wrong_placeholder).unwrap());
        registry.insert(stored_only);
        let output = Compiler::new(&no_graphs, &store, options()).compile_all(&registry);
        assert_eq!(
            output.error("base").unwrap().kind(),
            ErrorKind::InputTypeMismatch
        );
    }

    #[test]
    fn test_graph_preferred_over_stored_model() {
        let store = MemoryArtifactStore::new();
        let mut registry = RankProfileRegistry::new();
        let mut profile = RankProfile::new("p");
        profile
            .add_function("input", FunctionDef::parse("tensor<float>(d0[3])(1.0)").unwrap())
            .set_first_phase(parse(SMALL).unwrap());
        registry.insert(profile);

        let graphs = graphs();
        let first = Compiler::new(&graphs, &store, options()).compile_all(&registry);
        assert!(first.is_success());

        // Replace the model with one that computes `exp(input)` only.
        let mut changed = GraphBuilder::new("small_constants_and_functions");
        changed
            .add_input("input", NodeShape::fixed(ValueType::Float, &[3]))
            .unwrap();
        changed
            .add_node("exp_output", OpKind::Unary(UnaryFn::Exp), &["input"])
            .unwrap();
        changed.add_output("default", "output", "exp_output").unwrap();
        let mut changed_graphs = InMemoryGraphs::new();
        changed_graphs.insert("small_constants_and_functions.onnx", changed.build());

        let second = Compiler::new(&changed_graphs, &store, options()).compile_all(&registry);
        let compiled = second.profile("p").unwrap();
        assert_eq!(
            compiled.first_phase.as_ref().unwrap().to_string(),
            "map(input, f(a)(exp(a)))"
        );

        let key = ArtifactKey::new(&parse(SMALL).unwrap().model_refs()[0]);
        let stored = store.load(&key).unwrap().unwrap();
        assert_eq!(stored.expression.to_string(), "map(input, f(a)(exp(a)))");
    }

    #[test]
    fn test_failures_cascade() {
        let graphs = graphs();
        let store = MemoryArtifactStore::new();
        let compiler = Compiler::new(&graphs, &store, options());

        let mut registry = RankProfileRegistry::new();
        let mut broken = RankProfile::new("broken");
        broken.set_first_phase(parse(MNIST).unwrap());
        registry.insert(broken);
        registry.insert(RankProfile::with_parent("child", "broken"));
        registry.insert(RankProfile::with_parent("grandchild", "child"));
        registry.insert(RankProfile::with_parent("loop_a", "loop_b"));
        registry.insert(RankProfile::with_parent("loop_b", "loop_a"));
        registry.insert(RankProfile::new("fine"));

        let output = compiler.compile_all(&registry);
        assert!(!output.is_success());
        assert!(output.profile("fine").is_some());

        let err = output.error("broken").unwrap();
        assert_eq!(err.kind(), ErrorKind::MissingInputBinding);
        assert!(err.to_string().starts_with(
            "rank profile 'broken' is invalid: could not use ONNX model from \
             onnx_import(\"mnist_softmax.onnx\"): Model refers input 'Placeholder'"
        ));

        for name in ["child", "grandchild"] {
            assert_eq!(output.error(name).unwrap().kind(), ErrorKind::ParentFailed);
        }
        for name in ["loop_a", "loop_b"] {
            assert_eq!(
                output.error(name).unwrap().kind(),
                ErrorKind::CyclicOrUnresolvedInheritance
            );
        }
        assert!(matches!(output.state("broken"), Some(ProfileState::Failed(_))));
        assert!(store.is_empty());
    }

    #[test]
    fn test_parallel_compile_matches_sequential() {
        let graphs = graphs();
        let mut registry = RankProfileRegistry::new();
        registry.insert(base_profile());
        for i in 0..8 {
            let mut profile = base_profile();
            profile.name = format!("copy{}", i);
            registry.insert(profile);
        }

        let sequential_store = MemoryArtifactStore::new();
        let sequential = Compiler::new(&graphs, &sequential_store, options()).compile_all(&registry);

        let parallel_store = MemoryArtifactStore::new();
        let mut parallel_options = options();
        parallel_options.parallel(true);
        let parallel = Compiler::new(&graphs, &parallel_store, parallel_options).compile_all(&registry);

        for profile in registry.profiles() {
            let a = sequential.profile(&profile.name).unwrap();
            let b = parallel.profile(&profile.name).unwrap();
            assert_eq!(a.first_phase, b.first_phase);
            assert_eq!(a.generated_functions, b.generated_functions);
        }
        let key = ArtifactKey::new(&parse(MNIST).unwrap().model_refs()[0]);
        assert!(parallel_store.load(&key).unwrap().is_some());
    }
}
