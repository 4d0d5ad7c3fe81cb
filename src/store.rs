//! Persistence of imported models.
//!
//! Stored models let a build compile model references without the original
//! model file, eg. when an application package is deployed to a machine
//! which only has the generated files.

use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use rankc_tensor::{TensorType, TensorValue};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::artifact::{ImportedModel, LargeConstant};
use crate::expr::{parse, ExprRef, ModelRef};
use crate::graph::{model_name, sanitize_name, DEFAULT_SIGNATURE};

/// Directory, relative to the application directory, where imported models
/// are stored.
pub const GENERATED_DIR: &str = "models.generated";

const MANIFEST_FILE: &str = "model.json";
const CONSTANTS_DIR: &str = "constants";

/// Identifies a stored model by model name, signature and output.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtifactKey {
    pub model: String,
    pub signature: String,
    pub output: Option<String>,
}

impl ArtifactKey {
    pub fn new(model_ref: &ModelRef) -> ArtifactKey {
        ArtifactKey {
            model: model_name(&model_ref.model),
            signature: sanitize_name(model_ref.signature().unwrap_or(DEFAULT_SIGNATURE)),
            output: model_ref.output_name().map(sanitize_name),
        }
    }

    /// Return the directory of the stored model, relative to the application
    /// directory.
    pub fn directory(&self) -> PathBuf {
        let entry = match &self.output {
            Some(output) => format!("{}.{}", self.signature, output),
            None => self.signature.clone(),
        };
        Path::new(GENERATED_DIR).join(&self.model).join(entry)
    }

    /// Return the path of the value file for constant `name`, relative to
    /// the application directory.
    pub fn constant_path(&self, name: &str) -> PathBuf {
        self.directory()
            .join(CONSTANTS_DIR)
            .join(format!("{}.json", name))
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.model, self.signature)?;
        if let Some(output) = &self.output {
            write!(f, ".{}", output)?;
        }
        Ok(())
    }
}

/// Errors reading or writing stored models.
#[derive(Debug)]
pub enum StoreError {
    /// Reading or writing a file failed.
    Io { path: PathBuf, error: io::Error },

    /// A stored file could not be interpreted.
    Corrupt { path: PathBuf, reason: String },

    /// A model could not be saved because the value of a large constant is
    /// not available.
    MissingConstantValue { name: String },
}

impl StoreError {
    fn io(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
        move |error| StoreError::Io {
            path: path.to_path_buf(),
            error,
        }
    }

    fn corrupt(path: &Path, reason: impl fmt::Display) -> StoreError {
        StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, error } => {
                write!(f, "failed to access \"{}\": {}", path.display(), error)
            }
            Self::Corrupt { path, reason } => {
                write!(f, "stored model file \"{}\" is invalid: {}", path.display(), reason)
            }
            Self::MissingConstantValue { name } => {
                write!(f, "value of constant '{}' is not available", name)
            }
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Storage for imported models.
///
/// Implementations must serialize writers for the same key. Saving a model
/// with the same content as the stored one is not an error. Saving different
/// content replaces the stored model.
pub trait ArtifactStore: Sync {
    fn load(&self, key: &ArtifactKey) -> Result<Option<ImportedModel>, StoreError>;

    fn save(&self, key: &ArtifactKey, model: &ImportedModel) -> Result<(), StoreError>;
}

/// Contents of the manifest file of a stored model.
#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Manifest {
    expression: String,
    functions: BTreeMap<String, String>,
    small_constants: BTreeMap<String, TensorValue>,
    large_constants: BTreeMap<String, TensorType>,
    inputs: BTreeMap<String, TensorType>,
}

/// Serialize `model` into a list of files, with paths relative to the
/// model's directory.
fn encode(model: &ImportedModel) -> Result<Vec<(PathBuf, Vec<u8>)>, StoreError> {
    let manifest = Manifest {
        expression: model.expression.to_string(),
        functions: model
            .functions
            .iter()
            .map(|(name, body)| (name.clone(), body.to_string()))
            .collect(),
        small_constants: model
            .small_constants
            .iter()
            .map(|(name, value)| (name.clone(), value.as_ref().clone()))
            .collect(),
        large_constants: model
            .large_constants
            .iter()
            .map(|(name, constant)| (name.clone(), constant.ty.clone()))
            .collect(),
        inputs: model.inputs.clone(),
    };

    let mut files = Vec::with_capacity(1 + model.large_constants.len());
    let manifest_path = PathBuf::from(MANIFEST_FILE);
    let bytes =
        serde_json::to_vec_pretty(&manifest).map_err(|err| StoreError::Io {
            path: manifest_path.clone(),
            error: err.into(),
        })?;
    files.push((manifest_path, bytes));

    for (name, constant) in &model.large_constants {
        let value = constant
            .value
            .as_ref()
            .ok_or_else(|| StoreError::MissingConstantValue { name: name.clone() })?;
        let path = Path::new(CONSTANTS_DIR).join(format!("{}.json", name));
        let bytes = serde_json::to_vec(value.as_ref()).map_err(|err| StoreError::Io {
            path: path.clone(),
            error: err.into(),
        })?;
        files.push((path, bytes));
    }
    Ok(files)
}

/// Reconstruct a model from its manifest.
fn decode(manifest: Manifest, dir: &Path) -> Result<ImportedModel, StoreError> {
    let manifest_path = dir.join(MANIFEST_FILE);
    let parse_expr = |name: &str, text: &str| {
        parse(text).map_err(|err| StoreError::corrupt(&manifest_path, format!("{}: {}", name, err)))
    };

    let expression = parse_expr("expression", &manifest.expression)?;
    let functions: BTreeMap<String, ExprRef> = manifest
        .functions
        .iter()
        .map(|(name, text)| Ok((name.clone(), parse_expr(name, text)?)))
        .collect::<Result<_, StoreError>>()?;

    // Every name used by the expressions must be declared by the manifest.
    let mut function_refs = BTreeSet::new();
    let mut constant_refs = BTreeSet::new();
    for expr in std::iter::once(&expression).chain(functions.values()) {
        expr.collect_function_refs(&mut function_refs);
        expr.collect_constant_refs(&mut constant_refs);
    }
    if let Some(name) = function_refs
        .iter()
        .find(|name| !functions.contains_key(*name) && !manifest.inputs.contains_key(*name))
    {
        return Err(StoreError::corrupt(
            &manifest_path,
            format!("'{}' is not an input or generated function", name),
        ));
    }
    if let Some(name) = constant_refs.iter().find(|name| {
        !manifest.small_constants.contains_key(*name)
            && !manifest.large_constants.contains_key(*name)
    }) {
        return Err(StoreError::corrupt(
            &manifest_path,
            format!("constant '{}' is not declared", name),
        ));
    }

    let mut large_constants = BTreeMap::new();
    for (name, ty) in manifest.large_constants {
        let path = dir.join(CONSTANTS_DIR).join(format!("{}.json", name));
        if !path.is_file() {
            return Err(StoreError::corrupt(&path, "constant file is missing"));
        }
        large_constants.insert(name, LargeConstant { ty, value: None });
    }

    Ok(ImportedModel {
        expression,
        functions,
        small_constants: manifest
            .small_constants
            .into_iter()
            .map(|(name, value)| (name, Arc::new(value)))
            .collect(),
        large_constants,
        inputs: manifest.inputs,
    })
}

/// Return the paths of all files under `dir`, relative to `dir`.
fn stored_files(dir: &Path) -> io::Result<BTreeSet<PathBuf>> {
    fn visit(root: &Path, dir: &Path, out: &mut BTreeSet<PathBuf>) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                visit(root, &path, out)?;
            } else if let Ok(rel) = path.strip_prefix(root) {
                out.insert(rel.to_path_buf());
            }
        }
        Ok(())
    }

    let mut files = BTreeSet::new();
    visit(dir, dir, &mut files)?;
    Ok(files)
}

/// Stores models as JSON files under an application directory.
///
/// Each model is written to a staging directory next to its final location,
/// which then replaces the previous directory, so readers see either the
/// old or the new model in full.
pub struct FileArtifactStore {
    app_dir: PathBuf,
    locks: Mutex<FxHashMap<ArtifactKey, Arc<Mutex<()>>>>,
}

impl FileArtifactStore {
    pub fn new(app_dir: impl Into<PathBuf>) -> FileArtifactStore {
        FileArtifactStore {
            app_dir: app_dir.into(),
            locks: Mutex::new(FxHashMap::default()),
        }
    }

    /// Return the application directory.
    pub fn app_dir(&self) -> &Path {
        &self.app_dir
    }

    /// Return the absolute directory of the model stored for `key`.
    pub fn model_dir(&self, key: &ArtifactKey) -> PathBuf {
        self.app_dir.join(key.directory())
    }

    fn key_lock(&self, key: &ArtifactKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(key.clone()).or_default().clone()
    }

    /// Return true if `dir` contains exactly `files`.
    fn is_unchanged(dir: &Path, files: &[(PathBuf, Vec<u8>)]) -> bool {
        let Ok(existing) = stored_files(dir) else {
            return false;
        };
        existing.len() == files.len()
            && files.iter().all(|(path, bytes)| {
                existing.contains(path)
                    && fs::read(dir.join(path)).is_ok_and(|stored| &stored == bytes)
            })
    }
}

impl ArtifactStore for FileArtifactStore {
    fn load(&self, key: &ArtifactKey) -> Result<Option<ImportedModel>, StoreError> {
        let lock = self.key_lock(key);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let dir = self.model_dir(key);
        let manifest_path = dir.join(MANIFEST_FILE);
        let bytes = match fs::read(&manifest_path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StoreError::io(&manifest_path)(err)),
        };
        let manifest: Manifest = serde_json::from_slice(&bytes)
            .map_err(|err| StoreError::corrupt(&manifest_path, err))?;
        let model = decode(manifest, &dir)?;
        log::debug!("loaded stored model {} from {}", key, dir.display());
        Ok(Some(model))
    }

    fn save(&self, key: &ArtifactKey, model: &ImportedModel) -> Result<(), StoreError> {
        let files = encode(model)?;

        let lock = self.key_lock(key);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let dir = self.model_dir(key);
        if Self::is_unchanged(&dir, &files) {
            log::debug!("stored model {} is unchanged", key);
            return Ok(());
        }

        let parent = dir.parent().unwrap_or(&self.app_dir);
        fs::create_dir_all(parent).map_err(StoreError::io(parent))?;

        // The model is written to a subdirectory of `staging`, so `staging`
        // only ever holds leftovers and is always deleted on drop.
        let staging = tempfile::Builder::new()
            .prefix(".staging")
            .tempdir_in(parent)
            .map_err(StoreError::io(parent))?;
        let staged = staging.path().join("model");
        for (rel_path, bytes) in &files {
            let path = staged.join(rel_path);
            if let Some(file_dir) = path.parent() {
                fs::create_dir_all(file_dir).map_err(StoreError::io(file_dir))?;
            }
            fs::write(&path, bytes).map_err(StoreError::io(&path))?;
        }

        replace_dir(&staged, &dir, parent).map_err(StoreError::io(&dir))?;

        log::info!("stored model {} in {}", key, dir.display());
        Ok(())
    }
}

/// Replace the directory `dir` with `staged`.
///
/// An existing `dir` is moved aside into a temporary directory in `parent`,
/// and moved back if the replacement fails.
fn replace_dir(staged: &Path, dir: &Path, parent: &Path) -> io::Result<()> {
    if !dir.exists() {
        return fs::rename(staged, dir);
    }

    let aside = tempfile::Builder::new()
        .prefix(".replaced")
        .tempdir_in(parent)?;
    let previous = aside.path().join("model");
    fs::rename(dir, &previous)?;

    if let Err(err) = fs::rename(staged, dir) {
        if let Err(restore_err) = fs::rename(&previous, dir) {
            let kept = aside.keep();
            log::warn!(
                "could not restore \"{}\": {}. The previous contents are in \"{}\"",
                dir.display(),
                restore_err,
                kept.display()
            );
        }
        return Err(err);
    }
    Ok(())
}

/// Keeps models in memory, for builds which do not persist generated files.
#[derive(Default)]
pub struct MemoryArtifactStore {
    models: RwLock<FxHashMap<ArtifactKey, ImportedModel>>,
}

impl MemoryArtifactStore {
    pub fn new() -> MemoryArtifactStore {
        MemoryArtifactStore::default()
    }

    pub fn len(&self) -> usize {
        self.models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn load(&self, key: &ArtifactKey) -> Result<Option<ImportedModel>, StoreError> {
        let models = self.models.read().unwrap_or_else(PoisonError::into_inner);
        Ok(models.get(key).cloned())
    }

    fn save(&self, key: &ArtifactKey, model: &ImportedModel) -> Result<(), StoreError> {
        let mut models = self.models.write().unwrap_or_else(PoisonError::into_inner);
        if models.get(key) != Some(model) {
            models.insert(key.clone(), model.clone());
        }
        Ok(())
    }
}
