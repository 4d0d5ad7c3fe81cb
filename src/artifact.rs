//! Imported models and the artifacts produced by binding them to a profile.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use rankc_tensor::{TensorType, TensorValue};

use crate::constants::partition;
use crate::convert::{Conversion, ConvertError};
use crate::expr::{Expr, ExprRef, ModelRef};
use crate::profile::FunctionDef;
use crate::store::ArtifactKey;

/// A constant which is too large to be inlined.
#[derive(Clone, Debug, PartialEq)]
pub struct LargeConstant {
    pub ty: TensorType,

    /// The constant's value. This is absent for models read from an
    /// [`ArtifactStore`](crate::store::ArtifactStore), whose values are
    /// already stored in constant files.
    pub value: Option<Arc<TensorValue>>,
}

/// The result of importing one output of a model, before it is bound to the
/// functions of a rank profile.
///
/// This is the form which is persisted. It does not depend on the profile
/// which caused the import, so it can be shared by all profiles using the
/// same model output.
#[derive(Clone, Debug, PartialEq)]
pub struct ImportedModel {
    /// Expression for the output. All constants are referenced as
    /// `constant(name)`.
    pub expression: ExprRef,

    /// Functions generated for graph nodes.
    pub functions: BTreeMap<String, ExprRef>,

    pub small_constants: BTreeMap<String, Arc<TensorValue>>,
    pub large_constants: BTreeMap<String, LargeConstant>,

    /// Model inputs and the types the functions bound to them must have.
    pub inputs: BTreeMap<String, TensorType>,
}

impl ImportedModel {
    pub fn from_conversion(conversion: Conversion) -> ImportedModel {
        let constants = partition(conversion.constants);
        let large_constants = constants
            .file_backed
            .into_iter()
            .map(|(name, value)| {
                let constant = LargeConstant {
                    ty: value.ty().clone(),
                    value: Some(value),
                };
                (name, constant)
            })
            .collect();
        ImportedModel {
            expression: conversion.expression,
            functions: conversion.functions,
            small_constants: constants.inline,
            large_constants,
            inputs: conversion.inputs,
        }
    }

    /// Bind this model to the effective functions of a rank profile.
    ///
    /// Small constants become generated functions with a literal body. Large
    /// constants become ranking constants stored under `key`. A profile
    /// function with the same name as a constant or generated function
    /// replaces it.
    pub fn bind(
        &self,
        model_ref: &ModelRef,
        key: &ArtifactKey,
        functions: &BTreeMap<String, FunctionDef>,
    ) -> Result<CompiledModelArtifact, ConvertError> {
        for (input, required) in &self.inputs {
            if !functions.contains_key(input) {
                return Err(ConvertError::MissingInputBinding {
                    input: input.clone(),
                    required: required.clone(),
                });
            }
        }

        let mut dependencies: BTreeSet<String> = self.inputs.keys().cloned().collect();
        let mut generated_functions = BTreeMap::new();
        let mut large_constants = BTreeMap::new();
        let mut as_function = BTreeSet::new();

        for (name, value) in &self.small_constants {
            dependencies.insert(name.clone());
            as_function.insert(name.as_str());
            if functions.contains_key(name) {
                log::debug!("function '{}' overrides constant of {}", name, model_ref);
            } else {
                generated_functions.insert(name.clone(), Expr::literal(value.as_ref().clone()));
            }
        }

        for (name, constant) in &self.large_constants {
            dependencies.insert(name.clone());
            if functions.contains_key(name) {
                log::debug!("function '{}' overrides constant of {}", name, model_ref);
                as_function.insert(name.as_str());
            } else {
                large_constants.insert(
                    name.clone(),
                    RankingConstant {
                        name: name.clone(),
                        ty: constant.ty.clone(),
                        path: key.constant_path(name),
                    },
                );
            }
        }

        let substitute = |expr: &ExprRef| {
            Expr::replace_constant_refs(expr, &|name| {
                as_function.contains(name).then(|| Expr::variable(name))
            })
        };

        for (name, body) in &self.functions {
            dependencies.insert(name.clone());
            if !functions.contains_key(name) {
                generated_functions.insert(name.clone(), substitute(body));
            }
        }

        Ok(CompiledModelArtifact {
            model_ref: model_ref.clone(),
            expression: substitute(&self.expression),
            generated_functions,
            large_constants,
            inputs: self.inputs.clone(),
            dependencies,
        })
    }
}

/// A named, typed, file-backed tensor available to ranking expressions.
#[derive(Clone, Debug, PartialEq)]
pub struct RankingConstant {
    pub name: String,
    pub ty: TensorType,

    /// Path of the value file, relative to the application directory.
    pub path: PathBuf,
}

/// A model reference compiled for one rank profile.
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledModelArtifact {
    pub model_ref: ModelRef,

    /// Expression which replaces the model reference.
    pub expression: ExprRef,

    /// Functions to add to the profile. These are functions generated for
    /// graph nodes and inlined constants.
    pub generated_functions: BTreeMap<String, ExprRef>,

    pub large_constants: BTreeMap<String, RankingConstant>,

    /// Model inputs and their required types.
    pub inputs: BTreeMap<String, TensorType>,

    /// Names of profile functions whose definitions affected this artifact.
    ///
    /// A profile can reuse an artifact compiled for its parent if all of
    /// these names have the same definition in both profiles.
    pub dependencies: BTreeSet<String>,
}
