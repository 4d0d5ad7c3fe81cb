//! Rank profiles and the registry which holds them.

use std::collections::BTreeMap;

use rankc_tensor::TensorType;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::expr::{parse, ExprRef, ModelRef, ParseError};

/// A function declared in a rank profile.
#[derive(Clone, Debug, PartialEq)]
pub struct FunctionDef {
    pub expression: ExprRef,

    /// Declared return type. When absent the type is inferred from the
    /// expression.
    pub return_type: Option<TensorType>,
}

impl FunctionDef {
    pub fn new(expression: ExprRef) -> FunctionDef {
        FunctionDef {
            expression,
            return_type: None,
        }
    }

    pub fn with_type(expression: ExprRef, return_type: TensorType) -> FunctionDef {
        FunctionDef {
            expression,
            return_type: Some(return_type),
        }
    }

    /// Parse a function body from its text form.
    pub fn parse(text: &str) -> Result<FunctionDef, ParseError> {
        parse(text).map(FunctionDef::new)
    }
}

/// A named, inheritable set of functions and phase expressions.
#[derive(Clone, Debug, Default)]
pub struct RankProfile {
    pub name: String,

    /// Name of the profile this inherits from.
    pub parent: Option<String>,

    pub functions: BTreeMap<String, FunctionDef>,
    pub first_phase: Option<ExprRef>,
    pub second_phase: Option<ExprRef>,
}

impl RankProfile {
    pub fn new(name: &str) -> RankProfile {
        RankProfile {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_parent(name: &str, parent: &str) -> RankProfile {
        RankProfile {
            parent: Some(parent.to_string()),
            ..RankProfile::new(name)
        }
    }

    pub fn add_function(&mut self, name: &str, def: FunctionDef) -> &mut Self {
        self.functions.insert(name.to_string(), def);
        self
    }

    pub fn set_first_phase(&mut self, expr: ExprRef) -> &mut Self {
        self.first_phase = Some(expr);
        self
    }

    pub fn set_second_phase(&mut self, expr: ExprRef) -> &mut Self {
        self.second_phase = Some(expr);
        self
    }
}

/// Functions and phase expressions of a profile after applying inheritance.
///
/// Each entry is the profile's own declaration if it has one, otherwise the
/// parent's effective entry.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EffectiveProfile {
    pub functions: BTreeMap<String, FunctionDef>,
    pub first_phase: Option<ExprRef>,
    pub second_phase: Option<ExprRef>,
}

impl EffectiveProfile {
    /// Resolve `profile` against the effective profile of its parent.
    pub fn resolve(profile: &RankProfile, parent: Option<&EffectiveProfile>) -> EffectiveProfile {
        let mut effective = parent.cloned().unwrap_or_default();
        for (name, def) in &profile.functions {
            effective.functions.insert(name.clone(), def.clone());
        }
        if let Some(expr) = &profile.first_phase {
            effective.first_phase = Some(expr.clone());
        }
        if let Some(expr) = &profile.second_phase {
            effective.second_phase = Some(expr.clone());
        }
        effective
    }

    /// Return the model references used by the phase expressions and
    /// functions, without duplicates.
    pub fn model_refs(&self) -> Vec<ModelRef> {
        let mut refs = Vec::new();
        let exprs = self
            .first_phase
            .iter()
            .chain(self.second_phase.iter())
            .chain(self.functions.values().map(|def| &def.expression));
        for expr in exprs {
            for model_ref in expr.model_refs() {
                if !refs.contains(&model_ref) {
                    refs.push(model_ref);
                }
            }
        }
        refs
    }
}

/// Profiles that could not be placed in an inheritance order.
#[derive(Clone, Debug, PartialEq)]
pub struct UnresolvedProfile {
    pub name: String,

    /// The parent which is missing or part of a cycle.
    pub parent: String,
}

/// The set of rank profiles in a schema build.
#[derive(Clone, Debug, Default)]
pub struct RankProfileRegistry {
    profiles: Vec<RankProfile>,
    index: FxHashMap<String, usize>,
}

impl RankProfileRegistry {
    pub fn new() -> RankProfileRegistry {
        RankProfileRegistry::default()
    }

    /// Add a profile, replacing any existing profile with the same name.
    pub fn insert(&mut self, profile: RankProfile) {
        match self.index.get(&profile.name) {
            Some(&i) => self.profiles[i] = profile,
            None => {
                self.index.insert(profile.name.clone(), self.profiles.len());
                self.profiles.push(profile);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&RankProfile> {
        self.index.get(name).map(|&i| &self.profiles[i])
    }

    /// Iterate over profiles in insertion order.
    pub fn profiles(&self) -> impl Iterator<Item = &RankProfile> {
        self.profiles.iter()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Group profiles into levels such that each profile's parent is in an
    /// earlier level.
    ///
    /// Profiles within a level are in insertion order. Profiles whose parent
    /// chain is cyclic or refers to a missing profile are returned separately.
    pub fn levels(&self) -> (Vec<Vec<&RankProfile>>, Vec<UnresolvedProfile>) {
        let mut levels: Vec<Vec<&RankProfile>> = Vec::new();
        let mut placed = FxHashSet::default();
        let mut pending: Vec<&RankProfile> = self.profiles.iter().collect();

        loop {
            let (ready, rest): (Vec<_>, Vec<_>) =
                pending.into_iter().partition(|profile| match &profile.parent {
                    None => true,
                    Some(parent) => placed.contains(parent.as_str()),
                });
            pending = rest;
            if ready.is_empty() {
                break;
            }
            placed.extend(ready.iter().map(|profile| profile.name.as_str()));
            levels.push(ready);
        }

        let unresolved = pending
            .into_iter()
            .map(|profile| UnresolvedProfile {
                name: profile.name.clone(),
                parent: profile.parent.clone().unwrap_or_default(),
            })
            .collect();
        (levels, unresolved)
    }
}
