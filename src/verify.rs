//! Type inference and checking of ranking expressions.

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;

use rankc_tensor::{TensorType, TypeError, ValueType};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::expr::{Expr, ExprRef, ModelRef};
use crate::profile::FunctionDef;

/// Functions and constants visible to an expression.
pub trait TypeEnvironment {
    fn function(&self, name: &str) -> Option<&FunctionDef>;

    fn constant_type(&self, name: &str) -> Option<&TensorType>;
}

/// Errors found when verifying an expression.
#[derive(Clone, Debug, PartialEq)]
pub enum VerifyError {
    /// A variable or call refers to a function which does not exist.
    UnboundVariable(String),

    /// A `constant(name)` expression refers to an unknown constant.
    UnknownConstant(String),

    /// Operand types are incompatible.
    Type { expression: String, error: TypeError },

    /// A model reference was not replaced by its compiled expression.
    UnresolvedModelReference(ModelRef),

    /// A function's type depends on itself.
    RecursiveFunction(String),

    /// The function bound to a model input does not return the type the
    /// model requires.
    InputTypeMismatch {
        input: String,
        required: TensorType,
        actual: TensorType,
    },
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnboundVariable(name) => write!(f, "Unknown function '{}'", name),
            Self::UnknownConstant(name) => write!(f, "Unknown constant '{}'", name),
            Self::Type { expression, error } => {
                write!(f, "Type error in '{}': {}", expression, error)
            }
            Self::UnresolvedModelReference(model_ref) => {
                write!(f, "Model reference {} was not compiled", model_ref)
            }
            Self::RecursiveFunction(name) => {
                write!(f, "The type of function '{}' depends on itself", name)
            }
            Self::InputTypeMismatch {
                input,
                required,
                actual,
            } => write!(
                f,
                "Model refers input '{}'. The required type of this is {}, but this function returns {}",
                input, required, actual
            ),
        }
    }
}

impl Error for VerifyError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Type { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Infers and checks the types of expressions in an environment.
///
/// Results are memoized per expression node and per function, so a verifier
/// should be reused for all expressions checked against one environment.
/// Nodes are identified by address, which is stable because expressions
/// are immutable and borrowed for the verifier's lifetime.
pub struct TypeVerifier<'a> {
    env: &'a dyn TypeEnvironment,
    node_types: FxHashMap<*const Expr, TensorType>,
    function_types: FxHashMap<String, TensorType>,
    in_progress: FxHashSet<String>,

    // Keeps verified nodes alive so their addresses are not reused.
    verified: Vec<ExprRef>,
}

impl<'a> TypeVerifier<'a> {
    pub fn new(env: &'a dyn TypeEnvironment) -> TypeVerifier<'a> {
        TypeVerifier {
            env,
            node_types: FxHashMap::default(),
            function_types: FxHashMap::default(),
            in_progress: FxHashSet::default(),
            verified: Vec::new(),
        }
    }

    /// Infer the type of `expr`.
    pub fn verify(&mut self, expr: &ExprRef) -> Result<TensorType, VerifyError> {
        let key = ExprRef::as_ptr(expr);
        if let Some(ty) = self.node_types.get(&key) {
            return Ok(ty.clone());
        }
        let ty = self.infer(expr)?;
        self.node_types.insert(key, ty.clone());
        self.verified.push(expr.clone());
        Ok(ty)
    }

    /// Return the type of function `name`.
    ///
    /// This is the declared return type if there is one, otherwise the type
    /// inferred from the function's expression.
    pub fn function_type(&mut self, name: &str) -> Result<TensorType, VerifyError> {
        if let Some(ty) = self.function_types.get(name) {
            return Ok(ty.clone());
        }
        let env = self.env;
        let def = env
            .function(name)
            .ok_or_else(|| VerifyError::UnboundVariable(name.to_string()))?;
        let ty = match &def.return_type {
            Some(ty) => ty.clone(),
            None => {
                if !self.in_progress.insert(name.to_string()) {
                    return Err(VerifyError::RecursiveFunction(name.to_string()));
                }
                let result = self.verify(&def.expression);
                self.in_progress.remove(name);
                result?
            }
        };
        self.function_types.insert(name.to_string(), ty.clone());
        Ok(ty)
    }

    /// Check that the function bound to each model input returns exactly the
    /// type the model requires.
    pub fn check_inputs(&mut self, inputs: &BTreeMap<String, TensorType>) -> Result<(), VerifyError> {
        for (input, required) in inputs {
            let actual = self.function_type(input)?;
            if &actual != required {
                return Err(VerifyError::InputTypeMismatch {
                    input: input.clone(),
                    required: required.clone(),
                    actual,
                });
            }
        }
        Ok(())
    }

    fn infer(&mut self, expr: &ExprRef) -> Result<TensorType, VerifyError> {
        let type_error = |error: TypeError| VerifyError::Type {
            expression: expr.to_string(),
            error,
        };

        match expr.as_ref() {
            Expr::Number(_) => Ok(TensorType::scalar(ValueType::Double)),
            Expr::Literal(value) => Ok(value.ty().clone()),
            Expr::Variable(name) => self.function_type(name),
            Expr::Call { name, args } => {
                for arg in args {
                    self.verify(arg)?;
                }
                self.function_type(name)
            }
            Expr::Constant(name) => self
                .env
                .constant_type(name)
                .cloned()
                .ok_or_else(|| VerifyError::UnknownConstant(name.clone())),
            Expr::Join { lhs, rhs, .. } | Expr::Arithmetic { lhs, rhs, .. } => {
                let lhs = self.verify(lhs)?;
                let rhs = self.verify(rhs)?;
                lhs.join(&rhs).map_err(type_error)
            }
            Expr::Reduce { arg, dims, .. } => self.verify(arg)?.reduce(dims).map_err(type_error),
            Expr::Rename { arg, from, to } => {
                self.verify(arg)?.rename(from, to).map_err(type_error)
            }
            Expr::Map { arg, .. } => self.verify(arg),
            Expr::Concat { lhs, rhs, dim } => {
                let lhs = self.verify(lhs)?;
                let rhs = self.verify(rhs)?;
                lhs.concat(&rhs, dim).map_err(type_error)
            }
            Expr::ModelRef(model_ref) => {
                Err(VerifyError::UnresolvedModelReference(model_ref.clone()))
            }
        }
    }
}

/// A [`TypeEnvironment`] backed by maps of functions and constant types.
#[derive(Default)]
pub struct MapEnvironment<'a> {
    pub functions: Vec<&'a BTreeMap<String, FunctionDef>>,
    pub constants: BTreeMap<String, TensorType>,
}

impl TypeEnvironment for MapEnvironment<'_> {
    /// Look up a function, using the first map which defines it.
    fn function(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.iter().find_map(|functions| functions.get(name))
    }

    fn constant_type(&self, name: &str) -> Option<&TensorType> {
        self.constants.get(name)
    }
}
