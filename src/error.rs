use std::error::Error;
use std::fmt::{Display, Formatter};

use crate::convert::ConvertError;
use crate::expr::ModelRef;
use crate::graph::GraphError;
use crate::store::StoreError;
use crate::verify::VerifyError;

/// Errors that occur when compiling a rank profile.
#[derive(Debug)]
pub struct CompileError {
    profile: String,
    model_ref: Option<ModelRef>,
    inner: CompileErrorImpl,
}

impl CompileError {
    pub(crate) fn new(profile: &str, kind: impl Into<CompileErrorImpl>) -> Self {
        Self {
            profile: profile.to_string(),
            model_ref: None,
            inner: kind.into(),
        }
    }

    pub(crate) fn for_model(
        profile: &str,
        model_ref: &ModelRef,
        kind: impl Into<CompileErrorImpl>,
    ) -> Self {
        Self {
            profile: profile.to_string(),
            model_ref: Some(model_ref.clone()),
            inner: kind.into(),
        }
    }

    /// The name of the rank profile which failed to compile.
    pub fn profile(&self) -> &str {
        &self.profile
    }

    /// The model reference that this error relates to.
    ///
    /// This is `None` if the error is not about a specific model reference.
    pub fn model_ref(&self) -> Option<&ModelRef> {
        self.model_ref.as_ref()
    }

    /// Return the category of error.
    pub fn kind(&self) -> ErrorKind {
        self.inner.kind()
    }
}

impl Display for CompileError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "rank profile '{}' is invalid: ", self.profile)?;
        if let Some(model_ref) = &self.model_ref {
            write!(f, "could not use ONNX model from {}: ", model_ref)?;
        }
        self.inner.fmt(f)
    }
}

impl Error for CompileError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner.source()
    }
}

/// Categories of error when compiling a rank profile.
///
/// See [`CompileError::kind`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The model does not have the requested signature.
    UnknownSignature,

    /// The model does not have the requested output.
    UnknownOutput,

    /// No output was requested and the model has several.
    AmbiguousOutput,

    /// A model input has no function of the same name in the profile.
    MissingInputBinding,

    /// A function bound to a model input has the wrong type.
    InputTypeMismatch,

    /// An expression failed type checking.
    TypeError,

    /// The model file does not exist and no stored model is available.
    ModelNotFound,

    /// The model could not be read, or its graph is invalid.
    GraphInvalid,

    /// The model uses an operator which can not be converted.
    UnsupportedNode,

    /// Reading or writing stored models failed.
    ArtifactStoreIo,

    /// The profile's inheritance chain is cyclic or refers to a missing
    /// profile.
    CyclicOrUnresolvedInheritance,

    /// The profile's parent failed to compile.
    ParentFailed,
}

/// The internal implementation of [`CompileError`].
#[derive(Debug)]
pub(crate) enum CompileErrorImpl {
    Convert(ConvertError),
    Verify(VerifyError),
    Graph(GraphError),
    Store(StoreError),

    /// No graph exists for the model path.
    ModelNotFound(String),

    /// The profile's parent is missing or part of a cycle.
    UnresolvedParent(String),

    /// The named parent profile failed to compile.
    ParentFailed(String),
}

impl CompileErrorImpl {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Convert(err) => match err {
                ConvertError::UnknownSignature { .. } => ErrorKind::UnknownSignature,
                ConvertError::UnknownOutput { .. } => ErrorKind::UnknownOutput,
                ConvertError::AmbiguousOutput { .. } => ErrorKind::AmbiguousOutput,
                ConvertError::MissingInputBinding { .. } => ErrorKind::MissingInputBinding,
                ConvertError::InvalidConstant { .. } => ErrorKind::GraphInvalid,
            },
            Self::Verify(VerifyError::InputTypeMismatch { .. }) => ErrorKind::InputTypeMismatch,
            Self::Verify(_) => ErrorKind::TypeError,
            Self::Graph(GraphError::UnsupportedOp { .. }) => ErrorKind::UnsupportedNode,
            Self::Graph(_) => ErrorKind::GraphInvalid,
            Self::Store(_) => ErrorKind::ArtifactStoreIo,
            Self::ModelNotFound(_) => ErrorKind::ModelNotFound,
            Self::UnresolvedParent(_) => ErrorKind::CyclicOrUnresolvedInheritance,
            Self::ParentFailed(_) => ErrorKind::ParentFailed,
        }
    }
}

impl Display for CompileErrorImpl {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Convert(err) => err.fmt(f),
            Self::Verify(err) => err.fmt(f),
            Self::Graph(err) => err.fmt(f),
            Self::Store(err) => err.fmt(f),
            Self::ModelNotFound(path) => write!(f, "Model file '{}' does not exist", path),
            Self::UnresolvedParent(parent) => write!(
                f,
                "inherited profile '{}' does not exist or inherits from this profile",
                parent
            ),
            Self::ParentFailed(parent) => {
                write!(f, "inherited profile '{}' failed to compile", parent)
            }
        }
    }
}

impl Error for CompileErrorImpl {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Convert(err) => Some(err),
            Self::Verify(err) => Some(err),
            Self::Graph(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::ModelNotFound(_) | Self::UnresolvedParent(_) | Self::ParentFailed(_) => None,
        }
    }
}

impl From<ConvertError> for CompileErrorImpl {
    fn from(val: ConvertError) -> Self {
        Self::Convert(val)
    }
}

impl From<VerifyError> for CompileErrorImpl {
    fn from(val: VerifyError) -> Self {
        Self::Verify(val)
    }
}

impl From<GraphError> for CompileErrorImpl {
    fn from(val: GraphError) -> Self {
        Self::Graph(val)
    }
}

impl From<StoreError> for CompileErrorImpl {
    fn from(val: StoreError) -> Self {
        Self::Store(val)
    }
}
