//! rankc compiles references to machine-learned models inside rank profiles
//! into tensor expressions.
//!
//! A rank profile refers to a model with an expression such as
//! `onnx_import("models/mnist_softmax.onnx", "default.layer_add")`. The
//! compiler reads the model's graph, translates the requested output into
//! `join`, `reduce`, `rename`, `map` and `concat` expressions over the
//! profile's functions, type checks the result and stores it. The stored
//! model replaces the model file in builds where the file is unavailable.
//!
//! # Compiling profiles
//!
//! The basic workflow is:
//!
//! 1. Build a [`RankProfileRegistry`] from the schema's rank profiles.
//! 2. Choose a [`GraphSource`] which supplies model graphs, such as a
//!    [`ModelDirectory`](graph::ModelDirectory).
//! 3. Choose an [`ArtifactStore`], usually a
//!    [`FileArtifactStore`](store::FileArtifactStore) rooted at the
//!    application directory.
//! 4. Run [`Compiler::compile_all`] and install the compiled phase
//!    expressions, functions and constants from the [`BuildOutput`].
//!
//! Each model input must be bound to a profile function with the same name,
//! whose type matches the type the model requires.
//!
//! # Inheritance
//!
//! Profiles are compiled after the profile they inherit from. A profile
//! reuses its parent's compiled model when none of the functions the model
//! depends on were overridden. Otherwise the model is compiled again with
//! the profile's own functions.
//!
//! # Configuration
//!
//! [`CompileOptions`] controls compilation. The defaults can be overridden
//! with environment variables:
//!
//! - `RANKC_IGNORE_STORED_MODELS` - Fail instead of using a stored model
//!   when a model file is unavailable
//! - `RANKC_SEQUENTIAL` - Compile independent profiles one at a time

mod env;
mod iter_util;

pub mod artifact;
pub mod compile;
pub mod constants;
pub mod convert;
pub mod error;
pub mod expr;
pub mod graph;
pub mod profile;
pub mod store;
pub mod verify;

#[cfg(test)]
mod test_util;

pub use artifact::{CompiledModelArtifact, ImportedModel, RankingConstant};
pub use compile::{BuildOutput, CompileOptions, CompiledProfile, Compiler, ProfileState};
pub use error::{CompileError, ErrorKind};
pub use expr::{Expr, ExprRef, ModelRef};
pub use graph::{GraphSource, ImportedGraph};
pub use profile::{FunctionDef, RankProfile, RankProfileRegistry};
pub use store::{ArtifactKey, ArtifactStore};
