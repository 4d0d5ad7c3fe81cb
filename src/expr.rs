//! Ranking expression trees.
//!
//! Expressions are immutable trees of [`Expr`] nodes linked by [`ExprRef`]
//! (`Arc<Expr>`), so that a subtree can be shared by several parents. The
//! `Display` impl produces the canonical text form, which [`parse`] reads
//! back into an equal tree.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use rankc_tensor::{format_number, TensorValue};

mod parse;

pub use parse::{parse, ParseError};

/// Shared reference to an expression node.
pub type ExprRef = Arc<Expr>;

/// Binary operators used by `join` and infix arithmetic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub fn symbol(self) -> char {
        match self {
            BinaryOp::Add => '+',
            BinaryOp::Sub => '-',
            BinaryOp::Mul => '*',
            BinaryOp::Div => '/',
        }
    }

    fn from_symbol(ch: char) -> Option<BinaryOp> {
        match ch {
            '+' => Some(BinaryOp::Add),
            '-' => Some(BinaryOp::Sub),
            '*' => Some(BinaryOp::Mul),
            '/' => Some(BinaryOp::Div),
            _ => None,
        }
    }

    fn precedence(self) -> u8 {
        match self {
            BinaryOp::Add | BinaryOp::Sub => 1,
            BinaryOp::Mul | BinaryOp::Div => 2,
        }
    }
}

/// Aggregation functions for `reduce`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Aggregator {
    Sum,
    Avg,
    Max,
    Min,
    Prod,
    Count,
}

impl Aggregator {
    pub fn name(self) -> &'static str {
        match self {
            Aggregator::Sum => "sum",
            Aggregator::Avg => "avg",
            Aggregator::Max => "max",
            Aggregator::Min => "min",
            Aggregator::Prod => "prod",
            Aggregator::Count => "count",
        }
    }

    fn from_name(name: &str) -> Option<Aggregator> {
        [
            Aggregator::Sum,
            Aggregator::Avg,
            Aggregator::Max,
            Aggregator::Min,
            Aggregator::Prod,
            Aggregator::Count,
        ]
        .into_iter()
        .find(|agg| agg.name() == name)
    }
}

/// Unary cell functions for `map`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryFn {
    Exp,
    Log,
    Sqrt,
    Tanh,
    Sigmoid,
    Relu,
    Neg,
    Abs,
}

impl UnaryFn {
    pub fn name(self) -> &'static str {
        match self {
            UnaryFn::Exp => "exp",
            UnaryFn::Log => "log",
            UnaryFn::Sqrt => "sqrt",
            UnaryFn::Tanh => "tanh",
            UnaryFn::Sigmoid => "sigmoid",
            UnaryFn::Relu => "relu",
            UnaryFn::Neg => "neg",
            UnaryFn::Abs => "abs",
        }
    }

    fn from_name(name: &str) -> Option<UnaryFn> {
        [
            UnaryFn::Exp,
            UnaryFn::Log,
            UnaryFn::Sqrt,
            UnaryFn::Tanh,
            UnaryFn::Sigmoid,
            UnaryFn::Relu,
            UnaryFn::Neg,
            UnaryFn::Abs,
        ]
        .into_iter()
        .find(|func| func.name() == name)
    }
}

/// Reference to an output of an imported model, eg.
/// `onnx_import("models/mnist_softmax.onnx", "default.add")`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelRef {
    /// Path of the model file, relative to the application's model
    /// directory.
    pub model: String,

    /// Requested output, either `output` or `signature.output`.
    pub output: Option<String>,
}

impl ModelRef {
    pub fn new(model: impl Into<String>, output: Option<&str>) -> ModelRef {
        ModelRef {
            model: model.into(),
            output: output.map(|o| o.to_string()),
        }
    }

    /// Return the requested signature, if the output names one.
    pub fn signature(&self) -> Option<&str> {
        self.output
            .as_deref()
            .and_then(|out| out.split_once('.'))
            .map(|(sig, _)| sig)
    }

    /// Return the requested output name, without the signature.
    pub fn output_name(&self) -> Option<&str> {
        self.output
            .as_deref()
            .map(|out| out.split_once('.').map(|(_, name)| name).unwrap_or(out))
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "onnx_import(\"{}\"", self.model)?;
        if let Some(output) = &self.output {
            write!(f, ", \"{}\"", output)?;
        }
        write!(f, ")")
    }
}

/// A node in a ranking expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// Scalar number.
    Number(f64),

    /// Tensor literal, eg. `tensor<float>(d0[1])(1.0)`.
    Literal(Arc<TensorValue>),

    /// Reference to a rank profile function with no arguments, or a lambda
    /// parameter.
    Variable(String),

    /// Call to a rank profile function with arguments.
    Call { name: String, args: Vec<ExprRef> },

    /// Reference to a ranking constant, `constant(name)`.
    Constant(String),

    /// Combine two tensors cell by cell, matching dimensions by name.
    Join {
        lhs: ExprRef,
        rhs: ExprRef,
        op: BinaryOp,
    },

    /// Aggregate over `dims`, or all dimensions if `dims` is empty.
    Reduce {
        arg: ExprRef,
        aggregator: Aggregator,
        dims: Vec<String>,
    },

    /// Rename dimensions `from[i]` to `to[i]`.
    Rename {
        arg: ExprRef,
        from: Vec<String>,
        to: Vec<String>,
    },

    /// Apply a function to each cell.
    Map { arg: ExprRef, function: UnaryFn },

    /// Concatenate along `dim`.
    Concat {
        lhs: ExprRef,
        rhs: ExprRef,
        dim: String,
    },

    /// Infix arithmetic, eg. `a * 1.0`.
    Arithmetic {
        lhs: ExprRef,
        rhs: ExprRef,
        op: BinaryOp,
    },

    /// Unresolved reference to an imported model.
    ModelRef(ModelRef),
}

impl Expr {
    pub fn number(value: f64) -> ExprRef {
        Arc::new(Expr::Number(value))
    }

    pub fn variable(name: impl Into<String>) -> ExprRef {
        Arc::new(Expr::Variable(name.into()))
    }

    pub fn constant(name: impl Into<String>) -> ExprRef {
        Arc::new(Expr::Constant(name.into()))
    }

    pub fn literal(value: TensorValue) -> ExprRef {
        Arc::new(Expr::Literal(Arc::new(value)))
    }

    pub fn join(lhs: ExprRef, rhs: ExprRef, op: BinaryOp) -> ExprRef {
        Arc::new(Expr::Join { lhs, rhs, op })
    }

    pub fn reduce<S: Into<String>>(
        arg: ExprRef,
        aggregator: Aggregator,
        dims: impl IntoIterator<Item = S>,
    ) -> ExprRef {
        Arc::new(Expr::Reduce {
            arg,
            aggregator,
            dims: dims.into_iter().map(Into::into).collect(),
        })
    }

    pub fn rename(arg: ExprRef, from: Vec<String>, to: Vec<String>) -> ExprRef {
        Arc::new(Expr::Rename { arg, from, to })
    }

    pub fn map(arg: ExprRef, function: UnaryFn) -> ExprRef {
        Arc::new(Expr::Map { arg, function })
    }

    pub fn concat(lhs: ExprRef, rhs: ExprRef, dim: impl Into<String>) -> ExprRef {
        Arc::new(Expr::Concat {
            lhs,
            rhs,
            dim: dim.into(),
        })
    }

    pub fn arithmetic(lhs: ExprRef, rhs: ExprRef, op: BinaryOp) -> ExprRef {
        Arc::new(Expr::Arithmetic { lhs, rhs, op })
    }

    /// Call `f` with each direct child of this node.
    pub fn for_each_child(&self, mut f: impl FnMut(&ExprRef)) {
        match self {
            Expr::Number(_)
            | Expr::Literal(_)
            | Expr::Variable(_)
            | Expr::Constant(_)
            | Expr::ModelRef(_) => {}
            Expr::Call { args, .. } => args.iter().for_each(f),
            Expr::Join { lhs, rhs, .. }
            | Expr::Concat { lhs, rhs, .. }
            | Expr::Arithmetic { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            Expr::Reduce { arg, .. } | Expr::Rename { arg, .. } | Expr::Map { arg, .. } => f(arg),
        }
    }

    /// Return a copy of this node with each child replaced by `f(child)`.
    pub fn map_children(&self, mut f: impl FnMut(&ExprRef) -> ExprRef) -> Expr {
        match self {
            Expr::Number(_)
            | Expr::Literal(_)
            | Expr::Variable(_)
            | Expr::Constant(_)
            | Expr::ModelRef(_) => self.clone(),
            Expr::Call { name, args } => Expr::Call {
                name: name.clone(),
                args: args.iter().map(f).collect(),
            },
            Expr::Join { lhs, rhs, op } => Expr::Join {
                lhs: f(lhs),
                rhs: f(rhs),
                op: *op,
            },
            Expr::Concat { lhs, rhs, dim } => Expr::Concat {
                lhs: f(lhs),
                rhs: f(rhs),
                dim: dim.clone(),
            },
            Expr::Arithmetic { lhs, rhs, op } => Expr::Arithmetic {
                lhs: f(lhs),
                rhs: f(rhs),
                op: *op,
            },
            Expr::Reduce {
                arg,
                aggregator,
                dims,
            } => Expr::Reduce {
                arg: f(arg),
                aggregator: *aggregator,
                dims: dims.clone(),
            },
            Expr::Rename { arg, from, to } => Expr::Rename {
                arg: f(arg),
                from: from.clone(),
                to: to.clone(),
            },
            Expr::Map { arg, function } => Expr::Map {
                arg: f(arg),
                function: *function,
            },
        }
    }

    /// Return the model references in this expression, in order of first
    /// appearance.
    pub fn model_refs(&self) -> Vec<ModelRef> {
        fn visit(expr: &Expr, out: &mut Vec<ModelRef>) {
            if let Expr::ModelRef(model_ref) = expr {
                if !out.contains(model_ref) {
                    out.push(model_ref.clone());
                }
            }
            expr.for_each_child(|child| visit(child, out));
        }

        let mut refs = Vec::new();
        visit(self, &mut refs);
        refs
    }

    /// Return a copy of `expr` with model references replaced by the result
    /// of `replace`. References for which `replace` returns `None` are kept.
    ///
    /// Subtrees which contain no model references are shared with `expr`.
    pub fn replace_model_refs(
        expr: &ExprRef,
        replace: &impl Fn(&ModelRef) -> Option<ExprRef>,
    ) -> ExprRef {
        Expr::replace_nodes(expr, &|node| match node {
            Expr::ModelRef(model_ref) => replace(model_ref),
            _ => None,
        })
    }

    /// Return a copy of `expr` with `constant(name)` nodes replaced by the
    /// result of `replace(name)`.
    pub fn replace_constant_refs(
        expr: &ExprRef,
        replace: &impl Fn(&str) -> Option<ExprRef>,
    ) -> ExprRef {
        Expr::replace_nodes(expr, &|node| match node {
            Expr::Constant(name) => replace(name),
            _ => None,
        })
    }

    fn replace_nodes(expr: &ExprRef, replace: &impl Fn(&Expr) -> Option<ExprRef>) -> ExprRef {
        if let Some(new_expr) = replace(expr) {
            return new_expr;
        }
        let mut changed = false;
        let node = expr.map_children(|child| {
            let new_child = Expr::replace_nodes(child, replace);
            changed |= !Arc::ptr_eq(child, &new_child);
            new_child
        });
        if changed {
            Arc::new(node)
        } else {
            expr.clone()
        }
    }

    /// Add the names of functions (variables and calls) referenced by this
    /// expression to `names`.
    pub fn collect_function_refs(&self, names: &mut BTreeSet<String>) {
        match self {
            Expr::Variable(name) | Expr::Call { name, .. } => {
                names.insert(name.clone());
            }
            _ => {}
        }
        self.for_each_child(|child| child.collect_function_refs(names));
    }

    /// Add the names of ranking constants referenced by this expression to
    /// `names`.
    pub fn collect_constant_refs(&self, names: &mut BTreeSet<String>) {
        if let Expr::Constant(name) = self {
            names.insert(name.clone());
        }
        self.for_each_child(|child| child.collect_constant_refs(names));
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Arithmetic { op, .. } => op.precedence(),
            // Negative numbers are printed with a leading sign.
            Expr::Number(n) if n.is_sign_negative() => 0,
            _ => u8::MAX,
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[String]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

fn write_operand(f: &mut fmt::Formatter<'_>, expr: &Expr, parens: bool) -> fmt::Result {
    if parens {
        write!(f, "({})", expr)
    } else {
        write!(f, "{}", expr)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(value) => format_number(f, *value),
            Expr::Literal(value) => write!(f, "{}", value),
            Expr::Variable(name) => write!(f, "{}", name),
            Expr::Call { name, args } => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            Expr::Constant(name) => write!(f, "constant({})", name),
            Expr::Join { lhs, rhs, op } => {
                write!(f, "join({}, {}, f(a,b)(a {} b))", lhs, rhs, op.symbol())
            }
            Expr::Reduce {
                arg,
                aggregator,
                dims,
            } => {
                write!(f, "reduce({}, {}", arg, aggregator.name())?;
                for dim in dims {
                    write!(f, ", {}", dim)?;
                }
                write!(f, ")")
            }
            Expr::Rename { arg, from, to } => {
                write!(f, "rename({}, ", arg)?;
                if from.len() == 1 && to.len() == 1 {
                    write!(f, "{}, {}", from[0], to[0])?;
                } else {
                    write!(f, "(")?;
                    write_list(f, from)?;
                    write!(f, "), (")?;
                    write_list(f, to)?;
                    write!(f, ")")?;
                }
                write!(f, ")")
            }
            Expr::Map { arg, function } => {
                write!(f, "map({}, f(a)({}(a)))", arg, function.name())
            }
            Expr::Concat { lhs, rhs, dim } => write!(f, "concat({}, {}, {})", lhs, rhs, dim),
            Expr::Arithmetic { lhs, rhs, op } => {
                let prec = op.precedence();
                write_operand(f, lhs, lhs.precedence() < prec)?;
                write!(f, " {} ", op.symbol())?;
                write_operand(f, rhs, rhs.precedence() <= prec)
            }
            Expr::ModelRef(model_ref) => write!(f, "{}", model_ref),
        }
    }
}
