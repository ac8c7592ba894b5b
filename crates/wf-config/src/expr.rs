use serde::{Deserialize, Serialize};

use crate::value::FieldValue;

/// A small expression tree, the shape consumed by Where/Eval/StateTracking/
/// Alert/Autoscale node configs.
///
/// This is **not** a parser: expressions arrive as part of the
/// already-validated DAG description (spec.md §1 places the task
/// description language's parser/planner out of scope). Whatever builds
/// that description elsewhere is responsible for producing a well-formed
/// `Expr` tree; the runtime only evaluates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Lit(FieldValue),
    /// Reference to a point field by name.
    Field(String),
    /// Reference to a point tag by name.
    Tag(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// Built-in function call, e.g. `ceil(rate / 100)`.
    Call(String, Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl Expr {
    pub fn lit(v: impl Into<FieldValue>) -> Self {
        Expr::Lit(v.into())
    }

    pub fn field(name: impl Into<String>) -> Self {
        Expr::Field(name.into())
    }

    pub fn tag(name: impl Into<String>) -> Self {
        Expr::Tag(name.into())
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Str(v)
    }
}
