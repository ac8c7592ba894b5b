use orion_error::StructError;
use wf_config::{BinaryOp, Expr, FieldValue, UnaryOp};

use crate::error::{CoreError, CoreReason};
use crate::message::Point;

/// Evaluate an expression tree against one point's tags and fields
/// (spec.md §4.5 Eval, §4.9 Where/StateTracking/Alert/Autoscale predicates).
///
/// Field references resolve against `point.fields`; tag references resolve
/// against `point.tags` and are always treated as strings.
pub fn eval_expr(expr: &Expr, point: &Point) -> Result<FieldValue, CoreError> {
    match expr {
        Expr::Lit(v) => Ok(v.clone()),
        Expr::Field(name) => point
            .fields
            .get(name)
            .cloned()
            .ok_or_else(|| eval_err(format!("unknown field {name:?}"))),
        Expr::Tag(name) => point
            .tags
            .get(name)
            .cloned()
            .map(FieldValue::Str)
            .ok_or_else(|| eval_err(format!("unknown tag {name:?}"))),
        Expr::Unary(op, inner) => eval_unary(*op, eval_expr(inner, point)?),
        Expr::Binary(op, lhs, rhs) => {
            eval_binary(*op, eval_expr(lhs, point)?, eval_expr(rhs, point)?)
        }
        Expr::Call(name, args) => eval_call(name, args, point),
    }
}

/// Evaluate an expression as a boolean predicate (spec.md §4.5 Where).
pub fn eval_predicate(expr: &Expr, point: &Point) -> Result<bool, CoreError> {
    eval_expr(expr, point)?
        .as_bool()
        .ok_or_else(|| eval_err("predicate did not evaluate to a bool"))
}

fn eval_unary(op: UnaryOp, v: FieldValue) -> Result<FieldValue, CoreError> {
    match (op, &v) {
        (UnaryOp::Neg, FieldValue::Int(i)) => Ok(FieldValue::Int(-i)),
        (UnaryOp::Neg, FieldValue::Float(f)) => Ok(FieldValue::Float(-f)),
        (UnaryOp::Not, FieldValue::Bool(b)) => Ok(FieldValue::Bool(!b)),
        _ => Err(eval_err(format!("unary {op:?} not defined for {v:?}"))),
    }
}

fn eval_binary(op: BinaryOp, lhs: FieldValue, rhs: FieldValue) -> Result<FieldValue, CoreError> {
    use BinaryOp::*;
    match op {
        And => Ok(FieldValue::Bool(
            require_bool(&lhs)? && require_bool(&rhs)?,
        )),
        Or => Ok(FieldValue::Bool(
            require_bool(&lhs)? || require_bool(&rhs)?,
        )),
        Eq => Ok(FieldValue::Bool(values_eq(&lhs, &rhs))),
        Ne => Ok(FieldValue::Bool(!values_eq(&lhs, &rhs))),
        Add | Sub | Mul | Div | Lt | Le | Gt | Ge => eval_numeric(op, &lhs, &rhs),
    }
}

fn eval_numeric(op: BinaryOp, lhs: &FieldValue, rhs: &FieldValue) -> Result<FieldValue, CoreError> {
    use BinaryOp::*;
    let (a, b) = (
        lhs.as_f64().ok_or_else(|| eval_err(format!("{lhs:?} is not numeric")))?,
        rhs.as_f64().ok_or_else(|| eval_err(format!("{rhs:?} is not numeric")))?,
    );
    let both_int = matches!(lhs, FieldValue::Int(_)) && matches!(rhs, FieldValue::Int(_));
    Ok(match op {
        Add if both_int => FieldValue::Int(a as i64 + b as i64),
        Add => FieldValue::Float(a + b),
        Sub if both_int => FieldValue::Int(a as i64 - b as i64),
        Sub => FieldValue::Float(a - b),
        Mul if both_int => FieldValue::Int(a as i64 * b as i64),
        Mul => FieldValue::Float(a * b),
        Div => FieldValue::Float(a / b),
        Lt => FieldValue::Bool(a < b),
        Le => FieldValue::Bool(a <= b),
        Gt => FieldValue::Bool(a > b),
        Ge => FieldValue::Bool(a >= b),
        _ => unreachable!("non-numeric op routed to eval_numeric"),
    })
}

fn eval_call(name: &str, args: &[Expr], point: &Point) -> Result<FieldValue, CoreError> {
    let values = args
        .iter()
        .map(|a| eval_expr(a, point))
        .collect::<Result<Vec<_>, _>>()?;
    match (name, values.as_slice()) {
        ("abs", [v]) => Ok(FieldValue::Float(v.as_f64().unwrap_or_default().abs())),
        ("ceil", [v]) => Ok(FieldValue::Float(v.as_f64().unwrap_or_default().ceil())),
        ("floor", [v]) => Ok(FieldValue::Float(v.as_f64().unwrap_or_default().floor())),
        ("sigma", [v, mean, stddev]) => {
            let (v, mean, stddev) = (
                v.as_f64().unwrap_or_default(),
                mean.as_f64().unwrap_or_default(),
                stddev.as_f64().unwrap_or(1.0),
            );
            Ok(FieldValue::Float(if stddev == 0.0 {
                0.0
            } else {
                (v - mean) / stddev
            }))
        }
        _ => Err(eval_err(format!(
            "unknown function {name:?}/{}",
            values.len()
        ))),
    }
}

fn require_bool(v: &FieldValue) -> Result<bool, CoreError> {
    v.as_bool().ok_or_else(|| eval_err(format!("{v:?} is not a bool")))
}

fn values_eq(a: &FieldValue, b: &FieldValue) -> bool {
    if let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) {
        return a == b;
    }
    a == b
}

fn eval_err(msg: impl Into<String>) -> CoreError {
    StructError::from(CoreReason::PredicateEval).with_detail(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn point() -> Point {
        Point::new("cpu", Utc::now())
            .with_tag("host", "a")
            .with_field("usage", 92.5)
    }

    #[test]
    fn field_threshold_predicate() {
        let expr = Expr::Binary(
            BinaryOp::Gt,
            Box::new(Expr::field("usage")),
            Box::new(Expr::lit(90.0)),
        );
        assert!(eval_predicate(&expr, &point()).unwrap());
    }

    #[test]
    fn tag_equality_predicate() {
        let expr = Expr::Binary(
            BinaryOp::Eq,
            Box::new(Expr::tag("host")),
            Box::new(Expr::lit("a")),
        );
        assert!(eval_predicate(&expr, &point()).unwrap());
    }

    #[test]
    fn missing_field_is_an_error() {
        let expr = Expr::field("nope");
        assert!(eval_expr(&expr, &point()).is_err());
    }

    #[test]
    fn call_abs() {
        let expr = Expr::Call("abs".into(), vec![Expr::lit(-4.0)]);
        assert_eq!(eval_expr(&expr, &point()).unwrap(), FieldValue::Float(4.0));
    }
}
