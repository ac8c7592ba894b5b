use tracing::warn;
use wf_config::{Expr, KeepFields};

use crate::edge::EdgeReceiver;
use crate::error::CoreResult;
use crate::expr_eval::eval_expr;
use crate::message::{Message, Point};
use crate::node::NodeOutputs;

/// Computes new fields from expressions, with control over which original
/// fields survive and which computed fields are promoted to tags
/// (spec.md §4.5 Eval).
pub struct EvalTransform {
    pub exprs: Vec<(String, Expr)>,
    pub keep_original_fields: KeepFields,
    pub tags: Vec<String>,
    pub quiet: bool,
}

impl EvalTransform {
    pub async fn run(self, mut input: EdgeReceiver, outputs: NodeOutputs) -> CoreResult<()> {
        while let Some(msg) = input.recv().await {
            match msg {
                Message::Point(group, point) => {
                    if let Some(evaluated) = self.apply(point) {
                        outputs.fan_out(Message::Point(group, evaluated)).await?;
                    }
                }
                other => outputs.fan_out(other).await?,
            }
        }
        Ok(())
    }

    fn apply(&self, mut point: Point) -> Option<Point> {
        let mut computed = Vec::with_capacity(self.exprs.len());
        for (name, expr) in &self.exprs {
            match eval_expr(expr, &point) {
                Ok(v) => computed.push((name.clone(), v)),
                Err(e) => {
                    if !self.quiet {
                        warn!(error = %e, field = %name, "eval expression failed");
                    }
                    return None;
                }
            }
        }

        match &self.keep_original_fields {
            KeepFields::All => {}
            KeepFields::None => point.fields.clear(),
            KeepFields::Named(names) => point.fields.retain(|k, _| names.contains(k)),
        }

        for (name, value) in computed {
            if self.tags.contains(&name) {
                point.tags.insert(name, value.to_display_string());
            } else {
                point.fields.insert(name, value);
            }
        }
        Some(point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wf_config::{BinaryOp, FieldValue};

    #[test]
    fn computed_field_added_and_original_kept() {
        let eval = EvalTransform {
            exprs: vec![(
                "usage_pct".to_string(),
                Expr::Binary(
                    BinaryOp::Mul,
                    Box::new(Expr::field("usage")),
                    Box::new(Expr::Lit(FieldValue::Float(100.0))),
                ),
            )],
            keep_original_fields: KeepFields::All,
            tags: vec![],
            quiet: false,
        };

        let point = Point::new("cpu", chrono::Utc::now()).with_field("usage", 0.5);
        let out = eval.apply(point).unwrap();
        assert_eq!(out.fields.get("usage"), Some(&FieldValue::Float(0.5)));
        assert_eq!(out.fields.get("usage_pct"), Some(&FieldValue::Float(50.0)));
    }

    #[test]
    fn keep_none_drops_originals() {
        let eval = EvalTransform {
            exprs: vec![("doubled".to_string(), Expr::field("usage"))],
            keep_original_fields: KeepFields::None,
            tags: vec![],
            quiet: true,
        };
        let point = Point::new("cpu", chrono::Utc::now()).with_field("usage", 1.0);
        let out = eval.apply(point).unwrap();
        assert!(!out.fields.contains_key("usage"));
        assert!(out.fields.contains_key("doubled"));
    }

    #[test]
    fn computed_field_promoted_to_tag() {
        let eval = EvalTransform {
            exprs: vec![("level".to_string(), Expr::lit("high"))],
            keep_original_fields: KeepFields::All,
            tags: vec!["level".to_string()],
            quiet: false,
        };
        let point = Point::new("cpu", chrono::Utc::now());
        let out = eval.apply(point).unwrap();
        assert_eq!(out.tags.get("level").map(String::as_str), Some("high"));
        assert!(!out.fields.contains_key("level"));
    }
}
