use tracing::warn;
use wf_config::{Expr, OnPredicateError};

use crate::edge::EdgeReceiver;
use crate::error::CoreResult;
use crate::expr_eval::eval_predicate;
use crate::message::Message;
use crate::node::NodeOutputs;

/// Filters points by a boolean predicate (spec.md §4.5 Where).
pub struct WhereTransform {
    pub predicate: Expr,
    pub on_predicate_error: OnPredicateError,
}

impl WhereTransform {
    pub async fn run(self, mut input: EdgeReceiver, outputs: NodeOutputs) -> CoreResult<()> {
        while let Some(msg) = input.recv().await {
            let keep = match &msg {
                Message::Point(_, p) => match eval_predicate(&self.predicate, p) {
                    Ok(b) => b,
                    Err(e) => {
                        warn!(error = %e, "where predicate error");
                        matches!(self.on_predicate_error, OnPredicateError::Fail)
                    }
                },
                Message::Batch(_, _) | Message::Barrier(..) | Message::DeleteGroup(_) => true,
            };
            if keep {
                outputs.fan_out(msg).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::{OverflowPolicy, edge};
    use crate::group::GroupKey;
    use crate::message::Point;
    use wf_config::{BinaryOp, FieldValue};

    #[tokio::test]
    async fn drops_points_failing_predicate() {
        let (in_tx, in_rx) = edge(4, OverflowPolicy::Block);
        let (out_tx, mut out_rx) = edge(4, OverflowPolicy::Block);
        let outputs = NodeOutputs::new(vec![out_tx]);

        let w = WhereTransform {
            predicate: Expr::Binary(
                BinaryOp::Gt,
                Box::new(Expr::field("usage")),
                Box::new(Expr::Lit(FieldValue::Float(50.0))),
            ),
            on_predicate_error: OnPredicateError::Drop,
        };

        let high = Point::new("cpu", chrono::Utc::now()).with_field("usage", 90.0);
        let low = Point::new("cpu", chrono::Utc::now()).with_field("usage", 10.0);
        in_tx.send(Message::Point(GroupKey::singleton(), high)).await.unwrap();
        in_tx.send(Message::Point(GroupKey::singleton(), low)).await.unwrap();
        drop(in_tx);

        w.run(in_rx, outputs).await.unwrap();
        let forwarded = out_rx.recv().await.unwrap();
        assert_eq!(
            forwarded.as_point().unwrap().fields.get("usage"),
            Some(&FieldValue::Float(90.0))
        );
        assert!(out_rx.recv().await.is_none());
    }
}
