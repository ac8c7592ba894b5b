use crate::edge::EdgeReceiver;
use crate::error::CoreResult;
use crate::message::Message;
use crate::node::NodeOutputs;

/// Splits a Batch back into individual Points, in order (spec.md §4.5
/// Trickle) — the inverse of a window flush, for tasks that want to run
/// per-point sinks after a windowed computation.
pub struct TrickleTransform;

impl TrickleTransform {
    pub async fn run(self, mut input: EdgeReceiver, outputs: NodeOutputs) -> CoreResult<()> {
        while let Some(msg) = input.recv().await {
            match msg {
                Message::Batch(group, points) => {
                    for point in points {
                        outputs
                            .fan_out(Message::Point(group.clone(), point))
                            .await?;
                    }
                }
                other => outputs.fan_out(other).await?,
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

    #[tokio::test]
    async fn splits_batch_into_points() {
        let (in_tx, in_rx) = edge(4, OverflowPolicy::Block);
        let (out_tx, mut out_rx) = edge(4, OverflowPolicy::Block);
        let outputs = NodeOutputs::new(vec![out_tx]);

        let batch = vec![
            Point::new("cpu", chrono::Utc::now()),
            Point::new("cpu", chrono::Utc::now()),
        ];
        in_tx
            .send(Message::Batch(GroupKey::singleton(), batch))
            .await
            .unwrap();
        drop(in_tx);

        TrickleTransform.run(in_rx, outputs).await.unwrap();
        assert!(out_rx.recv().await.unwrap().as_point().is_some());
        assert!(out_rx.recv().await.unwrap().as_point().is_some());
        assert!(out_rx.recv().await.is_none());
    }
}
