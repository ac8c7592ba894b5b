use wf_config::GroupDimensions;

use crate::edge::EdgeReceiver;
use crate::error::CoreResult;
use crate::group::GroupKey;
use crate::message::Message;
use crate::node::NodeOutputs;

/// Re-derives the group key from a point's current tags (spec.md §4.5
/// GroupBy) — every downstream node keys its state on the key this node
/// establishes, not the one StreamFrom started with.
pub struct GroupByTransform {
    pub dimensions: GroupDimensions,
}

impl GroupByTransform {
    pub async fn run(self, mut input: EdgeReceiver, outputs: NodeOutputs) -> CoreResult<()> {
        while let Some(msg) = input.recv().await {
            let msg = match msg {
                Message::Point(_, point) => {
                    let group = GroupKey::from_point(&point, &self.dimensions);
                    Message::Point(group, point)
                }
                Message::Batch(_, points) => {
                    let group = points
                        .first()
                        .map(|p| GroupKey::from_point(p, &self.dimensions))
                        .unwrap_or_else(GroupKey::singleton);
                    Message::Batch(group, points)
                }
                Message::Barrier(_, barrier) => {
                    Message::Barrier(GroupKey::singleton(), barrier)
                }
                // No point to re-derive a key from; forward under the
                // incoming key so downstream group tables still see it.
                Message::DeleteGroup(group) => Message::DeleteGroup(group),
            };
            outputs.fan_out(msg).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::{OverflowPolicy, edge};
    use crate::message::Point;
    use wf_config::DimensionSpec;

    #[tokio::test]
    async fn rekeys_point_by_new_dimensions() {
        let (in_tx, in_rx) = edge(4, OverflowPolicy::Block);
        let (out_tx, mut out_rx) = edge(4, OverflowPolicy::Block);
        let outputs = NodeOutputs::new(vec![out_tx]);

        let gb = GroupByTransform {
            dimensions: GroupDimensions {
                by_measurement: true,
                spec: DimensionSpec::Tags(vec!["region".to_string()]),
            },
        };

        let point = Point::new("cpu", chrono::Utc::now())
            .with_tag("host", "a")
            .with_tag("region", "us");
        in_tx
            .send(Message::Point(GroupKey::singleton(), point))
            .await
            .unwrap();
        drop(in_tx);

        gb.run(in_rx, outputs).await.unwrap();
        let forwarded = out_rx.recv().await.unwrap();
        assert_eq!(
            forwarded.group().tags(),
            &[("region".to_string(), "us".to_string())]
        );
    }
}
