use wf_config::HumanDurationSigned;

use crate::edge::EdgeReceiver;
use crate::error::CoreResult;
use crate::message::Message;
use crate::node::NodeOutputs;

/// Shifts a point's event time by a fixed (possibly negative) duration
/// (spec.md §4.5 Shift).
pub struct ShiftTransform {
    pub shift: HumanDurationSigned,
}

impl ShiftTransform {
    pub async fn run(self, mut input: EdgeReceiver, outputs: NodeOutputs) -> CoreResult<()> {
        let delta = chrono::Duration::nanoseconds(self.shift.as_nanos_signed());
        while let Some(msg) = input.recv().await {
            let msg = match msg {
                Message::Point(group, mut point) => {
                    point.time += delta;
                    Message::Point(group, point)
                }
                Message::Batch(group, mut points) => {
                    for p in &mut points {
                        p.time += delta;
                    }
                    Message::Batch(group, points)
                }
                other => other,
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
    use crate::group::GroupKey;
    use crate::message::Point;

    #[tokio::test]
    async fn shifts_time_backward() {
        let (in_tx, in_rx) = edge(4, OverflowPolicy::Block);
        let (out_tx, mut out_rx) = edge(4, OverflowPolicy::Block);
        let outputs = NodeOutputs::new(vec![out_tx]);

        let now = chrono::Utc::now();
        let shift = ShiftTransform {
            shift: HumanDurationSigned::from_nanos(-1_000_000_000),
        };
        in_tx
            .send(Message::Point(GroupKey::singleton(), Point::new("cpu", now)))
            .await
            .unwrap();
        drop(in_tx);

        shift.run(in_rx, outputs).await.unwrap();
        let forwarded = out_rx.recv().await.unwrap();
        assert_eq!(forwarded.as_point().unwrap().time, now - chrono::Duration::seconds(1));
    }
}
