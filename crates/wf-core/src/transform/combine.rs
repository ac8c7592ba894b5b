use wf_config::HumanDuration;

use crate::edge::EdgeReceiver;
use crate::error::CoreResult;
use crate::group::GroupKey;
use crate::grouped::GroupTable;
use crate::message::{Message, Point};
use crate::node::{NodeOutputs, NodeStats};

/// Pairs recent points within a group that fall within `tolerance` of each
/// other into combined points, up to `max_combinations` pairs per new
/// arrival (spec.md §4.5 Combine) — field names are prefixed with the
/// position of their source point in the pair (`0.`, `1.`).
pub struct CombineTransform {
    pub tolerance: HumanDuration,
    pub max_combinations: usize,
    recent: GroupTable<Vec<Point>>,
    stats: NodeStats,
}

impl CombineTransform {
    pub fn new(tolerance: HumanDuration, max_combinations: usize) -> Self {
        Self {
            tolerance,
            max_combinations,
            recent: GroupTable::new(),
            stats: NodeStats::default(),
        }
    }

    /// Reports this transform's live group count under `stats` as it runs.
    pub fn with_stats(mut self, stats: NodeStats) -> Self {
        self.stats = stats;
        self
    }

    pub async fn run(mut self, mut input: EdgeReceiver, outputs: NodeOutputs) -> CoreResult<()> {
        let tolerance = chrono::Duration::from_std(self.tolerance.as_duration())
            .unwrap_or(chrono::Duration::zero());

        while let Some(msg) = input.recv().await {
            let Message::Point(group, point) = msg else {
                if let Message::DeleteGroup(ref g) = msg {
                    self.recent.delete(g, |_| {});
                    self.stats.set_cardinality(self.recent.len() as u64);
                }
                outputs.fan_out(msg).await?;
                continue;
            };

            let bucket = self.recent.get_or_insert_with(group.clone(), Vec::new);
            bucket.retain(|p| (point.time - p.time).abs() <= tolerance);

            for partner in bucket.iter().take(self.max_combinations) {
                let combined = combine_pair(partner, &point);
                outputs
                    .fan_out(Message::Point(group.clone(), combined))
                    .await?;
            }

            bucket.push(point);
            self.stats.set_cardinality(self.recent.len() as u64);
        }
        Ok(())
    }
}

fn combine_pair(a: &Point, b: &Point) -> Point {
    let mut merged = Point::new(format!("{}+{}", a.measurement, b.measurement), b.time);
    merged.tags = a.tags.clone();
    for (k, v) in &b.tags {
        merged.tags.entry(k.clone()).or_insert_with(|| v.clone());
    }
    for (name, value) in &a.fields {
        merged.fields.insert(format!("0.{name}"), value.clone());
    }
    for (name, value) in &b.fields {
        merged.fields.insert(format!("1.{name}"), value.clone());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::{OverflowPolicy, edge};

    #[tokio::test]
    async fn pairs_points_within_tolerance() {
        let (in_tx, in_rx) = edge(8, OverflowPolicy::Block);
        let (out_tx, mut out_rx) = edge(8, OverflowPolicy::Block);
        let outputs = NodeOutputs::new(vec![out_tx]);

        let t = chrono::Utc::now();
        let a = Point::new("errors", t).with_field("count", 1.0);
        let b = Point::new("warnings", t + chrono::Duration::seconds(1)).with_field("count", 2.0);

        in_tx.send(Message::Point(GroupKey::singleton(), a)).await.unwrap();
        in_tx.send(Message::Point(GroupKey::singleton(), b)).await.unwrap();
        drop(in_tx);

        let combine = CombineTransform::new("10s".parse().unwrap(), 4);
        combine.run(in_rx, outputs).await.unwrap();

        let combined = out_rx.recv().await.unwrap();
        let p = combined.as_point().unwrap();
        assert_eq!(p.fields.get("0.count"), Some(&wf_config::FieldValue::Float(1.0)));
        assert_eq!(p.fields.get("1.count"), Some(&wf_config::FieldValue::Float(2.0)));
    }
}
