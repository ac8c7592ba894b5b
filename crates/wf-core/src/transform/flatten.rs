use tracing::warn;
use wf_config::HumanDuration;

use crate::edge::EdgeReceiver;
use crate::error::CoreResult;
use crate::group::GroupKey;
use crate::grouped::GroupTable;
use crate::message::{Message, Point};
use crate::node::{NodeOutputs, NodeStats};

struct PendingFlatten {
    bucket_start: i64,
    point: Point,
}

/// Merges points sharing the same incoming group and rounded time into one
/// wide point, field names prefixed by the group's dimension tag values and
/// joined with `delimiter` (spec.md §4.5 Flatten). The incoming `GroupKey`
/// is preserved unchanged — Flatten does not re-derive its own grouping.
pub struct FlattenTransform {
    pub tolerance: HumanDuration,
    pub dimensions: Vec<String>,
    pub delimiter: String,
    state: GroupTable<PendingFlatten>,
    stats: NodeStats,
}

impl FlattenTransform {
    pub fn new(tolerance: HumanDuration, dimensions: Vec<String>, delimiter: String) -> Self {
        Self {
            tolerance,
            dimensions,
            delimiter,
            state: GroupTable::new(),
            stats: NodeStats::default(),
        }
    }

    /// Reports this transform's live group count under `stats` as it runs.
    pub fn with_stats(mut self, stats: NodeStats) -> Self {
        self.stats = stats;
        self
    }

    pub async fn run(mut self, mut input: EdgeReceiver, outputs: NodeOutputs) -> CoreResult<()> {
        let tolerance_secs = self.tolerance.as_duration().as_secs().max(1) as i64;

        while let Some(msg) = input.recv().await {
            match msg {
                Message::Point(group, point) => {
                    let Some(prefix) = self.dimension_prefix(&point) else {
                        warn!(dimensions = ?self.dimensions, "flatten: point missing a dimension tag, skipped");
                        continue;
                    };
                    let bucket = point.time.timestamp() / tolerance_secs;
                    if let Some(flushed) = self.merge_or_flush(&group, bucket, &prefix, point) {
                        outputs.fan_out(Message::Point(group, flushed)).await?;
                    }
                }
                Message::DeleteGroup(ref g) => {
                    self.state.delete(g, |_| {});
                    self.stats.set_cardinality(self.state.len() as u64);
                    outputs.fan_out(msg).await?;
                }
                other => outputs.fan_out(other).await?,
            }
        }

        for (key, pending) in self.state.iter_mut() {
            outputs
                .fan_out(Message::Point(key.clone(), std::mem::replace(
                    &mut pending.point,
                    Point::new("", chrono::Utc::now()),
                )))
                .await?;
        }
        Ok(())
    }

    /// Joins the configured dimension tags' values with `delimiter`. `None`
    /// if the point lacks any of them.
    fn dimension_prefix(&self, point: &Point) -> Option<String> {
        let values: Vec<&str> = self
            .dimensions
            .iter()
            .map(|d| point.tags.get(d).map(String::as_str))
            .collect::<Option<_>>()?;
        Some(values.join(&self.delimiter))
    }

    fn merge_or_flush(&mut self, key: &GroupKey, bucket: i64, prefix: &str, point: Point) -> Option<Point> {
        if let Some(pending) = self.state.get_mut(key) {
            if pending.bucket_start == bucket {
                for (name, value) in point.fields {
                    pending.point.fields.insert(format!("{prefix}{}{name}", self.delimiter), value);
                }
                return None;
            }
        }

        let flushed = self.state.remove(key).map(|p| p.point);

        let mut merged = Point::new("flattened", point.time);
        merged.tags = point.tags.clone();
        for (name, value) in point.fields {
            merged.fields.insert(format!("{prefix}{}{name}", self.delimiter), value);
        }
        self.state
            .get_or_insert_with(key.clone(), || PendingFlatten { bucket_start: bucket, point: merged });
        self.stats.set_cardinality(self.state.len() as u64);

        flushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::{OverflowPolicy, edge};

    #[tokio::test]
    async fn merges_same_bucket_points_by_dimension_values() {
        // S5: dimensions [a,b], points sharing (a=x, b=y) at the same
        // rounded time flatten to fields "x.y.f" for each field f.
        let (in_tx, in_rx) = edge(8, OverflowPolicy::Block);
        let (out_tx, mut out_rx) = edge(8, OverflowPolicy::Block);
        let outputs = NodeOutputs::new(vec![out_tx]);

        let group = GroupKey::singleton();
        let t = chrono::Utc::now();
        let p1 = Point::new("cpu", t).with_tag("a", "x").with_tag("b", "y").with_field("f", 1.0);
        let p2 = Point::new("mem", t).with_tag("a", "x").with_tag("b", "y").with_field("g", 2.0);
        let p3 = Point::new("cpu", t + chrono::Duration::seconds(120))
            .with_tag("a", "x")
            .with_tag("b", "y")
            .with_field("f", 3.0);

        in_tx.send(Message::Point(group.clone(), p1)).await.unwrap();
        in_tx.send(Message::Point(group.clone(), p2)).await.unwrap();
        in_tx.send(Message::Point(group.clone(), p3)).await.unwrap();
        drop(in_tx);

        let flatten = FlattenTransform::new(
            "60s".parse().unwrap(),
            vec!["a".to_string(), "b".to_string()],
            ".".to_string(),
        );
        flatten.run(in_rx, outputs).await.unwrap();

        let flushed = out_rx.recv().await.unwrap();
        assert_eq!(flushed.group(), &group, "incoming group key must be preserved, not re-derived");
        let p = flushed.as_point().unwrap();
        assert_eq!(p.fields.len(), 2);
        assert!(p.fields.contains_key("x.y.f"));
        assert!(p.fields.contains_key("x.y.g"));
    }

    #[tokio::test]
    async fn point_missing_a_dimension_tag_is_skipped_not_merged() {
        let (in_tx, in_rx) = edge(8, OverflowPolicy::Block);
        let (out_tx, mut out_rx) = edge(8, OverflowPolicy::Block);
        let outputs = NodeOutputs::new(vec![out_tx]);

        let t = chrono::Utc::now();
        let missing_b = Point::new("cpu", t).with_tag("a", "x").with_field("f", 1.0);
        in_tx.send(Message::Point(GroupKey::singleton(), missing_b)).await.unwrap();
        drop(in_tx);

        let flatten = FlattenTransform::new(
            "60s".parse().unwrap(),
            vec!["a".to_string(), "b".to_string()],
            ".".to_string(),
        );
        flatten.run(in_rx, outputs).await.unwrap();
        assert!(out_rx.recv().await.is_none());
    }
}
