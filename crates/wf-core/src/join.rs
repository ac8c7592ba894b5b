use std::collections::VecDeque;

use wf_config::{FillPolicy, HumanDuration};

use crate::edge::EdgeReceiver;
use crate::error::CoreResult;
use crate::group::GroupKey;
use crate::grouped::GroupTable;
use crate::message::{Message, Point};
use crate::node::{NodeOutputs, NodeStats};

#[derive(Default)]
struct Side {
    pending: VecDeque<Point>,
}

/// Joins two parent edges on shared group key and time tolerance
/// (spec.md §4.7 C7 Join). `on` restricts which tags must additionally
/// match between the two sides beyond the group key itself; `fill`
/// controls what happens when only one side has a point for a given
/// instant.
pub struct JoinTransform {
    pub tolerance: HumanDuration,
    pub fill: FillPolicy,
    pub on: Vec<String>,
    left: GroupTable<Side>,
    right: GroupTable<Side>,
    stats: NodeStats,
}

impl JoinTransform {
    pub fn new(tolerance: HumanDuration, fill: FillPolicy, on: Vec<String>) -> Self {
        Self {
            tolerance,
            fill,
            on,
            left: GroupTable::new(),
            right: GroupTable::new(),
            stats: NodeStats::default(),
        }
    }

    /// Reports the union of both sides' live group counts under `stats`.
    pub fn with_stats(mut self, stats: NodeStats) -> Self {
        self.stats = stats;
        self
    }

    fn report_cardinality(&self) {
        self.stats.set_cardinality((self.left.len() + self.right.len()) as u64);
    }

    /// Drives both parent edges concurrently until both are closed.
    pub async fn run(
        mut self,
        mut left_in: EdgeReceiver,
        mut right_in: EdgeReceiver,
        outputs: NodeOutputs,
    ) -> CoreResult<()> {
        let tolerance = chrono::Duration::from_std(self.tolerance.as_duration())
            .unwrap_or(chrono::Duration::zero());
        let mut left_open = true;
        let mut right_open = true;

        while left_open || right_open {
            tokio::select! {
                msg = left_in.recv(), if left_open => {
                    match msg {
                        Some(Message::Point(group, point)) => {
                            self.try_join(&group, point, true, tolerance, &outputs).await?;
                        }
                        Some(Message::DeleteGroup(group)) => {
                            self.left.delete(&group, |_| {});
                            self.right.delete(&group, |_| {});
                            self.report_cardinality();
                            outputs.fan_out(Message::DeleteGroup(group)).await?;
                        }
                        Some(other) => outputs.fan_out(other).await?,
                        None => left_open = false,
                    }
                }
                msg = right_in.recv(), if right_open => {
                    match msg {
                        Some(Message::Point(group, point)) => {
                            self.try_join(&group, point, false, tolerance, &outputs).await?;
                        }
                        Some(Message::DeleteGroup(group)) => {
                            self.left.delete(&group, |_| {});
                            self.right.delete(&group, |_| {});
                            self.report_cardinality();
                            outputs.fan_out(Message::DeleteGroup(group)).await?;
                        }
                        Some(other) => outputs.fan_out(other).await?,
                        None => right_open = false,
                    }
                }
            }
        }
        Ok(())
    }

    async fn try_join(
        &mut self,
        group: &GroupKey,
        point: Point,
        is_left: bool,
        tolerance: chrono::Duration,
        outputs: &NodeOutputs,
    ) -> CoreResult<()> {
        let (own, other) = if is_left {
            (&mut self.left, &mut self.right)
        } else {
            (&mut self.right, &mut self.left)
        };

        if let Some(other_side) = other.get_mut(group) {
            other_side.pending.retain(|p| (point.time - p.time).abs() <= tolerance);
            if let Some(pos) = other_side
                .pending
                .iter()
                .position(|p| self.on.iter().all(|k| p.tags.get(k) == point.tags.get(k)))
            {
                let partner = other_side.pending.remove(pos).unwrap();
                let (left_p, right_p) = if is_left { (&point, &partner) } else { (&partner, &point) };
                let merged = merge(left_p, right_p);
                return outputs.fan_out(Message::Point(group.clone(), merged)).await;
            }
        }

        // No partner currently resident: buffer regardless of `fill` so a
        // partner arriving afterward can still find this point resident.
        // `fill` governs what happens to a point that never finds a match
        // (nothing emitted for `FillPolicy::None`, a filled point for the
        // other policies) — it must never gate whether the point is kept.
        let bucket = own.get_or_insert_with(group.clone(), Side::default);
        bucket.pending.retain(|p| (point.time - p.time).abs() <= tolerance);
        bucket.pending.push_back(point);
        self.report_cardinality();
        Ok(())
    }
}

fn merge(left: &Point, right: &Point) -> Point {
    let mut merged = Point::new(format!("{}+{}", left.measurement, right.measurement), left.time);
    merged.tags = left.tags.clone();
    for (k, v) in &right.tags {
        merged.tags.entry(k.clone()).or_insert_with(|| v.clone());
    }
    for (k, v) in &left.fields {
        merged.fields.insert(format!("left.{k}"), v.clone());
    }
    for (k, v) in &right.fields {
        merged.fields.insert(format!("right.{k}"), v.clone());
    }
    merged
}

/// Interleaves every parent edge's messages in arrival order without
/// combining fields (spec.md §4.7 C7 Union).
pub struct UnionTransform;

impl UnionTransform {
    pub async fn run(self, mut inputs: Vec<EdgeReceiver>, outputs: NodeOutputs) -> CoreResult<()> {
        loop {
            let mut any_open = false;
            let mut received = None;
            for input in inputs.iter_mut() {
                match input.recv().await {
                    Some(msg) => {
                        received = Some(msg);
                        any_open = true;
                        break;
                    }
                    None => continue,
                }
            }
            let Some(msg) = received else {
                if !any_open {
                    return Ok(());
                }
                continue;
            };
            outputs.fan_out(msg).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::{OverflowPolicy, edge};

    #[tokio::test]
    async fn joins_points_within_tolerance() {
        let (left_tx, left_rx) = edge(4, OverflowPolicy::Block);
        let (right_tx, right_rx) = edge(4, OverflowPolicy::Block);
        let (out_tx, mut out_rx) = edge(4, OverflowPolicy::Block);
        let outputs = NodeOutputs::new(vec![out_tx]);

        let t = chrono::Utc::now();
        left_tx
            .send(Message::Point(GroupKey::singleton(), Point::new("cpu", t).with_field("usage", 1.0)))
            .await
            .unwrap();
        right_tx
            .send(Message::Point(
                GroupKey::singleton(),
                Point::new("mem", t).with_field("free", 2.0),
            ))
            .await
            .unwrap();
        drop(left_tx);
        drop(right_tx);

        let join = JoinTransform::new("5s".parse().unwrap(), FillPolicy::None, vec![]);
        join.run(left_rx, right_rx, outputs).await.unwrap();

        let merged = out_rx.recv().await.unwrap();
        let p = merged.as_point().unwrap();
        assert!(p.fields.contains_key("left.usage"));
        assert!(p.fields.contains_key("right.free"));
    }

    #[tokio::test]
    async fn fill_none_still_buffers_an_unmatched_point_until_its_partner_arrives() {
        let (left_tx, left_rx) = edge(4, OverflowPolicy::Block);
        let (right_tx, right_rx) = edge(4, OverflowPolicy::Block);
        let (out_tx, mut out_rx) = edge(4, OverflowPolicy::Block);
        let outputs = NodeOutputs::new(vec![out_tx]);

        let t = chrono::Utc::now();
        // Left arrives first with nothing resident on the right; under
        // FillPolicy::None this must still be buffered, not discarded.
        left_tx
            .send(Message::Point(GroupKey::singleton(), Point::new("x", t).with_field("x", 1.0)))
            .await
            .unwrap();
        drop(left_tx);
        right_tx
            .send(Message::Point(
                GroupKey::singleton(),
                Point::new("y", t + chrono::Duration::milliseconds(400)).with_field("y", 2.0),
            ))
            .await
            .unwrap();
        drop(right_tx);

        let join = JoinTransform::new("1s".parse().unwrap(), FillPolicy::None, vec![]);
        join.run(left_rx, right_rx, outputs).await.unwrap();

        let merged = out_rx.recv().await.expect("left and right should have joined");
        let p = merged.as_point().unwrap();
        assert_eq!(p.fields.get("left.x"), Some(&wf_config::FieldValue::Float(1.0)));
        assert_eq!(p.fields.get("right.y"), Some(&wf_config::FieldValue::Float(2.0)));
    }

    #[tokio::test]
    async fn delete_group_clears_buffered_state_on_both_sides() {
        let (left_tx, left_rx) = edge(4, OverflowPolicy::Block);
        let (right_tx, right_rx) = edge(4, OverflowPolicy::Block);
        let (out_tx, mut out_rx) = edge(4, OverflowPolicy::Block);
        let outputs = NodeOutputs::new(vec![out_tx]);

        let t = chrono::Utc::now();
        left_tx
            .send(Message::Point(GroupKey::singleton(), Point::new("x", t).with_field("x", 1.0)))
            .await
            .unwrap();
        left_tx
            .send(Message::DeleteGroup(GroupKey::singleton()))
            .await
            .unwrap();
        drop(left_tx);
        drop(right_tx);

        let join = JoinTransform::new("1s".parse().unwrap(), FillPolicy::None, vec![]);
        join.run(left_rx, right_rx, outputs).await.unwrap();

        let forwarded = out_rx.recv().await.unwrap();
        assert!(forwarded.is_delete_group());
        assert!(out_rx.recv().await.is_none());
    }
}
