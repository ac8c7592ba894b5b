use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use wf_config::HumanDuration;

use crate::edge::EdgeReceiver;
use crate::error::CoreResult;
use crate::group::GroupKey;
use crate::grouped::GroupTable;
use crate::message::{Message, Point};
use crate::node::{NodeOutputs, NodeStats};

struct Bucket {
    points: VecDeque<Point>,
    first_seen: DateTime<Utc>,
    /// The `every`-aligned boundary of the group's first point. Flushing
    /// compares each arriving point's boundary against this (or the last
    /// boundary actually flushed), so a flush fires exactly once per
    /// boundary crossed rather than on every message.
    created_boundary: i64,
    last_emit_boundary: Option<i64>,
}

impl Bucket {
    fn new(first: DateTime<Utc>, every_secs: i64) -> Self {
        Self {
            points: VecDeque::new(),
            first_seen: first,
            created_boundary: boundary_of(first, every_secs),
            last_emit_boundary: None,
        }
    }
}

fn boundary_of(time: DateTime<Utc>, every_secs: i64) -> i64 {
    let epoch = time.timestamp();
    epoch - epoch.rem_euclid(every_secs)
}

/// Retains the last `period` of points per group and re-emits the current
/// contents as a batch every `every` interval of event time (spec.md §4.6
/// C6 Window: time-based). `fill_period` controls whether the first emit
/// waits until a full period has been observed. The triggering point for a
/// flush is never itself included in the emitted batch — it lands in the
/// bucket only after the flush decision for its own arrival has been made.
pub struct TimeWindow {
    pub period: HumanDuration,
    pub every: HumanDuration,
    pub fill_period: bool,
    state: GroupTable<Bucket>,
    stats: NodeStats,
}

impl TimeWindow {
    pub fn new(period: HumanDuration, every: HumanDuration, fill_period: bool) -> Self {
        Self {
            period,
            every,
            fill_period,
            state: GroupTable::new(),
            stats: NodeStats::default(),
        }
    }

    /// Reports this window's live group count under `stats` as it runs.
    pub fn with_stats(mut self, stats: NodeStats) -> Self {
        self.stats = stats;
        self
    }

    pub async fn run(mut self, mut input: EdgeReceiver, outputs: NodeOutputs) -> CoreResult<()> {
        let period = chrono::Duration::from_std(self.period.as_duration())
            .unwrap_or(chrono::Duration::zero());
        let every_secs = self.every.as_duration().as_secs().max(1) as i64;

        while let Some(msg) = input.recv().await {
            match msg {
                Message::Point(group, point) => {
                    if let Some(flushed) = self.maybe_flush_before(&group, period, every_secs, point.time) {
                        outputs.fan_out(Message::Batch(group.clone(), flushed)).await?;
                    }

                    let bucket = self
                        .state
                        .get_or_insert_with(group.clone(), || Bucket::new(point.time, every_secs));
                    let cutoff = point.time - period;
                    bucket.points.retain(|p| p.time > cutoff);
                    bucket.points.push_back(point);
                    self.stats.set_cardinality(self.state.len() as u64);
                }
                Message::Barrier(ref g, ref barrier) => {
                    if let Some(flushed) = self.force_flush(g, period, barrier.time) {
                        outputs.fan_out(Message::Batch(g.clone(), flushed)).await?;
                    }
                    outputs.fan_out(msg).await?;
                }
                Message::DeleteGroup(ref g) => {
                    self.state.delete(g, |_| {});
                    self.stats.set_cardinality(self.state.len() as u64);
                    outputs.fan_out(msg).await?;
                }
                Message::Batch(..) => outputs.fan_out(msg).await?,
            }
        }
        Ok(())
    }

    /// Decides whether the group should flush *before* `point_time` joins
    /// the bucket, using only what was already retained.
    fn maybe_flush_before(
        &mut self,
        group: &GroupKey,
        period: chrono::Duration,
        every_secs: i64,
        point_time: DateTime<Utc>,
    ) -> Option<Vec<Point>> {
        let bucket = self.state.get_mut(group)?;
        if bucket.points.is_empty() {
            return None;
        }
        let boundary = boundary_of(point_time, every_secs);
        let due = match bucket.last_emit_boundary {
            None => {
                boundary > bucket.created_boundary
                    && (!self.fill_period || point_time - bucket.first_seen >= period)
            }
            Some(last) => boundary > last,
        };
        if !due {
            return None;
        }
        bucket.last_emit_boundary = Some(boundary);
        let cutoff = point_time - period;
        Some(bucket.points.iter().filter(|p| p.time > cutoff).cloned().collect())
    }

    /// Unconditional flush driven by a barrier: emits whatever the group
    /// currently holds, trimmed to `period` as of the barrier's time.
    fn force_flush(&mut self, group: &GroupKey, period: chrono::Duration, at: DateTime<Utc>) -> Option<Vec<Point>> {
        let bucket = self.state.get_mut(group)?;
        if bucket.points.is_empty() {
            return None;
        }
        let cutoff = at - period;
        bucket.points.retain(|p| p.time > cutoff);
        Some(bucket.points.iter().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::{OverflowPolicy, edge};

    #[tokio::test]
    async fn emits_batch_once_every_interval_elapses() {
        let (in_tx, in_rx) = edge(8, OverflowPolicy::Block);
        let (out_tx, mut out_rx) = edge(8, OverflowPolicy::Block);
        let outputs = NodeOutputs::new(vec![out_tx]);

        let t0 = chrono::Utc::now();
        let window = TimeWindow::new("10s".parse().unwrap(), "5s".parse().unwrap(), false);

        for i in 0..3 {
            let p = Point::new("cpu", t0 + chrono::Duration::seconds(i * 5)).with_field("n", i as f64);
            in_tx.send(Message::Point(GroupKey::singleton(), p)).await.unwrap();
        }
        drop(in_tx);

        window.run(in_rx, outputs).await.unwrap();

        let mut batches = 0;
        while let Some(msg) = out_rx.recv().await {
            if matches!(msg, Message::Batch(_, _)) {
                batches += 1;
            }
        }
        assert!(batches >= 2, "expected at least two flushes, got {batches}");
    }

    #[tokio::test]
    async fn every_point_arrival_does_not_flush_without_fill_period() {
        let (in_tx, in_rx) = edge(32, OverflowPolicy::Block);
        let (out_tx, mut out_rx) = edge(32, OverflowPolicy::Block);
        let outputs = NodeOutputs::new(vec![out_tx]);

        let t0 = chrono::Utc::now();
        let window = TimeWindow::new("10s".parse().unwrap(), "5s".parse().unwrap(), false);

        // Points every 1s from t=1..9 (t=0 excluded for simplicity); the
        // window must only flush once a 5s boundary is actually crossed,
        // not on every one of these nine arrivals.
        for i in 1..=9 {
            let p = Point::new("cpu", t0 + chrono::Duration::seconds(i)).with_field("n", i as f64);
            in_tx.send(Message::Point(GroupKey::singleton(), p)).await.unwrap();
        }
        drop(in_tx);

        window.run(in_rx, outputs).await.unwrap();

        let mut batches = Vec::new();
        while let Some(msg) = out_rx.recv().await {
            if let Message::Batch(_, points) = msg {
                batches.push(points);
            }
        }
        // Exactly one boundary (t=5) is crossed across these nine points.
        assert_eq!(batches.len(), 1);
        let values: Vec<f64> = batches[0]
            .iter()
            .map(|p| p.fields.get("n").unwrap().as_f64().unwrap())
            .collect();
        // The point that triggers the flush (t=5) must not be in its own batch.
        assert_eq!(values, vec![1.0, 2.0, 3.0, 4.0]);
    }
}
