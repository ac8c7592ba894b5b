use std::collections::VecDeque;

use crate::edge::EdgeReceiver;
use crate::error::CoreResult;
use crate::group::GroupKey;
use crate::grouped::GroupTable;
use crate::message::{Message, Point};
use crate::node::{NodeOutputs, NodeStats};

#[derive(Default)]
struct Bucket {
    points: VecDeque<Point>,
    since_last_emit: usize,
}

/// Retains the last `period` points per group and re-emits the current
/// contents as a batch every `every` points (spec.md §4.6 C6 Window:
/// count-based). `fill_period` controls whether the first emit waits for a
/// full window of `period` points.
pub struct CountWindow {
    pub period: usize,
    pub every: usize,
    pub fill_period: bool,
    state: GroupTable<Bucket>,
    stats: NodeStats,
}

impl CountWindow {
    pub fn new(period: usize, every: usize, fill_period: bool) -> Self {
        Self {
            period: period.max(1),
            every: every.max(1),
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
        while let Some(msg) = input.recv().await {
            if let Message::DeleteGroup(ref g) = msg {
                self.state.delete(g, |_| {});
                self.stats.set_cardinality(self.state.len() as u64);
                outputs.fan_out(msg).await?;
                continue;
            }
            let Message::Point(group, point) = msg else {
                outputs.fan_out(msg).await?;
                continue;
            };

            let bucket = self.state.get_or_insert_with(group.clone(), Bucket::default);
            bucket.points.push_back(point);
            while bucket.points.len() > self.period {
                bucket.points.pop_front();
            }
            bucket.since_last_emit += 1;

            let due = bucket.since_last_emit >= self.every
                && (!self.fill_period || bucket.points.len() >= self.period);
            let snapshot = if due {
                bucket.since_last_emit = 0;
                Some(bucket.points.iter().cloned().collect::<Vec<Point>>())
            } else {
                None
            };
            self.stats.set_cardinality(self.state.len() as u64);
            if let Some(snapshot) = snapshot {
                outputs.fan_out(Message::Batch(group, snapshot)).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::{OverflowPolicy, edge};

    #[tokio::test]
    async fn emits_every_n_points_capped_at_period() {
        let (in_tx, in_rx) = edge(16, OverflowPolicy::Block);
        let (out_tx, mut out_rx) = edge(16, OverflowPolicy::Block);
        let outputs = NodeOutputs::new(vec![out_tx]);

        let window = CountWindow::new(3, 2, false);
        for i in 0..6 {
            let p = Point::new("cpu", chrono::Utc::now()).with_field("n", i as f64);
            in_tx.send(Message::Point(GroupKey::singleton(), p)).await.unwrap();
        }
        drop(in_tx);

        window.run(in_rx, outputs).await.unwrap();

        let first = out_rx.recv().await.unwrap();
        let Message::Batch(_, points) = first else { panic!("expected batch") };
        assert_eq!(points.len(), 2);

        let second = out_rx.recv().await.unwrap();
        let Message::Batch(_, points) = second else { panic!("expected batch") };
        assert_eq!(points.len(), 3);
    }
}
