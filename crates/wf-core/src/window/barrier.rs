use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use wf_config::HumanDuration;

use crate::edge::EdgeReceiver;
use crate::error::CoreResult;
use crate::group::GroupKey;
use crate::message::{Barrier, Message};
use crate::node::{NodeOutputs, NodeStats};

/// A group's idle-detection bookkeeping: `last_activity` is wall-clock, used
/// only to decide *when* a group has gone quiet; `last_event_time` is the
/// event time of the most recent message, used to stamp the barrier that
/// fires (spec.md §4.6: "a Barrier(g, last_point_time+idle) is emitted").
struct GroupState {
    last_activity: tokio::time::Instant,
    last_event_time: DateTime<Utc>,
}

/// Emits a barrier for a group once it has gone quiet for `idle`
/// (spec.md §4.6 C6 BarrierIdle) — lets downstream windows flush groups
/// that have stopped receiving data instead of waiting forever for the
/// next point.
pub struct BarrierIdle {
    pub idle: HumanDuration,
    /// When true, the group is forgotten after the barrier fires and a
    /// `DeleteGroup` is sent downstream so every grouped consumer releases
    /// its state for it; a later point restarts its idle clock from zero
    /// rather than firing again immediately.
    pub delete: bool,
    stats: NodeStats,
}

impl BarrierIdle {
    pub fn new(idle: HumanDuration, delete: bool) -> Self {
        Self { idle, delete, stats: NodeStats::default() }
    }

    /// Reports how many groups are currently being tracked for idleness.
    pub fn with_stats(mut self, stats: NodeStats) -> Self {
        self.stats = stats;
        self
    }

    pub async fn run(self, mut input: EdgeReceiver, outputs: NodeOutputs) -> CoreResult<()> {
        let idle = self.idle.as_duration();
        let idle_chrono = chrono::Duration::from_std(idle).unwrap_or_else(|_| chrono::Duration::zero());
        let mut groups: HashMap<GroupKey, GroupState> = HashMap::new();
        let mut ticker = tokio::time::interval((idle / 2).max(Duration::from_millis(50)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe_msg = input.recv() => {
                    let Some(msg) = maybe_msg else { return Ok(()) };
                    if let Message::DeleteGroup(group) = &msg {
                        groups.remove(group);
                    } else {
                        let event_time = msg.event_time();
                        groups
                            .entry(msg.group().clone())
                            .and_modify(|s| {
                                s.last_activity = tokio::time::Instant::now();
                                s.last_event_time = event_time;
                            })
                            .or_insert_with(|| GroupState {
                                last_activity: tokio::time::Instant::now(),
                                last_event_time: event_time,
                            });
                    }
                    self.stats.set_cardinality(groups.len() as u64);
                    outputs.fan_out(msg).await?;
                }
                _ = ticker.tick() => {
                    let now = tokio::time::Instant::now();
                    let expired: Vec<GroupKey> = groups
                        .iter()
                        .filter(|(_, s)| now.duration_since(s.last_activity) >= idle)
                        .map(|(g, _)| g.clone())
                        .collect();

                    for group in expired {
                        let barrier_time = groups
                            .get(&group)
                            .map(|s| s.last_event_time + idle_chrono)
                            .unwrap_or_else(Utc::now);
                        outputs
                            .fan_out(Message::Barrier(group.clone(), Barrier { time: barrier_time }))
                            .await?;

                        if self.delete {
                            groups.remove(&group);
                            self.stats.set_cardinality(groups.len() as u64);
                            outputs.fan_out(Message::DeleteGroup(group)).await?;
                        } else if let Some(state) = groups.get_mut(&group) {
                            state.last_activity = now;
                        }
                    }
                }
            }
        }
    }
}

/// Emits a barrier for every group seen so far on a fixed wall-clock period
/// (spec.md §4.6 C6 BarrierPeriod) — a steady heartbeat independent of
/// whether data is still arriving.
pub struct BarrierPeriod {
    pub period: HumanDuration,
    stats: NodeStats,
}

impl BarrierPeriod {
    pub fn new(period: HumanDuration) -> Self {
        Self { period, stats: NodeStats::default() }
    }

    /// Reports how many groups are currently being tracked.
    pub fn with_stats(mut self, stats: NodeStats) -> Self {
        self.stats = stats;
        self
    }

    pub async fn run(self, mut input: EdgeReceiver, outputs: NodeOutputs) -> CoreResult<()> {
        let mut known: std::collections::HashSet<GroupKey> = std::collections::HashSet::new();
        let mut ticker = tokio::time::interval(self.period.as_duration().max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe_msg = input.recv() => {
                    let Some(msg) = maybe_msg else { return Ok(()) };
                    if let Message::DeleteGroup(group) = &msg {
                        known.remove(group);
                    } else {
                        known.insert(msg.group().clone());
                    }
                    self.stats.set_cardinality(known.len() as u64);
                    outputs.fan_out(msg).await?;
                }
                _ = ticker.tick() => {
                    for group in known.iter() {
                        outputs
                            .fan_out(Message::Barrier(group.clone(), Barrier { time: Utc::now() }))
                            .await?;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::{OverflowPolicy, edge};
    use crate::message::Point;

    #[tokio::test]
    async fn idle_group_eventually_emits_a_barrier() {
        let (in_tx, in_rx) = edge(8, OverflowPolicy::Block);
        let (out_tx, mut out_rx) = edge(8, OverflowPolicy::Block);
        let outputs = NodeOutputs::new(vec![out_tx]);

        let point = Point::new("cpu", chrono::Utc::now());
        in_tx.send(Message::Point(GroupKey::singleton(), point)).await.unwrap();

        let handle = tokio::spawn(
            BarrierIdle::new(HumanDuration::from(Duration::from_millis(50)), false).run(in_rx, outputs),
        );

        let first = out_rx.recv().await.unwrap();
        assert!(matches!(first, Message::Point(..)));
        let second = tokio::time::timeout(Duration::from_secs(1), out_rx.recv())
            .await
            .expect("timed out waiting for idle barrier")
            .unwrap();
        assert!(second.is_barrier());

        drop(in_tx);
        let _ = handle.await;
    }

    #[tokio::test]
    async fn idle_barrier_time_derives_from_last_point_not_wall_clock() {
        let (in_tx, in_rx) = edge(8, OverflowPolicy::Block);
        let (out_tx, mut out_rx) = edge(8, OverflowPolicy::Block);
        let outputs = NodeOutputs::new(vec![out_tx]);

        let point_time = chrono::Utc::now() - chrono::Duration::seconds(3600);
        let point = Point::new("cpu", point_time);
        in_tx.send(Message::Point(GroupKey::singleton(), point)).await.unwrap();

        let idle = HumanDuration::from(Duration::from_millis(50));
        let handle = tokio::spawn(BarrierIdle::new(idle, false).run(in_rx, outputs));

        let _first = out_rx.recv().await.unwrap();
        let second = tokio::time::timeout(Duration::from_secs(1), out_rx.recv())
            .await
            .expect("timed out waiting for idle barrier")
            .unwrap();
        let Message::Barrier(_, barrier) = second else { panic!("expected barrier") };
        assert_eq!(barrier.time, point_time + chrono::Duration::from_std(idle.as_duration()).unwrap());

        drop(in_tx);
        let _ = handle.await;
    }

    #[tokio::test]
    async fn delete_mode_emits_delete_group_after_barrier() {
        let (in_tx, in_rx) = edge(8, OverflowPolicy::Block);
        let (out_tx, mut out_rx) = edge(8, OverflowPolicy::Block);
        let outputs = NodeOutputs::new(vec![out_tx]);

        let point = Point::new("cpu", chrono::Utc::now());
        in_tx.send(Message::Point(GroupKey::singleton(), point)).await.unwrap();

        let handle = tokio::spawn(
            BarrierIdle::new(HumanDuration::from(Duration::from_millis(50)), true).run(in_rx, outputs),
        );

        let _first = out_rx.recv().await.unwrap();
        let barrier = tokio::time::timeout(Duration::from_secs(1), out_rx.recv())
            .await
            .expect("timed out waiting for idle barrier")
            .unwrap();
        assert!(barrier.is_barrier());
        let delete = tokio::time::timeout(Duration::from_secs(1), out_rx.recv())
            .await
            .expect("timed out waiting for delete group")
            .unwrap();
        assert!(delete.is_delete_group());

        drop(in_tx);
        let _ = handle.await;
    }
}
