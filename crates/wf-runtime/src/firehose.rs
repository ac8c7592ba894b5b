use std::collections::HashMap;

use tokio::sync::RwLock;

use wf_config::TaskId;
use wf_core::group::GroupKey;
use wf_core::message::{Message, Point};
use wf_core::sink::FirehoseReinject;
use wf_core::{EdgeReceiver, EdgeSender, OverflowPolicy, edge};

/// Fork buffer capacity. Deliberately small relative to node-to-node edges:
/// a fork exists to protect the firehose from one slow task, not to absorb
/// sustained backlog.
const FORK_CAPACITY: usize = 1024;

/// The single ingest writer every stream task forks from (spec.md §3, §4.1
/// C1, §4.10: "one fork per task, on full the slowest fork is marked
/// degraded — it never stalls ingest for anyone else").
///
/// Built directly on [`wf_core::edge`] with [`OverflowPolicy::DropNewest`]:
/// there is no separate broadcast mechanism, a fork is just another edge.
#[derive(Default)]
pub struct Firehose {
    forks: RwLock<HashMap<TaskId, Vec<EdgeSender>>>,
}

impl Firehose {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a new fork for `task_id` with the default
    /// capacity, returning the receiver to hand to that task's
    /// `StreamFromSource`.
    pub async fn register_fork(&self, task_id: &str) -> EdgeReceiver {
        self.register_fork_with_capacity(task_id, FORK_CAPACITY).await
    }

    /// Same as [`register_fork`](Self::register_fork) but with an explicit
    /// capacity (spec.md §4.10: `ingest.task_fork_capacity`).
    pub async fn register_fork_with_capacity(&self, task_id: &str, capacity: usize) -> EdgeReceiver {
        let (tx, rx) = edge(capacity, OverflowPolicy::DropNewest);
        self.forks
            .write()
            .await
            .entry(task_id.to_string())
            .or_default()
            .push(tx);
        rx
    }

    /// Drop every fork registered for `task_id`. Closes that task's
    /// `StreamFromSource` input, which cascades a drain/close down the rest
    /// of its DAG as each node's `run()` returns and drops its outputs.
    pub async fn deregister_task(&self, task_id: &str) {
        self.forks.write().await.remove(task_id);
    }

    /// Fan `point` out to every registered fork.
    pub async fn publish(&self, point: Point) {
        let forks = self.forks.read().await;
        for senders in forks.values() {
            for tx in senders {
                if tx.is_closed() {
                    continue;
                }
                let _ = tx.send(Message::Point(GroupKey::singleton(), point.clone())).await;
            }
        }
    }

    pub async fn fork_count(&self, task_id: &str) -> usize {
        self.forks
            .read()
            .await
            .get(task_id)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

/// Re-injects points a `LoopbackSink` pulled back off a task's own output
/// (spec.md §4.8 Loopback) by republishing them onto the firehose under
/// their new measurement name.
pub struct FirehoseLoopback {
    firehose: std::sync::Arc<Firehose>,
}

impl FirehoseLoopback {
    pub fn new(firehose: std::sync::Arc<Firehose>) -> Self {
        Self { firehose }
    }
}

#[async_trait::async_trait]
impl FirehoseReinject for FirehoseLoopback {
    async fn reinject(&self, measurement: &str, points: Vec<Point>) -> anyhow::Result<()> {
        for mut point in points {
            point.measurement = measurement.to_string();
            self.firehose.publish(point).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn published_point_reaches_every_fork() {
        let fh = Firehose::new();
        let mut a = fh.register_fork("task-a").await;
        let mut b = fh.register_fork("task-b").await;

        fh.publish(Point::new("cpu", Utc::now())).await;

        assert!(a.recv().await.is_some());
        assert!(b.recv().await.is_some());
    }

    #[tokio::test]
    async fn deregister_closes_fork() {
        let fh = Firehose::new();
        let mut rx = fh.register_fork("task-a").await;
        fh.deregister_task("task-a").await;
        fh.publish(Point::new("cpu", Utc::now())).await;
        assert!(rx.recv().await.is_none());
    }
}
