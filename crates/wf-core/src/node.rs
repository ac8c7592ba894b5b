use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use wf_config::NodeId;

use crate::edge::{EdgeAbortHandle, EdgeSender};
use crate::error::CoreError;
use crate::message::Message;

#[derive(Debug, Default)]
struct NodeStatsInner {
    errors: AtomicU64,
    exec_count: AtomicU64,
    exec_nanos_total: AtomicU64,
    cardinality: AtomicU64,
}

/// A node's working counters: how many times it has errored, its average
/// time spent running to completion (or, for stateful nodes, per restart),
/// and however many groups it is currently carrying state for. Shared
/// between the node implementation (which updates `cardinality` as its
/// group table grows and shrinks) and the runtime (which times and counts
/// the node's task and exposes all of it over `/metrics`).
#[derive(Debug, Clone, Default)]
pub struct NodeStats(Arc<NodeStatsInner>);

impl NodeStats {
    pub fn record_exec(&self, elapsed: Duration) {
        self.0.exec_nanos_total.fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
        self.0.exec_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.0.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_cardinality(&self, groups: u64) {
        self.0.cardinality.store(groups, Ordering::Relaxed);
    }

    pub fn errors(&self) -> u64 {
        self.0.errors.load(Ordering::Relaxed)
    }

    pub fn avg_exec_nanos(&self) -> u64 {
        let count = self.0.exec_count.load(Ordering::Relaxed);
        if count == 0 {
            0
        } else {
            self.0.exec_nanos_total.load(Ordering::Relaxed) / count
        }
    }

    pub fn cardinality(&self) -> u64 {
        self.0.cardinality.load(Ordering::Relaxed)
    }
}

/// Everything a running node needs besides its own config and channels:
/// identity for logging/metrics, and the stat counters the runtime reports
/// under that identity. Node state (window buffers, group tables) still
/// lives in the node implementation itself.
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub task_id: String,
    pub node_id: NodeId,
    pub stats: NodeStats,
}

impl NodeContext {
    pub fn new(task_id: impl Into<String>, node_id: impl Into<NodeId>) -> Self {
        Self {
            task_id: task_id.into(),
            node_id: node_id.into(),
            stats: NodeStats::default(),
        }
    }
}

/// The fan-out side of a node: every downstream edge gets its own clone of
/// each emitted message (spec.md §4.1: a node may have multiple children).
#[derive(Default)]
pub struct NodeOutputs(Vec<EdgeSender>);

impl NodeOutputs {
    pub fn new(senders: Vec<EdgeSender>) -> Self {
        Self(senders)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Abort handles for every downstream edge, so the runtime can unblock
    /// this node's children if the node itself dies unexpectedly.
    pub fn abort_handles(&self) -> Vec<EdgeAbortHandle> {
        self.0.iter().map(EdgeSender::abort_handle).collect()
    }

    /// Deliver `msg` to every downstream edge. A closed downstream edge is
    /// not an error here — the consuming node may have already finished
    /// shutting down (spec.md §4.10 LIFO teardown).
    pub async fn fan_out(&self, msg: Message) -> Result<(), CoreError> {
        for sender in &self.0 {
            if sender.is_closed() {
                continue;
            }
            sender.send(msg.clone()).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::{OverflowPolicy, edge};
    use crate::group::GroupKey;
    use crate::message::Barrier;
    use chrono::Utc;

    #[tokio::test]
    async fn fan_out_delivers_to_every_child() {
        let (tx_a, mut rx_a) = edge(4, OverflowPolicy::Block);
        let (tx_b, mut rx_b) = edge(4, OverflowPolicy::Block);
        let outputs = NodeOutputs::new(vec![tx_a, tx_b]);

        outputs
            .fan_out(Message::Barrier(GroupKey::singleton(), Barrier { time: Utc::now() }))
            .await
            .unwrap();

        assert!(rx_a.recv().await.is_some());
        assert!(rx_b.recv().await.is_some());
    }
}
