use std::time::Instant;

use orion_error::prelude::*;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use wf_config::{NodeId, TaskId, TaskKind};
use wf_core::error::{CoreError, CoreReason};
use wf_core::sink::HttpOutCache;
use wf_core::{EdgeAbortHandle, NodeStats};

use crate::error::{RuntimeReason, RuntimeResult};

/// One spawned node task plus the abort handles for every edge it owns
/// (its incoming edges and the downstream side of its outgoing ones), so a
/// panic in this node can unblock its neighbors immediately (spec.md §4.1
/// `abort(err)`, §4.10 force-stop) instead of only via the slower
/// implicit close-on-drop. `stats`/`started` let `wait` record this node's
/// run time and error count against the same handle `/metrics` reads.
struct NodeHandle {
    id: NodeId,
    join: JoinHandle<anyhow::Result<()>>,
    edges: Vec<EdgeAbortHandle>,
    stats: NodeStats,
    started: Instant,
}

/// A group of async tasks shut down together, joined in reverse (LIFO) start
/// order.
///
/// Unlike the teacher's fixed set of named groups, one `TaskGroup` exists
/// per compiled task DAG, so its name is the dynamic task id rather than a
/// `&'static str`.
pub struct TaskGroup {
    pub name: String,
    handles: Vec<NodeHandle>,
}

impl TaskGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), handles: Vec::new() }
    }

    /// Registers a spawned node's task alongside the abort handles for
    /// every edge it touches and the stats handle to update as it runs.
    pub fn push_node(&mut self, id: NodeId, edges: Vec<EdgeAbortHandle>, stats: NodeStats, join: JoinHandle<anyhow::Result<()>>) {
        self.handles.push(NodeHandle { id, join, edges, stats, started: Instant::now() });
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    fn abort_edges(&self, err_detail: &str) {
        for handle in &self.handles {
            for edge in &handle.edges {
                edge.abort(CoreError::from(CoreReason::Aborted).with_detail(err_detail.to_string()));
            }
        }
    }

    /// Abort every node task immediately (force-stop, spec.md §4.10:
    /// "force-stop aborts all edges").
    pub fn abort_all(&self) {
        self.abort_edges("task force-stopped");
        for handle in &self.handles {
            handle.join.abort();
        }
    }

    /// Join every node task in reverse (LIFO) order, returning the first
    /// error encountered. The instant any node fails — panic or returned
    /// error — every edge in the group is aborted so the rest unblock with
    /// an explicit error rather than waiting on the producer's drop.
    pub async fn wait(mut self) -> RuntimeResult<()> {
        let mut first_error: Option<RuntimeResult<()>> = None;
        while let Some(handle) = self.handles.pop() {
            let node_id = handle.id.clone();
            let stats = handle.stats.clone();
            let elapsed = handle.started.elapsed();
            match handle.join.await {
                Ok(Ok(())) => {
                    stats.record_exec(elapsed);
                }
                Ok(Err(e)) => {
                    stats.record_exec(elapsed);
                    stats.record_error();
                    wf_warn!(sys, node = %node_id, error = %e, "node task returned an error");
                    self.abort_edges(&format!("node {node_id} error: {e}"));
                    first_error.get_or_insert_with(|| {
                        Err(StructError::from(RuntimeReason::Shutdown)
                            .with_detail(format!("node {node_id} task error: {e}")))
                    });
                }
                Err(e) => {
                    stats.record_exec(elapsed);
                    stats.record_error();
                    wf_warn!(sys, node = %node_id, error = %e, "node task panicked");
                    self.abort_edges(&format!("node {node_id} panicked: {e}"));
                    first_error.get_or_insert_with(|| {
                        Err(StructError::from(RuntimeReason::Shutdown)
                            .with_detail(format!("node {node_id} task join error: {e}")))
                    });
                }
            }
        }
        first_error.unwrap_or(Ok(()))
    }
}

/// One task DAG running inside the engine: its node tasks, its place in the
/// firehose (for stream tasks), and any `HttpOut` caches registered under
/// their endpoint name for the ingest-side query API (spec.md §4.10, §6).
pub struct RunningTask {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub node_order: Vec<NodeId>,
    pub group: TaskGroup,
    pub http_out_nodes: Vec<(String, HttpOutCache)>,
    pub cancel: CancellationToken,
}

impl RunningTask {
    /// Cooperative stop: cancel the task's own token (stops `BatchQuery`
    /// tickers) and let the caller deregister it from the firehose (stops
    /// `StreamFrom` sources for stream tasks). Either closes the source
    /// node's input/output, which cascades a drain down the whole DAG.
    pub fn request_stop(&self) {
        self.cancel.cancel();
    }

    /// Force stop: abort every node task directly, abandoning any in-flight
    /// drain.
    pub fn force_stop(&self) {
        self.group.abort_all();
    }
}
