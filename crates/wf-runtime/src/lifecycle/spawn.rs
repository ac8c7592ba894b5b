use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use orion_error::prelude::*;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use wf_config::{IngestConfig, MetricsConfig, SnapshotConfig, TaskId};

use crate::error::{RuntimeReason, RuntimeResult};
use crate::firehose::Firehose;
use crate::ingest::{HttpOutRegistry, IngestServer};
use crate::metrics::{RuntimeMetrics, run_metrics_summary_task};
use crate::scheduler::{SnapshotTarget, run_snapshot_scheduler};
use crate::snapshot_store::SnapshotStore;

use super::types::RunningTask;

// ---------------------------------------------------------------------------
// Ambient task spawn helpers — each binds/builds its collaborator and
// returns a join handle for the caller's ambient `TaskGroup`. Distinct from
// `compile::spawn_node`, which spawns one task per DAG node.
// ---------------------------------------------------------------------------

/// Bind and spawn the ingest HTTP(+UDP) server. Returns the bound address so
/// the caller can report it, plus the join handle to fold into the ambient
/// task group.
pub(super) async fn spawn_ingest(
    config: &IngestConfig,
    firehose: Arc<Firehose>,
    http_out: HttpOutRegistry,
    metrics: Arc<RuntimeMetrics>,
    cancel: CancellationToken,
) -> RuntimeResult<(SocketAddr, JoinHandle<anyhow::Result<()>>)> {
    let server = IngestServer::bind(config, firehose, http_out, metrics)
        .await
        .map_err(|e| StructError::from(RuntimeReason::Bootstrap).with_detail(format!("ingest bind failed: {e}")))?;
    let addr = server.local_addr();
    let handle = tokio::spawn(async move { server.run(cancel).await });
    Ok((addr, handle))
}

/// Spawn the periodic metrics-summary logger (spec.md §4.10).
pub(super) fn spawn_metrics_summary(
    config: MetricsConfig,
    metrics: Arc<RuntimeMetrics>,
    cancel: CancellationToken,
) -> JoinHandle<anyhow::Result<()>> {
    tokio::spawn(async move { run_metrics_summary_task(metrics, config, cancel).await })
}

/// Spawn the periodic snapshot scheduler, covering every `HttpOut` node
/// across every compiled task (spec.md §4.10).
pub(super) fn spawn_snapshot_scheduler(
    tasks: &HashMap<TaskId, RunningTask>,
    store: Arc<dyn SnapshotStore>,
    config: SnapshotConfig,
    metrics: Arc<RuntimeMetrics>,
    cancel: CancellationToken,
) -> JoinHandle<anyhow::Result<()>> {
    let targets: Vec<SnapshotTarget> = tasks
        .values()
        .flat_map(|task| {
            let task_id = task.task_id.clone();
            task.http_out_nodes.iter().map(move |(endpoint, cache)| SnapshotTarget {
                task_id: task_id.clone(),
                node_id: endpoint.clone(),
                cache: cache.clone(),
            })
        })
        .collect();
    tokio::spawn(async move { run_snapshot_scheduler(targets, store, config, metrics, cancel).await })
}
