use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use wf_config::SnapshotConfig;

use crate::metrics::RuntimeMetrics;
use crate::snapshot_store::{SnapshotKey, SnapshotStore};

/// What gets snapshotted, by task id and `HttpOut` endpoint name.
///
/// wf-core's node types don't expose an internal save/restore hook, so this
/// scheduler persists the one piece of per-node state the runtime already
/// has visibility into without reaching into wf-core: the last cached
/// `HttpOut` response. A future snapshot/restore trait on wf-core's nodes
/// would let every stateful node (windows, join buffers, alert state
/// machines) be captured the same way (see DESIGN.md).
pub struct SnapshotTarget {
    pub task_id: String,
    pub node_id: String,
    pub cache: wf_core::sink::HttpOutCache,
}

/// Periodically persists snapshot targets via the configured
/// [`SnapshotStore`] backend (spec.md §4.10: "snapshots are taken
/// periodically per node").
pub async fn run_snapshot_scheduler(
    targets: Vec<SnapshotTarget>,
    store: Arc<dyn SnapshotStore>,
    config: SnapshotConfig,
    metrics: Arc<RuntimeMetrics>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    if targets.is_empty() {
        cancel.cancelled().await;
        return Ok(());
    }

    let mut tick = tokio::time::interval(config.interval.as_duration());
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                for target in &targets {
                    let snapshot = target.cache.snapshot().await;
                    let payload = serde_json::json!({
                        "points": snapshot.points,
                        "updated_at": snapshot.updated_at,
                    });
                    let bytes = match serde_json::to_vec(&payload) {
                        Ok(b) => b,
                        Err(e) => {
                            wf_warn!(res, error = %e, task = %target.task_id, node = %target.node_id, "snapshot serialize failed");
                            metrics.inc_snapshot_error();
                            continue;
                        }
                    };
                    let key = SnapshotKey::new(target.task_id.clone(), target.node_id.clone());
                    match store.save(&key, bytes).await {
                        Ok(()) => metrics.inc_snapshot_save(),
                        Err(e) => {
                            wf_warn!(res, error = %e, task = %target.task_id, node = %target.node_id, "snapshot save failed");
                            metrics.inc_snapshot_error();
                        }
                    }
                }
            }
        }
    }
    Ok(())
}
