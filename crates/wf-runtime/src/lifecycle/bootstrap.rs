use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use wf_config::{EngineConfig, TaskDef, TaskId};
use wf_core::sink::{AlertTopicBus, ExternalScaler, ExternalWriteStore};
use wf_core::source::ExternalStore;
use wf_core::transform::{MemorySideloadSource, SideloadSource};

use crate::error::RuntimeResult;
use crate::firehose::Firehose;
use crate::ingest::HttpOutRegistry;
use crate::metrics::RuntimeMetrics;
use crate::query_store::{InMemoryStore, NoopScaler};
use crate::snapshot_store::{SnapshotStore, build_snapshot_store};

use super::compile::{CompileCtx, compile_task};
use super::types::RunningTask;

pub(super) struct BootstrapData {
    pub firehose: Arc<Firehose>,
    pub tasks: HashMap<TaskId, RunningTask>,
    pub http_out: HttpOutRegistry,
    pub metrics: Arc<RuntimeMetrics>,
    pub snapshot_store: Arc<dyn SnapshotStore>,
    pub alert_bus: AlertTopicBus,
}

/// Compile every configured task's DAG and stand up the shared collaborators
/// they run against (spec.md §4.10). The external time-series store and
/// autoscale control plane are opaque, out-of-scope collaborators; an
/// in-process in-memory store and a logging-only scaler are wired in by
/// default so the engine runs standalone (see DESIGN.md).
pub(super) async fn bootstrap(
    config: &EngineConfig,
    task_defs: Vec<TaskDef>,
    root_cancel: CancellationToken,
) -> RuntimeResult<BootstrapData> {
    let firehose = Arc::new(Firehose::new());
    let store = Arc::new(InMemoryStore::new());
    let ext_store: Arc<dyn ExternalStore> = store.clone();
    let ext_write_store: Arc<dyn ExternalWriteStore> = store;
    let scaler: Arc<dyn ExternalScaler> = Arc::new(NoopScaler);
    let sideload: Arc<dyn SideloadSource> = Arc::new(MemorySideloadSource(HashMap::new()));
    let alert_bus = AlertTopicBus::default();
    let http_out: HttpOutRegistry = Arc::new(RwLock::new(HashMap::new()));
    let snapshot_store = Arc::from(build_snapshot_store(&config.snapshot.backend));

    let mut tasks = HashMap::with_capacity(task_defs.len());
    let mut all_node_stats = Vec::new();
    for def in &task_defs {
        let task_cancel = root_cancel.child_token();
        let ctx = CompileCtx {
            task_id: def.id.clone(),
            firehose: Arc::clone(&firehose),
            fork_capacity: config.ingest.task_fork_capacity,
            store: Arc::clone(&ext_store),
            write_store: Arc::clone(&ext_write_store),
            scaler: Arc::clone(&scaler),
            sideload: Arc::clone(&sideload),
            alert_bus: alert_bus.clone(),
        };
        let (group, http_out_nodes, node_stats) = compile_task(def, &ctx, task_cancel.clone()).await?;

        {
            let mut guard = http_out.write().await;
            for (endpoint, cache) in &http_out_nodes {
                guard.insert((def.id.clone(), endpoint.clone()), cache.clone());
            }
        }

        for (node_id, stats) in node_stats {
            all_node_stats.push((def.id.clone(), node_id, stats));
        }

        let node_order = def.topo_order().unwrap_or_default();
        wf_info!(sys, task = %def.id, nodes = node_order.len(), "task compiled");
        tasks.insert(
            def.id.clone(),
            RunningTask {
                task_id: def.id.clone(),
                kind: def.kind,
                node_order,
                group,
                http_out_nodes,
                cancel: task_cancel,
            },
        );
    }

    let rule_like_names: Vec<String> = tasks.keys().cloned().collect();
    let mut metrics = RuntimeMetrics::new(&rule_like_names);
    for (task_id, node_id, stats) in all_node_stats {
        metrics.register_node(&task_id, &node_id, stats);
    }
    let metrics = Arc::new(metrics);

    Ok(BootstrapData { firehose, tasks, http_out, metrics, snapshot_store, alert_bus })
}
