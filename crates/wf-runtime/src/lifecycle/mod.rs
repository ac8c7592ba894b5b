mod bootstrap;
mod compile;
mod signal;
mod spawn;
mod types;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use wf_config::{EngineConfig, TaskDef, TaskId, TaskKind};

use crate::error::RuntimeResult;
use crate::firehose::Firehose;

// Re-export public API
pub use signal::wait_for_signal;

use bootstrap::bootstrap;
use spawn::{spawn_ingest, spawn_metrics_summary, spawn_snapshot_scheduler};
use types::TaskGroup;

pub use types::RunningTask;

/// Manages the full lifecycle of the streaming engine: bootstrap, run, and
/// graceful shutdown.
///
/// Unlike the teacher's single CEP pipeline, `TaskMaster` owns one
/// independently compiled DAG per configured task plus a small set of
/// ambient singleton tasks (ingest, metrics summary, snapshot scheduler)
/// shared by all of them. Shutdown order mirrors the teacher's two-phase
/// drain: ingest stops first, then stream tasks are unhooked from the
/// firehose, and only then are the per-task DAGs joined so any in-flight
/// message finishes its run.
pub struct TaskMaster {
    cancel: CancellationToken,
    firehose: Arc<Firehose>,
    tasks: HashMap<TaskId, RunningTask>,
    ambient: TaskGroup,
    listen_addr: SocketAddr,
}

impl TaskMaster {
    /// Bootstrap every configured task's DAG and stand up the ambient
    /// singleton tasks that serve them.
    #[tracing::instrument(name = "engine.start", skip_all, fields(listen = %config.ingest.http_listen))]
    pub async fn start(config: EngineConfig, task_defs: Vec<TaskDef>) -> RuntimeResult<Self> {
        let cancel = CancellationToken::new();

        let data = bootstrap(&config, task_defs, cancel.child_token()).await?;

        let mut ambient = TaskGroup::new("ambient");

        let (listen_addr, ingest_handle) = spawn_ingest(
            &config.ingest,
            Arc::clone(&data.firehose),
            Arc::clone(&data.http_out),
            Arc::clone(&data.metrics),
            cancel.child_token(),
        )
        .await?;
        ambient.push(ingest_handle);

        ambient.push(spawn_metrics_summary(config.metrics.clone(), Arc::clone(&data.metrics), cancel.child_token()));

        ambient.push(spawn_snapshot_scheduler(
            &data.tasks,
            Arc::clone(&data.snapshot_store),
            config.snapshot.clone(),
            Arc::clone(&data.metrics),
            cancel.child_token(),
        ));

        for (task_id, task) in &data.tasks {
            data.metrics.set_task_nodes(task_id, task.node_order.len());
            data.metrics.set_task_running(task_id, true);
        }

        wf_info!(sys, tasks = data.tasks.len(), listen = %listen_addr, "engine started");

        Ok(Self { cancel, firehose: data.firehose, tasks: data.tasks, ambient, listen_addr })
    }

    /// Returns the local address the ingest server is listening on.
    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// Returns a clone of the root cancellation token (for signal integration).
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request graceful shutdown of every task and the ambient services.
    pub fn shutdown(&self) {
        wf_info!(sys, "initiating graceful shutdown");
        for task in self.tasks.values() {
            task.request_stop();
        }
        self.cancel.cancel();
    }

    /// Wait for the ambient tasks and every task DAG to finish after
    /// [`shutdown`](Self::shutdown).
    ///
    /// Ingest and the other ambient tasks are joined first so no new point
    /// can enter the firehose; each stream task is then deregistered from
    /// the firehose, closing its `StreamFrom` input and cascading a drain
    /// through the rest of its DAG.
    pub async fn wait(self) -> RuntimeResult<()> {
        self.ambient.wait().await?;

        for (task_id, task) in &self.tasks {
            if task.kind == TaskKind::Stream {
                self.firehose.deregister_task(task_id).await;
            }
        }

        for (task_id, task) in self.tasks {
            wf_debug!(sys, task = %task_id, "waiting for task to finish");
            task.group.wait().await?;
            wf_debug!(sys, task = %task_id, "task finished");
        }
        Ok(())
    }
}
