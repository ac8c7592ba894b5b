use serde::Deserialize;

/// Ingest listener configuration (spec.md §6: line protocol over HTTP POST,
/// optional UDP).
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// HTTP listen address, e.g. `"127.0.0.1:9800"`. `/write` accepts
    /// ingest; `/<task-id>/<endpoint>` serves HTTPOut caches.
    pub http_listen: String,
    /// Optional UDP listen address carrying the same line-protocol body.
    #[serde(default)]
    pub udp_listen: Option<String>,
    /// Bound on the per-task-fork channel before a slow task is marked
    /// degraded and overflow is dropped (spec.md §5 shared-resource policy).
    #[serde(default = "default_fork_capacity")]
    pub task_fork_capacity: usize,
}

fn default_fork_capacity() -> usize {
    4096
}
