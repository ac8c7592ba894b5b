use std::path::PathBuf;

use serde::Deserialize;

use crate::types::HumanDuration;

/// Snapshot persistence backend (spec.md §4.10, §6): opaque bytes keyed by
/// (task id, node name).
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotConfig {
    pub backend: SnapshotBackend,
    #[serde(default = "default_snapshot_interval")]
    pub interval: HumanDuration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SnapshotBackend {
    /// Snapshots are written as files under `dir/<task-id>/<node-name>.snap`.
    File { dir: PathBuf },
    /// Snapshots are kept in memory only; lost on restart. Used in tests.
    Memory,
}

fn default_snapshot_interval() -> HumanDuration {
    "30s".parse().expect("hardcoded duration must parse")
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            backend: SnapshotBackend::Memory,
            interval: default_snapshot_interval(),
        }
    }
}
