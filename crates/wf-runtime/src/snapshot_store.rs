use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use orion_error::prelude::*;
use wf_config::SnapshotBackend;

use crate::error::{RuntimeReason, RuntimeResult};

/// Opaque per-node state, addressed by task id and node id (spec.md §4.10:
/// "snapshots are taken periodically per node and persisted via an abstract
/// storage interface"). What's inside the bytes is the node's own concern —
/// the store never interprets them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotKey {
    pub task_id: String,
    pub node_id: String,
}

impl SnapshotKey {
    pub fn new(task_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self { task_id: task_id.into(), node_id: node_id.into() }
    }

    fn file_name(&self) -> String {
        format!("{}__{}.snap", self.task_id, self.node_id)
    }
}

#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, key: &SnapshotKey, data: Vec<u8>) -> RuntimeResult<()>;
    async fn load(&self, key: &SnapshotKey) -> RuntimeResult<Option<Vec<u8>>>;
}

/// Persists snapshots as one file per node under a directory.
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

#[async_trait::async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn save(&self, key: &SnapshotKey, data: Vec<u8>) -> RuntimeResult<()> {
        tokio::fs::create_dir_all(&self.dir).await.owe_sys()?;
        let path = self.dir.join(key.file_name());
        tokio::fs::write(&path, data).await.owe_sys()?;
        Ok(())
    }

    async fn load(&self, key: &SnapshotKey) -> RuntimeResult<Option<Vec<u8>>> {
        let path = self.dir.join(key.file_name());
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).owe_sys(),
        }
    }
}

/// In-memory snapshot store, used when `snapshot.backend = "memory"` or in
/// tests.
#[derive(Default)]
pub struct MemorySnapshotStore {
    entries: Mutex<HashMap<SnapshotKey, Vec<u8>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn save(&self, key: &SnapshotKey, data: Vec<u8>) -> RuntimeResult<()> {
        self.entries.lock().expect("snapshot lock poisoned").insert(key.clone(), data);
        Ok(())
    }

    async fn load(&self, key: &SnapshotKey) -> RuntimeResult<Option<Vec<u8>>> {
        Ok(self.entries.lock().expect("snapshot lock poisoned").get(key).cloned())
    }
}

/// Build the configured [`SnapshotStore`] backend.
pub fn build_snapshot_store(backend: &SnapshotBackend) -> Box<dyn SnapshotStore> {
    match backend {
        SnapshotBackend::File { dir } => Box::new(FileSnapshotStore::new(dir.clone())),
        SnapshotBackend::Memory => Box::new(MemorySnapshotStore::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trips() {
        let store = MemorySnapshotStore::new();
        let key = SnapshotKey::new("task-1", "win-1");
        assert!(store.load(&key).await.unwrap().is_none());
        store.save(&key, vec![1, 2, 3]).await.unwrap();
        assert_eq!(store.load(&key).await.unwrap(), Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn file_store_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(tmp.path().to_path_buf());
        let key = SnapshotKey::new("task-1", "win-1");
        store.save(&key, vec![9, 9]).await.unwrap();
        assert_eq!(store.load(&key).await.unwrap(), Some(vec![9, 9]));
    }
}
