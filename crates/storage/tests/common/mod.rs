//! Shared fixtures for backend contract tests.

use ordinal_core::DeletedFileRecord;
use ordinal_storage::{
    InMemoryStorageAdapter, KeyValueStorageAdapter, MemoryKeyValueStore, StorageAdapter,
};
use std::sync::Arc;
use tempfile::TempDir;

/// A backend under test plus whatever must outlive it.
pub struct TestBackend {
    pub name: &'static str,
    pub storage: Arc<dyn StorageAdapter>,
    _temp_dir: Option<TempDir>,
}

/// Every backend compiled into this build, initialized and empty.
pub async fn all_backends() -> Vec<TestBackend> {
    #[allow(unused_mut)]
    let mut backends = vec![
        TestBackend {
            name: "memory",
            storage: Arc::new(InMemoryStorageAdapter::new()),
            _temp_dir: None,
        },
        TestBackend {
            name: "keyvalue",
            storage: Arc::new(KeyValueStorageAdapter::new(
                Arc::new(MemoryKeyValueStore::new()),
                "deletedFiles",
            )),
            _temp_dir: None,
        },
    ];

    #[cfg(feature = "sqlite")]
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let storage = ordinal_storage::SqliteStorageAdapter::new(
            temp_dir.path().join("deleted-files.db"),
            ordinal_core::TracingSink::shared(),
        );
        backends.push(TestBackend {
            name: "sqlite",
            storage: Arc::new(storage),
            _temp_dir: Some(temp_dir),
        });
    }

    for backend in &backends {
        backend
            .storage
            .initialize()
            .await
            .unwrap_or_else(|e| panic!("{} failed to initialize: {e}", backend.name));
    }
    backends
}

pub fn record(path: &str, order: u64, timestamp: Option<i64>) -> DeletedFileRecord {
    DeletedFileRecord::new(path, order, timestamp)
}

pub fn paths(records: &[DeletedFileRecord]) -> Vec<&str> {
    records.iter().map(|r| r.file_path.as_str()).collect()
}
