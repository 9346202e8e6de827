//! Persistence backends for deleted-file order records.
//!
//! This crate provides:
//! - The [`StorageAdapter`] contract every backend implements
//! - A process-local backend, a key/value-store backend and a SQLite durable log
//! - Config-driven construction with an ordered fallback chain

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::kv::{
    JsonFileKeyValueStore, KeyValueStorageAdapter, KeyValueStore, MemoryKeyValueStore,
};
pub use backends::memory::InMemoryStorageAdapter;
#[cfg(feature = "sqlite")]
pub use backends::sqlite::SqliteStorageAdapter;
pub use error::{StorageError, StorageResult};
pub use traits::StorageAdapter;

use ordinal_core::{DiagnosticsSink, StorageConfig};
use std::path::Path;
use std::sync::Arc;

/// Whether the durable log backend is compiled into this build.
pub fn durable_log_available() -> bool {
    cfg!(feature = "sqlite")
}

/// Construct the durable log backend, probing for its native component first.
///
/// Fails with [`StorageError::ModuleUnavailable`] when the build lacks it, so
/// callers move on to another backend instead of retrying.
#[cfg(feature = "sqlite")]
pub fn durable_log(
    path: &Path,
    sink: Arc<dyn DiagnosticsSink>,
) -> StorageResult<Arc<dyn StorageAdapter>> {
    Ok(Arc::new(SqliteStorageAdapter::new(path, sink)))
}

#[cfg(not(feature = "sqlite"))]
pub fn durable_log(
    path: &Path,
    _sink: Arc<dyn DiagnosticsSink>,
) -> StorageResult<Arc<dyn StorageAdapter>> {
    Err(StorageError::ModuleUnavailable(format!(
        "sqlite support is not compiled in (requested {})",
        path.display()
    )))
}

/// Create a storage backend from configuration. The backend is not initialized.
pub async fn from_config(
    config: &StorageConfig,
    sink: Arc<dyn DiagnosticsSink>,
) -> StorageResult<Arc<dyn StorageAdapter>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Memory => Ok(Arc::new(InMemoryStorageAdapter::new())),
        StorageConfig::KeyValue { path, namespace } => {
            let store = JsonFileKeyValueStore::open(path).await.map_err(|e| {
                StorageError::Init(format!(
                    "failed to open key/value file {}: {e}",
                    path.display()
                ))
            })?;
            Ok(Arc::new(KeyValueStorageAdapter::new(
                Arc::new(store),
                namespace.clone(),
            )))
        }
        StorageConfig::Sqlite { path } => durable_log(path, sink),
    }
}

/// Construct and initialize the first backend in `chain` that starts.
///
/// Each failure is logged once and the next candidate is tried. When every
/// candidate fails, an in-memory backend is returned, so this never fails.
pub async fn open_with_fallback(
    chain: &[StorageConfig],
    sink: Arc<dyn DiagnosticsSink>,
) -> Arc<dyn StorageAdapter> {
    for config in chain {
        let attempt = match from_config(config, sink.clone()).await {
            Ok(adapter) => adapter.initialize().await.map(|()| adapter),
            Err(e) => Err(e),
        };
        match attempt {
            Ok(adapter) => {
                sink.info(
                    "Deleted-file storage ready",
                    Some(&serde_json::json!({ "backend": adapter.backend_name() })),
                );
                return adapter;
            }
            Err(e) => {
                sink.warn(
                    "Storage backend unavailable, trying next",
                    Some(&serde_json::json!({
                        "config": format!("{config:?}"),
                        "error": e.to_string(),
                        "module_unavailable": e.is_module_unavailable(),
                    })),
                );
            }
        }
    }

    sink.warn(
        "No durable storage available, deleted-file order will not survive restarts",
        None,
    );
    Arc::new(InMemoryStorageAdapter::new())
}
