//! Key/value storage backend.
//!
//! Persists through a host-provided namespaced key/value store. The host store
//! has no schema and no uniqueness constraints, so write-once is enforced here
//! by reading the stored array and appending only unseen paths.
//!
//! Layout under namespace `<ns>`:
//! - `<ns>.repos`            -> `{ [path]: { id, name } }`
//! - `<ns>.nextRepoId`       -> integer
//! - `<ns>.deleted.<repoId>` -> `DeletedFileRecord[]`

use crate::error::{StorageError, StorageResult};
use crate::traits::StorageAdapter;
use async_trait::async_trait;
use ordinal_core::models::sort_newest_first;
use ordinal_core::{DeletedFileRecord, RepoId, StorageStats};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::instrument;
use uuid::Uuid;

/// Host key/value store contract.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> StorageResult<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> StorageResult<()>;

    async fn keys(&self) -> StorageResult<Vec<String>>;
}

/// Host store living only in process memory.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<Map<String, Value>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> StorageResult<()> {
        self.entries.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.entries.lock().await.keys().cloned().collect())
    }
}

/// Host store persisted as one JSON object in a file.
///
/// Every `set` rewrites the file through a temp file, fsync and rename. The
/// in-memory map only takes the new value once the rename has landed, and a
/// dropped `set` future still runs its write to completion.
#[derive(Debug)]
pub struct JsonFileKeyValueStore {
    path: PathBuf,
    entries: Arc<Mutex<Map<String, Value>>>,
}

impl JsonFileKeyValueStore {
    /// Open the store at `path`, creating parent directories. A missing file is empty.
    pub async fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let entries = match fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => Map::new(),
            Ok(bytes) => match serde_json::from_slice::<Value>(&bytes)? {
                Value::Object(map) => map,
                _ => {
                    return Err(StorageError::Init(format!(
                        "key/value file {} does not hold a JSON object",
                        path.display()
                    )));
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(err) => return Err(err.into()),
        };

        Ok(Self {
            path,
            entries: Arc::new(Mutex::new(entries)),
        })
    }

    async fn persist(path: &Path, entries: &Map<String, Value>) -> StorageResult<()> {
        let data = serde_json::to_vec_pretty(entries)?;
        let temp_name = format!(".tmp.{}", Uuid::new_v4());
        let temp_path = path.with_file_name(
            path.file_name()
                .map(|n| format!("{}{}", n.to_string_lossy(), temp_name))
                .unwrap_or_else(|| temp_name.clone()),
        );

        let written = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp_path, path).await
        }
        .await;

        if let Err(err) = written {
            if let Err(cleanup) = fs::remove_file(&temp_path).await
                && cleanup.kind() != std::io::ErrorKind::NotFound
            {
                tracing::warn!(
                    path = %temp_path.display(),
                    error = %cleanup,
                    "Failed to remove temporary key/value file"
                );
            }
            return Err(err.into());
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for JsonFileKeyValueStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> StorageResult<()> {
        let entries = Arc::clone(&self.entries);
        let path = self.path.clone();
        let key = key.to_string();

        // Runs detached so a cancelled caller can't leave memory and disk apart.
        let write = tokio::spawn(async move {
            let mut entries = entries.lock_owned().await;
            let mut next = (*entries).clone();
            next.insert(key, value);
            Self::persist(&path, &next).await?;
            *entries = next;
            StorageResult::Ok(())
        });

        write.await.map_err(|e| {
            StorageError::Io(std::io::Error::other(format!("key/value write task failed: {e}")))
        })?
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.entries.lock().await.keys().cloned().collect())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RepoEntry {
    id: RepoId,
    name: String,
}

/// Storage backend over a [`KeyValueStore`].
pub struct KeyValueStorageAdapter {
    store: Arc<dyn KeyValueStore>,
    namespace: String,
    /// Serializes read-modify-write cycles against the host store.
    write_lock: Mutex<()>,
}

impl KeyValueStorageAdapter {
    pub fn new(store: Arc<dyn KeyValueStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn repos_key(&self) -> String {
        format!("{}.repos", self.namespace)
    }

    fn next_repo_id_key(&self) -> String {
        format!("{}.nextRepoId", self.namespace)
    }

    fn deleted_key(&self, repo_id: RepoId) -> String {
        format!("{}.deleted.{}", self.namespace, repo_id)
    }

    async fn repos(&self) -> StorageResult<BTreeMap<String, RepoEntry>> {
        match self.store.get(&self.repos_key()).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(BTreeMap::new()),
        }
    }

    async fn records(&self, repo_id: RepoId) -> StorageResult<Vec<DeletedFileRecord>> {
        match self.store.get(&self.deleted_key(repo_id)).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(Vec::new()),
        }
    }

    async fn all_records(&self) -> StorageResult<Vec<DeletedFileRecord>> {
        let mut all = Vec::new();
        for entry in self.repos().await?.values() {
            all.extend(self.records(entry.id).await?);
        }
        Ok(all)
    }
}

#[async_trait]
impl StorageAdapter for KeyValueStorageAdapter {
    async fn initialize(&self) -> StorageResult<()> {
        // Surface a corrupt layout now rather than on the first save.
        self.repos().await.map_err(|e| {
            StorageError::Init(format!("unreadable repository map in '{}': {e}", self.namespace))
        })?;
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }

    #[instrument(skip(self, name), fields(backend = "keyvalue"))]
    async fn ensure_repository(&self, path: &str, name: &str) -> StorageResult<RepoId> {
        let _guard = self.write_lock.lock().await;
        let mut repos = self.repos().await?;
        if let Some(entry) = repos.get(path) {
            return Ok(entry.id);
        }

        // The counter may lag the map if a previous write stopped halfway.
        let after_existing = repos.values().map(|e| e.id).max().unwrap_or(0) + 1;
        let id = match self.store.get(&self.next_repo_id_key()).await? {
            Some(value) => serde_json::from_value::<RepoId>(value)?.max(after_existing),
            None => after_existing,
        };
        repos.insert(
            path.to_string(),
            RepoEntry {
                id,
                name: name.to_string(),
            },
        );
        self.store
            .set(&self.repos_key(), serde_json::to_value(&repos)?)
            .await?;
        self.store
            .set(&self.next_repo_id_key(), Value::from(id + 1))
            .await?;
        Ok(id)
    }

    #[instrument(skip(self, records), fields(backend = "keyvalue", count = records.len()))]
    async fn save(&self, repo_id: RepoId, records: &[DeletedFileRecord]) -> StorageResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().await;
        let mut stored = self.records(repo_id).await?;
        let mut seen: HashSet<String> = stored.iter().map(|r| r.file_path.clone()).collect();

        let before = stored.len();
        for record in records {
            if seen.insert(record.file_path.clone()) {
                stored.push(record.as_stored());
            }
        }
        if stored.len() == before {
            return Ok(());
        }

        self.store
            .set(&self.deleted_key(repo_id), serde_json::to_value(&stored)?)
            .await
    }

    async fn load(&self, repo_id: RepoId) -> StorageResult<Vec<DeletedFileRecord>> {
        let mut records = self.records(repo_id).await?;
        for record in &mut records {
            record.is_visible = true;
        }
        records.sort_by_key(|r| r.order);
        Ok(records)
    }

    async fn query_by_repository(&self, path: &str) -> StorageResult<Vec<DeletedFileRecord>> {
        match self.repos().await?.get(path) {
            Some(entry) => self.load(entry.id).await,
            None => Ok(Vec::new()),
        }
    }

    async fn query_by_time_range(
        &self,
        start: i64,
        end: i64,
    ) -> StorageResult<Vec<DeletedFileRecord>> {
        let mut records: Vec<_> = self
            .all_records()
            .await?
            .into_iter()
            .filter(|r| r.timestamp.is_some_and(|ts| ts >= start && ts <= end))
            .collect();
        sort_newest_first(&mut records);
        Ok(records)
    }

    async fn query_recent(&self, limit: usize) -> StorageResult<Vec<DeletedFileRecord>> {
        let mut records = self.all_records().await?;
        sort_newest_first(&mut records);
        records.truncate(limit);
        Ok(records)
    }

    async fn backup(&self) -> StorageResult<Vec<u8>> {
        let prefix = format!("{}.", self.namespace);
        let mut snapshot = Map::new();
        let mut keys = self.store.keys().await?;
        keys.sort();
        for key in keys.into_iter().filter(|k| k.starts_with(&prefix)) {
            if let Some(value) = self.store.get(&key).await? {
                snapshot.insert(key, value);
            }
        }
        Ok(serde_json::to_vec(&Value::Object(snapshot))?)
    }

    async fn compact(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn stats(&self) -> StorageResult<StorageStats> {
        let repos = self.repos().await?;
        let mut deletion_count = 0u64;
        let mut oldest: Option<i64> = None;
        let mut newest: Option<i64> = None;
        for entry in repos.values() {
            for record in self.records(entry.id).await? {
                deletion_count += 1;
                if let Some(ts) = record.timestamp {
                    oldest = Some(oldest.map_or(ts, |o| o.min(ts)));
                    newest = Some(newest.map_or(ts, |n| n.max(ts)));
                }
            }
        }
        Ok(StorageStats {
            repo_count: repos.len() as u64,
            deletion_count,
            size_bytes: 0,
            oldest,
            newest,
        })
    }

    fn backend_name(&self) -> &'static str {
        "keyvalue"
    }
}
