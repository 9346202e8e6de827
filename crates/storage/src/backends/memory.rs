//! In-memory storage backend.
//!
//! Same write-once semantics as the durable backends with zero I/O. Used when
//! no durable backend is configured and as the deterministic backend in tests.

use crate::error::StorageResult;
use crate::traits::StorageAdapter;
use async_trait::async_trait;
use ordinal_core::models::sort_newest_first;
use ordinal_core::{DeletedFileRecord, RepoId, Repository, StorageStats};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;

/// Serialized form produced by [`InMemoryStorageAdapter::backup`].
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot {
    repositories: Vec<Repository>,
    next_repo_id: RepoId,
    deleted: BTreeMap<RepoId, Vec<DeletedFileRecord>>,
}

#[derive(Debug)]
struct State {
    repositories: BTreeMap<String, Repository>,
    next_repo_id: RepoId,
    deleted: BTreeMap<RepoId, Vec<DeletedFileRecord>>,
    seen: BTreeMap<RepoId, HashSet<String>>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            repositories: BTreeMap::new(),
            next_repo_id: 1,
            deleted: BTreeMap::new(),
            seen: BTreeMap::new(),
        }
    }
}

/// Process-local storage backend.
#[derive(Debug, Default)]
pub struct InMemoryStorageAdapter {
    state: RwLock<State>,
}

impl InMemoryStorageAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild an adapter from the bytes returned by `backup()`.
    pub fn from_backup(bytes: &[u8]) -> StorageResult<Self> {
        let snapshot: Snapshot = serde_json::from_slice(bytes)?;
        let mut state = State {
            next_repo_id: snapshot.next_repo_id.max(1),
            ..State::default()
        };
        for repo in snapshot.repositories {
            state.repositories.insert(repo.path.clone(), repo);
        }
        for (repo_id, records) in snapshot.deleted {
            let seen = records.iter().map(|r| r.file_path.clone()).collect();
            state.seen.insert(repo_id, seen);
            state.deleted.insert(repo_id, records);
        }
        Ok(Self {
            state: RwLock::new(state),
        })
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|poisoned| {
            tracing::warn!("memory storage RwLock was poisoned, recovering with into_inner()");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|poisoned| {
            tracing::warn!("memory storage RwLock was poisoned, recovering with into_inner()");
            poisoned.into_inner()
        })
    }

    fn all_records(state: &State) -> Vec<DeletedFileRecord> {
        state
            .deleted
            .values()
            .flatten()
            .map(DeletedFileRecord::as_stored)
            .collect()
    }
}

#[async_trait]
impl StorageAdapter for InMemoryStorageAdapter {
    async fn initialize(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn ensure_repository(&self, path: &str, name: &str) -> StorageResult<RepoId> {
        let mut state = self.write();
        if let Some(repo) = state.repositories.get(path) {
            return Ok(repo.id);
        }
        let id = state.next_repo_id;
        state.next_repo_id += 1;
        state.repositories.insert(
            path.to_string(),
            Repository {
                id,
                path: path.to_string(),
                name: name.to_string(),
            },
        );
        Ok(id)
    }

    async fn save(&self, repo_id: RepoId, records: &[DeletedFileRecord]) -> StorageResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut state = self.write();
        let State { deleted, seen, .. } = &mut *state;
        let seen = seen.entry(repo_id).or_default();
        let stored = deleted.entry(repo_id).or_default();
        for record in records {
            if seen.insert(record.file_path.clone()) {
                stored.push(record.as_stored());
            }
        }
        Ok(())
    }

    async fn load(&self, repo_id: RepoId) -> StorageResult<Vec<DeletedFileRecord>> {
        let state = self.read();
        let mut records: Vec<_> = state
            .deleted
            .get(&repo_id)
            .map(|records| records.iter().map(DeletedFileRecord::as_stored).collect())
            .unwrap_or_default();
        records.sort_by_key(|r| r.order);
        Ok(records)
    }

    async fn query_by_repository(&self, path: &str) -> StorageResult<Vec<DeletedFileRecord>> {
        let repo_id = self.read().repositories.get(path).map(|repo| repo.id);
        match repo_id {
            Some(id) => self.load(id).await,
            None => Ok(Vec::new()),
        }
    }

    async fn query_by_time_range(
        &self,
        start: i64,
        end: i64,
    ) -> StorageResult<Vec<DeletedFileRecord>> {
        let mut records: Vec<_> = Self::all_records(&self.read())
            .into_iter()
            .filter(|r| r.timestamp.is_some_and(|ts| ts >= start && ts <= end))
            .collect();
        sort_newest_first(&mut records);
        Ok(records)
    }

    async fn query_recent(&self, limit: usize) -> StorageResult<Vec<DeletedFileRecord>> {
        let mut records = Self::all_records(&self.read());
        sort_newest_first(&mut records);
        records.truncate(limit);
        Ok(records)
    }

    async fn backup(&self) -> StorageResult<Vec<u8>> {
        let state = self.read();
        let snapshot = Snapshot {
            repositories: state.repositories.values().cloned().collect(),
            next_repo_id: state.next_repo_id,
            deleted: state.deleted.clone(),
        };
        Ok(serde_json::to_vec(&snapshot)?)
    }

    async fn compact(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn stats(&self) -> StorageResult<StorageStats> {
        let state = self.read();
        let timestamps = state.deleted.values().flatten().filter_map(|r| r.timestamp);
        Ok(StorageStats {
            repo_count: state.repositories.len() as u64,
            deletion_count: state.deleted.values().map(|v| v.len() as u64).sum(),
            size_bytes: 0,
            oldest: timestamps.clone().min(),
            newest: timestamps.max(),
        })
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
