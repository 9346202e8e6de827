use async_trait::async_trait;
use ordinal_core::{DeletedFileRecord, RepoId, StorageStats};
use ordinal_storage::{InMemoryStorageAdapter, StorageAdapter, StorageError, StorageResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Route tracing output through the test harness; `RUST_LOG` selects levels.
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Wraps the in-memory backend and records every `save` call.
#[allow(dead_code)]
#[derive(Default)]
pub struct SpyAdapter {
    inner: InMemoryStorageAdapter,
    pub saves: AtomicUsize,
    pub batches: Mutex<Vec<Vec<String>>>,
    pub fail_saves: AtomicBool,
    /// Saves that ran to the end.
    pub completed: AtomicUsize,
    save_delay: Mutex<Option<Duration>>,
}

#[allow(dead_code)]
impl SpyAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn last_batch(&self) -> Option<Vec<String>> {
        self.batches.lock().unwrap().last().cloned()
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_saves.store(failing, Ordering::SeqCst);
    }

    /// Make every save take `delay` before it reaches the backend.
    pub fn set_save_delay(&self, delay: Duration) {
        *self.save_delay.lock().unwrap() = Some(delay);
    }

    pub fn completed_count(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageAdapter for SpyAdapter {
    async fn initialize(&self) -> StorageResult<()> {
        self.inner.initialize().await
    }

    async fn close(&self) -> StorageResult<()> {
        self.inner.close().await
    }

    async fn ensure_repository(&self, path: &str, name: &str) -> StorageResult<RepoId> {
        self.inner.ensure_repository(path, name).await
    }

    async fn save(&self, repo_id: RepoId, records: &[DeletedFileRecord]) -> StorageResult<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.batches
            .lock()
            .unwrap()
            .push(records.iter().map(|r| r.file_path.clone()).collect());
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::other("disk full")));
        }
        let delay = *self.save_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.save(repo_id, records).await?;
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load(&self, repo_id: RepoId) -> StorageResult<Vec<DeletedFileRecord>> {
        self.inner.load(repo_id).await
    }

    async fn query_by_repository(&self, path: &str) -> StorageResult<Vec<DeletedFileRecord>> {
        self.inner.query_by_repository(path).await
    }

    async fn query_by_time_range(
        &self,
        start: i64,
        end: i64,
    ) -> StorageResult<Vec<DeletedFileRecord>> {
        self.inner.query_by_time_range(start, end).await
    }

    async fn query_recent(&self, limit: usize) -> StorageResult<Vec<DeletedFileRecord>> {
        self.inner.query_recent(limit).await
    }

    async fn backup(&self) -> StorageResult<Vec<u8>> {
        self.inner.backup().await
    }

    async fn compact(&self) -> StorageResult<()> {
        self.inner.compact().await
    }

    async fn stats(&self) -> StorageResult<StorageStats> {
        self.inner.stats().await
    }

    fn backend_name(&self) -> &'static str {
        "spy"
    }
}

/// Backend whose `initialize` always fails; every other call panics.
#[allow(dead_code)]
#[derive(Default)]
pub struct FailingAdapter {
    pub saves: AtomicUsize,
}

#[async_trait]
impl StorageAdapter for FailingAdapter {
    async fn initialize(&self) -> StorageResult<()> {
        Err(StorageError::Init("database is locked".to_string()))
    }

    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn ensure_repository(&self, _path: &str, _name: &str) -> StorageResult<RepoId> {
        unreachable!("ensure_repository after failed initialize")
    }

    async fn save(&self, _repo_id: RepoId, _records: &[DeletedFileRecord]) -> StorageResult<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        Err(StorageError::NotInitialized)
    }

    async fn load(&self, _repo_id: RepoId) -> StorageResult<Vec<DeletedFileRecord>> {
        unreachable!("load after failed initialize")
    }

    async fn query_by_repository(&self, _path: &str) -> StorageResult<Vec<DeletedFileRecord>> {
        Err(StorageError::NotInitialized)
    }

    async fn query_by_time_range(
        &self,
        _start: i64,
        _end: i64,
    ) -> StorageResult<Vec<DeletedFileRecord>> {
        Err(StorageError::NotInitialized)
    }

    async fn query_recent(&self, _limit: usize) -> StorageResult<Vec<DeletedFileRecord>> {
        Err(StorageError::NotInitialized)
    }

    async fn backup(&self) -> StorageResult<Vec<u8>> {
        Err(StorageError::NotInitialized)
    }

    async fn compact(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn stats(&self) -> StorageResult<StorageStats> {
        Err(StorageError::NotInitialized)
    }

    fn backend_name(&self) -> &'static str {
        "failing"
    }
}
