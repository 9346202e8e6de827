//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use ordinal_core::{DeletedFileRecord, RepoId, StorageStats};

/// Persistence capability every deleted-file backend provides.
///
/// The order tracker is the only writer. Backends mirror what they are given
/// and never modify the records handed to them.
///
/// `save` is write-once: a record whose `(repo_id, file_path)` is already
/// stored is skipped silently, so callers may resend full snapshots.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Prepare the backend. Calling it again on a ready backend is a no-op.
    async fn initialize(&self) -> StorageResult<()>;

    /// Flush and release resources. Idempotent.
    async fn close(&self) -> StorageResult<()>;

    /// Return the id for `path`, registering it on first use.
    async fn ensure_repository(&self, path: &str, name: &str) -> StorageResult<RepoId>;

    /// Insert records not yet stored for this repository; skip the rest.
    async fn save(&self, repo_id: RepoId, records: &[DeletedFileRecord]) -> StorageResult<()>;

    /// All records for a repository, ascending by order, all visible.
    async fn load(&self, repo_id: RepoId) -> StorageResult<Vec<DeletedFileRecord>>;

    /// Records for the repository registered at `path`; empty if unknown.
    async fn query_by_repository(&self, path: &str) -> StorageResult<Vec<DeletedFileRecord>>;

    /// Records with a deletion time in `[start, end]`, newest first.
    async fn query_by_time_range(&self, start: i64, end: i64)
    -> StorageResult<Vec<DeletedFileRecord>>;

    /// At most `limit` records across repositories, newest first.
    async fn query_recent(&self, limit: usize) -> StorageResult<Vec<DeletedFileRecord>>;

    /// Self-contained snapshot of all state.
    async fn backup(&self) -> StorageResult<Vec<u8>>;

    /// Reclaim wasted space. Safe to call at any time.
    async fn compact(&self) -> StorageResult<()>;

    async fn stats(&self) -> StorageResult<StorageStats>;

    /// Static identifier for logs (e.g. "sqlite", "memory").
    fn backend_name(&self) -> &'static str;
}
