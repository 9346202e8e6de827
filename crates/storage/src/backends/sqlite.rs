//! SQLite durable log backend.
//!
//! Stores deletions as an append-only audit log. Write-once is enforced by the
//! schema itself: `UNIQUE(repo_id, file_path)` plus `INSERT OR IGNORE`.

use crate::error::{StorageError, StorageResult};
use crate::traits::StorageAdapter;
use async_trait::async_trait;
use ordinal_core::{DeletedFileRecord, DiagnosticsSink, RepoId, StorageStats, now_millis};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{FromRow, Pool, Sqlite};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::instrument;
use uuid::Uuid;

/// Path that selects an ephemeral in-memory database.
pub const IN_MEMORY_PATH: &str = ":memory:";

#[derive(Debug, FromRow)]
struct DeletedFileRow {
    file_path: String,
    order_num: i64,
    deletion_time: Option<i64>,
}

impl TryFrom<DeletedFileRow> for DeletedFileRecord {
    type Error = StorageError;

    fn try_from(row: DeletedFileRow) -> StorageResult<Self> {
        let order = u64::try_from(row.order_num)
            .ok()
            .filter(|order| *order > 0)
            .ok_or_else(|| {
                StorageError::Database(sqlx::Error::Decode(
                    format!("invalid order_num {} for {}", row.order_num, row.file_path).into(),
                ))
            })?;
        Ok(DeletedFileRecord::new(row.file_path, order, row.deletion_time))
    }
}

fn into_records(rows: Vec<DeletedFileRow>) -> StorageResult<Vec<DeletedFileRecord>> {
    rows.into_iter().map(DeletedFileRecord::try_from).collect()
}

/// SQLite-backed write-once log.
pub struct SqliteStorageAdapter {
    path: PathBuf,
    pool: RwLock<Option<Pool<Sqlite>>>,
    sink: Arc<dyn DiagnosticsSink>,
}

impl SqliteStorageAdapter {
    /// Create an adapter for the database at `path`. Nothing is opened until `initialize()`.
    pub fn new(path: impl AsRef<Path>, sink: Arc<dyn DiagnosticsSink>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            pool: RwLock::new(None),
            sink,
        }
    }

    /// Create and initialize in one step.
    pub async fn open(
        path: impl AsRef<Path>,
        sink: Arc<dyn DiagnosticsSink>,
    ) -> StorageResult<Self> {
        let adapter = Self::new(path, sink);
        adapter.initialize().await?;
        Ok(adapter)
    }

    fn is_in_memory(&self) -> bool {
        self.path.as_os_str() == IN_MEMORY_PATH
    }

    /// Database file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Connection pool, once initialized.
    pub fn pool(&self) -> StorageResult<Pool<Sqlite>> {
        self.pool
            .read()
            .unwrap_or_else(|poisoned| {
                tracing::warn!("sqlite pool RwLock was poisoned, recovering with into_inner()");
                poisoned.into_inner()
            })
            .clone()
            .ok_or(StorageError::NotInitialized)
    }

    async fn connect(&self) -> StorageResult<Pool<Sqlite>> {
        let base = if self.is_in_memory() {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            SqliteConnectOptions::new()
                .filename(&self.path)
                .create_if_missing(true)
        };
        let opts = base
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            // A diagnostic reader and the tracker's writer may overlap briefly.
            .busy_timeout(Duration::from_secs(5));

        // An in-memory database lives and dies with its single connection.
        let max_connections = if self.is_in_memory() { 1 } else { 4 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;
        Ok(pool)
    }

    async fn migrate(pool: &Pool<Sqlite>) -> StorageResult<()> {
        sqlx::query(SCHEMA_SQL).execute(pool).await?;
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for SqliteStorageAdapter {
    #[instrument(skip(self), fields(backend = "sqlite", path = %self.path.display()))]
    async fn initialize(&self) -> StorageResult<()> {
        if self.pool().is_ok() {
            return Ok(());
        }

        let pool = self.connect().await.map_err(|e| {
            StorageError::Init(format!("failed to open {}: {e}", self.path.display()))
        })?;
        if let Err(e) = Self::migrate(&pool).await {
            pool.close().await;
            return Err(StorageError::Init(format!(
                "failed to prepare schema in {}: {e}",
                self.path.display()
            )));
        }

        let stale = {
            let mut slot = self.pool.write().unwrap_or_else(|poisoned| {
                tracing::warn!("sqlite pool RwLock was poisoned, recovering with into_inner()");
                poisoned.into_inner()
            });
            match *slot {
                Some(_) => Some(pool),
                None => {
                    *slot = Some(pool);
                    None
                }
            }
        };
        match stale {
            // Lost a race with a concurrent initialize(); keep the winner's pool.
            Some(pool) => pool.close().await,
            None => self.sink.debug(
                "Durable deletion log ready",
                Some(&serde_json::json!({ "path": self.path.display().to_string() })),
            ),
        }
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        let pool = self
            .pool
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(pool) = pool {
            pool.close().await;
        }
        Ok(())
    }

    #[instrument(skip(self, name), fields(backend = "sqlite"))]
    async fn ensure_repository(&self, path: &str, name: &str) -> StorageResult<RepoId> {
        let pool = self.pool()?;
        sqlx::query("INSERT OR IGNORE INTO repositories (path, name, first_seen) VALUES (?, ?, ?)")
            .bind(path)
            .bind(name)
            .bind(now_millis())
            .execute(&pool)
            .await?;
        let id: i64 = sqlx::query_scalar("SELECT id FROM repositories WHERE path = ?")
            .bind(path)
            .fetch_one(&pool)
            .await?;
        Ok(id)
    }

    #[instrument(skip(self, records), fields(backend = "sqlite", count = records.len()))]
    async fn save(&self, repo_id: RepoId, records: &[DeletedFileRecord]) -> StorageResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let pool = self.pool()?;

        // One transaction per batch: either every insert-or-ignore lands or none do.
        let mut tx = pool.begin().await?;
        for record in records {
            let order = i64::try_from(record.order).map_err(|_| StorageError::Batch {
                path: record.file_path.clone(),
                source: Box::new(StorageError::Config(format!(
                    "order {} out of range",
                    record.order
                ))),
            })?;
            sqlx::query(
                "INSERT OR IGNORE INTO deleted_files (repo_id, file_path, order_num, deletion_time) VALUES (?, ?, ?, ?)",
            )
            .bind(repo_id)
            .bind(&record.file_path)
            .bind(order)
            .bind(record.timestamp)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::Batch {
                path: record.file_path.clone(),
                source: Box::new(e.into()),
            })?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn load(&self, repo_id: RepoId) -> StorageResult<Vec<DeletedFileRecord>> {
        let rows = sqlx::query_as::<_, DeletedFileRow>(
            "SELECT file_path, order_num, deletion_time FROM deleted_files WHERE repo_id = ? ORDER BY order_num ASC",
        )
        .bind(repo_id)
        .fetch_all(&self.pool()?)
        .await?;
        into_records(rows)
    }

    async fn query_by_repository(&self, path: &str) -> StorageResult<Vec<DeletedFileRecord>> {
        let rows = sqlx::query_as::<_, DeletedFileRow>(
            r#"
            SELECT d.file_path, d.order_num, d.deletion_time
            FROM deleted_files d
            JOIN repositories r ON r.id = d.repo_id
            WHERE r.path = ?
            ORDER BY d.order_num ASC
            "#,
        )
        .bind(path)
        .fetch_all(&self.pool()?)
        .await?;
        into_records(rows)
    }

    async fn query_by_time_range(
        &self,
        start: i64,
        end: i64,
    ) -> StorageResult<Vec<DeletedFileRecord>> {
        let rows = sqlx::query_as::<_, DeletedFileRow>(
            r#"
            SELECT file_path, order_num, deletion_time
            FROM deleted_files
            WHERE deletion_time BETWEEN ? AND ?
            ORDER BY deletion_time DESC, order_num ASC
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool()?)
        .await?;
        into_records(rows)
    }

    async fn query_recent(&self, limit: usize) -> StorageResult<Vec<DeletedFileRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, DeletedFileRow>(
            r#"
            SELECT file_path, order_num, deletion_time
            FROM deleted_files
            ORDER BY deletion_time IS NULL, deletion_time DESC, order_num ASC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool()?)
        .await?;
        into_records(rows)
    }

    /// Consistent copy of the database file (`VACUUM INTO`), WAL contents included.
    #[instrument(skip(self), fields(backend = "sqlite"))]
    async fn backup(&self) -> StorageResult<Vec<u8>> {
        let pool = self.pool()?;
        if !self.is_in_memory() {
            sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
                .execute(&pool)
                .await?;
        }

        let target = std::env::temp_dir().join(format!("ordinal-backup-{}.db", Uuid::new_v4()));
        sqlx::query("VACUUM INTO ?")
            .bind(target.to_string_lossy().into_owned())
            .execute(&pool)
            .await?;

        let bytes = tokio::fs::read(&target).await;
        if let Err(e) = tokio::fs::remove_file(&target).await {
            self.sink.warn(
                "Failed to remove temporary backup file",
                Some(&serde_json::json!({
                    "path": target.display().to_string(),
                    "error": e.to_string(),
                })),
            );
        }
        Ok(bytes?)
    }

    async fn compact(&self) -> StorageResult<()> {
        let pool = self.pool()?;
        sqlx::query("VACUUM").execute(&pool).await?;
        if !self.is_in_memory() {
            sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
                .execute(&pool)
                .await?;
        }
        Ok(())
    }

    async fn stats(&self) -> StorageResult<StorageStats> {
        let pool = self.pool()?;
        let repo_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM repositories")
            .fetch_one(&pool)
            .await?;
        let deletion_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM deleted_files")
            .fetch_one(&pool)
            .await?;
        let size_bytes: i64 = sqlx::query_scalar(
            "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
        )
        .fetch_one(&pool)
        .await?;
        let (oldest, newest): (Option<i64>, Option<i64>) =
            sqlx::query_as("SELECT MIN(deletion_time), MAX(deletion_time) FROM deleted_files")
                .fetch_one(&pool)
                .await?;

        Ok(StorageStats {
            repo_count: repo_count as u64,
            deletion_count: deletion_count as u64,
            size_bytes: size_bytes as u64,
            oldest,
            newest,
        })
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS repositories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    first_seen INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS deleted_files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repo_id INTEGER NOT NULL REFERENCES repositories(id),
    file_path TEXT NOT NULL,
    order_num INTEGER NOT NULL,
    deletion_time INTEGER,
    UNIQUE(repo_id, file_path)
);
CREATE INDEX IF NOT EXISTS idx_deletion_time ON deleted_files(deletion_time DESC);
CREATE INDEX IF NOT EXISTS idx_repo_order ON deleted_files(repo_id, order_num);
"#;
