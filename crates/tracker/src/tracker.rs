//! Deleted-file order tracker.
//!
//! The in-memory map is the source of truth. Storage is a mirror written on a
//! debounce timer with full snapshots, which the backends' write-once `save`
//! makes cheap to repeat.

use ordinal_core::{AppConfig, DeletedFileRecord, DiagnosticsSink, RepoId};
use ordinal_storage::{StorageAdapter, StorageResult};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Default quiet period before tracked records are written.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(ordinal_core::DEFAULT_DEBOUNCE_MS);

#[derive(Debug)]
struct TrackerState {
    files: HashMap<String, DeletedFileRecord>,
    next_order: u64,
}

impl Default for TrackerState {
    fn default() -> Self {
        Self {
            files: HashMap::new(),
            next_order: 1,
        }
    }
}

impl TrackerState {
    fn mark(&mut self, file_path: &str, timestamp: Option<i64>) -> u64 {
        if let Some(record) = self.files.get_mut(file_path) {
            record.is_visible = true;
            if timestamp.is_some() {
                record.timestamp = timestamp;
            }
            return record.order;
        }
        let order = self.next_order;
        self.next_order += 1;
        self.files.insert(
            file_path.to_string(),
            DeletedFileRecord::new(file_path, order, timestamp),
        );
        order
    }

    /// Fold records loaded from storage into the map.
    ///
    /// Stored orders win. Paths tracked only in memory are renumbered after the
    /// highest stored order, keeping their relative order. Returns how many
    /// paths are not yet in storage.
    fn merge_stored(&mut self, stored: Vec<DeletedFileRecord>) -> usize {
        let mut local: Vec<_> = self.files.drain().map(|(_, record)| record).collect();
        local.sort_by_key(|r| r.order);

        let mut next_order = stored.iter().map(|r| r.order).max().unwrap_or(0) + 1;
        for record in stored {
            self.files
                .insert(record.file_path.clone(), record.as_stored());
        }

        let mut unsaved = 0;
        for mut record in local {
            match self.files.get_mut(&record.file_path) {
                Some(existing) => {
                    existing.is_visible = record.is_visible;
                    if record.timestamp.is_some() {
                        existing.timestamp = record.timestamp;
                    }
                }
                None => {
                    record.order = next_order;
                    next_order += 1;
                    unsaved += 1;
                    self.files.insert(record.file_path.clone(), record);
                }
            }
        }
        self.next_order = next_order;
        unsaved
    }

    fn sorted(&self, visible_only: bool) -> Vec<DeletedFileRecord> {
        let mut records: Vec<_> = self
            .files
            .values()
            .filter(|r| !visible_only || r.is_visible)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.order);
        records
    }
}

#[derive(Clone)]
struct StorageBinding {
    storage: Arc<dyn StorageAdapter>,
    /// Set once `initialize()` registered the repository.
    repo_id: Option<RepoId>,
}

struct Inner {
    repo_path: String,
    repo_name: String,
    state: Mutex<TrackerState>,
    binding: RwLock<Option<StorageBinding>>,
    /// Debounce timer that has not fired yet.
    pending_flush: Mutex<Option<JoinHandle<()>>>,
    /// One save at a time, so a later flush waits for the one in flight.
    flush_lock: tokio::sync::Mutex<()>,
    sink: Arc<dyn DiagnosticsSink>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("tracker state Mutex was poisoned, recovering with into_inner()");
            poisoned.into_inner()
        })
    }

    fn pending(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.pending_flush
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn binding(&self) -> Option<StorageBinding> {
        self.binding
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_binding(&self, binding: Option<StorageBinding>) {
        *self
            .binding
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = binding;
    }

    async fn flush(&self) -> StorageResult<()> {
        let Some(StorageBinding {
            storage,
            repo_id: Some(repo_id),
        }) = self.binding()
        else {
            return Ok(());
        };

        let _saving = self.flush_lock.lock().await;
        let snapshot = self.state().sorted(false);
        if snapshot.is_empty() {
            return Ok(());
        }
        storage.save(repo_id, &snapshot).await
    }

    /// Flush, logging instead of returning failures. Retried by the next flush.
    async fn flush_logged(&self, reason: &str) {
        if let Err(e) = self.flush().await {
            self.sink.warn(
                "Failed to persist deleted file order",
                Some(&json!({
                    "repository": self.repo_path,
                    "reason": reason,
                    "error": e.to_string(),
                })),
            );
        }
    }
}

/// Result of reconciling one refresh from the change source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Paths reported deleted in this refresh.
    pub marked: usize,
    /// Of those, paths seen for the first time.
    pub newly_tracked: usize,
    /// Previously visible paths hidden because they are no longer deleted.
    pub hidden: usize,
}

/// Assigns stable display orders to deleted files of one repository.
pub struct DeletedFileOrderTracker {
    inner: Arc<Inner>,
    debounce: Duration,
}

impl DeletedFileOrderTracker {
    /// Tracker that keeps everything in memory.
    pub fn new(
        repo_path: impl Into<String>,
        repo_name: impl Into<String>,
        sink: Arc<dyn DiagnosticsSink>,
    ) -> Self {
        Self::build(repo_path.into(), repo_name.into(), None, sink)
    }

    /// Tracker mirroring its records to `storage` once initialized.
    pub fn with_storage(
        repo_path: impl Into<String>,
        repo_name: impl Into<String>,
        storage: Arc<dyn StorageAdapter>,
        sink: Arc<dyn DiagnosticsSink>,
    ) -> Self {
        let binding = StorageBinding {
            storage,
            repo_id: None,
        };
        Self::build(repo_path.into(), repo_name.into(), Some(binding), sink)
    }

    /// Tracker using the first storage backend from `config` that starts.
    pub async fn from_config(
        repo_path: impl Into<String>,
        repo_name: impl Into<String>,
        config: &AppConfig,
        sink: Arc<dyn DiagnosticsSink>,
    ) -> Self {
        let storage = ordinal_storage::open_with_fallback(&config.storage_chain(), sink.clone()).await;
        Self::with_storage(repo_path, repo_name, storage, sink).with_debounce(config.tracker.debounce())
    }

    fn build(
        repo_path: String,
        repo_name: String,
        binding: Option<StorageBinding>,
        sink: Arc<dyn DiagnosticsSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                repo_path,
                repo_name,
                state: Mutex::new(TrackerState::default()),
                binding: RwLock::new(binding),
                pending_flush: Mutex::new(None),
                flush_lock: tokio::sync::Mutex::new(()),
                sink,
            }),
            debounce: DEFAULT_DEBOUNCE,
        }
    }

    /// Override the quiet period before a debounced flush.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Repository path this tracker is bound to.
    pub fn repository(&self) -> &str {
        &self.inner.repo_path
    }

    /// Whether records are still being mirrored to storage.
    pub fn is_persistent(&self) -> bool {
        self.inner.binding().is_some()
    }

    /// Load previously persisted records.
    ///
    /// Call before the first mark. Paths marked earlier and absent from
    /// storage are renumbered after the stored ones.
    ///
    /// Never fails: any storage error is logged and the tracker continues in
    /// memory only for the rest of its life.
    pub async fn initialize(&self) {
        let Some(binding) = self.inner.binding() else {
            return;
        };
        let storage = binding.storage;

        let loaded = async {
            storage.initialize().await?;
            let repo_id = storage
                .ensure_repository(&self.inner.repo_path, &self.inner.repo_name)
                .await?;
            let records = storage.load(repo_id).await?;
            StorageResult::Ok((repo_id, records))
        }
        .await;

        match loaded {
            Ok((repo_id, records)) => {
                let count = records.len();
                let unsaved = self.inner.state().merge_stored(records);
                self.inner.set_binding(Some(StorageBinding {
                    storage: storage.clone(),
                    repo_id: Some(repo_id),
                }));
                self.inner.sink.debug(
                    "Loaded deleted file order",
                    Some(&json!({
                        "repository": self.inner.repo_path,
                        "backend": storage.backend_name(),
                        "records": count,
                        "unsaved": unsaved,
                    })),
                );
                if unsaved > 0 {
                    self.schedule_save();
                }
            }
            Err(e) => {
                self.inner.set_binding(None);
                self.inner.sink.warn(
                    "Deleted file storage unavailable, continuing in memory only",
                    Some(&json!({
                        "repository": self.inner.repo_path,
                        "backend": storage.backend_name(),
                        "error": e.to_string(),
                    })),
                );
            }
        }
    }

    /// Track `file_path` as deleted and return its order.
    ///
    /// A path seen before keeps its order and becomes visible again; a new
    /// timestamp replaces the old one in memory.
    pub fn mark_as_deleted(&self, file_path: &str, timestamp: Option<i64>) -> u64 {
        let order = self.inner.state().mark(file_path, timestamp);
        self.schedule_save();
        order
    }

    /// Hide a tracked path. Visibility is never persisted, so nothing is scheduled.
    pub fn hide_from_view(&self, file_path: &str) {
        if let Some(record) = self.inner.state().files.get_mut(file_path) {
            record.is_visible = false;
        }
    }

    /// Reconcile with the full set of currently deleted paths.
    ///
    /// Every listed path is marked deleted; every visible tracked path not
    /// listed is hidden. Schedules at most one save.
    pub fn sync_visible<I, P>(&self, deleted: I) -> SyncSummary
    where
        I: IntoIterator<Item = (P, Option<i64>)>,
        P: Into<String>,
    {
        let mut summary = SyncSummary::default();
        {
            let mut state = self.inner.state();
            let mut current = HashSet::new();
            for (path, timestamp) in deleted {
                let path = path.into();
                if !state.files.contains_key(&path) {
                    summary.newly_tracked += 1;
                }
                state.mark(&path, timestamp);
                current.insert(path);
            }
            summary.marked = current.len();

            for (path, record) in state.files.iter_mut() {
                if record.is_visible && !current.contains(path) {
                    record.is_visible = false;
                    summary.hidden += 1;
                }
            }
        }
        if summary.marked > 0 {
            self.schedule_save();
        }
        summary
    }

    pub fn get_order(&self, file_path: &str) -> Option<u64> {
        self.inner.state().files.get(file_path).map(|r| r.order)
    }

    pub fn has_file(&self, file_path: &str) -> bool {
        self.inner.state().files.contains_key(file_path)
    }

    /// Whether a tracked path is currently shown.
    pub fn is_visible(&self, file_path: &str) -> bool {
        self.inner
            .state()
            .files
            .get(file_path)
            .is_some_and(|r| r.is_visible)
    }

    /// Visible records, ascending by order.
    pub fn get_visible_deleted_files(&self) -> Vec<DeletedFileRecord> {
        self.inner.state().sorted(true)
    }

    /// Every tracked record regardless of visibility, ascending by order.
    pub fn get_all_deleted_files(&self) -> Vec<DeletedFileRecord> {
        self.inner.state().sorted(false)
    }

    pub fn get_total_count(&self) -> usize {
        self.inner.state().files.len()
    }

    /// Forget everything and restart numbering at 1. Storage is untouched.
    pub fn clear(&self) {
        self.cancel_pending();
        *self.inner.state() = TrackerState::default();
    }

    /// Write all tracked records now and report the outcome.
    pub async fn flush(&self) -> StorageResult<()> {
        self.inner.flush().await
    }

    /// Cancel any pending debounced flush and write once more. Never fails.
    ///
    /// A debounced save already running is not interrupted; the final write
    /// waits for it.
    pub async fn dispose(&self) {
        self.cancel_pending();
        self.inner.flush_logged("dispose").await;
    }

    fn cancel_pending(&self) {
        if let Some(handle) = self.inner.pending().take() {
            handle.abort();
        }
    }

    /// Restart the debounce timer. Only the sleep is ever aborted: once it
    /// fires, the save runs in its own task.
    fn schedule_save(&self) {
        if self.inner.binding().is_none() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.inner.sink.debug(
                "No async runtime, deferring save to the next flush",
                Some(&json!({ "repository": self.inner.repo_path })),
            );
            return;
        };

        let inner = Arc::clone(&self.inner);
        let debounce = self.debounce;
        let mut pending = self.inner.pending();
        if let Some(previous) = pending.take() {
            previous.abort();
        }
        *pending = Some(runtime.spawn(async move {
            tokio::time::sleep(debounce).await;
            tokio::spawn(async move {
                inner.flush_logged("debounce").await;
            });
        }));
    }
}

impl Drop for DeletedFileOrderTracker {
    fn drop(&mut self) {
        // Can't flush from Drop. A save already in flight finishes on its own.
        if let Some(handle) = self.inner.pending().take()
            && !handle.is_finished()
        {
            handle.abort();
            tracing::debug!(
                repository = %self.inner.repo_path,
                "Tracker dropped without dispose(), pending flush cancelled"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ordinal_core::MemorySink;

    fn tracker() -> DeletedFileOrderTracker {
        DeletedFileOrderTracker::new("/r", "r", MemorySink::new())
    }

    #[test]
    fn test_hidden_files_keep_their_order() {
        let tracker = tracker();
        assert_eq!(tracker.mark_as_deleted("/r/a.ts", None), 1);
        assert_eq!(tracker.mark_as_deleted("/r/b.ts", None), 2);
        tracker.hide_from_view("/r/a.ts");

        let visible = tracker.get_visible_deleted_files();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].file_path, "/r/b.ts");
        assert_eq!(visible[0].order, 2);

        let all: Vec<_> = tracker
            .get_all_deleted_files()
            .into_iter()
            .map(|r| (r.file_path, r.order))
            .collect();
        assert_eq!(
            all,
            vec![("/r/a.ts".to_string(), 1), ("/r/b.ts".to_string(), 2)]
        );
    }

    #[test]
    fn test_order_stable_across_restore_cycles() {
        let tracker = tracker();
        tracker.mark_as_deleted("/r/x", None);
        let order = tracker.mark_as_deleted("/r/a", None);
        for _ in 0..3 {
            tracker.hide_from_view("/r/a");
            assert_eq!(tracker.get_order("/r/a"), Some(order));
            assert_eq!(tracker.mark_as_deleted("/r/a", None), order);
            assert_eq!(tracker.get_order("/r/a"), Some(order));
        }
        assert_eq!(tracker.get_total_count(), 2);
    }

    #[test]
    fn test_orders_are_dense_from_one() {
        let tracker = tracker();
        let orders: Vec<u64> = (0..50)
            .map(|i| tracker.mark_as_deleted(&format!("/r/{i}"), None))
            .collect();
        assert_eq!(orders, (1..=50).collect::<Vec<_>>());
    }

    #[test]
    fn test_redeletion_refreshes_timestamp_only_when_given() {
        let tracker = tracker();
        tracker.mark_as_deleted("/r/a", Some(10));
        tracker.mark_as_deleted("/r/a", None);
        assert_eq!(tracker.get_all_deleted_files()[0].timestamp, Some(10));
        tracker.mark_as_deleted("/r/a", Some(20));
        assert_eq!(tracker.get_all_deleted_files()[0].timestamp, Some(20));
    }

    #[test]
    fn test_hide_untracked_is_noop() {
        let tracker = tracker();
        tracker.hide_from_view("/r/never");
        assert!(!tracker.has_file("/r/never"));
        assert_eq!(tracker.get_total_count(), 0);
    }

    #[test]
    fn test_merge_prefers_stored_orders() {
        let mut state = TrackerState::default();
        state.mark("/r/b", None);
        state.mark("/r/a", Some(50));
        state.mark("/r/d", None);
        state.files.get_mut("/r/a").unwrap().is_visible = false;

        let unsaved = state.merge_stored(vec![
            DeletedFileRecord::new("/r/a", 1, Some(10)),
            DeletedFileRecord::new("/r/c", 2, None),
        ]);

        assert_eq!(unsaved, 2);
        let orders: Vec<_> = state
            .sorted(false)
            .into_iter()
            .map(|r| (r.file_path, r.order))
            .collect();
        assert_eq!(
            orders,
            vec![
                ("/r/a".to_string(), 1),
                ("/r/c".to_string(), 2),
                ("/r/b".to_string(), 3),
                ("/r/d".to_string(), 4),
            ]
        );
        let a = &state.files["/r/a"];
        assert!(!a.is_visible);
        assert_eq!(a.timestamp, Some(50));
        assert_eq!(state.next_order, 5);
    }

    #[test]
    fn test_clear_resets_counter() {
        let tracker = tracker();
        tracker.mark_as_deleted("/r/a", None);
        tracker.mark_as_deleted("/r/b", None);
        tracker.clear();
        assert_eq!(tracker.get_total_count(), 0);
        assert_eq!(tracker.get_order("/r/a"), None);
        assert_eq!(tracker.mark_as_deleted("/r/c", None), 1);
    }

    #[test]
    fn test_sync_visible_hides_restored_files() {
        let tracker = tracker();
        let summary = tracker.sync_visible([("/r/a", None), ("/r/b", Some(5))]);
        assert_eq!(
            summary,
            SyncSummary {
                marked: 2,
                newly_tracked: 2,
                hidden: 0
            }
        );

        let summary = tracker.sync_visible([("/r/b", None), ("/r/c", None)]);
        assert_eq!(summary.marked, 2);
        assert_eq!(summary.newly_tracked, 1);
        assert_eq!(summary.hidden, 1);
        assert!(!tracker.is_visible("/r/a"));
        assert_eq!(tracker.get_order("/r/c"), Some(3));

        let summary = tracker.sync_visible(Vec::<(String, Option<i64>)>::new());
        assert_eq!(summary.hidden, 2);
        assert!(tracker.get_visible_deleted_files().is_empty());
        assert_eq!(tracker.get_total_count(), 3);
    }

    #[tokio::test]
    async fn test_memory_only_tracker_flush_is_noop() {
        let tracker = tracker();
        tracker.mark_as_deleted("/r/a", None);
        tracker.initialize().await;
        assert!(!tracker.is_persistent());
        tracker.flush().await.unwrap();
        tracker.dispose().await;
        assert_eq!(tracker.get_order("/r/a"), Some(1));
    }
}
