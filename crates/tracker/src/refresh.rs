//! Glue between the change source, the breaker and the tracker.

use crate::circuit_breaker::{CircuitBreaker, SinkNotifier};
use crate::tracker::{DeletedFileOrderTracker, SyncSummary};
use ordinal_core::{AppConfig, DiagnosticsSink, FilesystemTimestamps, TimestampSource};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The breaker is open; nothing was touched.
    Blocked,
    Applied(SyncSummary),
}

/// Applies each refresh of the deleted-path set to a tracker.
pub struct RefreshCoordinator {
    workspace_root: PathBuf,
    tracker: Arc<DeletedFileOrderTracker>,
    breaker: Arc<CircuitBreaker>,
    timestamps: Arc<dyn TimestampSource>,
    sink: Arc<dyn DiagnosticsSink>,
}

impl RefreshCoordinator {
    pub fn new(
        workspace_root: impl Into<PathBuf>,
        tracker: Arc<DeletedFileOrderTracker>,
        breaker: Arc<CircuitBreaker>,
        timestamps: Arc<dyn TimestampSource>,
        sink: Arc<dyn DiagnosticsSink>,
    ) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            tracker,
            breaker,
            timestamps,
            sink,
        }
    }

    /// Wire a tracker and breaker for `workspace_root` from `config`.
    ///
    /// The returned tracker is already initialized.
    pub async fn from_config(
        workspace_root: impl Into<PathBuf>,
        repo_name: impl Into<String>,
        config: &AppConfig,
        sink: Arc<dyn DiagnosticsSink>,
    ) -> Self {
        let workspace_root = workspace_root.into();
        let tracker = DeletedFileOrderTracker::from_config(
            workspace_root.to_string_lossy(),
            repo_name,
            config,
            sink.clone(),
        )
        .await;
        tracker.initialize().await;

        let breaker = CircuitBreaker::from_config(
            "Deleted files view",
            &config.circuit_breaker,
            SinkNotifier::new(sink.clone()),
        );
        Self::new(
            workspace_root,
            Arc::new(tracker),
            Arc::new(breaker),
            Arc::new(FilesystemTimestamps),
            sink,
        )
    }

    pub fn tracker(&self) -> &Arc<DeletedFileOrderTracker> {
        &self.tracker
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Reconcile the tracker with the paths currently deleted.
    ///
    /// Timestamps are only looked up for paths that are new or coming back
    /// into view.
    pub fn refresh<I, P>(&self, deleted_paths: I) -> RefreshOutcome
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        if !self.breaker.can_proceed() {
            self.sink.debug(
                "Refresh skipped, circuit breaker open",
                Some(&json!({ "workspace": self.workspace_root.display().to_string() })),
            );
            return RefreshOutcome::Blocked;
        }

        let deleted: Vec<(String, Option<i64>)> = deleted_paths
            .into_iter()
            .map(|path| {
                let path: String = path.into();
                let timestamp = if self.tracker.is_visible(&path) {
                    None
                } else {
                    self.timestamps
                        .lookup(&self.workspace_root, Path::new(&path))
                };
                (path, timestamp)
            })
            .collect();

        let summary = self.tracker.sync_visible(deleted);
        tracing::debug!(
            marked = summary.marked,
            new = summary.newly_tracked,
            hidden = summary.hidden,
            "Deleted files refreshed"
        );
        RefreshOutcome::Applied(summary)
    }

    /// Clear the breaker after the user reloads the view.
    pub fn resume(&self) {
        self.breaker.reset();
    }
}
