//! Stable ordering of deleted files for review interfaces.
//!
//! A deleted path receives a monotonically increasing order the first time it
//! is seen. That order survives restores, re-deletions and restarts.

pub mod circuit_breaker;
pub mod refresh;
pub mod tracker;

pub use circuit_breaker::{BreakerStatus, CircuitBreaker, SinkNotifier, UserNotifier};
pub use refresh::{RefreshCoordinator, RefreshOutcome};
pub use tracker::{DEFAULT_DEBOUNCE, DeletedFileOrderTracker, SyncSummary};
