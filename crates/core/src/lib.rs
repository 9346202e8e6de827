//! Core domain types shared across the deleted-file ordering crates.
//!
//! This crate defines:
//! - Deleted-file records and repository identities
//! - Storage statistics reported by every backend
//! - Configuration types and the layered loader
//! - The diagnostics sink and timestamp collaborator contracts

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod models;
pub mod timestamps;

pub use config::{AppConfig, BreakerConfig, StorageConfig, TrackerConfig};
pub use diagnostics::{DiagnosticsSink, LogEntry, LogLevel, MemorySink, TracingSink};
pub use error::{CoreError, CoreResult};
pub use models::{DeletedFileRecord, RepoId, Repository, StorageStats, now_millis, sort_newest_first};
pub use timestamps::{FilesystemTimestamps, NoTimestamps, TimestampSource};

/// Quiet period after the last mutation before tracked records are flushed.
pub const DEFAULT_DEBOUNCE_MS: u64 = 5_000;

/// Attempts allowed inside one breaker window before it trips.
pub const DEFAULT_BREAKER_THRESHOLD: u32 = 10;

/// Length of the breaker's sliding attempt window.
pub const DEFAULT_BREAKER_WINDOW_SECS: u64 = 60;
