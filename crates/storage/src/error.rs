//! Storage error types.

use thiserror::Error;

/// Storage operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not start (permissions, corrupt file, bad schema).
    #[error("storage initialization failed: {0}")]
    Init(String),

    /// The backend depends on a component that is not available in this build.
    #[error("storage module unavailable: {0}")]
    ModuleUnavailable(String),

    #[error("storage used before initialize()")]
    NotInitialized,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "sqlite")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// One insert inside a save batch failed; nothing from that batch is committed.
    #[error("failed to save {path}: {source}")]
    Batch {
        path: String,
        #[source]
        source: Box<StorageError>,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl StorageError {
    /// Whether the caller should pick another backend rather than retry this one.
    pub fn is_module_unavailable(&self) -> bool {
        matches!(self, StorageError::ModuleUnavailable(_))
    }

    /// Whether the error happened before the backend became usable.
    pub fn is_init(&self) -> bool {
        matches!(
            self,
            StorageError::Init(_) | StorageError::ModuleUnavailable(_) | StorageError::NotInitialized
        )
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
