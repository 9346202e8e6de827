//! Storage backend implementations.

pub mod kv;
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;
