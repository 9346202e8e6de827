//! Records exchanged between the order tracker and its storage backends.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Identifier assigned to a repository on first registration.
pub type RepoId = i64;

/// A file removed from a working tree, as tracked for display ordering.
///
/// `order` is assigned once per path and never changes. `is_visible` reflects
/// the change source's current view of the file and is never written to
/// storage: every backend hands records back visible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedFileRecord {
    pub file_path: String,
    pub order: u64,
    /// Deletion time in epoch milliseconds, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(skip, default = "visible")]
    pub is_visible: bool,
}

fn visible() -> bool {
    true
}

impl DeletedFileRecord {
    /// Create a visible record.
    pub fn new(file_path: impl Into<String>, order: u64, timestamp: Option<i64>) -> Self {
        Self {
            file_path: file_path.into(),
            order,
            timestamp,
            is_visible: true,
        }
    }

    /// Copy of this record with runtime-only state reset, as storage returns it.
    pub fn as_stored(&self) -> Self {
        Self {
            is_visible: true,
            ..self.clone()
        }
    }
}

/// A working tree whose deletions are tracked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub id: RepoId,
    pub path: String,
    pub name: String,
}

/// Summary reported by a storage backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    pub repo_count: u64,
    pub deletion_count: u64,
    /// On-disk footprint; zero for backends where it is not meaningful.
    pub size_bytes: u64,
    /// Earliest known deletion time (epoch ms).
    pub oldest: Option<i64>,
    /// Latest known deletion time (epoch ms).
    pub newest: Option<i64>,
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Sort records newest-first; records without a timestamp sort last.
pub fn sort_newest_first(records: &mut [DeletedFileRecord]) {
    records.sort_by(|a, b| match (a.timestamp, b.timestamp) {
        (Some(x), Some(y)) => y.cmp(&x).then(a.order.cmp(&b.order)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.order.cmp(&b.order),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visibility_is_not_serialized() {
        let mut record = DeletedFileRecord::new("/r/a.ts", 1, Some(42));
        record.is_visible = false;

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "filePath": "/r/a.ts", "order": 1, "timestamp": 42 })
        );
    }

    #[test]
    fn test_deserialized_records_are_visible() {
        let json = r#"{ "filePath": "/r/a.ts", "order": 3, "isVisible": false }"#;
        let record: DeletedFileRecord = serde_json::from_str(json).unwrap();
        assert!(record.is_visible);
        assert_eq!(record.order, 3);
        assert_eq!(record.timestamp, None);
    }

    #[test]
    fn test_sort_newest_first_puts_untimed_last() {
        let mut records = vec![
            DeletedFileRecord::new("/r/a", 1, None),
            DeletedFileRecord::new("/r/b", 2, Some(10)),
            DeletedFileRecord::new("/r/c", 3, Some(30)),
        ];
        sort_newest_first(&mut records);
        let paths: Vec<_> = records.iter().map(|r| r.file_path.as_str()).collect();
        assert_eq!(paths, vec!["/r/c", "/r/b", "/r/a"]);
    }

    #[test]
    fn test_now_millis_is_after_2020() {
        assert!(now_millis() > 1_577_836_800_000);
    }
}
