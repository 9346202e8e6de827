//! Best-effort deletion timestamp lookup.
//!
//! Absence of a timestamp is a normal outcome, not a transient failure.

use std::path::Path;
use std::time::UNIX_EPOCH;

/// Resolves an advisory timestamp (epoch ms) for a file inside a workspace.
pub trait TimestampSource: Send + Sync {
    fn lookup(&self, workspace_root: &Path, file_path: &Path) -> Option<i64>;
}

/// Never knows a timestamp.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTimestamps;

impl TimestampSource for NoTimestamps {
    fn lookup(&self, _workspace_root: &Path, _file_path: &Path) -> Option<i64> {
        None
    }
}

/// Reads the modification time from the filesystem.
///
/// Relative paths are resolved against the workspace root. A file that no
/// longer exists yields `None`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilesystemTimestamps;

impl TimestampSource for FilesystemTimestamps {
    fn lookup(&self, workspace_root: &Path, file_path: &Path) -> Option<i64> {
        let path = if file_path.is_absolute() {
            file_path.to_path_buf()
        } else {
            workspace_root.join(file_path)
        };
        let modified = std::fs::metadata(path).ok()?.modified().ok()?;
        let millis = modified.duration_since(UNIX_EPOCH).ok()?.as_millis();
        i64::try_from(millis).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filesystem_timestamps_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"x").unwrap();

        let ts = FilesystemTimestamps.lookup(dir.path(), Path::new("a.txt"));
        assert!(ts.is_some_and(|ms| ms > 0));
    }

    #[test]
    fn test_filesystem_timestamps_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone.txt");
        assert_eq!(FilesystemTimestamps.lookup(dir.path(), &missing), None);
    }

    #[test]
    fn test_no_timestamps() {
        assert_eq!(NoTimestamps.lookup(Path::new("/"), Path::new("/a")), None);
    }
}
