//! Durable log behavior across reopen and backup, plus batch atomicity.
#![cfg(feature = "sqlite")]

use ordinal_core::{DeletedFileRecord, TracingSink};
use ordinal_storage::{SqliteStorageAdapter, StorageAdapter, StorageError};

#[tokio::test]
async fn test_records_survive_reopen() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("log.db");

    let repo = {
        let storage = SqliteStorageAdapter::open(&path, TracingSink::shared())
            .await
            .unwrap();
        let repo = storage.ensure_repository("/r", "r").await.unwrap();
        storage
            .save(repo, &[DeletedFileRecord::new("/r/a.ts", 1, Some(10))])
            .await
            .unwrap();
        storage.close().await.unwrap();
        repo
    };

    let storage = SqliteStorageAdapter::open(&path, TracingSink::shared())
        .await
        .unwrap();
    assert_eq!(storage.ensure_repository("/r", "r").await.unwrap(), repo);
    assert_eq!(
        storage.load(repo).await.unwrap(),
        vec![DeletedFileRecord::new("/r/a.ts", 1, Some(10))]
    );
}

#[tokio::test]
async fn test_backup_opens_as_fresh_database() {
    let temp = tempfile::tempdir().unwrap();
    let storage = SqliteStorageAdapter::open(temp.path().join("log.db"), TracingSink::shared())
        .await
        .unwrap();
    let repo = storage.ensure_repository("/r", "r").await.unwrap();
    storage
        .save(
            repo,
            &[
                DeletedFileRecord::new("/r/a", 1, Some(1)),
                DeletedFileRecord::new("/r/b", 2, Some(2)),
            ],
        )
        .await
        .unwrap();

    let bytes = storage.backup().await.unwrap();
    let copy_path = temp.path().join("copy.db");
    std::fs::write(&copy_path, &bytes).unwrap();

    let copy = SqliteStorageAdapter::open(&copy_path, TracingSink::shared())
        .await
        .unwrap();
    assert_eq!(copy.load(repo).await.unwrap(), storage.load(repo).await.unwrap());
    assert_eq!(copy.stats().await.unwrap().repo_count, 1);
}

#[tokio::test]
async fn test_failed_batch_commits_nothing() {
    let storage = SqliteStorageAdapter::open(":memory:", TracingSink::shared())
        .await
        .unwrap();
    let repo = storage.ensure_repository("/r", "r").await.unwrap();

    // Foreign key enforcement rejects an unknown repository on the first insert.
    let err = storage
        .save(
            repo + 41,
            &[
                DeletedFileRecord::new("/r/a", 1, None),
                DeletedFileRecord::new("/r/b", 2, None),
            ],
        )
        .await
        .unwrap_err();
    match err {
        StorageError::Batch { path, .. } => assert_eq!(path, "/r/a"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(storage.stats().await.unwrap().deletion_count, 0);
}

#[tokio::test]
async fn test_order_out_of_range_aborts_batch() {
    let storage = SqliteStorageAdapter::open(":memory:", TracingSink::shared())
        .await
        .unwrap();
    let repo = storage.ensure_repository("/r", "r").await.unwrap();

    let err = storage
        .save(
            repo,
            &[
                DeletedFileRecord::new("/r/ok", 1, None),
                DeletedFileRecord::new("/r/huge", u64::MAX, None),
            ],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Batch { ref path, .. } if path == "/r/huge"));
    assert!(storage.load(repo).await.unwrap().is_empty());
}
