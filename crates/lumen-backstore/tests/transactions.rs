//! Row access through transactions, flat and bundled.

use std::sync::Arc;

use lumen_backstore::{
    Backstore, Layout, MemorySubstrate, Row, StorageError, TransactionMode, init_store,
};
use lumen_config::{Backend, StorageConfig};
use lumen_test::{FailingSubstrate, hr_schema, job_row, job_rows, unique_schema_name};

async fn write_and_read(store: &Backstore) {
    let tx = store
        .create_tx(TransactionMode::ReadWrite, &["Job", "Employee"])
        .await
        .unwrap();
    tx.table("Job").unwrap().put(&job_rows(1, 3)).await.unwrap();
    tx.table("Employee")
        .unwrap()
        .put(&[Row::new(10, serde_json::json!({"name": "Ada", "job_id": 1}))])
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let tx = store
        .create_tx(TransactionMode::ReadOnly, &[])
        .await
        .unwrap();
    let jobs = tx.table("Job").unwrap().get(&[]).await.unwrap();
    assert_eq!(jobs, job_rows(1, 3));
    let picked = tx.table("Job").unwrap().get(&[3, 99, 1]).await.unwrap();
    assert_eq!(picked.iter().map(Row::id).collect::<Vec<_>>(), [3, 1]);
    assert_eq!(tx.table("Employee").unwrap().get(&[]).await.unwrap().len(), 1);
    tx.abort().await.unwrap();
}

#[tokio::test]
async fn test_memory_rows_round_trip() {
    let store = Backstore::memory(hr_schema(&unique_schema_name("hr")));
    store.init().await.unwrap();
    write_and_read(&store).await;
}

#[tokio::test]
async fn test_durable_rows_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let name = unique_schema_name("hr");
    let store = Backstore::durable(hr_schema(&name), dir.path());
    store.init().await.unwrap();
    write_and_read(&store).await;
    store.close().await.unwrap();

    let reopened = Backstore::durable(hr_schema(&name), dir.path());
    reopened.init().await.unwrap();
    let tx = reopened
        .create_tx(TransactionMode::ReadOnly, &["Job"])
        .await
        .unwrap();
    assert_eq!(tx.table("Job").unwrap().get(&[]).await.unwrap(), job_rows(1, 3));
    tx.abort().await.unwrap();
    assert_eq!(reopened.next_row_id().unwrap(), 11);
    reopened.close().await.unwrap();
}

/// A transaction keeps reading the state it began with.
async fn check_snapshot_isolation(store: &Backstore) {
    let reader = store
        .create_tx(TransactionMode::ReadOnly, &["Job"])
        .await
        .unwrap();
    let before = reader.table("Job").unwrap().get(&[]).await.unwrap().len();

    let writer = store
        .create_tx(TransactionMode::ReadWrite, &["Job"])
        .await
        .unwrap();
    writer.table("Job").unwrap().put(&job_rows(1, 2)).await.unwrap();
    writer.commit().await.unwrap();

    let after = reader.table("Job").unwrap().get(&[]).await.unwrap().len();
    assert_eq!((before, after), (0, 0));
    reader.abort().await.unwrap();

    let fresh = store
        .create_tx(TransactionMode::ReadOnly, &["Job"])
        .await
        .unwrap();
    assert_eq!(fresh.table("Job").unwrap().get(&[]).await.unwrap().len(), 2);
    fresh.abort().await.unwrap();
}

#[tokio::test]
async fn test_memory_snapshot_isolation() {
    let store = Backstore::memory(hr_schema(&unique_schema_name("hr")));
    store.init().await.unwrap();
    check_snapshot_isolation(&store).await;
}

#[tokio::test]
async fn test_durable_snapshot_isolation() {
    let dir = tempfile::tempdir().unwrap();
    let store = Backstore::durable(hr_schema(&unique_schema_name("hr")), dir.path());
    store.init().await.unwrap();
    check_snapshot_isolation(&store).await;
    store.close().await.unwrap();
}

#[tokio::test]
async fn test_reserved_row_id_rejected() {
    let store = Backstore::memory(hr_schema(&unique_schema_name("hr")));
    store.init().await.unwrap();
    let tx = store
        .create_tx(TransactionMode::ReadWrite, &["Job"])
        .await
        .unwrap();
    assert!(matches!(
        tx.table("Job").unwrap().put(&[job_row(0, "Ghost", 0)]).await,
        Err(StorageError::InvalidKey(_))
    ));
    tx.commit().await.unwrap();
}

#[tokio::test]
async fn test_upsert_and_remove() {
    let store = Backstore::memory(hr_schema(&unique_schema_name("hr")));
    store.init().await.unwrap();

    let tx = store
        .create_tx(TransactionMode::ReadWrite, &["Job"])
        .await
        .unwrap();
    let jobs = tx.table("Job").unwrap();
    jobs.put(&[job_row(1, "Engineer", 100)]).await.unwrap();
    jobs.put(&[job_row(1, "Manager", 200)]).await.unwrap();
    jobs.remove(&[42]).await.unwrap();
    assert_eq!(jobs.get(&[]).await.unwrap(), [job_row(1, "Manager", 200)]);

    jobs.remove(&[1]).await.unwrap();
    assert!(jobs.get(&[]).await.unwrap().is_empty());
    tx.commit().await.unwrap();
}

#[tokio::test]
async fn test_write_failure_discards_scope() {
    let substrate = Arc::new(FailingSubstrate::new(Arc::new(MemorySubstrate::new())));
    let store = Backstore::new(hr_schema(&unique_schema_name("hr")), substrate.clone());
    store.init().await.unwrap();

    substrate.set_fail_writes(true);
    let tx = store
        .create_tx(TransactionMode::ReadWrite, &[])
        .await
        .unwrap();
    let err = tx
        .table("Job")
        .unwrap()
        .put(&[job_row(1, "Engineer", 100)])
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::TransactionAbort(_)));
    assert!(tx.is_aborted());
    assert!(matches!(
        tx.commit().await,
        Err(StorageError::TransactionAbort(_))
    ));

    substrate.set_fail_writes(false);
    let tx = store
        .create_tx(TransactionMode::ReadOnly, &["Job"])
        .await
        .unwrap();
    assert!(tx.table("Job").unwrap().get(&[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_readonly_scope_rejects_writes() {
    let store = Backstore::memory(hr_schema(&unique_schema_name("hr")));
    store.init().await.unwrap();
    let tx = store
        .create_tx(TransactionMode::ReadOnly, &["Job"])
        .await
        .unwrap();
    assert!(tx.table("Job").unwrap().remove(&[1]).await.is_err());
    assert!(matches!(
        tx.table("Employee"),
        Err(StorageError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_unknown_scope_rejected() {
    let store = Backstore::memory(hr_schema(&unique_schema_name("hr")));
    store.init().await.unwrap();
    assert!(matches!(
        store.create_tx(TransactionMode::ReadOnly, &["Payroll"]).await,
        Err(StorageError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_durable_bundled_pages() {
    let dir = tempfile::tempdir().unwrap();
    let name = unique_schema_name("hr");
    let store = Backstore::durable(hr_schema(&name), dir.path()).with_bundled_mode(true);
    store.init().await.unwrap();

    let tx = store
        .create_tx(TransactionMode::ReadWrite, &["Job", "Job_RowId"])
        .await
        .unwrap();
    assert_eq!(tx.table("Job").unwrap().layout(), Layout::Bundled);
    assert_eq!(tx.table("Job_RowId").unwrap().layout(), Layout::Flat);
    tx.table("Job").unwrap().put(&job_rows(1, 600)).await.unwrap();
    tx.table("Job").unwrap().remove(&[2, 513]).await.unwrap();
    tx.commit().await.unwrap();
    store.close().await.unwrap();

    let reopened = Backstore::durable(hr_schema(&name), dir.path()).with_bundled_mode(true);
    reopened.init().await.unwrap();
    let tx = reopened
        .create_tx(TransactionMode::ReadOnly, &["Job"])
        .await
        .unwrap();
    let rows = tx.table("Job").unwrap().get(&[]).await.unwrap();
    assert_eq!(rows.len(), 598);
    assert!(rows.windows(2).all(|w| w[0].id() < w[1].id()));
    assert_eq!(
        tx.table("Job").unwrap().get(&[600]).await.unwrap(),
        [job_row(600, "job-600", 599_000)]
    );
    tx.abort().await.unwrap();
    assert_eq!(reopened.next_row_id().unwrap(), 601);
    reopened.close().await.unwrap();
}

#[tokio::test]
async fn test_bundled_clear_all() {
    let store = Backstore::memory(hr_schema(&unique_schema_name("hr"))).with_bundled_mode(true);
    store.init().await.unwrap();
    let tx = store
        .create_tx(TransactionMode::ReadWrite, &["Job"])
        .await
        .unwrap();
    let jobs = tx.table("Job").unwrap();
    jobs.put(&job_rows(1, 1100)).await.unwrap();
    jobs.remove(&[]).await.unwrap();
    assert!(jobs.get(&[]).await.unwrap().is_empty());
    tx.commit().await.unwrap();
}

#[tokio::test]
async fn test_init_store_durable_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = StorageConfig {
        backend: Backend::Durable,
        data_dir: Some(dir.path().to_path_buf()),
        bundled: false,
    };
    let name = unique_schema_name("hr");
    let store = init_store(hr_schema(&name), &config).await.unwrap();
    assert!(store.is_initialized());
    assert!(dir.path().join(&name).exists());
    store.close().await.unwrap();
}
