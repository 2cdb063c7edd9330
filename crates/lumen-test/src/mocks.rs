//! Failure-injecting substrate for testing.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use lumen_backstore::{
    RawTransaction, RowId, StorageError, StorageResult, StoreCatalog, Substrate, TransactionMode,
};

/// Wraps a real substrate and fails chosen operations on demand.
///
/// Switches are shared, so a test can flip them after handing the
/// substrate to a `Backstore`.
#[derive(Debug)]
pub struct FailingSubstrate {
    inner: Arc<dyn Substrate>,
    fail_open: AtomicBool,
    fail_upgrade_commit: AtomicBool,
    fail_writes: AtomicBool,
    upgrades: AtomicUsize,
}

impl FailingSubstrate {
    /// Wrap `inner` with every failure switched off.
    #[must_use]
    pub fn new(inner: Arc<dyn Substrate>) -> Self {
        Self {
            inner,
            fail_open: AtomicBool::new(false),
            fail_upgrade_commit: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            upgrades: AtomicUsize::new(0),
        }
    }

    /// Make `open` fail, as if the store were locked by another handle.
    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Make every upgrade transaction abort at commit.
    pub fn set_fail_upgrade_commit(&self, fail: bool) {
        self.fail_upgrade_commit.store(fail, Ordering::SeqCst);
    }

    /// Make every `put` and `delete` fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// How many upgrade transactions were started.
    #[must_use]
    pub fn upgrade_count(&self) -> usize {
        self.upgrades.load(Ordering::SeqCst)
    }

    fn wrap(&self, inner: Box<dyn RawTransaction>, fail_commit: bool) -> Box<dyn RawTransaction> {
        Box::new(FailingTransaction {
            inner,
            fail_commit,
            fail_writes: self.fail_writes.load(Ordering::SeqCst),
        })
    }
}

#[async_trait]
impl Substrate for FailingSubstrate {
    fn kind(&self) -> &'static str {
        "failing"
    }

    async fn open(&self) -> StorageResult<StoreCatalog> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(StorageError::Internal(
                "injected open failure: store is locked".into(),
            ));
        }
        self.inner.open().await
    }

    async fn containers(&self) -> StorageResult<BTreeSet<String>> {
        self.inner.containers().await
    }

    async fn begin(&self, mode: TransactionMode) -> StorageResult<Box<dyn RawTransaction>> {
        let inner = self.inner.begin(mode).await?;
        Ok(self.wrap(inner, false))
    }

    async fn begin_upgrade(&self, version: u32) -> StorageResult<Box<dyn RawTransaction>> {
        self.upgrades.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.begin_upgrade(version).await?;
        Ok(self.wrap(inner, self.fail_upgrade_commit.load(Ordering::SeqCst)))
    }

    async fn close(&self) -> StorageResult<()> {
        self.inner.close().await
    }
}

struct FailingTransaction {
    inner: Box<dyn RawTransaction>,
    fail_commit: bool,
    fail_writes: bool,
}

impl FailingTransaction {
    fn check_write(&self, op: &str, container: &str, key: RowId) -> StorageResult<()> {
        if self.fail_writes {
            return Err(StorageError::Internal(format!(
                "injected {op} failure on {container}/{key}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RawTransaction for FailingTransaction {
    fn mode(&self) -> TransactionMode {
        self.inner.mode()
    }

    async fn create_container(&self, name: &str) -> StorageResult<()> {
        self.inner.create_container(name).await
    }

    async fn get(&self, container: &str, key: RowId) -> StorageResult<Option<Vec<u8>>> {
        self.inner.get(container, key).await
    }

    async fn scan(&self, container: &str) -> StorageResult<Vec<(RowId, Vec<u8>)>> {
        self.inner.scan(container).await
    }

    async fn last_key(&self, container: &str) -> StorageResult<Option<RowId>> {
        self.inner.last_key(container).await
    }

    async fn put(&self, container: &str, key: RowId, value: Vec<u8>) -> StorageResult<()> {
        self.check_write("put", container, key)?;
        self.inner.put(container, key, value).await
    }

    async fn delete(&self, container: &str, key: RowId) -> StorageResult<()> {
        self.check_write("delete", container, key)?;
        self.inner.delete(container, key).await
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        if self.fail_commit {
            self.inner.abort().await?;
            return Err(StorageError::Internal("injected upgrade commit failure".into()));
        }
        self.inner.commit().await
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        self.inner.abort().await
    }
}

#[cfg(test)]
mod tests {
    use lumen_backstore::MemorySubstrate;

    use super::*;

    #[tokio::test]
    async fn test_failed_upgrade_commit_discards() {
        let substrate = FailingSubstrate::new(Arc::new(MemorySubstrate::new()));
        substrate.set_fail_upgrade_commit(true);

        let tx = substrate.begin_upgrade(1).await.unwrap();
        tx.create_container("t").await.unwrap();
        assert!(tx.commit().await.is_err());
        assert!(substrate.containers().await.unwrap().is_empty());
        assert_eq!(substrate.upgrade_count(), 1);
    }

    #[tokio::test]
    async fn test_fail_open() {
        let substrate = FailingSubstrate::new(Arc::new(MemorySubstrate::new()));
        substrate.set_fail_open(true);
        assert!(substrate.open().await.is_err());
        substrate.set_fail_open(false);
        assert!(substrate.open().await.is_ok());
    }
}
