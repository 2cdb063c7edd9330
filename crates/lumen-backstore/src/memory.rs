//! Transient substrate backed by process memory.
//!
//! Containers are `BTreeMap<RowId, Vec<u8>>`, so values are always copies of
//! what callers handed in and scans come back in key order. The committed
//! state is copy-on-write: `begin` takes a snapshot, which is one `Arc`
//! clone, and the transaction reads that snapshot plus its own staged writes
//! until it ends. Commit swaps in a new state under one write lock.
//!
//! Write-write conflicts are detected at commit: if another transaction
//! committed a different value for a key this one also wrote, the commit
//! fails and nothing is applied.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};
use crate::row::RowId;
use crate::substrate::{RawTransaction, StoreCatalog, Substrate, TransactionMode};

type Container = BTreeMap<RowId, Vec<u8>>;

#[derive(Debug, Default, Clone)]
struct MemoryState {
    version: Option<u32>,
    containers: BTreeMap<String, Arc<Container>>,
}

impl MemoryState {
    fn value(&self, container: &str, key: RowId) -> Option<&Vec<u8>> {
        self.containers.get(container).and_then(|c| c.get(&key))
    }
}

fn lock_err<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::Internal(e.to_string())
}

/// In-memory substrate for tests and ephemeral databases.
///
/// Cloning yields another handle onto the same containers.
#[derive(Debug, Default, Clone)]
pub struct MemorySubstrate {
    state: Arc<RwLock<Arc<MemoryState>>>,
}

impl MemorySubstrate {
    /// Create an empty substrate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn current(&self) -> StorageResult<Arc<MemoryState>> {
        Ok(Arc::clone(&*self.state.read().map_err(lock_err)?))
    }

    fn begin_inner(
        &self,
        mode: TransactionMode,
        upgrade_to: Option<u32>,
    ) -> StorageResult<MemoryTransaction> {
        Ok(MemoryTransaction {
            state: Arc::clone(&self.state),
            snapshot: self.current()?,
            mode,
            upgrade_to,
            staged: Mutex::new(Staged::default()),
        })
    }
}

#[async_trait]
impl Substrate for MemorySubstrate {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn open(&self) -> StorageResult<StoreCatalog> {
        let state = self.current()?;
        Ok(StoreCatalog {
            version: state.version,
            containers: state.containers.keys().cloned().collect(),
        })
    }

    async fn containers(&self) -> StorageResult<BTreeSet<String>> {
        Ok(self.current()?.containers.keys().cloned().collect())
    }

    async fn begin(&self, mode: TransactionMode) -> StorageResult<Box<dyn RawTransaction>> {
        Ok(Box::new(self.begin_inner(mode, None)?))
    }

    async fn begin_upgrade(&self, version: u32) -> StorageResult<Box<dyn RawTransaction>> {
        Ok(Box::new(
            self.begin_inner(TransactionMode::ReadWrite, Some(version))?,
        ))
    }

    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Staged {
    created: BTreeSet<String>,
    // `None` marks a staged delete.
    writes: BTreeMap<String, BTreeMap<RowId, Option<Vec<u8>>>>,
}

#[derive(Debug)]
struct MemoryTransaction {
    state: Arc<RwLock<Arc<MemoryState>>>,
    snapshot: Arc<MemoryState>,
    mode: TransactionMode,
    upgrade_to: Option<u32>,
    staged: Mutex<Staged>,
}

impl MemoryTransaction {
    fn check_writable(&self) -> StorageResult<()> {
        if self.mode == TransactionMode::ReadOnly {
            return Err(StorageError::ReadOnly(
                "write attempted in a readonly transaction".into(),
            ));
        }
        Ok(())
    }

    fn check_container(
        state: &MemoryState,
        staged: &Staged,
        container: &str,
    ) -> StorageResult<()> {
        if state.containers.contains_key(container) || staged.created.contains(container) {
            Ok(())
        } else {
            Err(StorageError::NotFound(format!("container '{container}'")))
        }
    }

    fn stage(&self, container: &str, key: RowId, value: Option<Vec<u8>>) -> StorageResult<()> {
        self.check_writable()?;
        let mut staged = self.staged.lock().map_err(lock_err)?;
        Self::check_container(&self.snapshot, &staged, container)?;
        staged
            .writes
            .entry(container.to_owned())
            .or_default()
            .insert(key, value);
        Ok(())
    }

    /// Fail if another commit changed a key this transaction wrote.
    fn check_conflicts(&self, live: &MemoryState, staged: &Staged) -> StorageResult<()> {
        for (container, writes) in &staged.writes {
            for key in writes.keys() {
                if live.value(container, *key) != self.snapshot.value(container, *key) {
                    warn!(container = %container, key, "write conflict on memory commit");
                    return Err(StorageError::TransactionAbort(format!(
                        "write conflict on {container}/{key}"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RawTransaction for MemoryTransaction {
    fn mode(&self) -> TransactionMode {
        self.mode
    }

    async fn create_container(&self, name: &str) -> StorageResult<()> {
        if self.upgrade_to.is_none() {
            return Err(StorageError::Internal(format!(
                "cannot create container '{name}' outside an upgrade"
            )));
        }
        let mut staged = self.staged.lock().map_err(lock_err)?;
        staged.created.insert(name.to_owned());
        Ok(())
    }

    async fn get(&self, container: &str, key: RowId) -> StorageResult<Option<Vec<u8>>> {
        let staged = self.staged.lock().map_err(lock_err)?;
        Self::check_container(&self.snapshot, &staged, container)?;
        if let Some(entry) = staged.writes.get(container).and_then(|w| w.get(&key)) {
            return Ok(entry.clone());
        }
        Ok(self.snapshot.value(container, key).cloned())
    }

    async fn scan(&self, container: &str) -> StorageResult<Vec<(RowId, Vec<u8>)>> {
        let staged = self.staged.lock().map_err(lock_err)?;
        Self::check_container(&self.snapshot, &staged, container)?;

        let mut merged: Container = self
            .snapshot
            .containers
            .get(container)
            .map(|c| (**c).clone())
            .unwrap_or_default();
        if let Some(writes) = staged.writes.get(container) {
            for (key, value) in writes {
                match value {
                    Some(v) => {
                        merged.insert(*key, v.clone());
                    },
                    None => {
                        merged.remove(key);
                    },
                }
            }
        }
        Ok(merged.into_iter().collect())
    }

    async fn last_key(&self, container: &str) -> StorageResult<Option<RowId>> {
        let has_writes = {
            let staged = self.staged.lock().map_err(lock_err)?;
            Self::check_container(&self.snapshot, &staged, container)?;
            staged.writes.contains_key(container)
        };
        if has_writes {
            return Ok(self.scan(container).await?.last().map(|(id, _)| *id));
        }
        Ok(self
            .snapshot
            .containers
            .get(container)
            .and_then(|c| c.keys().next_back().copied()))
    }

    async fn put(&self, container: &str, key: RowId, value: Vec<u8>) -> StorageResult<()> {
        self.stage(container, key, Some(value))
    }

    async fn delete(&self, container: &str, key: RowId) -> StorageResult<()> {
        self.stage(container, key, None)
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let staged = self.staged.lock().map_err(lock_err)?;
        if staged.created.is_empty() && staged.writes.is_empty() && self.upgrade_to.is_none() {
            return Ok(());
        }
        let mut slot = self.state.write().map_err(lock_err)?;
        let live: &MemoryState = &**slot;

        // Validate before touching anything so a failed commit changes nothing.
        if !Arc::ptr_eq(&self.snapshot, &*slot) {
            self.check_conflicts(live, &staged)?;
        }
        for container in staged.writes.keys() {
            Self::check_container(live, &staged, container)?;
        }

        let mut next = live.clone();
        for name in &staged.created {
            if !next.containers.contains_key(name) {
                debug!(container = %name, "created memory container");
                next.containers.insert(name.clone(), Arc::new(Container::new()));
            }
        }
        for (container, writes) in &staged.writes {
            let Some(target) = next.containers.get_mut(container) else {
                continue;
            };
            let target = Arc::make_mut(target);
            for (key, value) in writes {
                match value {
                    Some(v) => {
                        target.insert(*key, v.clone());
                    },
                    None => {
                        target.remove(key);
                    },
                }
            }
        }
        if let Some(version) = self.upgrade_to {
            next.version = Some(version);
        }
        *slot = Arc::new(next);
        Ok(())
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        debug!(mode = %self.mode, "discarded memory transaction");
        Ok(())
    }
}
